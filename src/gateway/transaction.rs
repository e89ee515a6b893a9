//! Callback-style transactions.
//!
//! The work closure receives the live [`TxSession`]. Its result decides the
//! outcome: `Ok` commits, `Err` rolls back. Exactly one of commit or rollback
//! is issued on the normal path; a rollback after a failed commit is best
//! effort only.

use super::{SqlGateway, TxSession};
use crate::error::{ErrorKind, GatewayError, GatewayResult};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Future returned by transactional work, borrowing the session for `'t`.
pub type TxWork<'t, T> = BoxFuture<'t, GatewayResult<T>>;

/// Drive `work` inside `session`, then commit or roll back.
///
/// - work fails: roll back and return the work error. If the rollback fails
///   too, both errors are composed with
///   [`GatewayError::with_rollback_failure`](crate::error::GatewayError::with_rollback_failure).
/// - work succeeds: commit. A commit failure is returned as `Failed`.
/// - `deadline` elapses: the work future is dropped, the transaction is
///   rolled back and a `Failed` error is returned.
///
/// A panic inside `work` unwinds through here; the session is dropped and the
/// driver rolls the transaction back.
pub async fn run_transaction<T, F>(
    mut session: Box<dyn TxSession>,
    work: F,
    deadline: Option<Duration>,
) -> GatewayResult<T>
where
    F: for<'t> FnOnce(&'t mut dyn TxSession) -> TxWork<'t, T> + Send,
    T: Send,
{
    let transaction_id = session.id().to_string();

    let outcome = {
        let fut = work(session.as_mut());
        match deadline {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(ErrorKind::Failed.new(format!(
                    "Transaction timed out after {}ms",
                    limit.as_millis()
                ))),
            },
            None => fut.await,
        }
    };

    match outcome {
        Err(err) => {
            warn!(
                transaction_id = %transaction_id,
                error = %err,
                "Rollback transaction"
            );
            match session.rollback().await {
                Ok(()) => Err(err),
                Err(rollback_err) => {
                    error!(
                        transaction_id = %transaction_id,
                        error = %rollback_err,
                        "Transaction rollback failed"
                    );
                    Err(err.with_rollback_failure(rollback_err))
                }
            }
        }
        Ok(value) => match session.commit().await {
            Ok(()) => {
                debug!(transaction_id = %transaction_id, "Transaction committed");
                Ok(value)
            }
            Err(commit_err) => {
                warn!(
                    transaction_id = %transaction_id,
                    error = %commit_err,
                    "Transaction commit failed"
                );
                if let Err(rollback_err) = session.rollback().await {
                    debug!(
                        transaction_id = %transaction_id,
                        error = %rollback_err,
                        "Rollback after failed commit also failed"
                    );
                }
                Err(GatewayError::wrap(commit_err, "commit transaction").with_kind(ErrorKind::Failed))
            }
        },
    }
}

/// Transaction entry points available on every [`SqlGateway`].
///
/// ```ignore
/// let id = gateway
///     .transaction(|tx| {
///         Box::pin(async move {
///             tx.exec("INSERT INTO orders (sku) VALUES (?)", &["A-1".into()]).await?;
///             tx.exec("UPDATE stock SET qty = qty - 1 WHERE sku = ?", &["A-1".into()]).await?;
///             Ok(())
///         })
///     })
///     .await?;
/// ```
pub trait SqlGatewayExt: SqlGateway {
    /// Run `work` in a new transaction.
    ///
    /// A failure to begin is returned as is and `work` is never called.
    fn transaction<'a, T, F>(&'a self, work: F) -> impl Future<Output = GatewayResult<T>> + Send + 'a
    where
        F: for<'t> FnOnce(&'t mut dyn TxSession) -> TxWork<'t, T> + Send + 'a,
        T: Send + 'a,
    {
        async move {
            let session = self.begin().await?;
            run_transaction(session, work, None).await
        }
    }

    /// Like [`SqlGatewayExt::transaction`], rolling back if `work` does not
    /// finish within `limit`.
    fn transaction_within<'a, T, F>(
        &'a self,
        limit: Duration,
        work: F,
    ) -> impl Future<Output = GatewayResult<T>> + Send + 'a
    where
        F: for<'t> FnOnce(&'t mut dyn TxSession) -> TxWork<'t, T> + Send + 'a,
        T: Send + 'a,
    {
        async move {
            let session = self.begin().await?;
            run_transaction(session, work, Some(limit)).await
        }
    }
}

impl<G: SqlGateway + ?Sized> SqlGatewayExt for G {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ExecResult, RowCursor};
    use crate::models::SqlArg;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Script {
        /// Kind of the error commit returns, if it fails
        commit_error: Option<ErrorKind>,
        fail_rollback: bool,
    }

    struct FakeSession {
        script: Script,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl FakeSession {
        fn boxed(script: Script) -> (Box<dyn TxSession>, Arc<Mutex<Vec<&'static str>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            let session = FakeSession {
                script,
                calls: Arc::clone(&calls),
            };
            (Box::new(session), calls)
        }

        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl TxSession for FakeSession {
        fn id(&self) -> &str {
            "tx_test"
        }

        async fn exec(&mut self, _statement: &str, _args: &[SqlArg]) -> GatewayResult<ExecResult> {
            self.record("exec");
            Ok(ExecResult::new(Some(1), Some(1)))
        }

        async fn query(&mut self, _statement: &str, _args: &[SqlArg]) -> GatewayResult<RowCursor> {
            self.record("query");
            Ok(RowCursor::buffered(Vec::new()))
        }

        async fn commit(&mut self) -> GatewayResult<()> {
            self.record("commit");
            if let Some(kind) = self.script.commit_error {
                return Err(kind.new("commit refused"));
            }
            Ok(())
        }

        async fn rollback(&mut self) -> GatewayResult<()> {
            self.record("rollback");
            if self.script.fail_rollback {
                return Err(ErrorKind::Failed.new("rollback refused"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_success_commits_once() {
        let (session, calls) = FakeSession::boxed(Script::default());
        let value = run_transaction(
            session,
            |tx| {
                Box::pin(async move {
                    tx.exec("INSERT", &[]).await?;
                    Ok(7)
                })
            },
            None,
        )
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(*calls.lock().unwrap(), vec!["exec", "commit"]);
    }

    #[tokio::test]
    async fn test_work_error_rolls_back() {
        let (session, calls) = FakeSession::boxed(Script::default());
        let err = run_transaction::<(), _>(
            session,
            |_tx| Box::pin(async move { Err(ErrorKind::Conflict.new("duplicate")) }),
            None,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!err.is_dual_failure());
        assert_eq!(*calls.lock().unwrap(), vec!["rollback"]);
    }

    #[tokio::test]
    async fn test_work_and_rollback_failure_composed() {
        let (session, calls) = FakeSession::boxed(Script {
            fail_rollback: true,
            ..Default::default()
        });
        let err = run_transaction::<(), _>(
            session,
            |_tx| Box::pin(async move { Err(ErrorKind::Invalidated.new("bad row")) }),
            None,
        )
        .await
        .unwrap_err();

        assert!(err.is_dual_failure());
        assert_eq!(err.kind(), ErrorKind::Invalidated);
        assert!(err.to_string().contains("bad row"));
        assert!(err.to_string().contains("rollback refused"));
        assert_eq!(*calls.lock().unwrap(), vec!["rollback"]);
    }

    #[tokio::test]
    async fn test_commit_failure_is_failed() {
        for kind in [ErrorKind::Unknown, ErrorKind::Conflict, ErrorKind::NotFound] {
            let (session, calls) = FakeSession::boxed(Script {
                commit_error: Some(kind),
                ..Default::default()
            });
            let err = run_transaction(session, |_tx| Box::pin(async move { Ok(()) }), None)
                .await
                .unwrap_err();

            assert_eq!(err.kind(), ErrorKind::Failed, "commit error kind {}", kind);
            assert!(err.to_string().starts_with("commit transaction: "));
            assert!(err.to_string().contains("commit refused"));
            assert_eq!(*calls.lock().unwrap(), vec!["commit", "rollback"]);
        }
    }

    #[tokio::test]
    async fn test_deadline_rolls_back() {
        let (session, calls) = FakeSession::boxed(Script::default());
        let err = run_transaction::<(), _>(
            session,
            |_tx| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                })
            },
            Some(Duration::from_millis(20)),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Failed);
        assert!(err.to_string().contains("timed out"));
        assert_eq!(*calls.lock().unwrap(), vec!["rollback"]);
    }
}
