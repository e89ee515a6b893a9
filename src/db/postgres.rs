//! PostgreSQL handler.
//!
//! Mirrors `mysql.rs`. PostgreSQL does not report a last insert id; use
//! `RETURNING` with [`SqlGateway::query`] instead.

use crate::config::DEFAULT_ROW_BUFFER;
use crate::db::connect::{self, SessionMode};
use crate::db::params::postgres_query;
use crate::db::timeout_error;
use crate::db::types::DecodeRow;
use crate::error::{ErrorKind, GatewayError, GatewayResult};
use crate::gateway::{ExecResult, RowCursor, SqlGateway, TxSession, generate_transaction_id};
use crate::models::{Backend, SqlArg, SqlConfig};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgQueryResult};
use sqlx::{Connection, Executor, Postgres, PgConnection, PgPool, Transaction};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Gateway handler backed by a PostgreSQL connection pool.
pub struct PgHandler {
    pool: PgPool,
    multi_options: PgConnectOptions,
    query_timeout: Duration,
    /// Connection URL with the password masked
    display_url: String,
}

impl PgHandler {
    /// Open the primary pool.
    ///
    /// The pool connects eagerly, so an unreachable server is reported here
    /// as `Failed` rather than on first use.
    pub async fn connect(config: &SqlConfig) -> GatewayResult<Self> {
        let display_url = connect::mask_url(&connect::connection_url(config, SessionMode::Single)?);
        let options = connect::postgres_connect_options(config, SessionMode::Single)?;
        let multi_options = connect::postgres_connect_options(config, SessionMode::Multi)?;

        debug!(url = %display_url, "Opening PostgreSQL pool");
        let pool = connect::pool_options::<Postgres>(&config.pool)
            .connect_with(options)
            .await
            .map_err(|e| GatewayError::from_sqlx(e, "Failed to connect to PostgreSQL"))?;

        info!(
            url = %display_url,
            max_connections = config.pool.max_connections_or_default(),
            "PostgreSQL pool opened"
        );

        Ok(Self {
            pool,
            multi_options,
            query_timeout: config.pool.query_timeout(),
            display_url,
        })
    }
}

fn exec_result(result: &PgQueryResult) -> ExecResult {
    ExecResult::new(None, Some(result.rows_affected()))
}

#[async_trait]
impl SqlGateway for PgHandler {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    async fn exec(&self, statement: &str, args: &[SqlArg]) -> GatewayResult<ExecResult> {
        debug!(sql = %statement, args = args.len(), "Executing statement");

        let query = postgres_query(statement, args);
        match timeout(self.query_timeout, query.execute(&self.pool)).await {
            Ok(Ok(r)) => Ok(exec_result(&r)),
            Ok(Err(e)) => Err(GatewayError::from_sqlx(e, "execute statement")),
            Err(_) => Err(timeout_error("execute statement", self.query_timeout)),
        }
    }

    async fn query(&self, statement: &str, args: &[SqlArg]) -> GatewayResult<RowCursor> {
        debug!(sql = %statement, args = args.len(), "Executing query");

        let pool = self.pool.clone();
        let sql = statement.to_owned();
        let args = args.to_vec();
        let query_timeout = self.query_timeout;
        let (sender, receiver) = mpsc::channel(DEFAULT_ROW_BUFFER);

        let task = tokio::spawn(async move {
            let mut rows = postgres_query(&sql, &args).fetch(&pool);
            let mut columns = None;
            loop {
                let next = match timeout(query_timeout, rows.try_next()).await {
                    Ok(Ok(Some(row))) => Ok(row.to_row(&mut columns)),
                    Ok(Ok(None)) => break,
                    Ok(Err(e)) => Err(GatewayError::from_sqlx(e, "query rows")),
                    Err(_) => Err(timeout_error("query rows", query_timeout)),
                };
                let failed = next.is_err();
                if sender.send(next).await.is_err() || failed {
                    break;
                }
            }
        });

        RowCursor::streaming(receiver, task).await
    }

    async fn begin(&self) -> GatewayResult<Box<dyn TxSession>> {
        let transaction = match timeout(self.query_timeout, self.pool.begin()).await {
            Ok(Ok(tx)) => tx,
            Ok(Err(e)) => return Err(GatewayError::from_sqlx(e, "begin transaction")),
            Err(_) => return Err(timeout_error("begin transaction", self.query_timeout)),
        };
        let id = generate_transaction_id();

        info!(transaction_id = %id, "Transaction started (PostgreSQL)");

        Ok(Box::new(PgTxSession {
            id,
            transaction: Some(transaction),
            query_timeout: self.query_timeout,
        }))
    }

    async fn multi_exec(&self, statements: &str) -> GatewayResult<()> {
        debug!(url = %self.display_url, "Opening multi-statement connection");

        let mut conn =
            match timeout(self.query_timeout, PgConnection::connect_with(&self.multi_options)).await {
                Ok(Ok(conn)) => conn,
                Ok(Err(e)) => {
                    return Err(GatewayError::from_sqlx(e, "open multi-statement connection"));
                }
                Err(_) => {
                    return Err(timeout_error("open multi-statement connection", self.query_timeout));
                }
            };

        // A plain &str carries no arguments and goes through the text protocol
        let result = timeout(self.query_timeout, conn.execute(statements)).await;

        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to close multi-statement connection");
        }

        match result {
            Ok(Ok(r)) => {
                debug!(rows_affected = r.rows_affected(), "Multi-statement batch executed");
                Ok(())
            }
            Ok(Err(e)) => Err(GatewayError::from_sqlx(e, "execute statements")),
            Err(_) => Err(timeout_error("execute statements", self.query_timeout)),
        }
    }

    async fn ping(&self) -> GatewayResult<()> {
        let query = sqlx::query("SELECT 1").persistent(false);
        match timeout(self.query_timeout, query.execute(&self.pool)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(GatewayError::from_sqlx(e, "ping")),
            Err(_) => Err(timeout_error("ping", self.query_timeout)),
        }
    }

    async fn close(&self) {
        self.pool.close().await;
        info!(url = %self.display_url, "PostgreSQL pool closed");
    }
}

impl std::fmt::Debug for PgHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgHandler")
            .field("url", &self.display_url)
            .field("query_timeout", &self.query_timeout)
            .field("closed", &self.pool.is_closed())
            .finish()
    }
}

/// A transaction on a dedicated pooled PostgreSQL connection.
///
/// Dropping the session without commit rolls the transaction back.
struct PgTxSession {
    id: String,
    transaction: Option<Transaction<'static, Postgres>>,
    query_timeout: Duration,
}

impl PgTxSession {
    fn active(&mut self) -> GatewayResult<&mut Transaction<'static, Postgres>> {
        let id = &self.id;
        self.transaction
            .as_mut()
            .ok_or_else(|| ErrorKind::Failed.new(format!("Transaction {} is already finished", id)))
    }
}

#[async_trait]
impl TxSession for PgTxSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn exec(&mut self, statement: &str, args: &[SqlArg]) -> GatewayResult<ExecResult> {
        debug!(transaction_id = %self.id, sql = %statement, "Executing statement in transaction");

        let query_timeout = self.query_timeout;
        let tx = self.active()?;
        let query = postgres_query(statement, args);
        match timeout(query_timeout, query.execute(&mut **tx)).await {
            Ok(Ok(r)) => Ok(exec_result(&r)),
            Ok(Err(e)) => Err(GatewayError::from_sqlx(e, "execute statement")),
            Err(_) => Err(timeout_error("execute statement", query_timeout)),
        }
    }

    async fn query(&mut self, statement: &str, args: &[SqlArg]) -> GatewayResult<RowCursor> {
        debug!(transaction_id = %self.id, sql = %statement, "Executing query in transaction");

        let query_timeout = self.query_timeout;
        let tx = self.active()?;
        let query = postgres_query(statement, args);
        let rows = match timeout(query_timeout, query.fetch_all(&mut **tx)).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => return Err(GatewayError::from_sqlx(e, "query rows")),
            Err(_) => return Err(timeout_error("query rows", query_timeout)),
        };

        let mut columns = None;
        Ok(RowCursor::buffered(
            rows.iter().map(|row| row.to_row(&mut columns)).collect(),
        ))
    }

    async fn commit(&mut self) -> GatewayResult<()> {
        let tx = self.transaction.take().ok_or_else(|| {
            ErrorKind::Failed.new(format!("Transaction {} is already finished", self.id))
        })?;
        match timeout(self.query_timeout, tx.commit()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(GatewayError::from_sqlx(e, "commit")),
            Err(_) => Err(timeout_error("commit", self.query_timeout)),
        }
    }

    async fn rollback(&mut self) -> GatewayResult<()> {
        let Some(tx) = self.transaction.take() else {
            return Ok(());
        };
        match timeout(self.query_timeout, tx.rollback()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(GatewayError::from_sqlx(e, "rollback")),
            Err(_) => Err(timeout_error("rollback", self.query_timeout)),
        }
    }
}
