//! Backend-independent gateway contract.
//!
//! [`SqlGateway`] is the capability set every backend handler implements:
//! single statements, queries, transactions, and multi-statement batches.
//! Handlers are used as `Arc<dyn SqlGateway>`; the generic transaction
//! entry points live on [`SqlGatewayExt`], which every gateway gets for free.

pub mod rows;
pub mod transaction;

use crate::error::{ErrorKind, GatewayResult};
use crate::models::{Backend, SqlArg};
use async_trait::async_trait;

pub use rows::{FromRow, Row, RowCursor};
pub use transaction::{SqlGatewayExt, TxWork, run_transaction};

/// Outcome of a single executed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    last_insert_id: Option<i64>,
    rows_affected: Option<u64>,
}

impl ExecResult {
    pub fn new(last_insert_id: Option<i64>, rows_affected: Option<u64>) -> Self {
        Self {
            last_insert_id,
            rows_affected,
        }
    }

    /// Id generated by the last insert.
    ///
    /// Fails with `Failed` on backends that do not report one (PostgreSQL:
    /// use `RETURNING` instead).
    pub fn last_insert_id(&self) -> GatewayResult<i64> {
        self.last_insert_id
            .ok_or_else(|| ErrorKind::Failed.new("LastInsertId is not supported by this backend"))
    }

    pub fn rows_affected(&self) -> GatewayResult<u64> {
        self.rows_affected
            .ok_or_else(|| ErrorKind::Failed.new("RowsAffected is not supported by this backend"))
    }
}

/// The gateway contract, implemented once per backend.
///
/// Implementations are safe to share between tasks. Each call acquires its
/// own pooled connection and releases it when the call (or, for
/// [`SqlGateway::query`], the returned cursor) completes.
#[async_trait]
pub trait SqlGateway: Send + Sync + std::fmt::Debug {
    /// Backend this handler talks to.
    fn backend(&self) -> Backend;

    /// Prepare and execute one parameterized statement.
    async fn exec(&self, statement: &str, args: &[SqlArg]) -> GatewayResult<ExecResult>;

    /// Prepare and execute one parameterized query.
    ///
    /// The caller owns the cursor; it holds a pooled connection until it is
    /// exhausted, closed or dropped.
    async fn query(&self, statement: &str, args: &[SqlArg]) -> GatewayResult<RowCursor>;

    /// Begin a transaction on a dedicated pooled connection.
    ///
    /// Most callers want [`SqlGatewayExt::transaction`], which drives commit
    /// and rollback.
    async fn begin(&self) -> GatewayResult<Box<dyn TxSession>>;

    /// Execute a batch of statements in one round trip.
    ///
    /// Runs on a separate session opened in multi-statement mode, never on the
    /// primary pool.
    async fn multi_exec(&self, statements: &str) -> GatewayResult<()>;

    /// Check that the backend answers.
    async fn ping(&self) -> GatewayResult<()>;

    /// Close the pool. Calls made afterwards fail with `Failed`.
    async fn close(&self);
}

/// A live database transaction.
///
/// Handed to transactional work so that its statements run inside the
/// transaction. Commit and rollback are driven by [`run_transaction`].
#[async_trait]
pub trait TxSession: Send {
    /// Identifier used to correlate log lines.
    fn id(&self) -> &str;

    async fn exec(&mut self, statement: &str, args: &[SqlArg]) -> GatewayResult<ExecResult>;

    /// Run a query inside the transaction. Rows are read eagerly.
    async fn query(&mut self, statement: &str, args: &[SqlArg]) -> GatewayResult<RowCursor>;

    async fn commit(&mut self) -> GatewayResult<()>;

    async fn rollback(&mut self) -> GatewayResult<()>;
}

/// Generate a transaction id for log correlation.
pub(crate) fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}
