//! SQL gateway library.
//!
//! A uniform, backend-independent interface for running statements against
//! MySQL and PostgreSQL: single statements, streamed queries, callback-style
//! transactions and multi-statement batches, with every failure classified
//! into a typed [`ErrorKind`].

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;

pub use config::{Config, ConfigValidator, PoolOptions, RequiredFields};
pub use db::{HandlerRegistry, new_map_sql_handler, new_sql_handler};
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use gateway::{ExecResult, Row, RowCursor, SqlGateway, SqlGatewayExt, TxSession};
pub use models::{Backend, SqlArg, SqlConfig, SqlValue};
