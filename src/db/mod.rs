//! Backend handlers.
//!
//! This module provides the concrete gateway implementations:
//! - Connection string assembly and pool construction
//! - Argument binding and row decoding
//! - MySQL and PostgreSQL handlers
//! - The handler registry

pub mod connect;
pub mod mysql;
pub(crate) mod params;
pub mod postgres;
pub mod registry;
pub mod types;

use crate::error::{ErrorKind, GatewayError};
use std::time::Duration;

pub use connect::{SessionMode, connection_url, mask_url};
pub use mysql::MySqlHandler;
pub use postgres::PgHandler;
pub use registry::{
    HandlerRegistry, new_map_sql_handler, new_map_sql_handler_with, new_sql_handler,
    new_sql_handler_with,
};

pub(crate) fn timeout_error(operation: &str, limit: Duration) -> GatewayError {
    ErrorKind::Failed.new(format!(
        "Timed out after {}s: {}",
        limit.as_secs(),
        operation
    ))
}
