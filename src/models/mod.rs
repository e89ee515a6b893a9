//! Data models for the SQL gateway.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod value;

// Re-export commonly used types
pub use connection::{Backend, SqlConfig};
pub use value::{FromSqlValue, SqlArg, SqlValue};
