//! Argument binding for prepared statements.
//!
//! Binds [`SqlArg`] values to backend-specific query objects. Arguments are
//! always sent out of band; statement text is never interpolated.

use crate::models::SqlArg;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres};

/// Bind an argument to a MySQL query.
pub(crate) fn bind_mysql_arg<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    arg: &'q SqlArg,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match arg {
        SqlArg::Null => query.bind(None::<String>),
        SqlArg::Bool(v) => query.bind(*v),
        SqlArg::Int(v) => query.bind(*v),
        SqlArg::Float(v) => query.bind(*v),
        SqlArg::Text(v) => query.bind(v.as_str()),
        SqlArg::Bytes(v) => query.bind(v.as_slice()),
        SqlArg::Json(v) => query.bind(Json(v)),
        SqlArg::Timestamp(v) => query.bind(*v),
    }
}

/// Bind an argument to a PostgreSQL query.
pub(crate) fn bind_postgres_arg<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    arg: &'q SqlArg,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match arg {
        SqlArg::Null => query.bind(None::<String>),
        SqlArg::Bool(v) => query.bind(*v),
        SqlArg::Int(v) => query.bind(*v),
        SqlArg::Float(v) => query.bind(*v),
        SqlArg::Text(v) => query.bind(v.as_str()),
        SqlArg::Bytes(v) => query.bind(v.as_slice()),
        SqlArg::Json(v) => query.bind(Json(v)),
        SqlArg::Timestamp(v) => query.bind(*v),
    }
}

/// Build a prepared MySQL query with all `args` bound.
///
/// The statement is not cached, so it is prepared and executed by the
/// extended protocol and cannot contain more than one statement.
pub(crate) fn mysql_query<'q>(
    sql: &'q str,
    args: &'q [SqlArg],
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    args.iter()
        .fold(sqlx::query(sql).persistent(false), bind_mysql_arg)
}

/// Build a prepared PostgreSQL query with all `args` bound.
pub(crate) fn postgres_query<'q>(
    sql: &'q str,
    args: &'q [SqlArg],
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    args.iter()
        .fold(sqlx::query(sql).persistent(false), bind_postgres_arg)
}
