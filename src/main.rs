//! sql-gateway - command line entry point.
//!
//! Opens every configured datasource, runs one command against them and
//! closes the pools again.

use clap::Parser;
use sql_gateway::config::{Command, Config, parse_cli_args};
use sql_gateway::db::{HandlerRegistry, new_map_sql_handler};
use sql_gateway::error::{ErrorKind, GatewayError, GatewayResult};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries command output
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    init_tracing(&config);

    info!("Starting sql-gateway v{}", env!("CARGO_PKG_VERSION"));

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(kind = %e.kind(), error = %e, "Command failed");
            eprintln!("Error [{}]: {}", e.http_status(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &Config) -> GatewayResult<()> {
    let datasources = config.datasources()?;
    let Some(registry) = new_map_sql_handler(Some(&datasources)).await? else {
        return Err(ErrorKind::Invalidated.new(
            "At least one datasource must be configured (--datasource name=url or --config file.json)",
        ));
    };

    let result = run_command(&registry, &config.command).await;
    registry.close_all().await;
    result
}

async fn run_command(registry: &HandlerRegistry, command: &Command) -> GatewayResult<()> {
    match command {
        Command::Ping => {
            for (name, handler) in registry.iter() {
                handler
                    .ping()
                    .await
                    .map_err(|e| GatewayError::wrap(e, format!("ping {}", name)))?;
                println!("{}: ok ({})", name, handler.backend());
            }
        }
        Command::Exec { target, sql, args } => {
            let handler = registry.require(target)?;
            let result = handler.exec(sql, &parse_cli_args(args)).await?;
            println!("rows affected: {}", result.rows_affected()?);
            if let Ok(id) = result.last_insert_id() {
                println!("last insert id: {}", id);
            }
        }
        Command::Query { target, sql, args } => {
            let handler = registry.require(target)?;
            let mut cursor = handler.query(sql, &parse_cli_args(args)).await?;
            while cursor.next().await? {
                if let Some(row) = cursor.row() {
                    println!("{}", serde_json::Value::Object(row.to_json_map()));
                }
            }
        }
        Command::MultiExec { target, file } => {
            let handler = registry.require(target)?;
            let script = std::fs::read_to_string(file).map_err(|e| {
                ErrorKind::Invalidated.wrap(e, format!("read script {}", file.display()))
            })?;
            handler.multi_exec(&script).await?;
            println!("ok");
        }
    }
    Ok(())
}
