//! Handler construction and the named handler registry.

use crate::config::{ConfigValidator, RequiredFields};
use crate::db::{MySqlHandler, PgHandler};
use crate::error::{ErrorKind, GatewayError, GatewayResult};
use crate::gateway::SqlGateway;
use crate::models::{Backend, SqlConfig};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// Validate `config` with the default validator and open a handler for it.
pub async fn new_sql_handler(config: &SqlConfig) -> GatewayResult<Arc<dyn SqlGateway>> {
    new_sql_handler_with(config, &RequiredFields).await
}

/// Validate `config` with `validator` and open a handler for it.
///
/// Validation failures are `Invalidated` and no connection is attempted.
/// Connection failures are `Failed`.
pub async fn new_sql_handler_with(
    config: &SqlConfig,
    validator: &dyn ConfigValidator,
) -> GatewayResult<Arc<dyn SqlGateway>> {
    validator.validate(config)?;
    open_handler(config).await
}

async fn open_handler(config: &SqlConfig) -> GatewayResult<Arc<dyn SqlGateway>> {
    let handler: Arc<dyn SqlGateway> = match config.backend {
        Backend::MySql => Arc::new(MySqlHandler::connect(config).await?),
        Backend::Postgres => Arc::new(PgHandler::connect(config).await?),
    };
    Ok(handler)
}

/// Build one handler per named configuration.
///
/// Returns `Ok(None)` for a missing or empty map.
pub async fn new_map_sql_handler(
    configs: Option<&HashMap<String, SqlConfig>>,
) -> GatewayResult<Option<HandlerRegistry>> {
    new_map_sql_handler_with(configs, &RequiredFields).await
}

/// Like [`new_map_sql_handler`], with an explicit validator.
///
/// Every entry is validated before any connection is opened. If a
/// connection fails, the pools opened so far are closed and the error is
/// returned; a partial registry is never handed out.
pub async fn new_map_sql_handler_with(
    configs: Option<&HashMap<String, SqlConfig>>,
    validator: &dyn ConfigValidator,
) -> GatewayResult<Option<HandlerRegistry>> {
    let Some(configs) = configs.filter(|c| !c.is_empty()) else {
        return Ok(None);
    };
    let ordered: BTreeMap<&String, &SqlConfig> = configs.iter().collect();

    for (name, config) in &ordered {
        validator
            .validate(config)
            .map_err(|e| GatewayError::wrap(e, format!("datasource '{}'", name)))?;
    }

    let mut handlers: BTreeMap<String, Arc<dyn SqlGateway>> = BTreeMap::new();
    for (name, config) in ordered {
        match open_handler(config).await {
            Ok(handler) => {
                handlers.insert(name.clone(), handler);
            }
            Err(err) => {
                warn!(
                    datasource = %name,
                    opened = handlers.len(),
                    error = %err,
                    "Failed to open datasource, closing opened handlers"
                );
                for handler in handlers.values() {
                    handler.close().await;
                }
                return Err(GatewayError::wrap(err, format!("datasource '{}'", name)));
            }
        }
    }

    info!(count = handlers.len(), "Handler registry ready");
    Ok(Some(HandlerRegistry { handlers }))
}

/// Named gateway handlers, keyed by datasource name.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn SqlGateway>>,
}

impl HandlerRegistry {
    /// Build a registry from handlers that are already open.
    pub fn from_handlers(
        handlers: impl IntoIterator<Item = (String, Arc<dyn SqlGateway>)>,
    ) -> Self {
        Self {
            handlers: handlers.into_iter().collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SqlGateway>> {
        self.handlers.get(name).cloned()
    }

    /// Like [`HandlerRegistry::get`], failing with `NotFound`.
    pub fn require(&self, name: &str) -> GatewayResult<Arc<dyn SqlGateway>> {
        self.get(name)
            .ok_or_else(|| ErrorKind::NotFound.new(format!("Unknown datasource: {}", name)))
    }

    /// Datasource names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn SqlGateway>)> {
        self.handlers.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Close every handler's pool.
    pub async fn close_all(&self) {
        for (name, handler) in &self.handlers {
            info!(datasource = %name, "Closing handler");
            handler.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ExecResult, RowCursor, TxSession};
    use crate::models::SqlArg;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct StubGateway;

    #[async_trait]
    impl SqlGateway for StubGateway {
        fn backend(&self) -> Backend {
            Backend::Postgres
        }
        async fn exec(&self, _: &str, _: &[SqlArg]) -> GatewayResult<ExecResult> {
            Ok(ExecResult::new(None, Some(0)))
        }
        async fn query(&self, _: &str, _: &[SqlArg]) -> GatewayResult<RowCursor> {
            Ok(RowCursor::buffered(Vec::new()))
        }
        async fn begin(&self) -> GatewayResult<Box<dyn TxSession>> {
            Err(ErrorKind::Failed.new("not supported"))
        }
        async fn multi_exec(&self, _: &str) -> GatewayResult<()> {
            Ok(())
        }
        async fn ping(&self) -> GatewayResult<()> {
            Ok(())
        }
        async fn close(&self) {}
    }

    #[tokio::test]
    async fn test_missing_or_empty_map_is_none() {
        assert!(new_map_sql_handler(None).await.unwrap().is_none());
        let empty = HashMap::new();
        assert!(new_map_sql_handler(Some(&empty)).await.unwrap().is_none());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = HandlerRegistry::from_handlers([
            ("reports".to_string(), Arc::new(StubGateway) as Arc<dyn SqlGateway>),
            ("orders".to_string(), Arc::new(StubGateway) as Arc<dyn SqlGateway>),
        ]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["orders", "reports"]);
        assert!(registry.get("orders").is_some());
        assert_eq!(
            registry.require("missing").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
