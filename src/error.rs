//! Typed error model for the SQL gateway.
//!
//! Every failure is classified into one [`ErrorKind`]. The kind is attached
//! once, when an error is first classified, and is copied forward on every
//! subsequent wrap so that layers above the gateway can still map the error
//! to a transport status code.

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use thiserror::Error;

/// Boxed error used as the underlying cause of a [`GatewayError`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Closed classification of gateway failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Not classified yet
    #[default]
    Unknown,
    /// Bad input or failed validation
    Invalidated,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    /// Infrastructure or backend failure
    Failed,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::Unknown,
        ErrorKind::Invalidated,
        ErrorKind::Unauthorized,
        ErrorKind::Forbidden,
        ErrorKind::NotFound,
        ErrorKind::Conflict,
        ErrorKind::Failed,
    ];

    /// HTTP status code for this kind.
    ///
    /// This mapping is the only bridge between the error taxonomy and a
    /// transport layer. Existing entries must not change.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Unknown | ErrorKind::Invalidated => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Failed => 500,
        }
    }

    /// Stable lowercase name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Unknown => "unknown",
            ErrorKind::Invalidated => "invalidated",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Failed => "failed",
        }
    }

    /// Create a new error of this kind.
    pub fn new(self, message: impl Into<String>) -> GatewayError {
        GatewayError {
            kind: self,
            message: message.into(),
            source: None,
            code: None,
            rollback: None,
        }
    }

    /// Classify `err` as this kind, prefixing `message` to its text.
    ///
    /// An error that already carries a kind other than `Unknown` keeps it.
    pub fn wrap<E>(self, err: E, message: impl AsRef<str>) -> GatewayError
    where
        E: Into<BoxError>,
    {
        let mut wrapped = GatewayError::wrap(err, message);
        if wrapped.kind == ErrorKind::Unknown {
            wrapped.kind = self;
        }
        wrapped
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error carrying a wrap-preserved [`ErrorKind`].
///
/// `Display` prints the whole message trail, causes included. The source
/// chain is kept for classification and [`GatewayError::cause`]; reporters
/// that print every `source()` in turn will repeat text already shown.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct GatewayError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
    /// e.g., "23505" for a PostgreSQL unique violation
    code: Option<String>,
    /// Set when a transaction rollback failed after the work itself failed.
    rollback: Option<Box<GatewayError>>,
}

impl GatewayError {
    /// Wrap `err` with a message, keeping its kind if it has one.
    ///
    /// The resulting message trail is `message: <err>`.
    pub fn wrap<E>(err: E, message: impl AsRef<str>) -> Self
    where
        E: Into<BoxError>,
    {
        let boxed: BoxError = err.into();
        let message = format!("{}: {}", message.as_ref(), boxed);
        let kind = get_type(boxed.as_ref());
        let code = boxed
            .downcast_ref::<GatewayError>()
            .and_then(|e| e.code.clone());
        Self {
            kind,
            message,
            source: Some(boxed),
            code,
            rollback: None,
        }
    }

    /// Convert a driver error into a `Failed` error.
    ///
    /// The driver text is kept in the message and the driver error itself
    /// becomes the source.
    pub fn from_sqlx(err: sqlx::Error, context: &str) -> Self {
        let code = match &err {
            sqlx::Error::Database(db_err) => db_err.code().map(|c| c.to_string()),
            _ => None,
        };
        let mut wrapped = ErrorKind::Failed.wrap(err, context);
        wrapped.code = code;
        wrapped
    }

    /// Compose a failed rollback onto this error.
    ///
    /// Both failures stay visible: the message mentions the rollback error and
    /// [`GatewayError::rollback_error`] returns it. An unclassified error
    /// becomes `Failed`.
    pub fn with_rollback_failure(mut self, rollback: GatewayError) -> Self {
        if self.kind == ErrorKind::Unknown {
            self.kind = ErrorKind::Failed;
        }
        self.message = format!("{} (rollback failed: {})", self.message, rollback);
        self.rollback = Some(Box::new(rollback));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The full message trail, causes included.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Backend error code (SQLSTATE or vendor code), when known.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// The rollback error of a transaction dual failure, at any wrap depth.
    pub fn rollback_error(&self) -> Option<&GatewayError> {
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(e) = current {
            if let Some(rollback) = e
                .downcast_ref::<GatewayError>()
                .and_then(|gateway_err| gateway_err.rollback.as_deref())
            {
                return Some(rollback);
            }
            current = e.source();
        }
        None
    }

    /// True when both the transactional work and its rollback failed.
    pub fn is_dual_failure(&self) -> bool {
        self.rollback_error().is_some()
    }

    /// Force the kind, overriding any earlier classification.
    pub(crate) fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// HTTP status code for this error's kind.
    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }

    /// The innermost error of the source chain.
    pub fn cause(&self) -> &(dyn StdError + 'static) {
        let mut current: &(dyn StdError + 'static) = self;
        while let Some(next) = current.source() {
            current = next;
        }
        current
    }
}

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Extract the kind of an error at any wrap depth.
///
/// Plain errors without a [`GatewayError`] in their source chain are
/// `Unknown`.
pub fn get_type(err: &(dyn StdError + 'static)) -> ErrorKind {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(gateway_err) = e.downcast_ref::<GatewayError>() {
            return gateway_err.kind;
        }
        current = e.source();
    }
    ErrorKind::Unknown
}

/// HTTP status code for a kind.
pub fn http_status(kind: ErrorKind) -> u16 {
    kind.http_status()
}

/// HTTP status code for an arbitrary error.
pub fn get_http_status(err: &(dyn StdError + 'static)) -> u16 {
    get_type(err).http_status()
}
