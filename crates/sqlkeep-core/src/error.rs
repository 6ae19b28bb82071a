//! Error types for sqlkeep

use thiserror::Error;

/// Core error type for pooled connection operations
#[derive(Error, Debug)]
pub enum DbError {
    /// Opening a physical connection failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Raw error reported by a driver, optionally carrying a vendor/SQLSTATE code
    #[error("Driver error{}: {message}", code_suffix(.code.as_deref()))]
    Driver {
        code: Option<String>,
        message: String,
    },

    /// Recoverable failure; the connection stays poolable
    #[error("Transient error [{code}]: {message}")]
    Transient { code: String, message: String },

    /// The physical connection is permanently broken
    #[error("Fatal disconnection [{code}]: {message}")]
    FatalDisconnection { code: String, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The statement cache is at capacity and every entry is checked out
    #[error("Statement cache full: all {max} statements are checked out")]
    CacheFull { max: usize },

    #[error(transparent)]
    AggregatedClose(#[from] AggregatedCloseError),

    /// Restoring a default session attribute failed during activation
    #[error("Session reset failed: {0}")]
    SessionReset(String),

    /// The resource was closed or reclaimed and is no longer valid
    #[error("{0} is closed and no longer valid")]
    Closed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("{0}")]
    Other(String),
}

fn code_suffix(code: Option<&str>) -> String {
    code.map(|c| format!(" [{}]", c)).unwrap_or_default()
}

impl DbError {
    /// Build a driver error carrying a vendor code.
    pub fn driver(code: impl Into<String>, message: impl Into<String>) -> Self {
        DbError::Driver {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Build a closed-resource error for the named resource kind.
    pub fn closed(resource: impl Into<String>) -> Self {
        DbError::Closed(resource.into())
    }

    /// The vendor/SQLSTATE code attached to this error, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            DbError::Driver { code, .. } => code.as_deref(),
            DbError::Transient { code, .. } | DbError::FatalDisconnection { code, .. } => {
                Some(code)
            }
            _ => None,
        }
    }

    /// The human-readable message without the code prefix.
    pub fn message(&self) -> String {
        match self {
            DbError::Driver { message, .. }
            | DbError::Transient { message, .. }
            | DbError::FatalDisconnection { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, DbError::FatalDisconnection { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, DbError::Closed(_))
    }
}

/// Several independent close failures collected while closing a connection
/// and its children. Every close is attempted; none is skipped because an
/// earlier one failed.
#[derive(Error, Debug)]
#[error("{count} close failure(s): {summary}", count = .causes.len(), summary = summarize(.causes))]
pub struct AggregatedCloseError {
    causes: Vec<DbError>,
}

fn summarize(causes: &[DbError]) -> String {
    causes
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl AggregatedCloseError {
    pub fn new(causes: Vec<DbError>) -> Self {
        Self { causes }
    }

    /// Wrap `causes` into an error, or `None` when nothing failed.
    pub fn from_causes(causes: Vec<DbError>) -> Option<Self> {
        if causes.is_empty() {
            None
        } else {
            Some(Self { causes })
        }
    }

    pub fn causes(&self) -> &[DbError] {
        &self.causes
    }

    pub fn into_causes(self) -> Vec<DbError> {
        self.causes
    }

    pub fn len(&self) -> usize {
        self.causes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.causes.is_empty()
    }
}

/// Result type alias for sqlkeep operations
pub type Result<T> = std::result::Result<T, DbError>;
