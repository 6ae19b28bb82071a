//! Session attributes a pooled connection restores on every reuse

use serde::{Deserialize, Serialize};

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IsolationLevel::ReadUncommitted => write!(f, "READ UNCOMMITTED"),
            IsolationLevel::ReadCommitted => write!(f, "READ COMMITTED"),
            IsolationLevel::RepeatableRead => write!(f, "REPEATABLE READ"),
            IsolationLevel::Serializable => write!(f, "SERIALIZABLE"),
        }
    }
}

/// Snapshot of the session attributes of a physical connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub auto_commit: bool,
    pub read_only: bool,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    /// `None` when the driver does not report an isolation level
    pub isolation: Option<IsolationLevel>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            auto_commit: true,
            read_only: false,
            catalog: None,
            schema: None,
            isolation: None,
        }
    }
}

/// Configured overrides applied on top of the driver's own session defaults.
///
/// A `None` field keeps whatever the driver reported at creation time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionDefaults {
    pub auto_commit: Option<bool>,
    pub read_only: Option<bool>,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub isolation: Option<IsolationLevel>,
}

impl SessionDefaults {
    /// Overlay these defaults on the settings reported by the driver.
    pub fn apply_to(&self, reported: &SessionSettings) -> SessionSettings {
        SessionSettings {
            auto_commit: self.auto_commit.unwrap_or(reported.auto_commit),
            read_only: self.read_only.unwrap_or(reported.read_only),
            catalog: self.catalog.clone().or_else(|| reported.catalog.clone()),
            schema: self.schema.clone().or_else(|| reported.schema.clone()),
            isolation: self.isolation.or(reported.isolation),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &SessionDefaults::default()
    }
}
