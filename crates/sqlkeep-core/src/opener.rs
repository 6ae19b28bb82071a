//! Opening physical connections

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Connection, Result};

/// Where a physical connection should be opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    /// Driver URL, e.g. `postgres://db.internal:5432/app`
    pub url: String,
    /// Driver-specific connection properties
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl ConnectionTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Login credentials. The password never appears in `Debug` output.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Opens one physical connection per call.
#[async_trait]
pub trait ConnectionOpener: Send + Sync + 'static {
    async fn open(
        &self,
        target: &ConnectionTarget,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Connection>>;
}

#[async_trait]
impl<T: ConnectionOpener> ConnectionOpener for Arc<T> {
    async fn open(
        &self,
        target: &ConnectionTarget,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Connection>> {
        (**self).open(target, credentials).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_masks_password() {
        let creds = Credentials::new("app", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("app"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn test_target_properties() {
        let target = ConnectionTarget::new("postgres://localhost/app").with_property("sslmode", "disable");
        assert_eq!(target.properties.get("sslmode").map(String::as_str), Some("disable"));
    }
}
