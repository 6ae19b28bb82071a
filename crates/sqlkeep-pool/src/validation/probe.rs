//! Connection validation probes
//!
//! Provides lightweight liveness checking by either asking the driver
//! directly or executing a minimal query, and measuring the response time.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlkeep_core::{Connection, DbError};
use thiserror::Error;
use tokio::time::Instant;

/// Result of a validation probe: the round-trip time on success
pub type ProbeResult = Result<Duration, ProbeError>;

/// How a connection's liveness is checked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationProbe {
    /// Run the given query and discard its rows
    Query(String),
    /// Ask the driver; falls back to a ping query when unsupported
    Native,
}

impl ValidationProbe {
    pub fn from_query(query: Option<&str>) -> Self {
        match query {
            Some(sql) if !sql.trim().is_empty() => ValidationProbe::Query(sql.to_string()),
            _ => ValidationProbe::Native,
        }
    }
}

/// Why a connection failed validation
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Connection is closed")]
    ConnectionClosed,

    /// A fatal error was already recorded; the probe was not run
    #[error("Connection previously reported a fatal error")]
    FailFast,

    #[error("Connection exceeded its maximum lifetime ({age:?} >= {max:?})")]
    Expired { age: Duration, max: Duration },

    #[error("Validation query failed: {0}")]
    QueryFailed(DbError),

    #[error("Driver reported the connection as invalid")]
    Invalid,

    #[error("Validation timed out after {0:?}")]
    Timeout(Duration),
}

impl From<ProbeError> for DbError {
    fn from(error: ProbeError) -> Self {
        match error {
            ProbeError::QueryFailed(inner) => inner,
            ProbeError::Timeout(after) => {
                DbError::Timeout(format!("validation timed out after {:?}", after))
            }
            other => DbError::Connection(other.to_string()),
        }
    }
}

/// Probe a physical connection, bounded by `timeout`.
///
/// Returns the round-trip time if the connection is alive.
pub async fn run_probe(conn: &dyn Connection, probe: &ValidationProbe, timeout: Duration) -> ProbeResult {
    if conn.is_closed() {
        return Err(ProbeError::ConnectionClosed);
    }

    let start = Instant::now();
    let outcome = tokio::time::timeout(timeout, probe_once(conn, probe, timeout)).await;
    match outcome {
        Ok(Ok(())) => Ok(start.elapsed()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

async fn probe_once(conn: &dyn Connection, probe: &ValidationProbe, timeout: Duration) -> Result<(), ProbeError> {
    match probe {
        ValidationProbe::Query(sql) => ping(conn, sql).await,
        ValidationProbe::Native => match conn.is_valid(timeout).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ProbeError::Invalid),
            Err(DbError::NotSupported(_)) => ping(conn, get_ping_query(conn.driver_name())).await,
            Err(e) => Err(ProbeError::QueryFailed(e)),
        },
    }
}

async fn ping(conn: &dyn Connection, sql: &str) -> Result<(), ProbeError> {
    conn.query(sql, &[])
        .await
        .map(|_| ())
        .map_err(ProbeError::QueryFailed)
}

/// Get the appropriate ping query for a given driver.
///
/// - Oracle needs a `FROM DUAL`
/// - Derby and DB2 need `VALUES`
/// - everything else accepts `SELECT 1`
pub(super) fn get_ping_query(driver_name: &str) -> &'static str {
    match driver_name {
        "oracle" => "SELECT 1 FROM DUAL",
        "derby" | "db2" => "VALUES 1",
        "hsqldb" => "SELECT 1 FROM INFORMATION_SCHEMA.SYSTEM_USERS",
        _ => "SELECT 1",
    }
}
