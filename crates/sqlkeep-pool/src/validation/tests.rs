use std::sync::atomic::Ordering;
use std::time::Duration;

use rstest::rstest;
use sqlkeep_core::DbError;

use super::probe::get_ping_query;
use super::*;
use crate::testing::{MockConnection, init_test_logging};

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_native_probe_on_live_connection() {
    init_test_logging();
    let conn = MockConnection::new(0);

    let result = run_probe(conn.as_ref(), &ValidationProbe::Native, TIMEOUT).await;

    assert!(result.is_ok());
    assert_eq!(conn.probe_count(), 1);
}

#[tokio::test]
async fn test_probe_on_closed_connection_does_not_touch_driver() {
    let conn = MockConnection::new(0);
    conn.closed.store(true, Ordering::SeqCst);

    let result = run_probe(conn.as_ref(), &ValidationProbe::Native, TIMEOUT).await;

    assert!(matches!(result, Err(ProbeError::ConnectionClosed)));
    assert_eq!(conn.probe_count(), 0);
}

#[tokio::test]
async fn test_query_probe_runs_configured_sql() {
    let conn = MockConnection::new(0);
    let probe = ValidationProbe::Query("SELECT 42".into());

    run_probe(conn.as_ref(), &probe, TIMEOUT).await.unwrap();

    assert_eq!(conn.executed.lock().as_slice(), ["SELECT 42".to_string()]);
}

#[tokio::test]
async fn test_native_probe_falls_back_to_ping_query() {
    let conn = MockConnection::new(0);
    conn.native_unsupported.store(true, Ordering::SeqCst);

    run_probe(conn.as_ref(), &ValidationProbe::Native, TIMEOUT).await.unwrap();

    // The mock driver name maps to the generic ping
    assert_eq!(conn.executed.lock().as_slice(), ["SELECT 1".to_string()]);
    assert_eq!(conn.probe_count(), 1);
}

#[tokio::test]
async fn test_failed_probe_carries_driver_error() {
    let conn = MockConnection::new(0);
    conn.fail_probes_with("08S01");

    let result = run_probe(conn.as_ref(), &ValidationProbe::Native, TIMEOUT).await;

    match result {
        Err(ProbeError::QueryFailed(e)) => assert_eq!(e.code(), Some("08S01")),
        other => panic!("expected QueryFailed, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_hung_probe_times_out() {
    let conn = MockConnection::new(0);
    conn.hang_probes.store(true, Ordering::SeqCst);
    let timeout = Duration::from_millis(250);

    let result = run_probe(conn.as_ref(), &ValidationProbe::Native, timeout).await;

    assert!(matches!(result, Err(ProbeError::Timeout(t)) if t == timeout));
}

#[rstest]
#[case("oracle", "SELECT 1 FROM DUAL")]
#[case("derby", "VALUES 1")]
#[case("db2", "VALUES 1")]
#[case("hsqldb", "SELECT 1 FROM INFORMATION_SCHEMA.SYSTEM_USERS")]
#[case("postgresql", "SELECT 1")]
#[case("mysql", "SELECT 1")]
#[case("sqlite", "SELECT 1")]
fn test_ping_query_per_driver(#[case] driver: &str, #[case] expected: &str) {
    assert_eq!(get_ping_query(driver), expected);
}

#[rstest]
#[case(None, ValidationProbe::Native)]
#[case(Some(""), ValidationProbe::Native)]
#[case(Some("   "), ValidationProbe::Native)]
#[case(Some("SELECT 1"), ValidationProbe::Query("SELECT 1".into()))]
fn test_probe_from_configured_query(#[case] query: Option<&str>, #[case] expected: ValidationProbe) {
    assert_eq!(ValidationProbe::from_query(query), expected);
}

#[test]
fn test_probe_error_into_db_error() {
    let inner: DbError = ProbeError::QueryFailed(DbError::driver("57P01", "terminated")).into();
    assert_eq!(inner.code(), Some("57P01"));

    let timeout: DbError = ProbeError::Timeout(Duration::from_secs(1)).into();
    assert!(matches!(timeout, DbError::Timeout(_)));

    let fail_fast: DbError = ProbeError::FailFast.into();
    assert!(matches!(fail_fast, DbError::Connection(_)));
}
