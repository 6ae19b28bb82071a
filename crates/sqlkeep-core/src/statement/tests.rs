//! Tests for statement keys

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use pretty_assertions::assert_eq;
use rstest::rstest;

use super::*;

fn hash_of(key: &StatementKey) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn fully_specified() -> StatementKey {
    StatementKey::prepared("SELECT * FROM users WHERE id = ?")
        .with_catalog(Some("main"))
        .with_schema(Some("public"))
        .with_result_set_type(ResultSetType::ForwardOnly)
        .with_concurrency(ResultSetConcurrency::ReadOnly)
        .with_holdability(Holdability::CloseCursorsAtCommit)
        .with_generated_keys(GeneratedKeys::NoReturn)
        .with_key_columns_by_index(&[1, 2])
        .with_key_columns_by_name(&["id", "version"])
}

// =============================================================================
// Equality and hashing
// =============================================================================

#[test]
fn test_identical_keys_are_equal_and_hash_alike() {
    let a = fully_specified();
    let b = fully_specified();
    assert_eq!(a, b);
    assert_eq!(hash_of(&a), hash_of(&b));
}

#[test]
fn test_equal_empty_arrays_are_equal() {
    let a = StatementKey::prepared("SELECT 1").with_key_columns_by_index(&[]);
    let b = StatementKey::prepared("SELECT 1").with_key_columns_by_index(&[]);
    assert_eq!(a, b);
    assert_eq!(hash_of(&a), hash_of(&b));
}

#[rstest]
#[case::sql(fully_specified(), {
    StatementKey::prepared("SELECT * FROM users WHERE id = ? FOR UPDATE")
        .with_catalog(Some("main"))
        .with_schema(Some("public"))
        .with_result_set_type(ResultSetType::ForwardOnly)
        .with_concurrency(ResultSetConcurrency::ReadOnly)
        .with_holdability(Holdability::CloseCursorsAtCommit)
        .with_generated_keys(GeneratedKeys::NoReturn)
        .with_key_columns_by_index(&[1, 2])
        .with_key_columns_by_name(&["id", "version"])
})]
#[case::catalog(fully_specified(), fully_specified().with_catalog(Some("other")))]
#[case::catalog_none(fully_specified(), fully_specified().with_catalog(None))]
#[case::schema(fully_specified(), fully_specified().with_schema(Some("audit")))]
#[case::result_set_type(
    fully_specified(),
    fully_specified().with_result_set_type(ResultSetType::ScrollInsensitive)
)]
#[case::concurrency(
    fully_specified(),
    fully_specified().with_concurrency(ResultSetConcurrency::Updatable)
)]
#[case::holdability(
    fully_specified(),
    fully_specified().with_holdability(Holdability::HoldCursorsOverCommit)
)]
#[case::generated_keys(
    fully_specified(),
    fully_specified().with_generated_keys(GeneratedKeys::Return)
)]
#[case::index_order(fully_specified(), fully_specified().with_key_columns_by_index(&[2, 1]))]
#[case::index_length(fully_specified(), fully_specified().with_key_columns_by_index(&[1]))]
#[case::name_value(
    fully_specified(),
    fully_specified().with_key_columns_by_name(&["id", "revision"])
)]
#[case::null_vs_empty(
    StatementKey::prepared("SELECT 1"),
    StatementKey::prepared("SELECT 1").with_key_columns_by_name::<&str>(&[])
)]
#[case::kind(StatementKey::prepared("{call refresh()}"), StatementKey::callable("{call refresh()}"))]
fn test_keys_differing_in_one_field_are_not_equal(
    #[case] left: StatementKey,
    #[case] right: StatementKey,
) {
    assert_ne!(left, right);
}

#[test]
fn test_keys_work_as_map_keys() {
    let mut map = HashMap::new();
    map.insert(fully_specified(), "cached");
    assert_eq!(map.get(&fully_specified()), Some(&"cached"));
    assert_eq!(map.get(&StatementKey::prepared("SELECT 1")), None);
}

// =============================================================================
// Key columns are copied
// =============================================================================

#[test]
fn test_mutating_index_array_after_construction_does_not_change_key() {
    let mut indexes = vec![1, 2, 3];
    let key = StatementKey::prepared("INSERT INTO t VALUES (?)").with_key_columns_by_index(&indexes);
    let before = key.clone();

    indexes[0] = 99;
    indexes.push(4);

    assert_eq!(key.key_column_indexes(), Some(&[1, 2, 3][..]));
    assert_eq!(key, before);
}

#[test]
fn test_mutating_name_array_after_construction_does_not_change_key() {
    let mut names = vec!["id".to_string()];
    let key = StatementKey::prepared("INSERT INTO t VALUES (?)").with_key_columns_by_name(&names);

    names[0].push_str("_changed");

    assert_eq!(key.key_column_names(), Some(&["id".to_string()][..]));
}

// =============================================================================
// Accessors
// =============================================================================

#[test]
fn test_accessors_report_constructed_values() {
    let key = fully_specified();
    assert_eq!(key.sql(), "SELECT * FROM users WHERE id = ?");
    assert_eq!(key.catalog(), Some("main"));
    assert_eq!(key.schema(), Some("public"));
    assert_eq!(key.result_set_type(), Some(ResultSetType::ForwardOnly));
    assert_eq!(key.concurrency(), Some(ResultSetConcurrency::ReadOnly));
    assert_eq!(key.holdability(), Some(Holdability::CloseCursorsAtCommit));
    assert_eq!(key.generated_keys(), Some(GeneratedKeys::NoReturn));
    assert_eq!(key.kind(), StatementKind::Prepared);
    assert!(!key.is_callable());
}

#[test]
fn test_display() {
    let key = StatementKey::callable("{call audit(?)}").with_schema(Some("ops"));
    assert_eq!(key.to_string(), "callable `{call audit(?)}` in ops");
}
