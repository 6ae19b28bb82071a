//! Tests for failure classification

use sqlkeep_core::DbError;

use super::*;

#[test]
fn test_default_classifier_known_codes_are_fatal() {
    let classifier = FailureClassifier::default();
    for code in DEFAULT_DISCONNECTION_CODES {
        assert_eq!(classifier.classify(Some(*code)), FailureKind::Fatal, "{code}");
    }
}

#[test]
fn test_default_classifier_connection_exception_class_is_fatal() {
    let classifier = FailureClassifier::default();
    assert_eq!(classifier.classify(Some("08006")), FailureKind::Fatal);
    assert_eq!(classifier.classify(Some("08S01")), FailureKind::Fatal);
}

#[test]
fn test_unknown_code_is_transient() {
    let classifier = FailureClassifier::default();
    assert_eq!(classifier.classify(Some("23505")), FailureKind::Transient);
    assert_eq!(classifier.classify(None), FailureKind::Transient);
}

#[test]
fn test_overlapping_sets_rejected() {
    let result = FailureClassifier::new(["08006", "57P01"], ["57P01"]);
    match result {
        Err(DbError::Configuration(msg)) => assert!(msg.contains("57P01")),
        other => panic!("expected configuration error, got {:?}", other),
    }
}

#[test]
fn test_explicit_lists_use_exact_matching() {
    let classifier = FailureClassifier::new(["XX001"], Vec::<String>::new()).expect("classifier");
    assert_eq!(classifier.classify(Some("XX001")), FailureKind::Fatal);
    assert_eq!(classifier.classify(Some("08006")), FailureKind::Transient);
}

#[test]
fn test_ignorable_code_overrides_default_class() {
    let ignorable = vec!["08003".to_string()];
    let classifier = FailureClassifier::from_config(None, &ignorable).expect("classifier");
    assert_eq!(
        classifier.classify(Some("08003")),
        FailureKind::IgnorableDisconnection
    );
    assert_eq!(classifier.classify(Some("08006")), FailureKind::Fatal);
}

#[test]
fn test_from_config_rejects_ignorable_default_code() {
    let ignorable = vec!["57P01".to_string()];
    assert!(FailureClassifier::from_config(None, &ignorable).is_err());
}

#[test]
fn test_classify_error_uses_attached_code() {
    let classifier = FailureClassifier::default();
    assert!(classifier.is_fatal(&DbError::driver("57P01", "terminating connection")));
    assert!(!classifier.is_fatal(&DbError::driver("42P01", "relation does not exist")));
    assert!(!classifier.is_fatal(&DbError::Other("no code".into())));
}

#[test]
fn test_reclassify_rewrites_driver_errors() {
    let classifier = FailureClassifier::default();

    let fatal = classifier.reclassify(DbError::driver("08006", "socket closed"));
    assert!(matches!(fatal, DbError::FatalDisconnection { ref code, .. } if code == "08006"));

    let transient = classifier.reclassify(DbError::driver("40001", "serialization failure"));
    assert!(matches!(transient, DbError::Transient { ref code, .. } if code == "40001"));

    let untouched = classifier.reclassify(DbError::Timeout("slow".into()));
    assert!(matches!(untouched, DbError::Timeout(_)));
}
