//! Fatal vs. recoverable classification of driver error codes

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sqlkeep_core::{DbError, Result};

/// SQLSTATE codes treated as disconnections when no explicit list is configured.
pub const DEFAULT_DISCONNECTION_CODES: &[&str] =
    &["57P01", "57P02", "57P03", "01002", "JZ0C0", "JZ0C1"];

/// SQLSTATE class for connection exceptions; every `08xxx` code is fatal by default.
pub const CONNECTION_EXCEPTION_CLASS: &str = "08";

/// Verdict for a single error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Recoverable; the connection stays poolable
    Transient,
    /// The connection is permanently broken
    Fatal,
    /// A disconnection-looking code the driver is known to raise for
    /// transient conditions
    IgnorableDisconnection,
}

impl FailureKind {
    pub fn is_fatal(self) -> bool {
        self == FailureKind::Fatal
    }
}

/// Classifies error codes into [`FailureKind`]s.
///
/// Holds two disjoint code sets. A code present in neither is transient.
/// The default classifier additionally treats the whole `08` SQLSTATE class
/// as fatal; an explicitly configured classifier matches exact codes only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureClassifier {
    fatal: BTreeSet<String>,
    ignorable: BTreeSet<String>,
    fatal_class_prefix: Option<&'static str>,
}

impl FailureClassifier {
    /// Create a classifier from explicit code lists.
    ///
    /// Returns [`DbError::Configuration`] if any code appears in both lists.
    pub fn new<I, J, S, T>(fatal: I, ignorable: J) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        let fatal: BTreeSet<String> = fatal.into_iter().map(Into::into).collect();
        let ignorable: BTreeSet<String> = ignorable.into_iter().map(Into::into).collect();

        let overlap: Vec<&str> = fatal.intersection(&ignorable).map(String::as_str).collect();
        if !overlap.is_empty() {
            return Err(DbError::Configuration(format!(
                "codes listed as both fatal and ignorable: {}",
                overlap.join(", ")
            )));
        }

        Ok(Self {
            fatal,
            ignorable,
            fatal_class_prefix: None,
        })
    }

    /// Build a classifier from optional configured lists, falling back to the
    /// defaults for the fatal list when it is not configured.
    pub fn from_config(fatal: Option<&[String]>, ignorable: &[String]) -> Result<Self> {
        match fatal {
            Some(fatal) => Self::new(fatal.iter().cloned(), ignorable.iter().cloned()),
            None => {
                let mut classifier = Self::new(
                    DEFAULT_DISCONNECTION_CODES.iter().copied(),
                    ignorable.iter().cloned(),
                )?;
                classifier.fatal_class_prefix = Some(CONNECTION_EXCEPTION_CLASS);
                Ok(classifier)
            }
        }
    }

    /// Classify a single code. `None` (no code reported) is transient.
    pub fn classify(&self, code: Option<&str>) -> FailureKind {
        let Some(code) = code else {
            return FailureKind::Transient;
        };

        if self.ignorable.contains(code) {
            return FailureKind::IgnorableDisconnection;
        }
        if self.fatal.contains(code) {
            return FailureKind::Fatal;
        }
        match self.fatal_class_prefix {
            Some(prefix) if code.starts_with(prefix) => FailureKind::Fatal,
            _ => FailureKind::Transient,
        }
    }

    /// Classify an error by its attached code.
    ///
    /// An error already marked as a fatal disconnection stays fatal.
    pub fn classify_error(&self, error: &DbError) -> FailureKind {
        match error {
            DbError::FatalDisconnection { .. } => FailureKind::Fatal,
            other => self.classify(other.code()),
        }
    }

    pub fn is_fatal(&self, error: &DbError) -> bool {
        self.classify_error(error).is_fatal()
    }

    /// Rewrite a driver error into the taxonomy according to its verdict.
    ///
    /// Errors without a code pass through unchanged.
    pub fn reclassify(&self, error: DbError) -> DbError {
        let kind = self.classify_error(&error);
        match error {
            DbError::Driver {
                code: Some(code),
                message,
            } => match kind {
                FailureKind::Fatal => DbError::FatalDisconnection { code, message },
                FailureKind::Transient | FailureKind::IgnorableDisconnection => {
                    DbError::Transient { code, message }
                }
            },
            other => other,
        }
    }

    pub fn fatal_codes(&self) -> impl Iterator<Item = &str> {
        self.fatal.iter().map(String::as_str)
    }

    pub fn ignorable_codes(&self) -> impl Iterator<Item = &str> {
        self.ignorable.iter().map(String::as_str)
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self {
            fatal: DEFAULT_DISCONNECTION_CODES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            ignorable: BTreeSet::new(),
            fatal_class_prefix: Some(CONNECTION_EXCEPTION_CLASS),
        }
    }
}

#[cfg(test)]
mod tests;
