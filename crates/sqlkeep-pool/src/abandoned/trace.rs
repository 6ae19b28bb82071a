//! Call-site capture for usage tracking

use std::backtrace::Backtrace;
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Where and when a connection or child resource was borrowed or last used.
#[derive(Debug, Clone)]
pub struct CallSite {
    captured_at: DateTime<Utc>,
    thread: Option<String>,
    backtrace: Arc<Backtrace>,
}

impl CallSite {
    /// Capture the current call stack regardless of `RUST_BACKTRACE`.
    pub fn capture() -> Self {
        Self {
            captured_at: Utc::now(),
            thread: std::thread::current().name().map(str::to_string),
            backtrace: Arc::new(Backtrace::force_capture()),
        }
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn thread(&self) -> Option<&str> {
        self.thread.as_deref()
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl std::fmt::Display for CallSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "at {} on thread {}\n{}",
            self.captured_at.to_rfc3339(),
            self.thread.as_deref().unwrap_or("<unnamed>"),
            self.backtrace
        )
    }
}
