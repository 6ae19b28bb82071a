//! Pool configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlkeep_core::{DbError, Result, SessionDefaults};

use crate::abandoned::AbandonedConfig;
use crate::classifier::FailureClassifier;
use crate::statement::CacheFullPolicy;

/// Configuration for a connection pool
///
/// Controls pool sizing, validation, connection lifecycle, statement caching
/// and abandoned-connection reclamation. Every field has a default, so a
/// TOML document only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of connections (idle + active)
    max_total: usize,
    /// Maximum number of idle connections kept on return
    max_idle: usize,
    /// Minimum number of idle connections maintained by eviction runs
    min_idle: usize,
    /// Connections created when the pool is built
    initial_size: usize,
    /// Timeout in milliseconds when acquiring a connection from the pool
    max_wait_ms: u64,
    /// Hand out the most recently returned connection first
    lifo: bool,
    /// Probe query; `None` uses the driver's native liveness check
    validation_query: Option<String>,
    /// Timeout in milliseconds for a single validation probe
    validation_timeout_ms: u64,
    test_on_create: bool,
    test_on_borrow: bool,
    test_on_return: bool,
    test_while_idle: bool,
    /// Interval in milliseconds between background maintenance runs
    time_between_eviction_runs_ms: Option<u64>,
    /// Idle time in milliseconds after which an idle connection may be evicted
    min_evictable_idle_time_ms: u64,
    /// Maximum lifetime of a connection in milliseconds before it's recycled
    max_conn_lifetime_ms: Option<u64>,
    /// SQL executed once on every new physical connection
    connection_init_sqls: Vec<String>,
    rollback_on_return: bool,
    auto_commit_on_return: bool,
    /// Session attributes restored on every borrow
    default_session: SessionDefaults,
    pool_prepared_statements: bool,
    /// Bound on cached + checked-out statements per connection; `None` is unbounded
    max_open_prepared_statements: Option<usize>,
    cache_full_policy: CacheFullPolicy,
    clear_statement_pool_on_return: bool,
    fast_fail_validation: bool,
    /// Fatal codes; `None` selects the built-in SQLSTATE defaults
    disconnection_codes: Option<Vec<String>>,
    ignorable_disconnection_codes: Vec<String>,
    abandoned: AbandonedConfig,
}

impl PoolConfig {
    /// Create a new pool configuration with the given minimum idle and
    /// maximum total sizes.
    ///
    /// Sizes are checked by [`PoolConfig::validate`], which the pool runs
    /// before it is built.
    pub fn new(min_idle: usize, max_total: usize) -> Self {
        Self {
            min_idle,
            max_total,
            max_idle: max_total,
            ..Default::default()
        }
    }

    /// Parse a TOML document and validate the result.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: PoolConfig = toml::from_str(source)
            .map_err(|e| DbError::Configuration(format!("invalid pool configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        if self.max_total == 0 {
            return Err(DbError::Configuration(
                "max_total must be greater than 0".into(),
            ));
        }
        if self.min_idle > self.max_total {
            return Err(DbError::Configuration(format!(
                "min_idle ({}) cannot exceed max_total ({})",
                self.min_idle, self.max_total
            )));
        }
        if self.min_idle > self.max_idle {
            return Err(DbError::Configuration(format!(
                "min_idle ({}) cannot exceed max_idle ({})",
                self.min_idle, self.max_idle
            )));
        }
        if self.initial_size > self.max_total {
            return Err(DbError::Configuration(format!(
                "initial_size ({}) cannot exceed max_total ({})",
                self.initial_size, self.max_total
            )));
        }
        if self.pool_prepared_statements && self.max_open_prepared_statements == Some(0) {
            return Err(DbError::Configuration(
                "max_open_prepared_statements must be greater than 0 when statement pooling is enabled"
                    .into(),
            ));
        }
        if self.time_between_eviction_runs_ms == Some(0) {
            return Err(DbError::Configuration(
                "time_between_eviction_runs_ms must be greater than 0".into(),
            ));
        }
        self.classifier().map(|_| ())
    }

    /// Build the failure classifier described by the code lists.
    pub fn classifier(&self) -> Result<FailureClassifier> {
        FailureClassifier::from_config(
            self.disconnection_codes.as_deref(),
            &self.ignorable_disconnection_codes,
        )
    }

    pub fn with_max_total(mut self, max_total: usize) -> Self {
        self.max_total = max_total;
        self
    }

    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub fn with_min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    pub fn with_initial_size(mut self, initial_size: usize) -> Self {
        self.initial_size = initial_size;
        self
    }

    /// Set the acquire timeout in milliseconds
    pub fn with_max_wait_ms(mut self, max_wait_ms: u64) -> Self {
        self.max_wait_ms = max_wait_ms;
        self
    }

    pub fn with_lifo(mut self, lifo: bool) -> Self {
        self.lifo = lifo;
        self
    }

    pub fn with_validation_query(mut self, query: impl Into<String>) -> Self {
        self.validation_query = Some(query.into());
        self
    }

    pub fn with_validation_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.validation_timeout_ms = timeout_ms;
        self
    }

    pub fn with_test_on_create(mut self, enabled: bool) -> Self {
        self.test_on_create = enabled;
        self
    }

    pub fn with_test_on_borrow(mut self, enabled: bool) -> Self {
        self.test_on_borrow = enabled;
        self
    }

    pub fn with_test_on_return(mut self, enabled: bool) -> Self {
        self.test_on_return = enabled;
        self
    }

    pub fn with_test_while_idle(mut self, enabled: bool) -> Self {
        self.test_while_idle = enabled;
        self
    }

    pub fn with_time_between_eviction_runs_ms(mut self, interval_ms: u64) -> Self {
        self.time_between_eviction_runs_ms = Some(interval_ms);
        self
    }

    pub fn with_min_evictable_idle_time_ms(mut self, idle_ms: u64) -> Self {
        self.min_evictable_idle_time_ms = idle_ms;
        self
    }

    /// Set the maximum connection lifetime in milliseconds
    pub fn with_max_conn_lifetime_ms(mut self, lifetime_ms: u64) -> Self {
        self.max_conn_lifetime_ms = Some(lifetime_ms);
        self
    }

    pub fn with_connection_init_sql(mut self, sql: impl Into<String>) -> Self {
        self.connection_init_sqls.push(sql.into());
        self
    }

    pub fn with_rollback_on_return(mut self, enabled: bool) -> Self {
        self.rollback_on_return = enabled;
        self
    }

    pub fn with_auto_commit_on_return(mut self, enabled: bool) -> Self {
        self.auto_commit_on_return = enabled;
        self
    }

    pub fn with_default_session(mut self, defaults: SessionDefaults) -> Self {
        self.default_session = defaults;
        self
    }

    /// Enable statement pooling with an optional bound per connection
    pub fn with_statement_pool(mut self, max_open: Option<usize>) -> Self {
        self.pool_prepared_statements = true;
        self.max_open_prepared_statements = max_open;
        self
    }

    pub fn with_cache_full_policy(mut self, policy: CacheFullPolicy) -> Self {
        self.cache_full_policy = policy;
        self
    }

    pub fn with_clear_statement_pool_on_return(mut self, enabled: bool) -> Self {
        self.clear_statement_pool_on_return = enabled;
        self
    }

    pub fn with_fast_fail_validation(mut self, enabled: bool) -> Self {
        self.fast_fail_validation = enabled;
        self
    }

    pub fn with_disconnection_codes<S: Into<String>>(
        mut self,
        codes: impl IntoIterator<Item = S>,
    ) -> Self {
        self.disconnection_codes = Some(codes.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_ignorable_disconnection_codes<S: Into<String>>(
        mut self,
        codes: impl IntoIterator<Item = S>,
    ) -> Self {
        self.ignorable_disconnection_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_abandoned(mut self, abandoned: AbandonedConfig) -> Self {
        self.abandoned = abandoned;
        self
    }

    pub fn max_total(&self) -> usize {
        self.max_total
    }

    pub fn max_idle(&self) -> usize {
        self.max_idle
    }

    pub fn min_idle(&self) -> usize {
        self.min_idle
    }

    pub fn initial_size(&self) -> usize {
        self.initial_size
    }

    /// Get the acquire timeout as a Duration
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn lifo(&self) -> bool {
        self.lifo
    }

    pub fn validation_query(&self) -> Option<&str> {
        self.validation_query.as_deref()
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }

    pub fn test_on_create(&self) -> bool {
        self.test_on_create
    }

    pub fn test_on_borrow(&self) -> bool {
        self.test_on_borrow
    }

    pub fn test_on_return(&self) -> bool {
        self.test_on_return
    }

    pub fn test_while_idle(&self) -> bool {
        self.test_while_idle
    }

    pub fn time_between_eviction_runs(&self) -> Option<Duration> {
        self.time_between_eviction_runs_ms.map(Duration::from_millis)
    }

    pub fn min_evictable_idle_time(&self) -> Duration {
        Duration::from_millis(self.min_evictable_idle_time_ms)
    }

    /// Get the maximum lifetime as a Duration if set
    pub fn max_conn_lifetime(&self) -> Option<Duration> {
        self.max_conn_lifetime_ms.map(Duration::from_millis)
    }

    pub fn connection_init_sqls(&self) -> &[String] {
        &self.connection_init_sqls
    }

    pub fn rollback_on_return(&self) -> bool {
        self.rollback_on_return
    }

    pub fn auto_commit_on_return(&self) -> bool {
        self.auto_commit_on_return
    }

    pub fn default_session(&self) -> &SessionDefaults {
        &self.default_session
    }

    pub fn pool_prepared_statements(&self) -> bool {
        self.pool_prepared_statements
    }

    pub fn max_open_prepared_statements(&self) -> Option<usize> {
        self.max_open_prepared_statements
    }

    pub fn cache_full_policy(&self) -> CacheFullPolicy {
        self.cache_full_policy
    }

    pub fn clear_statement_pool_on_return(&self) -> bool {
        self.clear_statement_pool_on_return
    }

    pub fn fast_fail_validation(&self) -> bool {
        self.fast_fail_validation
    }

    pub fn abandoned(&self) -> &AbandonedConfig {
        &self.abandoned
    }
}

impl Default for PoolConfig {
    /// Create a default pool configuration
    ///
    /// Defaults:
    /// - max_total / max_idle: 8, min_idle: 0
    /// - max_wait: 30 seconds
    /// - validation timeout: 5 seconds, test_on_borrow only
    /// - min_evictable_idle_time: 30 minutes
    /// - max_conn_lifetime: None
    /// - statement pooling off
    fn default() -> Self {
        Self {
            max_total: 8,
            max_idle: 8,
            min_idle: 0,
            initial_size: 0,
            max_wait_ms: 30_000,
            lifo: true,
            validation_query: None,
            validation_timeout_ms: 5_000,
            test_on_create: false,
            test_on_borrow: true,
            test_on_return: false,
            test_while_idle: false,
            time_between_eviction_runs_ms: None,
            min_evictable_idle_time_ms: 1_800_000,
            max_conn_lifetime_ms: None,
            connection_init_sqls: Vec::new(),
            rollback_on_return: true,
            auto_commit_on_return: true,
            default_session: SessionDefaults::default(),
            pool_prepared_statements: false,
            max_open_prepared_statements: None,
            cache_full_policy: CacheFullPolicy::default(),
            clear_statement_pool_on_return: false,
            fast_fail_validation: false,
            disconnection_codes: None,
            ignorable_disconnection_codes: Vec::new(),
            abandoned: AbandonedConfig::default(),
        }
    }
}
