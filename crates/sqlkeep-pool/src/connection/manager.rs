//! Lifecycle hooks that create, recycle and destroy pooled connections

use std::sync::Arc;

use async_trait::async_trait;
use sqlkeep_core::{
    ConnectionOpener, ConnectionTarget, Credentials, DbError, Result, SessionDefaults,
};
use tokio::time::Instant;

use super::pooled::{ConnectionPolicy, PooledConnection};
use crate::classifier::FailureClassifier;
use crate::pool::{LifecycleHooks, PoolConfig};
use crate::validation::ProbeResult;

/// Creates pooled connections through a [`ConnectionOpener`] and drives them
/// through activation, passivation, validation and destruction on behalf of
/// the pool.
pub struct PooledConnectionManager {
    opener: Arc<dyn ConnectionOpener>,
    target: ConnectionTarget,
    credentials: Credentials,
    classifier: Arc<FailureClassifier>,
    policy: ConnectionPolicy,
    default_session: SessionDefaults,
    init_sqls: Vec<String>,
}

impl PooledConnectionManager {
    /// Create a manager for `target`, validating `config` up front.
    pub fn new<O: ConnectionOpener>(
        opener: O,
        target: ConnectionTarget,
        credentials: Credentials,
        config: &PoolConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            opener: Arc::new(opener),
            target,
            credentials,
            classifier: Arc::new(config.classifier()?),
            policy: ConnectionPolicy::from_config(config),
            default_session: config.default_session().clone(),
            init_sqls: config.connection_init_sqls().to_vec(),
        })
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn classifier(&self) -> &FailureClassifier {
        &self.classifier
    }

    pub fn policy(&self) -> &ConnectionPolicy {
        &self.policy
    }

    fn check_lifetime(&self, conn: &PooledConnection) -> Result<()> {
        match self.policy.max_lifetime {
            Some(max) if conn.is_expired(Instant::now()) => Err(DbError::Connection(format!(
                "connection {} exceeded its maximum lifetime of {:?}",
                conn.id(),
                max
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl LifecycleHooks for PooledConnectionManager {
    #[tracing::instrument(skip(self), fields(url = %self.target.url))]
    async fn on_create(&self) -> Result<Arc<PooledConnection>> {
        let physical = self
            .opener
            .open(&self.target, &self.credentials)
            .await
            .map_err(|e| self.classifier.reclassify(e))?;

        for sql in &self.init_sqls {
            if let Err(e) = physical.execute(sql, &[]).await {
                tracing::warn!(sql = %sql, error = %e, "connection init SQL failed");
                if let Err(close_error) = physical.close().await {
                    tracing::debug!(error = %close_error, "failed to close connection after init failure");
                }
                return Err(DbError::Connection(format!(
                    "init SQL `{}` failed: {}",
                    sql, e
                )));
            }
        }

        let reported = match physical.session_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                let _ = physical.close().await;
                return Err(self.classifier.reclassify(e));
            }
        };
        let defaults = self.default_session.apply_to(&reported);

        let conn = PooledConnection::new(
            physical,
            self.classifier.clone(),
            self.policy.clone(),
            defaults,
            reported,
        );
        if let Err(e) = conn.activate().await {
            conn.destroy().await;
            return Err(e);
        }

        tracing::debug!(
            connection_id = %conn.id(),
            driver = conn.delegate().driver_name(),
            "opened physical connection"
        );
        Ok(conn)
    }

    async fn on_activate(&self, conn: &PooledConnection) -> Result<()> {
        self.check_lifetime(conn)?;
        conn.activate().await
    }

    async fn on_passivate(&self, conn: &PooledConnection) -> Result<()> {
        conn.passivate().await
    }

    async fn on_validate(&self, conn: &PooledConnection) -> ProbeResult {
        conn.validate(&self.policy.probe, self.policy.validation_timeout)
            .await
    }

    async fn on_destroy(&self, conn: &PooledConnection) {
        conn.destroy().await;
    }
}
