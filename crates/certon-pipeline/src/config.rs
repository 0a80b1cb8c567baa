//! # Pipeline Configuration
//!
//! Tunables resolved once at composition time and handed to
//! [`CertificatePipeline::new`](crate::pipeline::CertificatePipeline::new).
//! Everything has a production-sensible default; deployments override via
//! `CERTON_`-prefixed environment variables.

use chrono::Duration;

use crate::transfer::BackoffPolicy;

/// Pipeline tunables.
///
/// The `Debug` impl redacts the database URL — connection strings carry
/// credentials and these values get logged at startup.
#[derive(Clone)]
pub struct PipelineConfig {
    /// Postgres connection string for the write-through mirror. `None`
    /// runs the pipeline purely in memory.
    pub database_url: Option<String>,
    /// Delay after the first failed transfer attempt, in seconds.
    pub backoff_base_secs: u64,
    /// Upper bound on any retry delay, in seconds.
    pub backoff_cap_secs: u64,
    /// Age a provisional record must reach before the reconciliation
    /// sweep rules on it, in seconds. Young records are still mid-mint.
    pub reconcile_grace_secs: u64,
    /// Wall-clock cap on one batch run. A run stops at the first chunk
    /// boundary past the deadline. `None` lets runs take as long as the
    /// recipients need.
    pub batch_run_deadline_secs: Option<u64>,
}

impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("backoff_base_secs", &self.backoff_base_secs)
            .field("backoff_cap_secs", &self.backoff_cap_secs)
            .field("reconcile_grace_secs", &self.reconcile_grace_secs)
            .field("batch_run_deadline_secs", &self.batch_run_deadline_secs)
            .finish()
    }
}

impl Default for PipelineConfig {
    /// In-memory pipeline, hour-to-day backoff, fifteen-minute
    /// reconciliation grace, no batch deadline.
    fn default() -> Self {
        let backoff = BackoffPolicy::default();
        Self {
            database_url: None,
            backoff_base_secs: backoff.base_secs,
            backoff_cap_secs: backoff.cap_secs,
            reconcile_grace_secs: 15 * 60,
            batch_run_deadline_secs: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from `CERTON_`-prefixed environment variables,
    /// falling back to defaults for anything unset:
    /// `CERTON_DATABASE_URL`, `CERTON_BACKOFF_BASE_SECS`,
    /// `CERTON_BACKOFF_CAP_SECS`, `CERTON_RECONCILE_GRACE_SECS`,
    /// `CERTON_BATCH_RUN_DEADLINE_SECS`.
    ///
    /// A variable that is set but unparseable keeps the default and logs
    /// a warning; a bad tunable should degrade, not stop a boot.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("CERTON_DATABASE_URL").ok(),
            backoff_base_secs: env_secs("CERTON_BACKOFF_BASE_SECS", defaults.backoff_base_secs),
            backoff_cap_secs: env_secs("CERTON_BACKOFF_CAP_SECS", defaults.backoff_cap_secs),
            reconcile_grace_secs: env_secs(
                "CERTON_RECONCILE_GRACE_SECS",
                defaults.reconcile_grace_secs,
            ),
            batch_run_deadline_secs: std::env::var("CERTON_BATCH_RUN_DEADLINE_SECS")
                .ok()
                .and_then(|raw| match raw.trim().parse() {
                    Ok(secs) => Some(secs),
                    Err(_) => {
                        tracing::warn!(
                            var = "CERTON_BATCH_RUN_DEADLINE_SECS",
                            value = %raw,
                            "unparseable deadline ignored"
                        );
                        None
                    }
                }),
        }
    }

    /// The retry backoff policy these tunables describe.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_secs: self.backoff_base_secs,
            // A cap below the base would make delays decrease.
            cap_secs: self.backoff_cap_secs.max(self.backoff_base_secs),
        }
    }

    /// The reconciliation grace window as a duration.
    pub fn reconcile_grace(&self) -> Duration {
        Duration::seconds(self.reconcile_grace_secs.min(i64::MAX as u64) as i64)
    }

    /// The batch run deadline as a duration, when one is configured.
    pub fn batch_run_deadline(&self) -> Option<Duration> {
        self.batch_run_deadline_secs
            .map(|secs| Duration::seconds(secs.min(i64::MAX as u64) as i64))
    }
}

fn env_secs(var: &str, default: u64) -> u64 {
    match std::env::var(var) {
        Ok(raw) => match raw.trim().parse() {
            Ok(secs) => secs,
            Err(_) => {
                tracing::warn!(var, value = %raw, "unparseable seconds value, keeping default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_backoff_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.backoff(), BackoffPolicy::default());
        assert!(config.database_url.is_none());
        assert_eq!(config.reconcile_grace(), Duration::minutes(15));
        assert!(config.batch_run_deadline().is_none());
    }

    #[test]
    fn debug_redacts_database_url() {
        let config = PipelineConfig {
            database_url: Some("postgres://certon:hunter2@db/certon".into()),
            ..PipelineConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(rendered.contains("[REDACTED]"), "got: {rendered}");
        assert!(!rendered.contains("hunter2"), "got: {rendered}");
    }

    #[test]
    fn backoff_cap_never_sinks_below_base() {
        let config = PipelineConfig {
            backoff_base_secs: 600,
            backoff_cap_secs: 60,
            ..PipelineConfig::default()
        };
        assert_eq!(config.backoff().cap_secs, 600);
    }

    #[test]
    fn env_secs_falls_back_on_garbage() {
        // Unset variables keep the default without touching the process
        // environment from tests.
        assert_eq!(env_secs("CERTON_TEST_UNSET_SENTINEL", 7), 7);
    }
}
