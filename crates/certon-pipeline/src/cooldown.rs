//! # Transfer Cooldown Gate
//!
//! Enforces the per-tenant minimum interval between transfer processing
//! runs. A run inside the window is rejected with
//! [`PipelineError::RateLimited`] telling the caller when to come back —
//! it is never queued.
//!
//! Check and stamp run under one lock, so two concurrent runs for the
//! same tenant admit exactly one. A run that passes the gate consumes the
//! slot even if it later fails; the next run waits out the full window.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use parking_lot::Mutex;

use certon_core::{TenantId, Timestamp};

use crate::error::PipelineError;

/// Per-tenant last-run stamps.
#[derive(Debug, Default)]
pub struct TransferGate {
    stamps: Arc<Mutex<HashMap<TenantId, Timestamp>>>,
}

impl Clone for TransferGate {
    fn clone(&self) -> Self {
        Self {
            stamps: Arc::clone(&self.stamps),
        }
    }
}

impl TransferGate {
    /// Create a gate with no recorded runs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a run at `now` if the tenant's cooldown window has passed,
    /// stamping the run in the same critical section.
    pub fn check_and_stamp(
        &self,
        tenant_id: TenantId,
        now: Timestamp,
        cooldown: Duration,
    ) -> Result<(), PipelineError> {
        let mut stamps = self.stamps.lock();
        if let Some(last) = stamps.get(&tenant_id) {
            let elapsed = now.duration_since(last);
            if elapsed < cooldown {
                let remaining = cooldown - elapsed;
                // Round up: a 1001 ms remainder is a 2 s wait.
                let retry_after_secs =
                    ((remaining.num_milliseconds() + 999) / 1000).max(1) as u64;
                return Err(PipelineError::RateLimited { retry_after_secs });
            }
        }
        stamps.insert(tenant_id, now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> Timestamp {
        Timestamp::now()
    }

    #[test]
    fn first_run_passes() {
        let gate = TransferGate::new();
        gate.check_and_stamp(TenantId::new(), t0(), Duration::hours(1))
            .unwrap();
    }

    #[test]
    fn run_inside_window_rejected_with_retry_hint() {
        let gate = TransferGate::new();
        let tenant = TenantId::new();
        let start = t0();

        gate.check_and_stamp(tenant, start, Duration::hours(1)).unwrap();
        let err = gate
            .check_and_stamp(
                tenant,
                start.saturating_add(Duration::minutes(10)),
                Duration::hours(1),
            )
            .unwrap_err();

        match err {
            PipelineError::RateLimited { retry_after_secs } => {
                assert_eq!(retry_after_secs, 50 * 60);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn run_after_window_passes_and_restamps() {
        let gate = TransferGate::new();
        let tenant = TenantId::new();
        let start = t0();

        gate.check_and_stamp(tenant, start, Duration::hours(1)).unwrap();
        let second = start.saturating_add(Duration::hours(2));
        gate.check_and_stamp(tenant, second, Duration::hours(1)).unwrap();

        // The second run restarts the window.
        assert!(gate
            .check_and_stamp(
                tenant,
                second.saturating_add(Duration::minutes(30)),
                Duration::hours(1),
            )
            .is_err());
    }

    #[test]
    fn exact_boundary_passes() {
        let gate = TransferGate::new();
        let tenant = TenantId::new();
        let start = t0();

        gate.check_and_stamp(tenant, start, Duration::hours(1)).unwrap();
        gate.check_and_stamp(
            tenant,
            start.saturating_add(Duration::hours(1)),
            Duration::hours(1),
        )
        .unwrap();
    }

    #[test]
    fn tenants_are_independent() {
        let gate = TransferGate::new();
        let now = t0();
        gate.check_and_stamp(TenantId::new(), now, Duration::hours(1))
            .unwrap();
        gate.check_and_stamp(TenantId::new(), now, Duration::hours(1))
            .unwrap();
    }

    #[test]
    fn zero_cooldown_never_rejects() {
        let gate = TransferGate::new();
        let tenant = TenantId::new();
        let now = t0();
        gate.check_and_stamp(tenant, now, Duration::zero()).unwrap();
        gate.check_and_stamp(tenant, now, Duration::zero()).unwrap();
    }

    #[test]
    fn fractional_remainder_rounds_up_to_whole_seconds() {
        let gate = TransferGate::new();
        let tenant = TenantId::new();
        let start = t0();

        gate.check_and_stamp(tenant, start, Duration::milliseconds(3500))
            .unwrap();
        let err = gate
            .check_and_stamp(
                tenant,
                start.saturating_add(Duration::milliseconds(2000)),
                Duration::milliseconds(3500),
            )
            .unwrap_err();
        match err {
            PipelineError::RateLimited { retry_after_secs } => {
                assert_eq!(retry_after_secs, 2);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn sub_second_remainder_reports_at_least_one_second() {
        let gate = TransferGate::new();
        let tenant = TenantId::new();
        let start = t0();

        gate.check_and_stamp(tenant, start, Duration::milliseconds(1500))
            .unwrap();
        let err = gate
            .check_and_stamp(
                tenant,
                start.saturating_add(Duration::milliseconds(1000)),
                Duration::milliseconds(1500),
            )
            .unwrap_err();
        match err {
            PipelineError::RateLimited { retry_after_secs } => {
                assert_eq!(retry_after_secs, 1);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }
}
