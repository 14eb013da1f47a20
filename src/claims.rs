//! Role claim propagation to the IdP.
//!
//! Reconciliation and admin role changes enqueue a `RoleClaimJob` and move on.
//! A background worker drains the queue and pushes `{"role": ...}` as the
//! subject's custom claims, retrying failures with exponential backoff and
//! jitter until `max_attempts` is reached, then logging the final failure.
//!
//! The claim is a mirror of the stored role; losing a job only delays the
//! mirror until the next login notices the echoed role differs.

use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::identity::Role;
use crate::idp::IdentityProvider;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleClaimJob {
    pub subject_id: String,
    pub role: Role,
}

/// Producer side of the claim-sync queue.
#[derive(Clone, Debug)]
pub struct ClaimSyncQueue {
    tx: mpsc::UnboundedSender<RoleClaimJob>,
}

impl ClaimSyncQueue {
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RoleClaimJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue a sync without waiting. Returns false if the worker is gone.
    pub fn enqueue(&self, subject_id: &str, role: Role) -> bool {
        let job = RoleClaimJob {
            subject_id: subject_id.to_string(),
            role,
        };
        match self.tx.send(job) {
            Ok(()) => true,
            Err(err) => {
                warn!(subject_id = %err.0.subject_id, "claim sync queue closed, dropping job");
                false
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ClaimSyncConfig {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl ClaimSyncConfig {
    /// Default: 5 attempts, 1s->60s exponential backoff with jitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    #[must_use]
    pub fn with_backoff_max(mut self, max: Duration) -> Self {
        self.backoff_max = max;
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let max_attempts = self.max_attempts.max(1);
        let backoff_base = if self.backoff_base.is_zero() {
            Duration::from_millis(1)
        } else {
            self.backoff_base
        };
        let backoff_max = self.backoff_max.max(backoff_base);
        Self {
            max_attempts,
            backoff_base,
            backoff_max,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        self.backoff_max
    }
}

impl Default for ClaimSyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the worker. It exits once every `ClaimSyncQueue` clone is dropped.
pub fn spawn_claim_sync_worker(
    provider: Arc<dyn IdentityProvider>,
    mut rx: mpsc::UnboundedReceiver<RoleClaimJob>,
    config: ClaimSyncConfig,
) -> tokio::task::JoinHandle<()> {
    let config = config.normalize();
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            // One task per job so a retrying subject does not stall the rest.
            let provider = provider.clone();
            tokio::spawn(async move {
                sync_with_retry(provider.as_ref(), &job, &config).await;
            });
        }
        debug!("claim sync queue closed");
    })
}

/// Push one job to the IdP, retrying with backoff. Returns true on success.
pub async fn sync_with_retry(
    provider: &dyn IdentityProvider,
    job: &RoleClaimJob,
    config: &ClaimSyncConfig,
) -> bool {
    let claims = json!({ "role": job.role.as_str() });
    let mut attempt = 0u32;
    loop {
        attempt = attempt.saturating_add(1);
        match provider.set_custom_claims(&job.subject_id, &claims).await {
            Ok(()) => {
                info!(subject_id = %job.subject_id, role = %job.role, attempt, "role claim synced");
                return true;
            }
            Err(err) if attempt >= config.max_attempts() => {
                error!(
                    subject_id = %job.subject_id,
                    role = %job.role,
                    attempt,
                    "role claim sync failed permanently: {err:#}"
                );
                return false;
            }
            Err(err) => {
                let delay = backoff_delay(attempt, config.backoff_base(), config.backoff_max());
                warn!(
                    subject_id = %job.subject_id,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "role claim sync failed, retrying: {err:#}"
                );
                sleep(delay).await;
            }
        }
    }
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    jitter_delay(delay.min(max))
}

// Full delay in [d/2, d].
fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}
