//! Rollout controller — the rolling update state machine.
//!
//! The controller plans batches over a snapshot of hosts, accounts for the
//! outcome of each batch, and decides whether the rollout continues,
//! completes, or aborts. It performs no I/O; the runner drives it.
//!
//! ```text
//! IDLE ──start──▶ ROLLING_OUT ──all batches ok──▶ DONE
//!                     │
//!                     └─threshold exceeded / cancel──▶ FAILED
//! ```

use tracing::{debug, info, warn};

use convoy_state::{
    DeploymentGroup, HostId, JobId, RollingUpdateStatus, RolloutState, epoch_secs,
};

use crate::deployer::DeployOutcome;

/// What the runner should do after a batch was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchDecision {
    /// Wait out the batch delay, then run the next batch.
    Continue,
    /// Every batch finished within the failure threshold.
    Completed,
    /// The failure threshold was exceeded; no further batches run.
    Aborted,
}

/// A rolling update of one deployment group.
#[derive(Debug, Clone)]
pub struct Rollout {
    status: RollingUpdateStatus,
    batch_size: usize,
    max_failed_hosts: u32,
}

impl Rollout {
    /// Start a rollout of `job` over a snapshot of `hosts`.
    ///
    /// An empty host set completes immediately.
    pub fn start(group: &DeploymentGroup, job: &str, hosts: Vec<HostId>) -> Self {
        let batch_size = group.rolling_update.effective_batch_size();
        let total_batches = batch_count(hosts.len(), batch_size);
        let state = if hosts.is_empty() {
            RolloutState::Done
        } else {
            RolloutState::RollingOut
        };

        Self {
            status: RollingUpdateStatus {
                deployment_group: group.name.clone(),
                job_id: Some(job.to_string()),
                state,
                hosts_total: hosts.len() as u32,
                hosts,
                hosts_completed: 0,
                hosts_failed: 0,
                failed_hosts: Vec::new(),
                current_batch: 0,
                total_batches,
                last_error: None,
                updated_at: epoch_secs(),
            },
            batch_size,
            max_failed_hosts: group.rolling_update.max_failed_hosts,
        }
    }

    /// Continue a rollout from persisted progress.
    ///
    /// The first batch without a persisted outcome runs again in full.
    pub fn resume(group: &DeploymentGroup, status: RollingUpdateStatus) -> Self {
        debug!(
            deployment_group = %group.name,
            batch = status.current_batch,
            total = status.total_batches,
            "resuming rolling update"
        );
        Self {
            status,
            batch_size: group.rolling_update.effective_batch_size(),
            max_failed_hosts: group.rolling_update.max_failed_hosts,
        }
    }

    pub fn status(&self) -> &RollingUpdateStatus {
        &self.status
    }

    pub fn into_status(self) -> RollingUpdateStatus {
        self.status
    }

    pub fn state(&self) -> RolloutState {
        self.status.state
    }

    /// The job being rolled out.
    pub fn job(&self) -> Option<&JobId> {
        self.status.job_id.as_ref()
    }

    /// Hosts of the next batch, or `None` once the rollout left ROLLING_OUT
    /// or ran out of batches.
    pub fn next_batch(&self) -> Option<&[HostId]> {
        if self.status.state != RolloutState::RollingOut {
            return None;
        }
        let start = self.status.current_batch as usize * self.batch_size;
        if start >= self.status.hosts.len() {
            return None;
        }
        let end = (start + self.batch_size).min(self.status.hosts.len());
        Some(&self.status.hosts[start..end])
    }

    /// Account for the outcomes of the current batch and advance.
    ///
    /// `outcomes` must cover every host of the batch. Failures and timeouts
    /// both count against `max_failed_hosts`.
    pub fn record_batch(&mut self, outcomes: Vec<(HostId, DeployOutcome)>) -> BatchDecision {
        if self.status.state != RolloutState::RollingOut {
            return BatchDecision::Aborted;
        }

        for (host, outcome) in outcomes {
            match outcome {
                DeployOutcome::Success => self.status.hosts_completed += 1,
                DeployOutcome::Failure(reason) => {
                    warn!(deployment_group = %self.status.deployment_group, %host, %reason, "host deployment failed");
                    self.status.last_error = Some(format!("host {host}: {reason}"));
                    self.status.hosts_failed += 1;
                    self.status.failed_hosts.push(host);
                }
                DeployOutcome::Timeout => {
                    warn!(deployment_group = %self.status.deployment_group, %host, "host deployment timed out");
                    self.status.last_error = Some(format!("host {host}: deployment timed out"));
                    self.status.hosts_failed += 1;
                    self.status.failed_hosts.push(host);
                }
            }
        }

        self.status.current_batch += 1;
        self.status.updated_at = epoch_secs();

        let current = self.status.current_batch;
        let total = self.status.total_batches;

        if self.status.hosts_failed > self.max_failed_hosts {
            let cause = self.status.last_error.take().unwrap_or_default();
            self.status.last_error = Some(format!(
                "batch {current}/{total} exceeded failure threshold ({} failed, {} tolerated): {cause}",
                self.status.hosts_failed, self.max_failed_hosts
            ));
            self.status.state = RolloutState::Failed;
            warn!(
                deployment_group = %self.status.deployment_group,
                batch = current,
                failed = self.status.hosts_failed,
                "rolling update aborted"
            );
            return BatchDecision::Aborted;
        }

        if current >= total {
            self.status.state = RolloutState::Done;
            info!(
                deployment_group = %self.status.deployment_group,
                completed = self.status.hosts_completed,
                failed = self.status.hosts_failed,
                "rolling update completed"
            );
            BatchDecision::Completed
        } else {
            debug!(
                deployment_group = %self.status.deployment_group,
                batch = current + 1,
                total,
                "advancing to next batch"
            );
            BatchDecision::Continue
        }
    }

    /// Stop the rollout at its current progress.
    pub fn cancel(&mut self, reason: &str) {
        if self.status.state == RolloutState::RollingOut {
            info!(deployment_group = %self.status.deployment_group, %reason, "rolling update cancelled");
            self.status.state = RolloutState::Failed;
            self.status.last_error = Some(reason.to_string());
            self.status.updated_at = epoch_secs();
        }
    }
}

/// Calculate number of batches for a rolling update.
fn batch_count(total_hosts: usize, batch_size: usize) -> u32 {
    if batch_size == 0 {
        return total_hosts as u32;
    }
    total_hosts.div_ceil(batch_size) as u32
}
