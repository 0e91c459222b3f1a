//! Coordinator — the public face of deployment group management.
//!
//! Composes the state store, the lease arena, host selection and the job
//! registry into the operations the API exposes. Creation is idempotent
//! under races between coordinators sharing a store; rollouts start
//! asynchronously and report progress only through their status.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use convoy_state::{
    CreateResult, DeploymentGroup, RollingUpdateStatus, RolloutState, StateStore, epoch_secs,
};

use crate::controller::Rollout;
use crate::deployer::HostDeployer;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::lease::{Lease, RolloutLeases};
use crate::runner::{RunnerContext, run_rollout};
use crate::selector::{HostSelector, JobRegistry, StoreHostSelector, StoreJobRegistry};

/// Resolution of a deployment group create request.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// The group did not exist and was stored.
    Created,
    /// An identical group (same labels) already existed.
    NotModified,
    /// A group with the same name but different labels exists.
    Conflict(DeploymentGroup),
}

/// Owns deployment groups and their rolling updates.
#[derive(Clone)]
pub struct Coordinator {
    store: StateStore,
    selector: Arc<dyn HostSelector>,
    jobs: Arc<dyn JobRegistry>,
    deployer: Arc<dyn HostDeployer>,
    leases: RolloutLeases,
}

impl Coordinator {
    /// Create a coordinator that selects hosts and looks up jobs in `store`.
    pub fn new(store: StateStore, deployer: Arc<dyn HostDeployer>) -> Self {
        Self {
            selector: Arc::new(StoreHostSelector::new(store.clone())),
            jobs: Arc::new(StoreJobRegistry::new(store.clone())),
            store,
            deployer,
            leases: RolloutLeases::new(),
        }
    }

    /// Use a different host registry.
    pub fn with_host_selector(mut self, selector: Arc<dyn HostSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Use a different job registry.
    pub fn with_job_registry(mut self, jobs: Arc<dyn JobRegistry>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    // ── Deployment groups ──────────────────────────────────────────

    /// Create a deployment group, treating an identical retry as success.
    pub fn create_deployment_group(
        &self,
        group: &DeploymentGroup,
    ) -> CoordinatorResult<CreateOutcome> {
        let mut record = group.clone();
        if record.created_at == 0 {
            record.created_at = epoch_secs();
        }

        match self.store.create_deployment_group(&record)? {
            CreateResult::Created => {
                info!(deployment_group = %group.name, labels = ?group.labels, "deployment group created");
                Ok(CreateOutcome::Created)
            }
            CreateResult::AlreadyExists(_) => {
                // Compare against what is stored now, not the snapshot the
                // failed create saw.
                let current = self.store.get_deployment_group(&group.name)?;
                resolve_existing(group, current)
            }
        }
    }

    pub fn get_deployment_group(&self, name: &str) -> CoordinatorResult<DeploymentGroup> {
        self.store
            .get_deployment_group(name)?
            .ok_or_else(|| CoordinatorError::DeploymentGroupNotFound(name.to_string()))
    }

    pub fn list_deployment_groups(&self) -> CoordinatorResult<Vec<DeploymentGroup>> {
        Ok(self.store.list_deployment_groups()?)
    }

    /// Remove a group and stop its rollout.
    ///
    /// The delete and the lease revocation happen under the lease lock, so
    /// no runner can write status for the group once it is gone. A failed
    /// delete leaves the rollout running.
    pub async fn remove_deployment_group(&self, name: &str) -> CoordinatorResult<()> {
        let mut leases = self.leases.lock().await;
        if !self.store.remove_deployment_group(name)? {
            return Err(CoordinatorError::DeploymentGroupNotFound(name.to_string()));
        }
        // The runner cannot persist while the lock is held.
        let cancelled = leases.revoke(name);
        info!(deployment_group = %name, cancelled_rollout = cancelled, "deployment group removed");
        Ok(())
    }

    // ── Rolling updates ────────────────────────────────────────────

    /// Start rolling `job` out to the group's hosts and return immediately.
    ///
    /// A rollout already running for the group is superseded: it stops and
    /// its progress is replaced by the new rollout's.
    pub async fn start_rolling_update(&self, name: &str, job: &str) -> CoordinatorResult<()> {
        let group = self.get_deployment_group(name)?;
        if !self.jobs.exists(job)? {
            return Err(CoordinatorError::JobNotFound(job.to_string()));
        }

        let hosts = self.selector.select(&group.labels)?;
        let rollout = Rollout::start(&group, job, hosts);

        let mut leases = self.leases.lock().await;
        // Removal takes the same lock; re-check existence under it.
        if !self.store.set_desired_job(name, job)? {
            return Err(CoordinatorError::DeploymentGroupNotFound(name.to_string()));
        }

        let (lease, shutdown) = leases.grant(name);
        if let Err(e) = self.store.put_rolling_update_status(rollout.status()) {
            leases.release(&lease);
            return Err(e.into());
        }
        info!(
            deployment_group = %name,
            %job,
            hosts = rollout.status().hosts_total,
            batches = rollout.status().total_batches,
            batch_size = group.rolling_update.effective_batch_size(),
            "started rolling update"
        );

        if rollout.state().is_terminal() {
            debug!(deployment_group = %name, %job, "no hosts matched, rollout done");
            leases.release(&lease);
            return Ok(());
        }

        let handle = self.spawn_runner(lease.clone(), rollout, &group, shutdown);
        leases.attach(&lease, handle);
        Ok(())
    }

    /// Cancel the group's running rollout, marking it FAILED at its last
    /// persisted progress. Returns false if nothing was running.
    pub async fn stop_rolling_update(&self, name: &str) -> CoordinatorResult<bool> {
        let mut leases = self.leases.lock().await;
        let group = self.get_deployment_group(name)?;
        if !leases.revoke(name) {
            debug!(deployment_group = %name, "no active rollout to stop");
            return Ok(false);
        }

        if let Some(status) = self.store.get_rolling_update_status(name)? {
            let mut rollout = Rollout::resume(&group, status);
            rollout.cancel("rolling update cancelled");
            self.store.put_rolling_update_status(rollout.status())?;
        }
        Ok(true)
    }

    /// Status of the group's latest rollout; IDLE if it never rolled out.
    pub fn rolling_update_status(&self, name: &str) -> CoordinatorResult<RollingUpdateStatus> {
        self.get_deployment_group(name)?;
        Ok(self
            .store
            .get_rolling_update_status(name)?
            .unwrap_or_else(|| RollingUpdateStatus::idle(name)))
    }

    /// Restart runners for rollouts persisted as ROLLING_OUT, e.g. after a
    /// restart. Returns how many were resumed.
    pub async fn resume_in_flight(&self) -> CoordinatorResult<usize> {
        let mut leases = self.leases.lock().await;
        let mut resumed = 0;

        for status in self.store.list_rolling_update_statuses()? {
            if status.state != RolloutState::RollingOut || leases.is_held(&status.deployment_group)
            {
                continue;
            }
            let Some(group) = self.store.get_deployment_group(&status.deployment_group)? else {
                continue;
            };

            let rollout = Rollout::resume(&group, status);
            let (lease, shutdown) = leases.grant(&group.name);
            let handle = self.spawn_runner(lease.clone(), rollout, &group, shutdown);
            leases.attach(&lease, handle);
            resumed += 1;
        }

        if resumed > 0 {
            info!(count = resumed, "resumed in-flight rollouts");
        }
        Ok(resumed)
    }

    /// Names of groups with a running rollout.
    pub async fn active_rollouts(&self) -> Vec<String> {
        self.leases.lock().await.held()
    }

    /// Stop every running rollout, leaving persisted progress for
    /// [`Coordinator::resume_in_flight`].
    pub async fn shutdown(&self) {
        let stopped = self.leases.lock().await.revoke_all();
        info!(count = stopped, "rollouts stopped");
    }

    fn spawn_runner(
        &self,
        lease: Lease,
        rollout: Rollout,
        group: &DeploymentGroup,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let ctx = RunnerContext {
            store: self.store.clone(),
            deployer: Arc::clone(&self.deployer),
            leases: self.leases.clone(),
        };
        tokio::spawn(run_rollout(
            ctx,
            lease,
            rollout,
            group.rolling_update.timeout_per_host(),
            group.rolling_update.batch_delay(),
            shutdown,
        ))
    }
}

/// Decide the outcome of a create that lost to an existing record.
fn resolve_existing(
    request: &DeploymentGroup,
    current: Option<DeploymentGroup>,
) -> CoordinatorResult<CreateOutcome> {
    match current {
        Some(existing) if existing.same_selector(request) => {
            debug!(deployment_group = %request.name, "identical deployment group exists");
            Ok(CreateOutcome::NotModified)
        }
        Some(existing) => {
            debug!(
                deployment_group = %request.name,
                existing = ?existing.labels,
                requested = ?request.labels,
                "deployment group exists with different labels"
            );
            Ok(CreateOutcome::Conflict(existing))
        }
        None => {
            warn!(deployment_group = %request.name, "deployment group removed during create");
            Err(CoordinatorError::CoordinationRace(request.name.clone()))
        }
    }
}
