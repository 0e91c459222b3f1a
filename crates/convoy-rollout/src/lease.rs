//! Rollout leases — exclusive write access to a group's rollout status.
//!
//! Each active rollout holds a lease identified by group name and a
//! generation number. Granting a lease for a name that already has one
//! supersedes the holder: its shutdown signal fires and its task is
//! aborted. Status writes are checked against the current generation
//! under the same lock, so a superseded runner can never overwrite the
//! status of the rollout that replaced it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use convoy_state::{RollingUpdateStatus, StateResult, StateStore};

/// Proof of holding a group's rollout lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    name: String,
    generation: u64,
}

impl Lease {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Per-group lease state.
struct LeaseSlot {
    generation: u64,
    /// Shutdown signal for the holder.
    shutdown_tx: watch::Sender<bool>,
    /// Handle to the runner task, once spawned.
    handle: Option<JoinHandle<()>>,
}

impl LeaseSlot {
    fn revoke(self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle {
            handle.abort();
        }
    }
}

/// The lease map; only reachable through [`RolloutLeases::lock`].
#[derive(Default)]
pub struct LeaseTable {
    next_generation: u64,
    slots: HashMap<String, LeaseSlot>,
}

impl LeaseTable {
    /// Grant a fresh lease for `name`, superseding any current holder.
    ///
    /// Returns the lease and the shutdown receiver its runner must watch.
    pub fn grant(&mut self, name: &str) -> (Lease, watch::Receiver<bool>) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        if let Some(old) = self.slots.insert(
            name.to_string(),
            LeaseSlot {
                generation,
                shutdown_tx,
                handle: None,
            },
        ) {
            info!(deployment_group = %name, superseded = old.generation, generation, "superseding running rollout");
            old.revoke();
        }

        (
            Lease {
                name: name.to_string(),
                generation,
            },
            shutdown_rx,
        )
    }

    /// Attach the runner task to a granted lease.
    pub fn attach(&mut self, lease: &Lease, handle: JoinHandle<()>) {
        match self.slots.get_mut(&lease.name) {
            Some(slot) if slot.generation == lease.generation => slot.handle = Some(handle),
            // Revoked before the task was attached.
            _ => handle.abort(),
        }
    }

    /// Revoke whatever lease `name` currently has. Returns true if one was held.
    pub fn revoke(&mut self, name: &str) -> bool {
        match self.slots.remove(name) {
            Some(slot) => {
                debug!(deployment_group = %name, generation = slot.generation, "rollout lease revoked");
                slot.revoke();
                true
            }
            None => false,
        }
    }

    /// Revoke every lease (for graceful shutdown).
    pub fn revoke_all(&mut self) -> usize {
        let count = self.slots.len();
        for (_, slot) in self.slots.drain() {
            slot.revoke();
        }
        count
    }

    /// Drop a lease that reached a terminal state. No-op if superseded.
    pub fn release(&mut self, lease: &Lease) {
        if self.is_current(lease) {
            self.slots.remove(&lease.name);
            debug!(deployment_group = %lease.name, generation = lease.generation, "rollout lease released");
        }
    }

    pub fn is_current(&self, lease: &Lease) -> bool {
        self.slots
            .get(&lease.name)
            .is_some_and(|slot| slot.generation == lease.generation)
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn held(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }
}

/// Arena of rollout leases guarded by a single map-level lock.
#[derive(Clone, Default)]
pub struct RolloutLeases {
    table: Arc<Mutex<LeaseTable>>,
}

impl RolloutLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the lease table for a compound operation.
    pub async fn lock(&self) -> MutexGuard<'_, LeaseTable> {
        self.table.lock().await
    }

    /// Persist `status` if `lease` is still current. Returns false when the
    /// lease was superseded or revoked and nothing was written.
    pub async fn persist(
        &self,
        lease: &Lease,
        store: &StateStore,
        status: &RollingUpdateStatus,
    ) -> StateResult<bool> {
        let table = self.table.lock().await;
        if !table.is_current(lease) {
            debug!(deployment_group = %lease.name, generation = lease.generation, "dropping status write from stale lease");
            return Ok(false);
        }
        store.put_rolling_update_status(status)?;
        Ok(true)
    }

    /// Release a lease after its rollout reached a terminal state.
    pub async fn release(&self, lease: &Lease) {
        self.table.lock().await.release(lease);
    }

    pub async fn is_held(&self, name: &str) -> bool {
        self.table.lock().await.is_held(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grant_supersedes_previous_holder() {
        let leases = RolloutLeases::new();
        let mut table = leases.lock().await;

        let (first, mut first_rx) = table.grant("web");
        let (second, _second_rx) = table.grant("web");

        assert_ne!(first.generation(), second.generation());
        assert!(!table.is_current(&first));
        assert!(table.is_current(&second));
        assert!(*first_rx.borrow_and_update());
    }

    #[tokio::test]
    async fn stale_lease_cannot_persist() {
        let store = StateStore::open_in_memory().unwrap();
        let leases = RolloutLeases::new();
        let (stale, _) = leases.lock().await.grant("web");
        let (current, _) = leases.lock().await.grant("web");

        let status = RollingUpdateStatus::idle("web");
        assert!(!leases.persist(&stale, &store, &status).await.unwrap());
        assert!(store.get_rolling_update_status("web").unwrap().is_none());

        assert!(leases.persist(&current, &store, &status).await.unwrap());
        assert!(store.get_rolling_update_status("web").unwrap().is_some());
    }

    #[tokio::test]
    async fn release_ignores_superseded_lease() {
        let leases = RolloutLeases::new();
        let (old, _) = leases.lock().await.grant("web");
        let (new, _) = leases.lock().await.grant("web");

        leases.release(&old).await;
        assert!(leases.is_held("web").await);

        leases.release(&new).await;
        assert!(!leases.is_held("web").await);
    }

    #[tokio::test]
    async fn revoke_aborts_attached_task() {
        let leases = RolloutLeases::new();
        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
        {
            let mut table = leases.lock().await;
            let (lease, _rx) = table.grant("web");
            let handle = tokio::spawn(async move {
                let _alive = alive_tx;
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            });
            table.attach(&lease, handle);

            assert!(table.revoke("web"));
            assert!(!table.revoke("web"));
        }

        // The aborted task drops its sender.
        assert!(alive_rx.await.is_err());
        assert!(!leases.is_held("web").await);
    }
}
