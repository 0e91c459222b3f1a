//! Host selection and job lookup.
//!
//! Both are external registries from the coordinator's point of view. The
//! store-backed implementations read the `hosts` and `jobs` tables.

use tracing::debug;

use convoy_state::{HostId, Labels, StateResult, StateStore};

/// Resolves a label selector to the ordered set of matching hosts.
pub trait HostSelector: Send + Sync {
    /// Hosts carrying every selector pair, in deployment order.
    fn select(&self, labels: &Labels) -> StateResult<Vec<HostId>>;
}

/// Answers whether a job id refers to a known job.
pub trait JobRegistry: Send + Sync {
    fn exists(&self, job: &str) -> StateResult<bool>;
}

/// Selects hosts from the state store's host registry, ordered by host id.
#[derive(Clone)]
pub struct StoreHostSelector {
    store: StateStore,
}

impl StoreHostSelector {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl HostSelector for StoreHostSelector {
    fn select(&self, labels: &Labels) -> StateResult<Vec<HostId>> {
        // The hosts table iterates in key order, which fixes batch order.
        let hosts: Vec<HostId> = self
            .store
            .list_hosts()?
            .into_iter()
            .filter(|h| h.matches(labels))
            .map(|h| h.id)
            .collect();
        debug!(?labels, count = hosts.len(), "hosts selected");
        Ok(hosts)
    }
}

/// Looks jobs up in the state store's job registry.
#[derive(Clone)]
pub struct StoreJobRegistry {
    store: StateStore,
}

impl StoreJobRegistry {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl JobRegistry for StoreJobRegistry {
    fn exists(&self, job: &str) -> StateResult<bool> {
        Ok(self.store.get_job(job)?.is_some())
    }
}
