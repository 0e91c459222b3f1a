//! StateStore — redb-backed state persistence for Convoy.
//!
//! Provides typed operations over deployment groups, rolling update status,
//! hosts, and jobs. All values are JSON-serialized into redb's `&[u8]`
//! value columns. The store supports both on-disk and in-memory backends
//! (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, StorageBackend};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Outcome of a compare-and-swap deployment group create.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateResult {
    /// No record existed; the request was stored.
    Created,
    /// A record with the same name already existed and was left untouched.
    AlreadyExists(DeploymentGroup),
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let store = Self::open_with_backend(redb::backends::InMemoryBackend::new())?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Open a state store over a custom redb storage backend.
    pub fn open_with_backend(backend: impl StorageBackend) -> StateResult<Self> {
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(DEPLOYMENT_GROUPS).map_err(map_err!(Table))?;
        txn.open_table(ROLLING_UPDATES).map_err(map_err!(Table))?;
        txn.open_table(HOSTS).map_err(map_err!(Table))?;
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Deployment groups ──────────────────────────────────────────

    /// Store a deployment group unless one with the same name exists.
    ///
    /// The lookup and the insert share one write transaction, so among
    /// concurrent creators of a name exactly one sees `Created`; the rest
    /// get the winner's record back.
    pub fn create_deployment_group(&self, group: &DeploymentGroup) -> StateResult<CreateResult> {
        let value = serde_json::to_vec(group).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existing = {
            let mut table = txn.open_table(DEPLOYMENT_GROUPS).map_err(map_err!(Table))?;
            let existing: Option<DeploymentGroup> =
                match table.get(group.name.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => Some(
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                    ),
                    None => None,
                };
            if existing.is_none() {
                table
                    .insert(group.name.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            existing
        };

        match existing {
            Some(existing) => {
                txn.abort().map_err(map_err!(Transaction))?;
                debug!(name = %group.name, "deployment group already exists");
                Ok(CreateResult::AlreadyExists(existing))
            }
            None => {
                txn.commit().map_err(map_err!(Transaction))?;
                debug!(name = %group.name, "deployment group created");
                Ok(CreateResult::Created)
            }
        }
    }

    /// Get a deployment group by name.
    pub fn get_deployment_group(&self, name: &str) -> StateResult<Option<DeploymentGroup>> {
        self.get_json(DEPLOYMENT_GROUPS, name)
    }

    /// List all deployment groups, ordered by name.
    pub fn list_deployment_groups(&self) -> StateResult<Vec<DeploymentGroup>> {
        self.list_json(DEPLOYMENT_GROUPS)
    }

    /// Delete a deployment group together with its rolling update status.
    /// Returns true if the group existed.
    pub fn remove_deployment_group(&self, name: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut groups = txn.open_table(DEPLOYMENT_GROUPS).map_err(map_err!(Table))?;
            existed = groups.remove(name).map_err(map_err!(Write))?.is_some();
            if existed {
                let mut statuses = txn.open_table(ROLLING_UPDATES).map_err(map_err!(Table))?;
                statuses.remove(name).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%name, existed, "deployment group removed");
        Ok(existed)
    }

    /// Record the job a group is being rolled out to. Returns false if the
    /// group does not exist.
    pub fn set_desired_job(&self, name: &str, job: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let found;
        {
            let mut table = txn.open_table(DEPLOYMENT_GROUPS).map_err(map_err!(Table))?;
            let current: Option<DeploymentGroup> =
                match table.get(name).map_err(map_err!(Read))? {
                    Some(guard) => Some(
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                    ),
                    None => None,
                };
            found = current.is_some();
            if let Some(mut group) = current {
                group.desired_job = Some(job.to_string());
                let value = serde_json::to_vec(&group).map_err(map_err!(Serialize))?;
                table
                    .insert(name, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(found)
    }

    // ── Rolling update status ──────────────────────────────────────

    /// Overwrite the rolling update status of a group.
    pub fn put_rolling_update_status(&self, status: &RollingUpdateStatus) -> StateResult<()> {
        self.put_json(ROLLING_UPDATES, &status.deployment_group, status)?;
        debug!(
            deployment_group = %status.deployment_group,
            state = ?status.state,
            completed = status.hosts_completed,
            failed = status.hosts_failed,
            "rolling update status stored"
        );
        Ok(())
    }

    /// Get the rolling update status of a group, if it ever rolled out.
    pub fn get_rolling_update_status(&self, name: &str) -> StateResult<Option<RollingUpdateStatus>> {
        self.get_json(ROLLING_UPDATES, name)
    }

    /// List every persisted rolling update status.
    pub fn list_rolling_update_statuses(&self) -> StateResult<Vec<RollingUpdateStatus>> {
        self.list_json(ROLLING_UPDATES)
    }

    // ── Hosts ──────────────────────────────────────────────────────

    /// Insert or update a host.
    pub fn put_host(&self, host: &HostInfo) -> StateResult<()> {
        self.put_json(HOSTS, &host.id, host)
    }

    /// Get a host by ID.
    pub fn get_host(&self, host_id: &str) -> StateResult<Option<HostInfo>> {
        self.get_json(HOSTS, host_id)
    }

    /// List all hosts, ordered by ID.
    pub fn list_hosts(&self) -> StateResult<Vec<HostInfo>> {
        self.list_json(HOSTS)
    }

    /// Delete a host by ID. Returns true if it existed.
    pub fn delete_host(&self, host_id: &str) -> StateResult<bool> {
        self.delete_key(HOSTS, host_id)
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Insert or update a job.
    pub fn put_job(&self, job: &JobSpec) -> StateResult<()> {
        self.put_json(JOBS, &job.id, job)
    }

    /// Get a job by ID.
    pub fn get_job(&self, job_id: &str) -> StateResult<Option<JobSpec>> {
        self.get_json(JOBS, job_id)
    }

    /// List all jobs, ordered by ID.
    pub fn list_jobs(&self) -> StateResult<Vec<JobSpec>> {
        self.list_json(JOBS)
    }

    /// Delete a job by ID. Returns true if it existed.
    pub fn delete_job(&self, job_id: &str) -> StateResult<bool> {
        self.delete_key(JOBS, job_id)
    }

    // ── Shared helpers ─────────────────────────────────────────────

    fn put_json<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_json<T: DeserializeOwned>(&self, def: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(item);
        }
        Ok(results)
    }

    fn delete_key(&self, def: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}
