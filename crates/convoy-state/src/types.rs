//! Domain types for the Convoy state store.
//!
//! These types represent the persisted state of deployment groups, their
//! rolling update progress, and the host and job registries. All types are
//! serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Unique identifier for a host in the fleet.
pub type HostId = String;

/// Unique identifier for a job definition.
pub type JobId = String;

/// Label selector: every pair must be present on a host for it to match.
pub type Labels = BTreeMap<String, String>;

// ── Deployment group ──────────────────────────────────────────────

/// A named policy binding a label selector to a desired job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentGroup {
    /// Unique, immutable key.
    pub name: String,
    /// Host label selector. Immutable after creation.
    pub labels: Labels,
    /// Job most recently accepted for rollout.
    #[serde(default)]
    pub desired_job: Option<JobId>,
    #[serde(default)]
    pub rolling_update: RollingUpdateStrategy,
    /// Unix timestamp (seconds) when this group was created.
    #[serde(default)]
    pub created_at: u64,
}

impl DeploymentGroup {
    /// Create a group with the default rolling update strategy.
    pub fn new(name: &str, labels: Labels) -> Self {
        Self {
            name: name.to_string(),
            labels,
            desired_job: None,
            rolling_update: RollingUpdateStrategy::default(),
            created_at: 0,
        }
    }

    /// Whether a create request describes the same group as this record.
    ///
    /// Only the label selector takes part: the name is the key and the
    /// strategy and desired job may legitimately differ on a retried create.
    pub fn same_selector(&self, other: &DeploymentGroup) -> bool {
        self.labels == other.labels
    }
}

const DEFAULT_TIMEOUT_PER_HOST_MS: u64 = 300_000;

/// How a rolling update walks through a group's hosts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RollingUpdateStrategy {
    /// Hosts deployed concurrently per batch. Zero is treated as one.
    pub batch_size: u32,
    /// Bake-in delay between successful batches, in milliseconds.
    pub batch_delay_ms: u64,
    /// Maximum time to wait for one host's deployment, in milliseconds.
    /// Zero falls back to the default.
    pub timeout_per_host_ms: u64,
    /// Failed hosts tolerated before the rollout aborts. Zero aborts on the
    /// first failure.
    pub max_failed_hosts: u32,
}

impl Default for RollingUpdateStrategy {
    fn default() -> Self {
        Self {
            batch_size: 1,
            batch_delay_ms: 0,
            timeout_per_host_ms: DEFAULT_TIMEOUT_PER_HOST_MS,
            max_failed_hosts: 0,
        }
    }
}

impl RollingUpdateStrategy {
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1) as usize
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn timeout_per_host(&self) -> Duration {
        let ms = match self.timeout_per_host_ms {
            0 => DEFAULT_TIMEOUT_PER_HOST_MS,
            ms => ms,
        };
        Duration::from_millis(ms)
    }
}

// ── Rolling update status ─────────────────────────────────────────

/// Lifecycle state of a group's rolling update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RolloutState {
    Idle,
    RollingOut,
    Done,
    Failed,
}

impl RolloutState {
    /// DONE and FAILED stay put until a new rollout starts.
    pub fn is_terminal(self) -> bool {
        matches!(self, RolloutState::Done | RolloutState::Failed)
    }
}

/// Progress of the most recent rolling update of a deployment group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RollingUpdateStatus {
    pub deployment_group: String,
    pub job_id: Option<JobId>,
    pub state: RolloutState,
    /// Hosts selected at rollout start, in deployment order.
    pub hosts: Vec<HostId>,
    pub hosts_total: u32,
    pub hosts_completed: u32,
    pub hosts_failed: u32,
    pub failed_hosts: Vec<HostId>,
    /// Number of batches that have reached a terminal outcome.
    pub current_batch: u32,
    pub total_batches: u32,
    pub last_error: Option<String>,
    /// Unix timestamp of the last write.
    pub updated_at: u64,
}

impl RollingUpdateStatus {
    /// Status reported for a group that has never rolled out.
    pub fn idle(deployment_group: &str) -> Self {
        Self {
            deployment_group: deployment_group.to_string(),
            job_id: None,
            state: RolloutState::Idle,
            hosts: Vec::new(),
            hosts_total: 0,
            hosts_completed: 0,
            hosts_failed: 0,
            failed_hosts: Vec::new(),
            current_batch: 0,
            total_batches: 0,
            last_error: None,
            updated_at: 0,
        }
    }
}

// ── Host ──────────────────────────────────────────────────────────

/// A host that can receive job deployments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostInfo {
    pub id: HostId,
    /// Agent address (ip:port) the deployer talks to.
    pub address: String,
    #[serde(default)]
    pub labels: Labels,
    /// Unix timestamp when the host registered.
    #[serde(default)]
    pub registered_at: u64,
}

impl HostInfo {
    /// Whether this host carries every pair of the selector.
    pub fn matches(&self, selector: &Labels) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k).is_some_and(|have| have == v))
    }
}

// ── Job ───────────────────────────────────────────────────────────

/// A deployable job definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSpec {
    pub id: JobId,
    /// Artifact reference handed to the host agent.
    pub image: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub created_at: u64,
}

pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn host_matches_subset_selector() {
        let host = HostInfo {
            id: "h1".to_string(),
            address: "10.0.0.1:5801".to_string(),
            labels: labels(&[("role", "web"), ("zone", "a")]),
            registered_at: 0,
        };

        assert!(host.matches(&labels(&[("role", "web")])));
        assert!(host.matches(&Labels::new()));
        assert!(!host.matches(&labels(&[("role", "db")])));
        assert!(!host.matches(&labels(&[("role", "web"), ("pool", "x")])));
    }

    #[test]
    fn same_selector_ignores_strategy() {
        let a = DeploymentGroup::new("web", labels(&[("role", "web")]));
        let mut b = a.clone();
        b.rolling_update.batch_size = 5;
        assert!(a.same_selector(&b));

        b.labels.insert("zone".to_string(), "b".to_string());
        assert!(!a.same_selector(&b));
    }

    #[test]
    fn strategy_defaults_fill_missing_fields() {
        let group: DeploymentGroup =
            serde_json::from_str(r#"{"name":"web","labels":{"role":"web"}}"#).unwrap();
        assert_eq!(group.rolling_update, RollingUpdateStrategy::default());
        assert_eq!(group.desired_job, None);

        let strategy: RollingUpdateStrategy =
            serde_json::from_str(r#"{"batch_size":0}"#).unwrap();
        assert_eq!(strategy.effective_batch_size(), 1);
        assert_eq!(strategy.timeout_per_host(), Duration::from_secs(300));
    }

    #[test]
    fn zero_host_timeout_uses_default() {
        let strategy: RollingUpdateStrategy =
            serde_json::from_str(r#"{"timeout_per_host_ms":0}"#).unwrap();
        assert_eq!(strategy.timeout_per_host(), Duration::from_secs(300));

        let strategy: RollingUpdateStrategy =
            serde_json::from_str(r#"{"timeout_per_host_ms":1500}"#).unwrap();
        assert_eq!(strategy.timeout_per_host(), Duration::from_millis(1500));
    }

    #[test]
    fn rollout_state_wire_names() {
        assert_eq!(
            serde_json::to_string(&RolloutState::RollingOut).unwrap(),
            "\"ROLLING_OUT\""
        );
        assert!(RolloutState::Failed.is_terminal());
        assert!(!RolloutState::RollingOut.is_terminal());
    }
}
