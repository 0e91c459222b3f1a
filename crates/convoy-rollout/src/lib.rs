//! Convoy rolling updates — deployment groups rolled out batch by batch.
//!
//! This crate owns the lifecycle of deployment groups and drives a job
//! across the hosts a group's label selector resolves to. Hosts are
//! deployed in ordered batches; a batch runs concurrently, batches run
//! strictly in sequence, and a configurable failure threshold decides
//! when a rollout aborts.
//!
//! # Components
//!
//! - **`coordinator`** — Public facade (create, get, remove, start/stop rollouts)
//! - **`controller`** — Pure rollout state machine (batch planning, outcome accounting)
//! - **`runner`** — Async task executing one rollout against a `HostDeployer`
//! - **`lease`** — Per-group rollout leases; the only writers of rollout status
//! - **`selector`** — Host selection and job lookup seams
//! - **`deployer`** — Per-host deployment seam and the HTTP agent deployer
//!
//! # Architecture
//!
//! ```text
//! Coordinator
//!   ├── StateStore (groups, status)
//!   ├── RolloutLeases: name → { generation, shutdown, task }
//!   │   └── runner task per active group
//!   │       ├── Rollout (controller)
//!   │       └── JoinSet of HostDeployer::deploy per batch
//!   ├── HostSelector (snapshot at rollout start)
//!   └── JobRegistry
//! ```

pub mod controller;
pub mod coordinator;
pub mod deployer;
pub mod error;
pub mod lease;
pub mod runner;
pub mod selector;

#[cfg(test)]
mod test_support;

pub use controller::{BatchDecision, Rollout};
pub use coordinator::{Coordinator, CreateOutcome};
pub use deployer::{
    DEFAULT_AGENT_PORT, DeployFuture, DeployOutcome, HostDeployer, HttpAgentDeployer,
};
pub use error::{CoordinatorError, CoordinatorResult};
pub use lease::{Lease, RolloutLeases};
pub use selector::{HostSelector, JobRegistry, StoreHostSelector, StoreJobRegistry};
