//! redb table definitions for the Convoy state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Shape shared by every table: string key, JSON bytes value.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Deployment groups keyed by group name.
pub const DEPLOYMENT_GROUPS: JsonTable = TableDefinition::new("deployment_groups");

/// Rolling update status keyed by deployment group name (one record per group).
pub const ROLLING_UPDATES: JsonTable = TableDefinition::new("rolling_updates");

/// Registered hosts keyed by host id.
pub const HOSTS: JsonTable = TableDefinition::new("hosts");

/// Job definitions keyed by job id.
pub const JOBS: JsonTable = TableDefinition::new("jobs");
