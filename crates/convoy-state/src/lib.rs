//! convoy-state — embedded state store for Convoy.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state for deployment groups, rolling update status, hosts, and jobs.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns,
//! keyed by their name or id.
//!
//! Deployment group creation is a compare-and-swap: the existence check and
//! the insert run inside a single write transaction. redb admits one write
//! transaction at a time, so concurrent creators of the same name observe
//! exactly one [`CreateResult::Created`].
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{CreateResult, StateStore};
pub use types::*;
