//! Consumable-resource node-selection core for a cluster workload
//! manager: given a cluster's node/core layout and a partition's
//! over-subscription policy, packs job allocations into rows of
//! non-overlapping cores, tracks per-node usage, evaluates reservation
//! placement, and aggregates per-node allocation for reporting.
//!
//! The crate is a library with no controller loop of its own - callers
//! drive a [`Context`] through [`lifecycle`]'s operations the way a
//! workload manager's controller would.

pub mod aggregator;
pub mod bitset;
pub mod config;
pub mod context;
pub mod coremap;
pub mod error;
pub mod gres;
pub mod job;
pub mod lifecycle;
pub mod node;
pub mod partition;
pub mod reservation;
pub mod wire;

pub use bitset::Bitset;
pub use context::{Context, NodeRecord, PartitionId, PartitionState};
pub use coremap::CoreMap;
pub use error::{CoreError, CoreResult};
pub use job::{JobId, JobResources, NodeReq};
pub use lifecycle::JobAction;
pub use node::{NodeCapacity, NodeState, NodeUsage};
pub use partition::{PartitionRows, Row};
