//! Per-node usage accounting.
//!
//! A small per-node struct of running totals plus a map keyed by node
//! id, with `reserve`/`release` pairs that saturate rather than panic
//! on mismatched bookkeeping.

use crate::job::NodeReq;

/// Per-`NodeReq`-kind allocation counters for one node: three independent
/// counters rather than a single flattened total, so `AnyRow` admission
/// can be decided without losing track of how many `Exclusive`/`OneRow`
/// jobs hold the node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeState {
    pub exclusive: u32,
    pub one_row: u32,
    pub any_row: u32,
}

impl NodeState {
    /// Total count of all allocations contributing to this node's state.
    pub fn total(&self) -> u32 {
        self.exclusive + self.one_row + self.any_row
    }

    pub fn is_available(&self) -> bool {
        self.total() == 0
    }

    fn counter_mut(&mut self, req: NodeReq) -> &mut u32 {
        match req {
            NodeReq::Exclusive => &mut self.exclusive,
            NodeReq::OneRow => &mut self.one_row,
            NodeReq::AnyRow => &mut self.any_row,
        }
    }

    /// Bumps the counter for `req` by one.
    pub fn bump(&mut self, req: NodeReq) {
        *self.counter_mut(req) += 1;
    }

    /// Decrements the counter for `req` by one, saturating at zero and
    /// returning whether an underflow was avoided.
    pub fn drop_saturating(&mut self, req: NodeReq) -> bool {
        let counter = self.counter_mut(req);
        if *counter == 0 {
            false
        } else {
            *counter -= 1;
            true
        }
    }
}

/// Running totals of allocated memory and node state for one node.
#[derive(Debug, Clone, Default)]
pub struct NodeUsage {
    pub alloc_memory: u64,
    pub node_state: NodeState,
}

impl NodeUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `bytes` to `alloc_memory` and bumps `node_state` by `req`.
    pub fn reserve(&mut self, bytes: u64, req: NodeReq) {
        self.alloc_memory += bytes;
        self.node_state.bump(req);
    }

    /// Subtracts `bytes` from `alloc_memory`, saturating at zero, and
    /// decrements `node_state` by `req`, saturating. Logs an
    /// `INVARIANT_UNDERFLOW` at error level when either saturates,
    /// rather than panicking: saturate and continue.
    pub fn release(&mut self, bytes: u64, req: NodeReq, node_name: &str) {
        self.release_memory(bytes, node_name);
        if !self.node_state.drop_saturating(req) {
            log::error!(
                "INVARIANT_UNDERFLOW: node {node_name} node_state counter for {req:?} already zero; \
                 saturating"
            );
        }
    }

    /// Subtracts `bytes` from `alloc_memory` only, saturating at zero,
    /// without touching `node_state`. A suspended job holds memory but
    /// no `node_state` contribution, so removing or resizing it must
    /// release memory alone.
    pub fn release_memory(&mut self, bytes: u64, node_name: &str) {
        if let Some(new_value) = self.alloc_memory.checked_sub(bytes) {
            self.alloc_memory = new_value;
        } else {
            log::error!(
                "INVARIANT_UNDERFLOW: node {node_name} alloc_memory underflow releasing {bytes} bytes \
                 (had {}); saturating at 0",
                self.alloc_memory
            );
            self.alloc_memory = 0;
        }
    }
}

/// Per-node configured capacity, the minimum the core needs from the
/// node-record collaborator. `can_host` provides a cheap short-circuit
/// feasibility check ahead of full placement.
#[derive(Debug, Clone, Copy)]
pub struct NodeCapacity {
    pub cpus: u32,
    pub real_memory: u64,
    pub mem_spec_limit: u64,
}

impl NodeCapacity {
    /// Bytes available for job allocation after the node's specialized
    /// memory reservation is subtracted.
    pub fn allocatable_memory(&self) -> u64 {
        self.real_memory.saturating_sub(self.mem_spec_limit)
    }

    /// Cheap feasibility check used before attempting full placement:
    /// can this node, in principle, ever host a request of this shape.
    pub fn can_host(&self, cpus: u32, memory: u64) -> bool {
        cpus <= self.cpus && memory <= self.allocatable_memory()
    }
}
