//! Per-node info aggregator: summarizes every node's current allocation
//! across all of a context's partitions into one record, the shape a
//! controller hands to reporting consumers (`sinfo`-style queries).

use std::collections::HashMap;

use crate::bitset::Bitset;
use crate::context::Context;
use crate::error::CoreResult;

/// Per-node TRES accounting, injected so the aggregator never needs to
/// know the controller's TRES type table or weight configuration.
pub trait TresManager {
    fn tres_alloc_fmt_str(&self, node_i: usize, alloc_cpus: u32, alloc_memory: u64) -> String;
    fn tres_alloc_weighted(&self, node_i: usize, alloc_cpus: u32, alloc_memory: u64) -> f64;
}

/// A `TresManager` that reports only cpu/mem, unweighted by node type.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTresManager;

impl TresManager for NoopTresManager {
    fn tres_alloc_fmt_str(&self, _node_i: usize, alloc_cpus: u32, alloc_memory: u64) -> String {
        format!("cpu={alloc_cpus},mem={alloc_memory}")
    }

    fn tres_alloc_weighted(&self, _node_i: usize, alloc_cpus: u32, _alloc_memory: u64) -> f64 {
        alloc_cpus as f64
    }
}

/// Aggregated view of one node's current allocation.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    /// Allocated cores, node-local indexing (bit 0 is the node's first
    /// core), the union of every partition row that claims a core here.
    pub alloc_core_bitmap: Bitset,
    pub alloc_cpus: u32,
    pub alloc_memory: u64,
    pub tres_alloc_fmt_str: String,
    pub tres_alloc_weighted: f64,
}

/// Cached per-node aggregation, refreshed only when the caller's node
/// update counter has moved past the last refresh.
#[derive(Debug, Default)]
pub struct NodeInfoCache {
    last_set_all: u64,
    entries: HashMap<usize, NodeInfo>,
}

impl NodeInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes every node's [`NodeInfo`] when `last_node_update` is
    /// newer than the last refresh (or the cache is empty); otherwise a
    /// no-op, so repeated `sinfo`-style polling between changes is free.
    pub fn set_all(&mut self, ctx: &Context, tres: &dyn TresManager, last_node_update: u64) -> CoreResult<()> {
        if !self.entries.is_empty() && last_node_update <= self.last_set_all {
            return Ok(());
        }
        self.entries.clear();
        for node_i in 0..ctx.num_nodes() {
            self.entries.insert(node_i, compute_node_info(ctx, tres, node_i)?);
        }
        self.last_set_all = last_node_update;
        Ok(())
    }

    pub fn get(&self, node_i: usize) -> Option<&NodeInfo> {
        self.entries.get(&node_i)
    }

    pub fn last_set_all(&self) -> u64 {
        self.last_set_all
    }
}

fn compute_node_info(ctx: &Context, tres: &dyn TresManager, node_i: usize) -> CoreResult<NodeInfo> {
    let node = ctx.node(node_i)?;
    let (lo, hi) = ctx.core_map.core_range(node_i);
    let mut alloc_core_bitmap = Bitset::new(hi - lo);
    for part in ctx.partitions.values() {
        for row in part.rows.rows() {
            for bit in lo..hi {
                if row.first_row_bitmap.test(bit) {
                    alloc_core_bitmap.set(bit - lo);
                }
            }
        }
    }

    // Thread-scaling: a node whose threads-per-core exceeds 1 reports
    // alloc_cpus in thread units, so the raw core count is scaled before
    // being clamped to the node's configured cpu budget.
    let threads_per_core = node.capacity.cpus as usize / hi.saturating_sub(lo).max(1);
    let raw_alloc = alloc_core_bitmap.popcount() * threads_per_core.max(1);
    let alloc_cpus = (raw_alloc as u32).min(node.capacity.cpus);
    let alloc_memory = node.usage.alloc_memory;

    Ok(NodeInfo {
        alloc_core_bitmap,
        alloc_cpus,
        alloc_memory,
        tres_alloc_fmt_str: tres.tres_alloc_fmt_str(node_i, alloc_cpus, alloc_memory),
        tres_alloc_weighted: tres.tres_alloc_weighted(node_i, alloc_cpus, alloc_memory),
    })
}
