//! Threaded scheduling context: node and partition tables live as values
//! owned by a `Context` rather than process-global state. Only the core
//! map is effectively immutable once a context is built.

use std::collections::HashMap;

use crate::coremap::CoreMap;
use crate::error::{CoreError, CoreResult};
use crate::job::{JobId, JobResources};
use crate::node::{NodeCapacity, NodeUsage};
use crate::partition::PartitionRows;

pub type PartitionId = String;

/// One partition's row-packing state plus the jobs it currently tracks.
#[derive(Debug, Clone)]
pub struct PartitionState {
    pub rows: PartitionRows,
    pub jobs: HashMap<JobId, JobResources>,
}

impl PartitionState {
    pub fn new(num_rows: u32, total_cores: usize) -> Self {
        Self {
            rows: PartitionRows::new(num_rows, total_cores),
            jobs: HashMap::new(),
        }
    }
}

/// One node's static capacity plus its mutable usage counters.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub name: String,
    pub capacity: NodeCapacity,
    pub usage: NodeUsage,
}

/// Everything the core needs to answer placement queries and mutate
/// packed allocation bitmaps for one scheduling domain.
///
/// Built once via [`Context::node_init`]; `core_map` is thereafter
/// read-only except on explicit reconfigure, which re-runs `node_init`
/// from scratch.
#[derive(Debug, Clone)]
pub struct Context {
    pub core_map: CoreMap,
    pub nodes: Vec<NodeRecord>,
    pub partitions: HashMap<PartitionId, PartitionState>,
}

impl Context {
    /// Builds the core map and usage records from a node table.
    /// `capacities[i]` / `names[i]` must both describe the same node `i`.
    pub fn node_init(names: Vec<String>, capacities: Vec<NodeCapacity>) -> CoreResult<Self> {
        if names.len() != capacities.len() {
            return Err(CoreError::BadArgument(
                "node_init: names and capacities length mismatch".to_string(),
            ));
        }
        let cores_per_node: Vec<usize> = capacities.iter().map(|c| c.cpus as usize).collect();
        let core_map = CoreMap::build(&cores_per_node);
        let nodes = names
            .into_iter()
            .zip(capacities)
            .map(|(name, capacity)| NodeRecord {
                name,
                capacity,
                usage: NodeUsage::new(),
            })
            .collect();
        Ok(Self {
            core_map,
            nodes,
            partitions: HashMap::new(),
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    fn check_node(&self, node_i: usize) -> CoreResult<()> {
        if node_i >= self.nodes.len() {
            return Err(CoreError::BadArgument(format!(
                "node index {node_i} out of range"
            )));
        }
        Ok(())
    }

    pub fn node(&self, node_i: usize) -> CoreResult<&NodeRecord> {
        self.check_node(node_i)?;
        Ok(&self.nodes[node_i])
    }

    pub fn node_mut(&mut self, node_i: usize) -> CoreResult<&mut NodeRecord> {
        self.check_node(node_i)?;
        Ok(&mut self.nodes[node_i])
    }

    /// Registers a partition, deriving `num_rows` from its over-subscribe
    /// policy.
    pub fn add_partition(&mut self, id: PartitionId, num_rows: u32) {
        let total_cores = self.core_map.total_cores();
        self.partitions
            .entry(id)
            .or_insert_with(|| PartitionState::new(num_rows, total_cores));
    }

    pub fn partition(&self, id: &str) -> CoreResult<&PartitionState> {
        self.partitions
            .get(id)
            .ok_or_else(|| CoreError::NotFound(format!("partition {id} not found")))
    }

    pub fn partition_mut(&mut self, id: &str) -> CoreResult<&mut PartitionState> {
        self.partitions
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(format!("partition {id} not found")))
    }
}
