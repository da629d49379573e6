//! Process-wide `node_index -> (core_offset, core_count)` addressing.
//! Built once at node-init and read-only thereafter except on explicit
//! reconfigure, which re-derives it from scratch.

use crate::error::{CoreError, CoreResult};

/// Flattens every node's cores into a single global core-index space.
#[derive(Clone, Debug)]
pub struct CoreMap {
    /// `offset[i]` is the global index of node `i`'s first core;
    /// `offset[num_nodes]` is the total core count `C`.
    offset: Vec<usize>,
}

impl CoreMap {
    /// Builds a core map from each node's core count, in node-index order.
    pub fn build(cores_per_node: &[usize]) -> Self {
        let mut offset = Vec::with_capacity(cores_per_node.len() + 1);
        let mut acc = 0usize;
        offset.push(0);
        for &cores in cores_per_node {
            acc += cores;
            offset.push(acc);
        }
        Self { offset }
    }

    pub fn num_nodes(&self) -> usize {
        self.offset.len().saturating_sub(1)
    }

    /// Total core count `C` across the whole cluster.
    pub fn total_cores(&self) -> usize {
        *self.offset.last().unwrap_or(&0)
    }

    /// Starting global core index of `node_i`.
    pub fn core_offset(&self, node_i: usize) -> usize {
        self.offset[node_i]
    }

    /// Number of cores owned by `node_i`.
    pub fn core_count(&self, node_i: usize) -> usize {
        self.offset[node_i + 1] - self.offset[node_i]
    }

    /// `[core_offset(node_i), core_offset(node_i) + core_count(node_i))`.
    pub fn core_range(&self, node_i: usize) -> (usize, usize) {
        (self.offset[node_i], self.offset[node_i + 1])
    }

    /// Finds the node that owns global core index `core`.
    pub fn node_of_core(&self, core: usize) -> CoreResult<usize> {
        if core >= self.total_cores() {
            return Err(CoreError::BadArgument(format!(
                "core index {core} out of range (total {})",
                self.total_cores()
            )));
        }
        match self.offset.binary_search(&core) {
            Ok(i) => Ok(i),
            Err(i) => Ok(i - 1),
        }
    }

    fn check_node(&self, node_i: usize) -> CoreResult<()> {
        if node_i >= self.num_nodes() {
            return Err(CoreError::BadArgument(format!(
                "node index {node_i} out of range (num_nodes {})",
                self.num_nodes()
            )));
        }
        Ok(())
    }

    /// Checked variant of [`CoreMap::core_offset`].
    pub fn try_core_offset(&self, node_i: usize) -> CoreResult<usize> {
        self.check_node(node_i)?;
        Ok(self.core_offset(node_i))
    }

    /// Checked variant of [`CoreMap::core_count`].
    pub fn try_core_count(&self, node_i: usize) -> CoreResult<usize> {
        self.check_node(node_i)?;
        Ok(self.core_count(node_i))
    }
}
