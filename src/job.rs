//! Per-job packed resource descriptor.

use crate::bitset::Bitset;
use crate::coremap::CoreMap;
use crate::error::{CoreError, CoreResult};

/// Request mode determining row-placement policy for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeReq {
    /// The job consumes each of its nodes exclusively.
    Exclusive,
    /// The job shares within one row but not across rows.
    OneRow,
    /// The job tolerates placement in any row.
    AnyRow,
}

/// A unique job identifier, opaque to the core beyond equality/ordering.
pub type JobId = u64;

/// Per-job packed record of selected nodes, selected cores, CPU counts
/// and per-node memory allocation.
#[derive(Debug, Clone)]
pub struct JobResources {
    pub job_id: JobId,
    /// Which of the `N` nodes the job uses. `popcount == nhosts`.
    pub node_bitmap: Bitset,
    /// Which of the `C` cores the job uses. Bits only within selected
    /// nodes' core ranges.
    pub core_bitmap: Bitset,
    /// Optional running subset of currently-busy cores.
    pub core_bitmap_used: Option<Bitset>,
    /// CPU count on the h-th selected node, in node-bitmap ascending order.
    pub cpus: Vec<u32>,
    /// CPU count in use on the h-th selected node (shared partitions).
    pub cpus_used: Vec<u32>,
    /// Bytes reserved on the h-th selected node.
    pub memory_allocated: Vec<u64>,
    /// Bytes in use on the h-th selected node.
    pub memory_used: Vec<u64>,
    pub node_req: NodeReq,
    /// If true, the job reserves each node's entire CPU/core budget
    /// regardless of how many cores it technically uses.
    pub whole_node: bool,
    /// Whether the job currently holds memory only, with no row/core
    /// placement.
    pub suspended: bool,
}

impl JobResources {
    /// Builds a job resources record from a node bitmap and per-node
    /// cpu/memory vectors, validating them against each other.
    pub fn new(
        job_id: JobId,
        node_bitmap: Bitset,
        core_bitmap: Bitset,
        cpus: Vec<u32>,
        memory_allocated: Vec<u64>,
        node_req: NodeReq,
        whole_node: bool,
    ) -> CoreResult<Self> {
        let nhosts = node_bitmap.popcount();
        if nhosts == 0 {
            return Err(CoreError::BadArgument(
                "job resources with an empty node bitmap".to_string(),
            ));
        }
        if cpus.len() != nhosts || memory_allocated.len() != nhosts {
            return Err(CoreError::BadArgument(format!(
                "per-node vector length {}/{} does not match nhosts {nhosts}",
                cpus.len(),
                memory_allocated.len()
            )));
        }
        let cpus_used = vec![0; nhosts];
        let memory_used = vec![0; nhosts];
        Ok(Self {
            job_id,
            node_bitmap,
            core_bitmap,
            core_bitmap_used: None,
            cpus,
            cpus_used,
            memory_allocated,
            memory_used,
            node_req,
            whole_node,
            suspended: false,
        })
    }

    /// Builds the zero-size shell a job becomes once its resources have
    /// been fully transferred away by [`crate::lifecycle::Context::expand_job`]:
    /// an empty node/core bitmap and empty per-node vectors, deliberately
    /// bypassing [`JobResources::new`]'s non-empty-node-bitmap check.
    pub fn empty_shell(job_id: JobId, num_nodes: usize, total_cores: usize, node_req: NodeReq) -> Self {
        Self {
            job_id,
            node_bitmap: Bitset::new(num_nodes),
            core_bitmap: Bitset::new(total_cores),
            core_bitmap_used: None,
            cpus: Vec::new(),
            cpus_used: Vec::new(),
            memory_allocated: Vec::new(),
            memory_used: Vec::new(),
            node_req,
            whole_node: false,
            suspended: false,
        }
    }

    /// Number of nodes this job currently occupies.
    pub fn nhosts(&self) -> usize {
        self.node_bitmap.popcount()
    }

    /// Total CPU count across all selected nodes (sum of `cpus[h]`).
    pub fn ncpus(&self) -> u32 {
        self.cpus.iter().sum()
    }

    /// `jstart`: `core_offset(first_node) + first_core_in_bitmap`, the
    /// canonical ordering key used by row packing.
    pub fn jstart(&self, core_map: &CoreMap) -> CoreResult<usize> {
        let first_node = self
            .node_bitmap
            .first_set()
            .ok_or_else(|| CoreError::BadArgument("job has no selected nodes".to_string()))?;
        let first_core = self
            .core_bitmap
            .first_set()
            .ok_or_else(|| CoreError::BadArgument("job has no selected cores".to_string()))?;
        Ok(core_map.try_core_offset(first_node)? + first_core)
    }

    /// Finds the position `h` of `node_i` within this job's ascending
    /// node-bitmap order, i.e. its index into `cpus`/`memory_allocated`/etc.
    pub fn node_position(&self, node_i: usize) -> CoreResult<usize> {
        if !self.node_bitmap.test(node_i) {
            return Err(CoreError::NotFound(format!(
                "node {node_i} is not part of job {}",
                self.job_id
            )));
        }
        Ok(self
            .node_bitmap
            .iter_set()
            .take_while(|&n| n != node_i)
            .count())
    }

    /// Extracts a node from this job's resources in-place: removes it
    /// from `node_bitmap`, shifts down the per-node vectors, and clears
    /// the node's core-range bits from `core_bitmap`.
    pub fn extract_node(&mut self, node_i: usize, core_map: &CoreMap) -> CoreResult<()> {
        let h = self.node_position(node_i)?;
        let (lo, hi) = core_map.core_range(node_i);
        self.core_bitmap.clear_range(lo, hi);
        if let Some(used) = self.core_bitmap_used.as_mut() {
            used.clear_range(lo, hi);
        }
        self.node_bitmap.clear(node_i);
        self.cpus.remove(h);
        self.cpus_used.remove(h);
        self.memory_allocated.remove(h);
        self.memory_used.remove(h);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_bitmap(len: usize, nodes: &[usize]) -> Bitset {
        let mut b = Bitset::new(len);
        for &n in nodes {
            b.set(n);
        }
        b
    }

    #[test]
    fn test_job_ctor_and_basic_fields() {
        let node_bitmap = node_bitmap(4, &[0, 2]);
        let core_map = CoreMap::build(&[2, 2, 2, 2]);
        let mut core_bitmap = Bitset::new(core_map.total_cores());
        core_bitmap.set(0);
        core_bitmap.set(4);

        let job = JobResources::new(
            1,
            node_bitmap,
            core_bitmap,
            vec![1, 1],
            vec![100, 200],
            NodeReq::OneRow,
            false,
        )
        .unwrap();

        assert_eq!(job.nhosts(), 2);
        assert_eq!(job.ncpus(), 2);
        assert_eq!(job.jstart(&core_map).unwrap(), 0);
    }

    #[test]
    fn test_mismatched_vectors_rejected() {
        let node_bitmap = node_bitmap(4, &[0, 2]);
        let core_bitmap = Bitset::new(8);
        let err = JobResources::new(
            1,
            node_bitmap,
            core_bitmap,
            vec![1],
            vec![100, 200],
            NodeReq::OneRow,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::BadArgument(_)));
    }

    #[test]
    fn test_node_position_and_extract() {
        let node_bitmap = node_bitmap(4, &[0, 1, 3]);
        let core_map = CoreMap::build(&[2, 2, 2, 2]);
        let mut core_bitmap = Bitset::new(core_map.total_cores());
        core_bitmap.set(0); // node 0
        core_bitmap.set(2); // node 1
        core_bitmap.set(6); // node 3

        let mut job = JobResources::new(
            7,
            node_bitmap,
            core_bitmap,
            vec![1, 1, 1],
            vec![10, 20, 30],
            NodeReq::AnyRow,
            false,
        )
        .unwrap();

        assert_eq!(job.node_position(1).unwrap(), 1);
        job.extract_node(1, &core_map).unwrap();
        assert_eq!(job.nhosts(), 2);
        assert_eq!(job.cpus, vec![1, 1]);
        assert_eq!(job.memory_allocated, vec![10, 30]);
        assert!(!job.core_bitmap.test(2));
        assert!(job.core_bitmap.test(0));
        assert!(job.core_bitmap.test(6));
    }

    #[test]
    fn test_extract_unknown_node_errors() {
        let node_bitmap = node_bitmap(4, &[0]);
        let core_map = CoreMap::build(&[2, 2, 2, 2]);
        let mut core_bitmap = Bitset::new(core_map.total_cores());
        core_bitmap.set(0);
        let mut job = JobResources::new(
            1,
            node_bitmap,
            core_bitmap,
            vec![1],
            vec![1],
            NodeReq::AnyRow,
            false,
        )
        .unwrap();
        assert!(job.extract_node(2, &core_map).is_err());
    }
}
