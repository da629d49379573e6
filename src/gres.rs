//! GRES (generic resource) collaborator contract. GRES bookkeeping itself
//! is out of scope here and is modeled as a trait the caller supplies.

use crate::job::JobId;

/// Opaque per-node GRES bookkeeping, owned entirely by the collaborator.
pub trait GresManager {
    /// Releases whatever GRES `job_id` held on `node_i`, called when a
    /// node is dropped from a job during shrink.
    fn release_node(&mut self, job_id: JobId, node_i: usize);

    /// Merges `from_job`'s GRES into `to_job`'s, called during expand.
    fn merge(&mut self, from_job: JobId, to_job: JobId);
}

/// A `GresManager` that tracks nothing, for callers with no GRES
/// configured. The default used by the demo binary and most tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGresManager;

impl GresManager for NoopGresManager {
    fn release_node(&mut self, _job_id: JobId, _node_i: usize) {}
    fn merge(&mut self, _from_job: JobId, _to_job: JobId) {}
}
