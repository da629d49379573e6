//! Job lifecycle operations: add/remove/resize/expand and
//! suspend/resume, each implemented as a method on [`Context`] so the
//! controller never reaches into partition/node internals directly.

use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::gres::GresManager;
use crate::job::{JobId, JobResources, NodeReq};
use crate::partition::RebuildHint;

/// Action under which a job lifecycle operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    Normal,
    Suspend,
    /// Gang-scheduling suspend/resume: a no-op for bookkeeping.
    Gang,
}

impl Context {
    /// Admits a job into a partition: reserves memory and node state on
    /// every selected node, then places it into a row unless suspended.
    pub fn add_job(
        &mut self,
        partition_id: &str,
        mut job: JobResources,
        action: JobAction,
    ) -> CoreResult<()> {
        if job.nhosts() == 0 {
            return Err(CoreError::BadArgument(
                "add_job: job has no selected nodes".to_string(),
            ));
        }
        self.partition(partition_id)?; // ensures the partition exists

        // Effect 1: reserve memory and bump node_state on every selected node.
        let mut reserved: Vec<(usize, u64)> = Vec::with_capacity(job.nhosts());
        for (h, node_i) in job.node_bitmap.iter_set().enumerate() {
            let bytes = job.memory_allocated[h];
            let node = self.node_mut(node_i)?;
            node.usage.reserve(bytes, job.node_req);
            reserved.push((node_i, bytes));
            log::debug!(
                "add_job: job {} reserves {bytes} bytes on node {}",
                job.job_id,
                node.name
            );
        }

        // Effect 2: place into the lowest-admitting row, unless suspended.
        if action != JobAction::Suspend {
            let part = self.partition_mut(partition_id)?;
            if let Err(e) = part.rows.add_job(&job) {
                // Roll back effect 1 so a refused job leaves no trace.
                for (node_i, bytes) in reserved {
                    if let Ok(node) = self.node_mut(node_i) {
                        let name = node.name.clone();
                        node.usage.release(bytes, job.node_req, &name);
                    }
                }
                return Err(e);
            }
        } else {
            job.suspended = true;
        }

        let part = self.partition_mut(partition_id)?;
        part.jobs.insert(job.job_id, job);
        Ok(())
    }

    /// Removes a job from a partition, releasing its node usage and row
    /// slot. Returns the removed job's resources. `skip_row_rebuild` lets
    /// a caller that is about to immediately
    /// re-add the job (e.g. `expand_job`) defer the rebuild.
    pub fn remove_job(
        &mut self,
        partition_id: &str,
        job_id: JobId,
        skip_row_rebuild: bool,
    ) -> CoreResult<JobResources> {
        let part = self.partition_mut(partition_id)?;
        let job = part
            .jobs
            .remove(&job_id)
            .ok_or_else(|| CoreError::NotFound(format!("job {job_id} not tracked by partition {partition_id}")))?;

        // Inverse of effect 1: release memory, and drop node_state too
        // unless the job is suspended. A suspended job already had its
        // node_state contribution dropped at suspend time, so removing
        // it releases memory only.
        for (h, node_i) in job.node_bitmap.iter_set().enumerate() {
            let bytes = job.memory_allocated[h];
            if let Ok(node) = self.node_mut(node_i) {
                let name = node.name.clone();
                if job.suspended {
                    node.usage.release_memory(bytes, &name);
                } else {
                    node.usage.release(bytes, job.node_req, &name);
                }
            }
        }

        // Row removal only applies to jobs that actually hold a row slot:
        // suspended jobs and zero-size expand shells hold none. A caller
        // that sets `skip_row_rebuild` still gets the job detached from
        // its row immediately, but is responsible for a follow-up
        // `rebuild` before relying on row bitmaps again (see
        // `expand_job`, which batches two detaches into one rebuild).
        if !job.suspended && job.nhosts() > 0 {
            let core_map = self.core_map.clone();
            let part = self.partition_mut(partition_id)?;
            if let Some(row_idx) = part.rows.detach_job(job_id) {
                if !skip_row_rebuild {
                    part.rows.rebuild(
                        RebuildHint::Removed {
                            row_idx,
                            old_core_bitmap: &job.core_bitmap,
                        },
                        &part.jobs.clone(),
                        &core_map,
                    )?;
                }
            }
        }

        log::debug!("remove_job: job {job_id} removed from partition {partition_id}");
        Ok(job)
    }

    /// Shrinks a job by releasing one of its nodes entirely.
    pub fn resize_job(
        &mut self,
        partition_id: &str,
        job_id: JobId,
        node_i: usize,
        gres: &mut dyn GresManager,
    ) -> CoreResult<()> {
        let (h, cpus_h, old_memory, node_req, suspended) = {
            let part = self.partition(partition_id)?;
            let job = part
                .jobs
                .get(&job_id)
                .ok_or_else(|| CoreError::NotFound(format!("job {job_id} not tracked")))?;
            let h = job.node_position(node_i)?;
            (
                h,
                job.cpus[h],
                job.memory_allocated[h],
                job.node_req,
                job.suspended,
            )
        };

        if cpus_h == 0 {
            return Ok(()); // node already holds nothing for this job
        }

        gres.release_node(job_id, node_i);

        // A suspended job holds no node_state contribution to begin with,
        // so only a live job's node_state is touched here, net one
        // decrement by the end of this operation.
        if suspended {
            let node = self.node_mut(node_i)?;
            let name = node.name.clone();
            node.usage.release_memory(old_memory, &name);
        } else {
            let node = self.node_mut(node_i)?;
            let name = node.name.clone();
            node.usage.release(old_memory, node_req, &name);
            node.usage.node_state.bump(node_req);
        }

        {
            let core_map = self.core_map.clone();
            let part = self.partition_mut(partition_id)?;
            let job = part
                .jobs
                .get_mut(&job_id)
                .ok_or_else(|| CoreError::NotFound(format!("job {job_id} vanished mid-resize")))?;
            job.extract_node(node_i, &core_map)?;
        }

        if !suspended {
            let core_map = self.core_map.clone();
            let part = self.partition_mut(partition_id)?;
            part.rows
                .rebuild(RebuildHint::General, &part.jobs.clone(), &core_map)?;

            let node = self.node_mut(node_i)?;
            node.usage.node_state.drop_saturating(node_req);
        }
        log::debug!("resize_job: job {job_id} released node {node_i}");
        Ok(())
    }

    /// Merges `from`'s resources into `to`, leaving `from` a zero-size
    /// shell.
    pub fn expand_job(
        &mut self,
        partition_id: &str,
        from_id: JobId,
        to_id: JobId,
        gres: &mut dyn GresManager,
    ) -> CoreResult<()> {
        if from_id == to_id {
            return Err(CoreError::BadArgument(
                "expand_job: from and to are the same job".to_string(),
            ));
        }

        let from = self.remove_job(partition_id, from_id, true)?;
        let to = self.remove_job(partition_id, to_id, true)?;

        // Both detaches above deferred the rebuild; do it once, now that
        // both are out of the job table, instead of twice.
        {
            let core_map = self.core_map.clone();
            let part = self.partition_mut(partition_id)?;
            part.rows
                .rebuild(RebuildHint::General, &part.jobs.clone(), &core_map)?;
        }

        let num_nodes = self.num_nodes();
        let total_cores = self.core_map.total_cores();

        let new_node_bitmap = from.node_bitmap.ored(&to.node_bitmap);
        let mut new_core_bitmap = crate::bitset::Bitset::new(total_cores);
        let mut new_cpus = Vec::new();
        let mut new_cpus_used = Vec::new();
        let mut new_memory = Vec::new();
        let mut new_memory_used = Vec::new();

        for node_i in new_node_bitmap.iter_set().collect::<Vec<_>>() {
            let from_h = from.node_position(node_i).ok();
            let to_h = to.node_position(node_i).ok();
            let (lo, hi) = self.core_map.core_range(node_i);

            match (from_h, to_h) {
                (Some(fh), None) => {
                    new_cpus.push(from.cpus[fh]);
                    new_cpus_used.push(from.cpus_used[fh]);
                    new_memory.push(from.memory_allocated[fh]);
                    new_memory_used.push(from.memory_used[fh]);
                    for bit in lo..hi {
                        if from.core_bitmap.test(bit) {
                            new_core_bitmap.set(bit);
                        }
                    }
                }
                (None, Some(th)) => {
                    new_cpus.push(to.cpus[th]);
                    new_cpus_used.push(to.cpus_used[th]);
                    new_memory.push(to.memory_allocated[th]);
                    new_memory_used.push(to.memory_used[th]);
                    for bit in lo..hi {
                        if to.core_bitmap.test(bit) {
                            new_core_bitmap.set(bit);
                        }
                    }
                }
                (Some(fh), Some(th)) => {
                    let mut from_cores = 0usize;
                    let mut to_cores = 0usize;
                    let mut union_count = 0usize;
                    for bit in lo..hi {
                        let f = from.core_bitmap.test(bit);
                        let t = to.core_bitmap.test(bit);
                        if f {
                            from_cores += 1;
                        }
                        if t {
                            to_cores += 1;
                        }
                        if f || t {
                            union_count += 1;
                            new_core_bitmap.set(bit);
                        }
                    }
                    let summed_cpus = from.cpus[fh] + to.cpus[th];
                    let summed_memory = from.memory_allocated[fh] + to.memory_allocated[th];
                    let denom = from_cores + to_cores;
                    let cpus_here = if denom > 0 && union_count < denom {
                        // re-normalize to avoid double counting shared cores
                        // held by both jobs under over-subscription.
                        ((summed_cpus as u64 * union_count as u64) / denom as u64) as u32
                    } else {
                        summed_cpus
                    };
                    new_cpus.push(cpus_here);
                    new_cpus_used.push(from.cpus_used[fh] + to.cpus_used[th]);
                    new_memory.push(summed_memory);
                    new_memory_used.push(from.memory_used[fh] + to.memory_used[th]);
                }
                (None, None) => unreachable!("node came from the union of from/to node bitmaps"),
            }
        }

        gres.merge(from_id, to_id);

        let merged = JobResources {
            job_id: to_id,
            node_bitmap: new_node_bitmap,
            core_bitmap: new_core_bitmap,
            core_bitmap_used: None,
            cpus: new_cpus,
            cpus_used: new_cpus_used,
            memory_allocated: new_memory,
            memory_used: new_memory_used,
            node_req: to.node_req,
            whole_node: from.whole_node || to.whole_node,
            suspended: false,
        };

        let from_shell = JobResources::empty_shell(from_id, num_nodes, total_cores, from.node_req);

        let part = self.partition_mut(partition_id)?;
        part.jobs.insert(from_id, from_shell);

        self.add_job(partition_id, merged, JobAction::Normal)
    }

    /// Detaches a job from its row and releases node state, without
    /// releasing its memory reservation, so it can later be resumed.
    pub fn suspend_job(&mut self, partition_id: &str, job_id: JobId, action: JobAction) -> CoreResult<()> {
        if action == JobAction::Gang {
            return Ok(());
        }
        let already_suspended = {
            let part = self.partition(partition_id)?;
            let job = part
                .jobs
                .get(&job_id)
                .ok_or_else(|| CoreError::NotFound(format!("job {job_id} not tracked")))?;
            job.suspended
        };
        if already_suspended {
            return Ok(());
        }

        let (old_core_bitmap, node_req, nodes) = {
            let part = self.partition(partition_id)?;
            let job = part.jobs.get(&job_id).expect("checked above");
            (job.core_bitmap.clone(), job.node_req, job.node_bitmap.iter_set().collect::<Vec<_>>())
        };

        {
            let core_map = self.core_map.clone();
            let part = self.partition_mut(partition_id)?;
            if let Some(row_idx) = part.rows.detach_job(job_id) {
                part.rows.rebuild(
                    RebuildHint::Removed {
                        row_idx,
                        old_core_bitmap: &old_core_bitmap,
                    },
                    &part.jobs.clone(),
                    &core_map,
                )?;
            }
        }

        for node_i in nodes {
            if let Ok(node) = self.node_mut(node_i) {
                node.usage.node_state.drop_saturating(node_req);
            }
        }

        let part = self.partition_mut(partition_id)?;
        if let Some(job) = part.jobs.get_mut(&job_id) {
            job.suspended = true;
        }
        Ok(())
    }

    /// Re-bumps node state and re-places a suspended job into a row.
    pub fn resume_job(&mut self, partition_id: &str, job_id: JobId, action: JobAction) -> CoreResult<()> {
        if action == JobAction::Gang {
            return Ok(());
        }
        let (node_req, nodes) = {
            let part = self.partition(partition_id)?;
            let job = part
                .jobs
                .get(&job_id)
                .ok_or_else(|| CoreError::NotFound(format!("job {job_id} not tracked")))?;
            if !job.suspended {
                return Ok(());
            }
            (job.node_req, job.node_bitmap.iter_set().collect::<Vec<_>>())
        };

        for node_i in &nodes {
            if let Ok(node) = self.node_mut(*node_i) {
                node.usage.node_state.bump(node_req);
            }
        }

        let part = self.partition_mut(partition_id)?;
        let job = part.jobs.get(&job_id).expect("checked above").clone();
        if let Err(e) = part.rows.add_job(&job) {
            for node_i in &nodes {
                if let Ok(node) = self.node_mut(*node_i) {
                    node.usage.node_state.drop_saturating(node_req);
                }
            }
            return Err(e);
        }

        let part = self.partition_mut(partition_id)?;
        if let Some(job) = part.jobs.get_mut(&job_id) {
            job.suspended = false;
        }
        Ok(())
    }
}
