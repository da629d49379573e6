//! Per-partition row-packing structure.
//!
//! A partition with `num_rows` rows admits up to `num_rows` overlapping
//! allocations per core. `num_rows` is fixed at construction (derived
//! from [`crate::config::OverSubscribe::num_rows`]) and the row array
//! never grows or shrinks after that.

use std::collections::HashMap;

use crate::bitset::Bitset;
use crate::coremap::CoreMap;
use crate::error::{CoreError, CoreResult};
use crate::job::{JobId, JobResources};

/// A set of non-core-overlapping jobs within a partition.
#[derive(Debug, Clone)]
pub struct Row {
    pub job_ids: Vec<JobId>,
    /// The union of jobs' core bitmaps within this row.
    pub first_row_bitmap: Bitset,
}

impl Row {
    fn new(total_cores: usize) -> Self {
        Self {
            job_ids: Vec::new(),
            first_row_bitmap: Bitset::new(total_cores),
        }
    }

    fn is_empty(&self) -> bool {
        self.job_ids.is_empty()
    }

    /// A job fits iff its core bitmap shares no bit with this row's
    /// union. Empty rows always admit.
    fn fits(&self, job_core_bitmap: &Bitset) -> bool {
        !self.first_row_bitmap.intersects(job_core_bitmap)
    }

    fn place(&mut self, job: &JobResources) {
        self.job_ids.push(job.job_id);
        self.first_row_bitmap.or(&job.core_bitmap);
    }

    fn recompute_bitmap(&mut self, jobs: &HashMap<JobId, JobResources>) {
        self.first_row_bitmap.clear_all();
        for job_id in &self.job_ids {
            if let Some(job) = jobs.get(job_id) {
                self.first_row_bitmap.or(&job.core_bitmap);
            }
        }
    }
}

/// Context passed to [`PartitionRows::rebuild`] describing why the
/// rebuild was triggered, so a cheap single-row fast path can be taken
/// when possible.
pub enum RebuildHint<'a> {
    /// A job was fully removed from row `row_idx`; `old_core_bitmap` is
    /// its bitmap *before* removal, to be subtracted from that specific
    /// row (never inferred by scanning for "the" non-empty row, since
    /// two rows can legitimately share the same cores).
    Removed { row_idx: usize, old_core_bitmap: &'a Bitset },
    /// No specific removed job (shrink, suspend/resume, or a generic
    /// re-pack): recompute from the job list's current resources.
    General,
}

/// Per-partition ordered list of rows.
#[derive(Debug, Clone)]
pub struct PartitionRows {
    rows: Vec<Row>,
}

impl PartitionRows {
    /// Creates a partition's row table with `num_rows` empty rows, each
    /// sized for `total_cores` cluster-wide core bits.
    pub fn new(num_rows: u32, total_cores: usize) -> Self {
        let num_rows = num_rows.max(1);
        let rows = (0..num_rows).map(|_| Row::new(total_cores)).collect();
        Self { rows }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    fn occupied_rows(&self) -> usize {
        self.rows.iter().filter(|r| !r.is_empty()).count()
    }

    /// Finds the row index containing `job_id`, if any.
    pub fn find_row(&self, job_id: JobId) -> Option<usize> {
        self.rows.iter().position(|r| r.job_ids.contains(&job_id))
    }

    /// Places `job` into the lowest-indexed row that admits it. Returns
    /// `ExcessRows` if no row - including empty ones - can hold it,
    /// which should never happen when `num_rows` reflects the
    /// partition's over-subscription policy correctly.
    pub fn add_job(&mut self, job: &JobResources) -> CoreResult<usize> {
        for (i, row) in self.rows.iter_mut().enumerate() {
            if row.fits(&job.core_bitmap) {
                row.place(job);
                return Ok(i);
            }
        }
        log::error!(
            "EXCESS_ROWS: job {} fits in none of {} rows",
            job.job_id,
            self.rows.len()
        );
        Err(CoreError::ExcessRows(format!(
            "job {} fits in none of the partition's {} rows",
            job.job_id,
            self.rows.len()
        )))
    }

    /// Detaches `job_id` from whichever row contains it, without
    /// recomputing row bitmaps or re-packing. Returns the row index it
    /// was removed from, or `None` if the job was not present in any
    /// row. A caller using this instead of [`PartitionRows::remove_job`]
    /// is responsible for following up with [`PartitionRows::rebuild`]
    /// before relying on row bitmaps again.
    pub fn detach_job(&mut self, job_id: JobId) -> Option<usize> {
        let row_idx = self.find_row(job_id)?;
        self.rows[row_idx].job_ids.retain(|&id| id != job_id);
        Some(row_idx)
    }

    /// Removes `job_id` from whichever row contains it and triggers a
    /// rebuild. `old_core_bitmap` is the job's bitmap before removal,
    /// enabling the single-row fast path.
    pub fn remove_job(
        &mut self,
        job_id: JobId,
        old_core_bitmap: &Bitset,
        jobs: &HashMap<JobId, JobResources>,
        core_map: &CoreMap,
    ) -> CoreResult<()> {
        let row_idx = self.detach_job(job_id).ok_or_else(|| {
            CoreError::NotFound(format!("job {job_id} not present in any row of this partition"))
        })?;
        self.rebuild(RebuildHint::Removed { row_idx, old_core_bitmap }, jobs, core_map)
    }

    /// Re-packs the row list to restore density after a job was removed
    /// or shrunk. `jobs` must reflect every job's *current* resources
    /// (post-shrink, pre-removal-from-row-list for shrink callers).
    pub fn rebuild(
        &mut self,
        hint: RebuildHint,
        jobs: &HashMap<JobId, JobResources>,
        core_map: &CoreMap,
    ) -> CoreResult<()> {
        if self.occupied_rows() <= 1 {
            match hint {
                RebuildHint::Removed { row_idx, old_core_bitmap } => {
                    self.rows[row_idx].first_row_bitmap.and_not(old_core_bitmap);
                }
                RebuildHint::General => {
                    for row in self.rows.iter_mut() {
                        row.recompute_bitmap(jobs);
                    }
                }
            }
            return Ok(());
        }

        // Snapshot for rollback: a value-typed deep copy, cheap to take
        // and restore since rows hold no external handles.
        let snapshot = self.rows.clone();

        // Gather every job from every row, annotated by jstart/ncpus.
        let mut entries: Vec<(JobId, usize, u32)> = Vec::new();
        for row in &self.rows {
            for &job_id in &row.job_ids {
                let job = jobs.get(&job_id).ok_or_else(|| {
                    CoreError::NotFound(format!("job {job_id} referenced by a row but not in job table"))
                })?;
                let jstart = job.jstart(core_map)?;
                entries.push((job_id, jstart, job.ncpus()));
            }
        }

        // Ascending by jstart, tie-break descending ncpus.
        entries.sort_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)));

        for row in self.rows.iter_mut() {
            row.job_ids.clear();
            row.first_row_bitmap.clear_all();
        }

        let mut dangling = false;
        for (job_id, ..) in &entries {
            let job = jobs.get(job_id).expect("checked above");
            let mut placed = false;
            for row in self.rows.iter_mut() {
                if row.fits(&job.core_bitmap) {
                    row.place(job);
                    placed = true;
                    break;
                }
            }
            if !placed {
                dangling = true;
                break;
            }
        }

        if dangling {
            // Improvement-only: never degrade a working layout.
            self.rows = snapshot;
            return Ok(());
        }

        self.compact_rows();
        Ok(())
    }

    /// Sorts rows by descending occupancy (popcount of `first_row_bitmap`)
    /// so denser rows keep lower indices, stable among equal counts.
    fn compact_rows(&mut self) {
        self.rows.sort_by_key(|r| std::cmp::Reverse(r.first_row_bitmap.popcount()));
    }
}
