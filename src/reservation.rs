//! Reservation node/core placement.
//!
//! `resv_test` carves nodes and cores out of a topology without touching
//! any partition's row state: the caller supplies `avail_bitmap` (which
//! nodes are even candidates) and an in/out `core_bitmap` that on input
//! marks cores already unavailable (specialized, or already reserved)
//! and on output gains the newly reserved cores. A successful call only
//! returns a node bitmap; nothing is committed against node usage until
//! the caller does so the same way a job would.

use crate::bitset::Bitset;
use crate::context::Context;
use crate::error::{CoreError, CoreResult};

/// Bit flags controlling which placement algorithm a request selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReservationFlags(u32);

impl ReservationFlags {
    pub const NONE: ReservationFlags = ReservationFlags(0);
    /// Claim each candidate node's first `core_cnt[k]` cores in order,
    /// skipping any node where those specific cores aren't all free.
    pub const FIRST_CORES: ReservationFlags = ReservationFlags(1 << 0);

    pub fn contains(&self, flag: ReservationFlags) -> bool {
        self.0 & flag.0 == flag.0
    }

    pub fn with(self, flag: ReservationFlags) -> Self {
        Self(self.0 | flag.0)
    }
}

/// A reservation request: `node_cnt` nodes (0 lets `core_cnt` alone drive
/// node count under `FIRST_CORES`/per-node sequential), and `core_cnt`:
/// empty for whole-node requests, a single aggregate element split
/// evenly across `node_cnt` nodes, or one element per desired node.
#[derive(Debug, Clone, Default)]
pub struct ReservationRequest {
    pub node_cnt: usize,
    pub core_cnt: Vec<usize>,
    pub flags: ReservationFlags,
}

/// One level of a switch topology: `node_bitmap` is the set of nodes
/// reachable through this switch, `level` is its height (0 = leaf,
/// directly-attached nodes; higher levels aggregate lower ones).
#[derive(Debug, Clone)]
pub struct SwitchRecord {
    pub node_bitmap: Bitset,
    pub level: u32,
}

/// Counts the free (not-yet-marked-unavailable) cores of `node_i`.
fn free_cores(ctx: &Context, core_bitmap: &Bitset, node_i: usize) -> usize {
    let (lo, hi) = ctx.core_map.core_range(node_i);
    (lo..hi).filter(|&bit| !core_bitmap.test(bit)).count()
}

/// Claims the first `need` free cores of `node_i` left-to-right, marking
/// them in `core_bitmap`. Returns `false` without mutating anything if
/// fewer than `need` are free.
fn claim_free_cores(ctx: &Context, core_bitmap: &mut Bitset, node_i: usize, need: usize) -> bool {
    let (lo, hi) = ctx.core_map.core_range(node_i);
    let free: Vec<usize> = (lo..hi).filter(|&bit| !core_bitmap.test(bit)).collect();
    if free.len() < need {
        return false;
    }
    for &bit in free.iter().take(need) {
        core_bitmap.set(bit);
    }
    true
}

/// Evaluates `req` against `ctx`'s topology, restricted to `avail_bitmap`.
/// `core_bitmap` marks unavailable cores on input and gains the newly
/// reserved ones on a successful return; on failure it is left unchanged
/// and `CannotSatisfy`/`BadArgument` is returned.
pub fn resv_test(
    ctx: &Context,
    avail_bitmap: &Bitset,
    req: &ReservationRequest,
    core_bitmap: &mut Bitset,
    switches: Option<&[SwitchRecord]>,
) -> CoreResult<Bitset> {
    if avail_bitmap.len() != ctx.num_nodes() {
        return Err(CoreError::BadArgument(
            "resv_test: avail_bitmap length does not match node count".to_string(),
        ));
    }
    if core_bitmap.len() != ctx.core_map.total_cores() {
        return Err(CoreError::BadArgument(
            "resv_test: core_bitmap length does not match total core count".to_string(),
        ));
    }
    if req.node_cnt == 0 && req.core_cnt.is_empty() {
        return Err(CoreError::BadArgument(
            "resv_test: neither node_cnt nor core_cnt was given".to_string(),
        ));
    }

    let mut trial = core_bitmap.clone();
    let result = if req.flags.contains(ReservationFlags::FIRST_CORES)
        && req.core_cnt.first().copied().unwrap_or(0) > 0
    {
        first_cores_pick(ctx, avail_bitmap, req, &mut trial)
    } else if let Some(switches) = switches.filter(|s| !s.is_empty() && req.node_cnt > 0) {
        topology_best_fit(ctx, avail_bitmap, req, &mut trial, switches)
    } else {
        sequential_pick(ctx, avail_bitmap, req, &mut trial)
    };

    match result {
        Ok(node_bitmap) => {
            *core_bitmap = trial;
            Ok(node_bitmap)
        }
        Err(e) => Err(e), // trial (and therefore core_bitmap) is discarded untouched
    }
}

/// §4.4.1: claim the first `core_cnt[k]` cores of the k-th candidate node
/// able to supply them in order, skipping nodes that can't.
fn first_cores_pick(
    ctx: &Context,
    avail_bitmap: &Bitset,
    req: &ReservationRequest,
    core_bitmap: &mut Bitset,
) -> CoreResult<Bitset> {
    let demand: Vec<usize> = req.core_cnt.iter().copied().take_while(|&c| c > 0).collect();
    let mut node_bitmap = Bitset::new(ctx.num_nodes());
    let mut k = 0usize;

    for node_i in avail_bitmap.iter_set() {
        if k >= demand.len() {
            break;
        }
        let need = demand[k];
        let (lo, hi) = ctx.core_map.core_range(node_i);
        if hi - lo < need {
            continue;
        }
        let first_n: Vec<usize> = (lo..lo + need).collect();
        if first_n.iter().any(|&bit| core_bitmap.test(bit)) {
            continue; // one of the specific first cores is already unavailable
        }
        for &bit in &first_n {
            core_bitmap.set(bit);
        }
        node_bitmap.set(node_i);
        k += 1;
    }

    if k < demand.len() {
        return Err(CoreError::CannotSatisfy(format!(
            "first-cores placement satisfied {k}/{} per-node demands",
            demand.len()
        )));
    }
    Ok(node_bitmap)
}

/// §4.4.2: whole-node or partial-node sequential packing.
fn sequential_pick(
    ctx: &Context,
    avail_bitmap: &Bitset,
    req: &ReservationRequest,
    core_bitmap: &mut Bitset,
) -> CoreResult<Bitset> {
    let mut node_bitmap = Bitset::new(ctx.num_nodes());

    if req.core_cnt.is_empty() {
        let mut picked = 0usize;
        for node_i in avail_bitmap.iter_set() {
            if picked == req.node_cnt {
                break;
            }
            node_bitmap.set(node_i);
            let (lo, hi) = ctx.core_map.core_range(node_i);
            core_bitmap.set_range(lo, hi);
            picked += 1;
        }
        if picked < req.node_cnt {
            return Err(CoreError::CannotSatisfy(format!(
                "sequential whole-node placement needs {} nodes, found {picked}",
                req.node_cnt
            )));
        }
        return Ok(node_bitmap);
    }

    // Per-node demand: an even split of the single aggregate element with
    // the remainder spread over the first `residual` nodes selected, or
    // (when `node_cnt == 0`) the caller's own per-node array taken as-is.
    let demand: Vec<usize> = if req.node_cnt > 0 {
        let total = req.core_cnt[0];
        let n = req.node_cnt;
        let base = total / n;
        let residual = total % n;
        (0..n).map(|i| if i < residual { base + 1 } else { base }).collect()
    } else {
        req.core_cnt.clone()
    };

    let mut k = 0usize;
    for node_i in avail_bitmap.iter_set() {
        if k >= demand.len() {
            break;
        }
        let need = demand[k];
        if free_cores(ctx, core_bitmap, node_i) < need {
            continue;
        }
        claim_free_cores(ctx, core_bitmap, node_i, need);
        node_bitmap.set(node_i);
        k += 1;
    }

    if k < demand.len() {
        return Err(CoreError::CannotSatisfy(format!(
            "sequential placement satisfied {k}/{} per-node demands",
            demand.len()
        )));
    }
    Ok(node_bitmap)
}

/// Per-switch idle view restricted to `avail_bitmap`, and (when a uniform
/// per-node core demand is known) further restricted to nodes that can
/// actually supply it - an unsatisfiable node is removed from every
/// switch that contains it, which is how the restriction "propagates
/// across switches that share the node" per §4.4.3 step 2.
struct SwitchView<'a> {
    record: &'a SwitchRecord,
    nodes: Bitset,
    free_cores: usize,
}

fn cores_per_node_hint(req: &ReservationRequest) -> Option<usize> {
    if req.core_cnt.is_empty() {
        return None;
    }
    if req.node_cnt > 0 {
        Some(req.core_cnt[0] / req.node_cnt.max(1))
    } else {
        req.core_cnt.iter().copied().min()
    }
}

/// §4.4.3: topology-aware best fit over a tree of switches.
fn topology_best_fit(
    ctx: &Context,
    avail_bitmap: &Bitset,
    req: &ReservationRequest,
    core_bitmap: &mut Bitset,
    switches: &[SwitchRecord],
) -> CoreResult<Bitset> {
    let per_node_need = cores_per_node_hint(req).unwrap_or(0);

    let views: Vec<SwitchView> = switches
        .iter()
        .map(|record| {
            let mut nodes = record.node_bitmap.anded(avail_bitmap);
            if per_node_need > 0 {
                for node_i in nodes.iter_set().collect::<Vec<_>>() {
                    if free_cores(ctx, core_bitmap, node_i) < per_node_need {
                        nodes.clear(node_i);
                    }
                }
            }
            let free_cores_total: usize = nodes.iter_set().map(|n| free_cores(ctx, core_bitmap, n)).sum();
            SwitchView { record, nodes, free_cores: free_cores_total }
        })
        .collect();

    let rem_nodes = req.node_cnt;
    let rem_cores = req.core_cnt.first().copied().unwrap_or(0);

    // Lowest level containing enough nodes and cores; ties broken by the
    // smallest node count (tightest fit wastes the least capacity).
    let best_idx = views
        .iter()
        .enumerate()
        .filter(|(_, v)| v.nodes.popcount() >= rem_nodes && v.free_cores >= rem_cores)
        .min_by_key(|(_, v)| (v.record.level, v.nodes.popcount()))
        .map(|(i, _)| i);

    let Some(best_idx) = best_idx else {
        return Err(CoreError::CannotSatisfy(
            "topology best-fit: no switch covers the requested node/core count".to_string(),
        ));
    };

    // Restrict leaf candidates to those strictly contained in the chosen
    // switch's node set.
    let best_nodes = views[best_idx].nodes.clone();
    let mut leafs: Vec<Bitset> = views
        .iter()
        .filter(|v| v.record.level == 0)
        .map(|v| v.nodes.anded(&best_nodes))
        .filter(|n| !n.is_clear())
        .collect();
    if leafs.is_empty() {
        leafs.push(best_nodes.clone());
    }

    let mut node_bitmap = Bitset::new(ctx.num_nodes());
    let mut chosen: Vec<usize> = Vec::new();
    let mut remaining_nodes = rem_nodes;
    let mut remaining_cores = rem_cores;

    while remaining_nodes > 0 {
        let leaf_idx = leafs
            .iter()
            .enumerate()
            .filter(|(_, leaf)| leaf.popcount() >= remaining_nodes)
            .min_by_key(|(_, leaf)| leaf.popcount())
            .or_else(|| leafs.iter().enumerate().filter(|(_, l)| !l.is_clear()).max_by_key(|(_, l)| l.popcount()))
            .map(|(i, _)| i);

        let Some(leaf_idx) = leaf_idx else {
            break;
        };
        let take: Vec<usize> = leafs[leaf_idx].iter_set().take(remaining_nodes).collect();
        if take.is_empty() {
            break;
        }
        for node_i in take {
            leafs[leaf_idx].clear(node_i);
            node_bitmap.set(node_i);
            chosen.push(node_i);
            remaining_nodes -= 1;
            if per_node_need > 0 {
                let claimed = claim_free_cores(ctx, core_bitmap, node_i, per_node_need);
                debug_assert!(claimed, "node passed the per-node free-core filter above");
                remaining_cores = remaining_cores.saturating_sub(per_node_need);
            }
            if remaining_nodes == 0 {
                break;
            }
        }
    }

    if remaining_nodes > 0 {
        log::debug!(
            "topology best-fit: chose {}/{} nodes before leafs were exhausted",
            chosen.len(),
            rem_nodes
        );
        return Err(CoreError::CannotSatisfy(format!(
            "topology best-fit placement needs {rem_nodes} nodes, found {}",
            chosen.len()
        )));
    }

    // Step 6: if cores still fall short of the aggregate, make additional
    // one-core-at-a-time passes over the chosen nodes.
    while remaining_cores > 0 {
        let mut progressed = false;
        for &node_i in &chosen {
            if remaining_cores == 0 {
                break;
            }
            if claim_free_cores(ctx, core_bitmap, node_i, 1) {
                remaining_cores -= 1;
                progressed = true;
            }
        }
        if !progressed {
            return Err(CoreError::CannotSatisfy(format!(
                "topology best-fit: {remaining_cores} cores still unmet after exhausting chosen nodes"
            )));
        }
    }

    Ok(node_bitmap)
}

/// Convenience for callers with no reservation/specialized-core input yet:
/// a core bitmap with every core already claimed by some partition's row
/// 0 marked unavailable (row 0 is the base, non-over-subscribed layer;
/// higher rows are over-subscription and don't make a core unavailable).
pub fn busy_core_bitmap(ctx: &Context) -> Bitset {
    let mut busy = Bitset::new(ctx.core_map.total_cores());
    for part in ctx.partitions.values() {
        if let Some(row0) = part.rows.rows().first() {
            busy.or(&row0.first_row_bitmap);
        }
    }
    busy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeCapacity;

    fn cap(cpus: u32) -> NodeCapacity {
        NodeCapacity {
            cpus,
            real_memory: 10_000,
            mem_spec_limit: 0,
        }
    }

    fn four_node_ctx() -> Context {
        Context::node_init(
            vec!["n0".into(), "n1".into(), "n2".into(), "n3".into()],
            vec![cap(4), cap(4), cap(4), cap(4)],
        )
        .unwrap()
    }

    fn all_avail(ctx: &Context) -> Bitset {
        Bitset::new_full(ctx.num_nodes())
    }

    fn no_cores_busy(ctx: &Context) -> Bitset {
        Bitset::new(ctx.core_map.total_cores())
    }

    #[test]
    fn test_first_cores_skips_node_with_busy_leading_cores() {
        let ctx = four_node_ctx();
        let avail = all_avail(&ctx);
        let mut core_bitmap = no_cores_busy(&ctx);
        // mark node 0's first 2 cores busy so it must be skipped.
        let (lo, _) = ctx.core_map.core_range(0);
        core_bitmap.set(lo);
        core_bitmap.set(lo + 1);

        let req = ReservationRequest {
            node_cnt: 0,
            core_cnt: vec![2, 2],
            flags: ReservationFlags::FIRST_CORES,
        };
        let result = resv_test(&ctx, &avail, &req, &mut core_bitmap, None).unwrap();
        assert!(!result.test(0));
        assert!(result.test(1));
        assert!(result.test(2));
    }

    #[test]
    fn test_first_cores_reports_cannot_satisfy_and_leaves_core_bitmap_untouched() {
        let ctx = four_node_ctx();
        let avail = all_avail(&ctx);
        let mut core_bitmap = no_cores_busy(&ctx);
        let before = core_bitmap.clone();
        let req = ReservationRequest {
            node_cnt: 0,
            core_cnt: vec![2, 2, 2, 2, 2], // 5 demands, only 4 nodes exist
            flags: ReservationFlags::FIRST_CORES,
        };
        let err = resv_test(&ctx, &avail, &req, &mut core_bitmap, None).unwrap_err();
        assert!(matches!(err, CoreError::CannotSatisfy(_)));
        assert_eq!(core_bitmap, before);
    }

    #[test]
    fn test_sequential_whole_nodes_respects_avail_bitmap() {
        let ctx = four_node_ctx();
        let mut avail = Bitset::new(4);
        avail.set(1);
        avail.set(2);
        avail.set(3);
        let mut core_bitmap = no_cores_busy(&ctx);
        let req = ReservationRequest {
            node_cnt: 2,
            core_cnt: Vec::new(),
            flags: ReservationFlags::NONE,
        };
        let result = resv_test(&ctx, &avail, &req, &mut core_bitmap, None).unwrap();
        assert!(!result.test(0));
        assert_eq!(result.popcount(), 2);
    }

    #[test]
    fn test_sequential_partial_nodes_spreads_residual() {
        // 3 nodes x 4 cores, request 2 nodes/2 cores
        // each, with node 1 already down to 2 free cores.
        let ctx = Context::node_init(
            vec!["n0".into(), "n1".into(), "n2".into()],
            vec![cap(4), cap(4), cap(4)],
        )
        .unwrap();
        let avail = all_avail(&ctx);
        let mut core_bitmap = no_cores_busy(&ctx);
        let (lo1, _) = ctx.core_map.core_range(1);
        core_bitmap.set(lo1);
        core_bitmap.set(lo1 + 1);
        core_bitmap.set(lo1 + 2); // only 1 core free on n1, below the 2/node demand

        let req = ReservationRequest {
            node_cnt: 2,
            core_cnt: vec![4], // 2 cores/node
            flags: ReservationFlags::NONE,
        };
        let result = resv_test(&ctx, &avail, &req, &mut core_bitmap, None).unwrap();
        assert!(result.test(0));
        assert!(!result.test(1)); // n1 skipped: insufficient free cores
        assert!(result.test(2));
        // 3 pre-busy on n1 + 2 newly claimed on each of n0/n2.
        assert_eq!(core_bitmap.popcount_range(0, ctx.core_map.total_cores()), 7);
    }

    #[test]
    fn test_sequential_cannot_satisfy_leaves_core_bitmap_untouched() {
        let ctx = four_node_ctx();
        let avail = all_avail(&ctx);
        let mut core_bitmap = no_cores_busy(&ctx);
        let before = core_bitmap.clone();
        let req = ReservationRequest {
            node_cnt: 10,
            core_cnt: Vec::new(),
            flags: ReservationFlags::NONE,
        };
        let err = resv_test(&ctx, &avail, &req, &mut core_bitmap, None).unwrap_err();
        assert!(matches!(err, CoreError::CannotSatisfy(_)));
        assert_eq!(core_bitmap, before);
    }

    #[test]
    fn test_topology_best_fit_picks_tightest_switch() {
        // two level-0 switches of two nodes each,
        // one level-1 switch spanning both; requesting 3 nodes must climb
        // to the level-1 switch then pull densely from the tighter leaf.
        let ctx = four_node_ctx();
        let avail = all_avail(&ctx);
        let mut core_bitmap = no_cores_busy(&ctx);
        let mut switch_a = Bitset::new(4);
        switch_a.set(0);
        switch_a.set(1);
        let mut switch_b = Bitset::new(4);
        switch_b.set(2);
        switch_b.set(3);
        let mut switch_root = Bitset::new(4);
        switch_root.set_range(0, 4);
        let switches = vec![
            SwitchRecord { node_bitmap: switch_a, level: 0 },
            SwitchRecord { node_bitmap: switch_b, level: 0 },
            SwitchRecord { node_bitmap: switch_root, level: 1 },
        ];

        let req = ReservationRequest {
            node_cnt: 3,
            core_cnt: vec![12], // 4 cores/node * 3 nodes
            flags: ReservationFlags::NONE,
        };
        let result = resv_test(&ctx, &avail, &req, &mut core_bitmap, Some(&switches)).unwrap();
        assert_eq!(result.popcount(), 3);
    }

    #[test]
    fn test_topology_best_fit_reports_cannot_satisfy() {
        let ctx = four_node_ctx();
        let avail = all_avail(&ctx);
        let mut core_bitmap = no_cores_busy(&ctx);
        let mut switch_a = Bitset::new(4);
        switch_a.set(0);
        let switches = vec![SwitchRecord { node_bitmap: switch_a, level: 0 }];
        let req = ReservationRequest {
            node_cnt: 3,
            core_cnt: Vec::new(),
            flags: ReservationFlags::NONE,
        };
        let err = resv_test(&ctx, &avail, &req, &mut core_bitmap, Some(&switches)).unwrap_err();
        assert!(matches!(err, CoreError::CannotSatisfy(_)));
    }

    #[test]
    fn test_resv_test_rejects_mismatched_avail_length() {
        let ctx = four_node_ctx();
        let avail = Bitset::new(2); // wrong length
        let mut core_bitmap = no_cores_busy(&ctx);
        let req = ReservationRequest {
            node_cnt: 1,
            core_cnt: Vec::new(),
            flags: ReservationFlags::NONE,
        };
        let err = resv_test(&ctx, &avail, &req, &mut core_bitmap, None).unwrap_err();
        assert!(matches!(err, CoreError::BadArgument(_)));
    }
}
