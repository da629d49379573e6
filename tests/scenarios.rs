//! End-to-end scenarios exercising the public API across modules: a job
//! is added, packed into rows, then shrunk/expanded/suspended, and a
//! reservation is placed against whatever capacity remains.

use cons_select_core::bitset::Bitset;
use cons_select_core::context::Context;
use cons_select_core::gres::NoopGresManager;
use cons_select_core::job::{JobResources, NodeReq};
use cons_select_core::lifecycle::JobAction;
use cons_select_core::node::NodeCapacity;
use cons_select_core::reservation::{resv_test, ReservationFlags, ReservationRequest, SwitchRecord};

fn cap(cpus: u32) -> NodeCapacity {
    NodeCapacity {
        cpus,
        real_memory: 10_000,
        mem_spec_limit: 0,
    }
}

fn job_on_nodes(
    ctx: &Context,
    job_id: u64,
    nodes: &[(usize, usize, u32, u64)], // (node, cores-on-node, cpus, memory)
) -> JobResources {
    let total_cores = ctx.core_map.total_cores();
    let mut node_bitmap = Bitset::new(ctx.num_nodes());
    let mut core_bitmap = Bitset::new(total_cores);
    let mut cpus = Vec::new();
    let mut memory = Vec::new();
    for &(node_i, cores, cpu, mem) in nodes {
        node_bitmap.set(node_i);
        let (lo, _) = ctx.core_map.core_range(node_i);
        for c in 0..cores {
            core_bitmap.set(lo + c);
        }
        cpus.push(cpu);
        memory.push(mem);
    }
    JobResources::new(job_id, node_bitmap, core_bitmap, cpus, memory, NodeReq::AnyRow, false).unwrap()
}

#[test]
fn scenario_dense_single_row_partition_refuses_conflicting_job() {
    let mut ctx = Context::node_init(
        vec!["n0".into(), "n1".into(), "n2".into(), "n3".into()],
        vec![cap(2), cap(2), cap(2), cap(2)],
    )
    .unwrap();
    ctx.add_partition("default".into(), 1);

    let dense = job_on_nodes(&ctx, 1, &[(0, 2, 2, 100), (1, 2, 2, 100), (2, 2, 2, 100), (3, 2, 2, 100)]);
    ctx.add_job("default", dense, JobAction::Normal).unwrap();

    let conflicting = job_on_nodes(&ctx, 2, &[(0, 1, 1, 50)]);
    let err = ctx.add_job("default", conflicting, JobAction::Normal).unwrap_err();
    assert!(matches!(err, cons_select_core::CoreError::ExcessRows(_)));
}

#[test]
fn scenario_two_row_sharing_then_rebuild_after_removal() {
    let mut ctx = Context::node_init(vec!["n0".into()], vec![cap(1)]).unwrap();
    ctx.add_partition("default".into(), 2);

    let j1 = job_on_nodes(&ctx, 1, &[(0, 1, 1, 10)]);
    let j2 = job_on_nodes(&ctx, 2, &[(0, 1, 1, 10)]);
    ctx.add_job("default", j1, JobAction::Normal).unwrap();
    ctx.add_job("default", j2, JobAction::Normal).unwrap();
    assert_eq!(ctx.partition("default").unwrap().rows.num_rows(), 2);

    ctx.remove_job("default", 1, false).unwrap();
    let j3 = job_on_nodes(&ctx, 3, &[(0, 1, 1, 10)]);
    // row 0 is now free, so j3 (conflicting with j2's core) lands there
    // instead of being refused for lack of a third row.
    ctx.add_job("default", j3, JobAction::Normal).unwrap();
    let part = ctx.partition("default").unwrap();
    assert_eq!(part.rows.find_row(2), Some(1));
    assert_eq!(part.rows.find_row(3), Some(0));
}

#[test]
fn scenario_shrink_releases_one_node_and_keeps_others() {
    let mut ctx = Context::node_init(vec!["n0".into(), "n1".into()], vec![cap(2), cap(2)]).unwrap();
    ctx.add_partition("default".into(), 1);

    let job = job_on_nodes(&ctx, 1, &[(0, 2, 2, 200), (1, 2, 2, 300)]);
    ctx.add_job("default", job, JobAction::Normal).unwrap();

    let mut gres = NoopGresManager;
    ctx.resize_job("default", 1, 0, &mut gres).unwrap();

    assert_eq!(ctx.node(0).unwrap().usage.alloc_memory, 0);
    assert_eq!(ctx.node(1).unwrap().usage.alloc_memory, 300);
    let part = ctx.partition("default").unwrap();
    assert_eq!(part.jobs.get(&1).unwrap().nhosts(), 1);
}

#[test]
fn scenario_expand_merges_two_jobs_into_one() {
    let mut ctx = Context::node_init(
        vec!["n0".into(), "n1".into(), "n2".into()],
        vec![cap(2), cap(2), cap(2)],
    )
    .unwrap();
    ctx.add_partition("default".into(), 1);

    let j1 = job_on_nodes(&ctx, 1, &[(0, 1, 1, 100)]);
    let j2 = job_on_nodes(&ctx, 2, &[(1, 1, 1, 150), (2, 1, 1, 250)]);
    ctx.add_job("default", j1, JobAction::Normal).unwrap();
    ctx.add_job("default", j2, JobAction::Normal).unwrap();

    let mut gres = NoopGresManager;
    ctx.expand_job("default", 1, 2, &mut gres).unwrap();

    let part = ctx.partition("default").unwrap();
    assert_eq!(part.jobs.get(&1).unwrap().nhosts(), 0);
    let merged = part.jobs.get(&2).unwrap();
    assert_eq!(merged.nhosts(), 3);
    assert_eq!(
        merged.memory_allocated.iter().sum::<u64>(),
        100 + 150 + 250
    );
}

#[test]
fn scenario_suspend_frees_row_capacity_for_another_job() {
    let mut ctx = Context::node_init(vec!["n0".into()], vec![cap(1)]).unwrap();
    ctx.add_partition("default".into(), 1);

    let j1 = job_on_nodes(&ctx, 1, &[(0, 1, 1, 10)]);
    ctx.add_job("default", j1, JobAction::Normal).unwrap();

    let j2 = job_on_nodes(&ctx, 2, &[(0, 1, 1, 10)]);
    assert!(ctx.add_job("default", j2.clone(), JobAction::Normal).is_err());

    ctx.suspend_job("default", 1, JobAction::Suspend).unwrap();
    ctx.add_job("default", j2, JobAction::Normal).unwrap();

    ctx.resume_job("default", 1, JobAction::Normal).unwrap_err();
}

#[test]
fn scenario_sequential_reservation_spans_partial_nodes() {
    // 3 nodes x 4 cores, request node_cnt=2 at 2 cores
    // each; n1 has only 1 free core (3 already unavailable) so it can't
    // meet the per-node demand and is skipped in favor of n0 and n2.
    let ctx = Context::node_init(
        vec!["n0".into(), "n1".into(), "n2".into()],
        vec![cap(4), cap(4), cap(4)],
    )
    .unwrap();
    let avail = Bitset::new_full(ctx.num_nodes());
    let mut core_bitmap = Bitset::new(ctx.core_map.total_cores());
    let (lo1, _) = ctx.core_map.core_range(1);
    core_bitmap.set(lo1);
    core_bitmap.set(lo1 + 1);
    core_bitmap.set(lo1 + 2);

    let req = ReservationRequest {
        node_cnt: 2,
        core_cnt: vec![4], // 2 cores/node
        flags: ReservationFlags::NONE,
    };
    let result = resv_test(&ctx, &avail, &req, &mut core_bitmap, None).unwrap();
    assert!(result.test(0));
    assert!(!result.test(1));
    assert!(result.test(2));
    assert_eq!(core_bitmap.popcount(), 3 + 2 + 2); // 3 pre-busy + 2 per chosen node
}

#[test]
fn scenario_topology_best_fit_avoids_busy_switch() {
    // two level-0 switches of two nodes each, one
    // level-1 switch above; node 0/1 are busy so the placement must climb
    // to the shared switch and then favor the idle leaf.
    let mut ctx = Context::node_init(
        vec!["n0".into(), "n1".into(), "n2".into(), "n3".into()],
        vec![cap(2), cap(2), cap(2), cap(2)],
    )
    .unwrap();
    ctx.add_partition("default".into(), 1);
    let busy = job_on_nodes(&ctx, 1, &[(0, 2, 2, 10), (1, 2, 2, 10)]);
    ctx.add_job("default", busy, JobAction::Normal).unwrap();

    let avail = Bitset::new_full(ctx.num_nodes());
    let mut core_bitmap = cons_select_core::reservation::busy_core_bitmap(&ctx);
    let mut switch_a = Bitset::new(4);
    switch_a.set(0);
    switch_a.set(1);
    let mut switch_b = Bitset::new(4);
    switch_b.set(2);
    switch_b.set(3);
    let switches = vec![
        SwitchRecord { node_bitmap: switch_a, level: 0 },
        SwitchRecord { node_bitmap: switch_b, level: 0 },
    ];
    let req = ReservationRequest {
        node_cnt: 2,
        core_cnt: vec![4], // 2 cores/node
        flags: ReservationFlags::NONE,
    };
    let placement = resv_test(&ctx, &avail, &req, &mut core_bitmap, Some(&switches)).unwrap();
    assert!(placement.test(2));
    assert!(placement.test(3));
    assert!(!placement.test(0));
    assert!(!placement.test(1));
}
