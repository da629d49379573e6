use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cons_select_core::context::Context;
use cons_select_core::job::{JobResources, NodeReq};
use cons_select_core::lifecycle::JobAction;
use cons_select_core::node::NodeCapacity;

#[derive(Debug, clap::Parser)]
#[command(long_about = None)]
struct Args {
    /// Number of nodes in the simulated cluster
    #[arg(long, default_value_t = 8)]
    node_count: usize,
    /// CPUs per node
    #[arg(long, default_value_t = 4)]
    cpus_per_node: u32,
    /// Real memory per node, in MB
    #[arg(long, default_value_t = 16_000)]
    memory_per_node: u64,
    /// Partition over-subscription policy: EXCLUSIVE, FORCE:k, YES:k
    #[arg(long, default_value_t = String::from("FORCE:2"))]
    over_subscribe: String,
    /// Number of random jobs to add before reporting allocation state
    #[arg(long, default_value_t = 20)]
    job_count: usize,
    /// Seed for the pseudo-random job generator
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let over_subscribe = cons_select_core::config::OverSubscribe::from_str(&args.over_subscribe)?;

    let names: Vec<String> = (0..args.node_count).map(|i| format!("node{i}")).collect();
    let capacities: Vec<NodeCapacity> = (0..args.node_count)
        .map(|_| NodeCapacity {
            cpus: args.cpus_per_node,
            real_memory: args.memory_per_node,
            mem_spec_limit: 0,
        })
        .collect();

    let mut ctx = Context::node_init(names, capacities)?;
    ctx.add_partition("default".to_string(), over_subscribe.num_rows());

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut next_job_id = 1u64;
    let mut admitted = 0usize;
    let mut refused = 0usize;

    for _ in 0..args.job_count {
        let nhosts = rng.gen_range(1..=args.node_count);
        let start = rng.gen_range(0..args.node_count);
        let total_cores = ctx.core_map.total_cores();

        let mut node_bitmap = cons_select_core::Bitset::new(args.node_count);
        let mut core_bitmap = cons_select_core::Bitset::new(total_cores);
        let mut cpus = Vec::with_capacity(nhosts);
        let mut memory = Vec::with_capacity(nhosts);

        for h in 0..nhosts {
            let node_i = (start + h) % args.node_count;
            node_bitmap.set(node_i);
            let want_cpus = rng.gen_range(1..=args.cpus_per_node);
            let (lo, _hi) = ctx.core_map.core_range(node_i);
            for c in 0..want_cpus as usize {
                core_bitmap.set(lo + c);
            }
            cpus.push(want_cpus);
            memory.push(rng.gen_range(100..=args.memory_per_node / 4));
        }

        let job = JobResources::new(next_job_id, node_bitmap, core_bitmap, cpus, memory, NodeReq::AnyRow, false)?;
        match ctx.add_job("default", job, JobAction::Normal) {
            Ok(()) => {
                admitted += 1;
                log::info!("job {next_job_id} admitted");
            }
            Err(e) => {
                refused += 1;
                log::info!("job {next_job_id} refused: {e}");
            }
        }
        next_job_id += 1;
    }

    println!("admitted {admitted} jobs, refused {refused} jobs");
    for node_i in 0..ctx.num_nodes() {
        let node = ctx.node(node_i)?;
        println!(
            "{}: alloc_memory={} node_state={:?}",
            node.name, node.usage.alloc_memory, node.usage.node_state
        );
    }

    Ok(())
}
