//! Plexus command-line driver.
//!
//! Provides the `plexus` binary for exercising the evaluation engine outside
//! of a host application:
//!
//! - `demo` evaluates `Add(Frame, TimeOffset(Frame))` over a frame range
//!   twice and prints the values and cache statistics as JSON. The second
//!   sweep is served from the cache.
//! - `stress` pulls the same graph from several threads at once and reports
//!   how many computations actually ran.
//!
//! Cache sizing comes from the `PLEXUS_*` environment variables unless
//! overridden on the command line.

use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use plexus_core::{Context, CoreError, EvalError, Graph, PlugId};
use plexus_eval::nodes::{AddNode, FrameNode, TimeOffsetNode};
use plexus_eval::{CacheConfig, CacheService, Evaluator};

/// Lazy node-graph evaluation engine.
#[derive(Parser)]
#[command(name = "plexus", about = "Lazy node-graph evaluation engine")]
struct Cli {
    /// Cache byte budget (default: PLEXUS_CACHE_BYTES or 512 MiB).
    #[arg(long, global = true)]
    cache_bytes: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Evaluate the demo graph over a frame range, twice.
    Demo {
        /// Number of frames to evaluate, starting at 0.
        #[arg(short, long, default_value_t = 10)]
        frames: u32,

        /// Frame offset applied by the TimeOffset node.
        #[arg(long, default_value_t = 1.0)]
        offset: f64,

        /// Scale of the Frame node.
        #[arg(long, default_value_t = 2.0)]
        scale: f64,
    },

    /// Evaluate the demo graph from several threads concurrently.
    Stress {
        /// Number of worker threads.
        #[arg(short, long, default_value_t = 8)]
        threads: usize,

        /// Number of frames each thread evaluates.
        #[arg(short, long, default_value_t = 100)]
        frames: u32,
    },
}

/// `Add(Frame, TimeOffset(Frame))` plus handles to its counters.
struct DemoGraph {
    graph: Graph,
    frame: Arc<FrameNode>,
    add: Arc<AddNode>,
    sum: PlugId,
}

fn build_demo(scale: f64, offset: f64) -> Result<DemoGraph, CoreError> {
    let mut graph = Graph::new();
    let frame = Arc::new(FrameNode::new());
    let add = Arc::new(AddNode::float());

    let f = graph.add_node("frame", frame.clone())?;
    let shifted = graph.add_node("shifted", Arc::new(TimeOffsetNode::new(offset)))?;
    let a = graph.add_node("add", add.clone())?;

    graph.set_value(graph.plug(f, "scale")?, scale)?;
    let frame_out = graph.plug(f, "out")?;
    graph.set_input(graph.plug(shifted, "input")?, Some(frame_out))?;
    graph.set_input(graph.plug(a, "op1")?, Some(frame_out))?;
    graph.set_input(graph.plug(a, "op2")?, Some(graph.plug(shifted, "out")?))?;
    let sum = graph.plug(a, "sum")?;

    Ok(DemoGraph {
        graph,
        frame,
        add,
        sum,
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = CacheConfig::from_env();
    if let Some(bytes) = cli.cache_bytes {
        config.byte_budget = bytes;
    }
    let cache = CacheService::init(config);

    let exit_code = match cli.command {
        Commands::Demo {
            frames,
            offset,
            scale,
        } => run_demo(&cache, frames, scale, offset),
        Commands::Stress { threads, frames } => run_stress(&cache, threads, frames),
    };

    cache.shutdown();
    process::exit(exit_code);
}

/// Execute the demo subcommand.
///
/// Returns exit code: 0 = success, 1 = evaluation error, 2 = graph error.
fn run_demo(cache: &CacheService, frames: u32, scale: f64, offset: f64) -> i32 {
    let demo = match build_demo(scale, offset) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: failed to build demo graph: {}", e);
            return 2;
        }
    };

    let eval = Evaluator::new(&demo.graph, cache);
    let mut sweeps = Vec::new();
    for pass in 0..2 {
        let start = Instant::now();
        let mut values = Vec::with_capacity(frames as usize);
        for frame in 0..frames {
            let ctx = Context::new().with_variable("frame", f64::from(frame));
            match eval.get_value(demo.sum, &ctx) {
                Ok(v) => values.push(json!({ "frame": frame, "value": v.as_float() })),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return 1;
                }
            }
        }
        tracing::info!(pass, elapsed_us = start.elapsed().as_micros() as u64, "sweep finished");
        sweeps.push(json!({ "pass": pass, "values": values }));
    }

    print_json(&json!({
        "sweeps": sweeps,
        "frame_computes": demo.frame.computes(),
        "add_computes": demo.add.computes(),
        "cache": cache.stats(),
    }));
    0
}

/// Execute the stress subcommand.
///
/// Returns exit code: 0 = success, 1 = evaluation error, 2 = graph error.
fn run_stress(cache: &CacheService, threads: usize, frames: u32) -> i32 {
    let demo = match build_demo(2.0, 1.0) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: failed to build demo graph: {}", e);
            return 2;
        }
    };

    let start = Instant::now();
    let outcomes: Vec<Result<(), EvalError>> = thread::scope(|s| {
        let handles: Vec<_> = (0..threads.max(1))
            .map(|worker| {
                let demo = &demo;
                s.spawn(move || -> Result<(), EvalError> {
                    let eval = Evaluator::new(&demo.graph, cache);
                    // Each worker walks the range from a different starting
                    // point so requests overlap in flight.
                    for i in 0..frames {
                        let frame = (i as usize + worker) % frames.max(1) as usize;
                        let ctx = Context::new().with_variable("frame", frame as f64);
                        eval.get_value(demo.sum, &ctx)?;
                    }
                    Ok(())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(Err(EvalError::Abandoned)))
            .collect()
    });

    if let Some(Err(e)) = outcomes.iter().find(|o| o.is_err()) {
        eprintln!("Error: {}", e);
        return 1;
    }

    print_json(&json!({
        "threads": threads,
        "frames": frames,
        "elapsed_ms": start.elapsed().as_millis() as u64,
        "add_computes": demo.add.computes(),
        "frame_computes": demo.frame.computes(),
        "cache": cache.stats(),
    }));
    0
}

fn print_json(value: &serde_json::Value) {
    let json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize result: {}\"}}", e));
    println!("{}", json);
}
