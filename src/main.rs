//! taskdispatch - CLI

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use taskdispatch::runtime::pool::WorkerStats;
use taskdispatch::util::config::{load_config, load_user_config, DispatchConfig};
use taskdispatch::util::logger::{self, LogLevel};
use taskdispatch::{DispatchRegistry, Dispatcher, Priority, NAME, VERSION};
use tracing::info;

/// Priority-aware task dispatching engine
#[derive(Parser, Debug)]
#[command(name = "taskdispatch")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to the user config, then built-in defaults)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an end-to-end scenario and print its timings
    Scenario {
        #[arg(value_enum)]
        name: Scenario,
    },

    /// Run a short workload and print pool diagnostics as JSON
    Stats {
        /// Units to submit before sampling
        #[arg(short, long, default_value_t = 64)]
        tasks: usize,
    },

    /// Validate a configuration file
    CheckConfig {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Print version information
    Version,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Scenario {
    /// Two serial tasks (200ms, 100ms) finish in submission order
    Serial,
    /// Ten 10ms iterations run in parallel on a concurrent dispatcher
    Apply,
    /// Group wait times out, then succeeds once both tasks finish
    Group,
    /// A barrier separates earlier and later work
    Barrier,
}

#[derive(Serialize)]
struct StatsReport {
    pending_tasks: usize,
    task_counter: u64,
    worker_threads: BTreeMap<String, u64>,
    workers: Vec<WorkerStats>,
    serial_dispatchers: BTreeMap<String, usize>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        logger::init_with_level(LogLevel::Debug);
    } else {
        logger::init_with_level(LogLevel::Warn);
    }

    match args.command {
        Commands::CheckConfig { file } => {
            let config = load_config(&file)
                .with_context(|| format!("Invalid config: {}", file.display()))?;
            println!(
                "{}: ok ({} workers: high={} default={} low={})",
                file.display(),
                config.pool.total_workers(),
                config.pool.high_workers,
                config.pool.default_workers,
                config.pool.low_workers
            );
        }
        Commands::Scenario { name } => {
            let registry = open_registry(args.config.as_ref())?;
            let result = run_scenario(&registry, name);
            registry.shutdown(false);
            result?;
        }
        Commands::Stats { tasks } => {
            let registry = open_registry(args.config.as_ref())?;
            let report = collect_stats(&registry, tasks);
            registry.shutdown(false);
            println!("{}", serde_json::to_string_pretty(&report?)?);
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        }
    }

    Ok(())
}

fn open_registry(path: Option<&PathBuf>) -> Result<DispatchRegistry> {
    let config: DispatchConfig = match path {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => load_user_config().context("Failed to load user config")?,
    };
    DispatchRegistry::new(config).context("Failed to start dispatch registry")
}

fn run_scenario(
    registry: &DispatchRegistry,
    scenario: Scenario,
) -> Result<()> {
    info!(?scenario, "running scenario");
    match scenario {
        Scenario::Serial => serial_scenario(registry),
        Scenario::Apply => apply_scenario(registry),
        Scenario::Group => group_scenario(registry),
        Scenario::Barrier => barrier_scenario(registry),
    }
}

fn serial_scenario(registry: &DispatchRegistry) -> Result<()> {
    let serial = registry.create_serial_dispatcher("scenario-serial", Priority::Default)?;
    let group = serial.create_group();
    let order = Arc::new(Mutex::new(Vec::new()));
    let start = Instant::now();

    for (index, work_ms) in [200u64, 100].into_iter().enumerate() {
        let order = order.clone();
        serial.async_group_dispatch(
            &group,
            Box::new(move || {
                thread::sleep(Duration::from_millis(work_ms));
                order.lock().push(index);
            }),
        )?;
    }

    if !serial.group_wait(&group, 2000) {
        bail!("serial tasks did not finish within 2s");
    }
    let order = order.lock().clone();
    println!("completion order: {:?}", order);
    println!("elapsed: {:?}", start.elapsed());
    Ok(())
}

fn apply_scenario(registry: &DispatchRegistry) -> Result<()> {
    let concurrent =
        registry.create_concurrent_dispatcher("scenario-apply", Priority::Default)?;
    let count = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let c = count.clone();
    concurrent.apply_dispatch(
        Arc::new(move |_: usize| {
            thread::sleep(Duration::from_millis(10));
            c.fetch_add(1, Ordering::SeqCst);
        }),
        10,
    )?;

    while count.load(Ordering::SeqCst) < 10 && start.elapsed() < Duration::from_secs(2) {
        thread::sleep(Duration::from_millis(1));
    }
    println!("count: {}", count.load(Ordering::SeqCst));
    println!("elapsed: {:?}", start.elapsed());
    Ok(())
}

fn group_scenario(registry: &DispatchRegistry) -> Result<()> {
    let concurrent =
        registry.create_concurrent_dispatcher("scenario-group", Priority::Default)?;
    let group = concurrent.create_group();
    for _ in 0..2 {
        concurrent.async_group_dispatch(
            &group,
            Box::new(|| thread::sleep(Duration::from_millis(200))),
        )?;
    }

    let short = concurrent.group_wait(&group, 10);
    let long = concurrent.group_wait(&group, 1000);
    println!("wait(10ms): {}", short);
    println!("wait(1000ms): {}", long);
    Ok(())
}

fn barrier_scenario(registry: &DispatchRegistry) -> Result<()> {
    let concurrent =
        registry.create_concurrent_dispatcher("scenario-barrier", Priority::Default)?;
    let log = Arc::new(Mutex::new(Vec::new()));
    let record = |log: &Arc<Mutex<Vec<String>>>, entry: String| log.lock().push(entry);

    for name in ["a", "b"] {
        let log = log.clone();
        concurrent.async_dispatch(Box::new(move || {
            thread::sleep(Duration::from_millis(50));
            record(&log, format!("{} done", name));
        }))?;
    }
    let l = log.clone();
    concurrent.async_dispatch_barrier(Box::new(move || record(&l, "barrier".to_string())))?;
    let l = log.clone();
    concurrent.sync_dispatch(Box::new(move || record(&l, "c done".to_string())))?;

    for entry in log.lock().iter() {
        println!("{}", entry);
    }
    Ok(())
}

fn collect_stats(
    registry: &DispatchRegistry,
    tasks: usize,
) -> Result<StatsReport> {
    let global = registry.get_global_dispatcher(Priority::Default);
    let serial = registry.create_serial_dispatcher("stats", Priority::Low)?;
    let group = global.create_group();
    for i in 0..tasks {
        let target: &dyn Dispatcher = if i % 4 == 0 { &serial } else { &global };
        target.async_group_dispatch(&group, Box::new(|| thread::sleep(Duration::from_millis(1))))?;
    }
    if !global.group_wait(&group, 10_000) {
        bail!("stats workload did not finish within 10s");
    }

    Ok(StatsReport {
        pending_tasks: registry.pending_tasks_size(),
        task_counter: registry.task_counter(),
        worker_threads: registry.worker_threads_info(),
        workers: registry.worker_stats(),
        serial_dispatchers: registry.serial_dispatchers(),
    })
}
