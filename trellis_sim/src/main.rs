//! Trellis Simulator CLI
//!
//! Run the built-in scenarios against the simulated conductor.

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use trellis_core::{combine, local_only, BundleRegistry, ConsistencyStrategy, Middleware, ReportingAdapter};
use trellis_env::HarnessContext;
use trellis_sim::scenarios::{self, ScenarioId};
use trellis_sim::{RunSettings, SimConfig, SimExport, SimWorld};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ConsistencyArg {
    /// Wait on the conductor's convergence oracle
    Native,
    /// Sleep for --shim-delay-ms and hope
    Shim,
}

/// Trellis scenario simulator
#[derive(Parser, Debug)]
#[command(name = "trellis-sim")]
#[command(about = "Run Trellis scenarios against a deterministic simulated conductor", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (basic_dsl_compilation, echo, multi_agent_topology,
    /// cross_player_gossip, unknown_bundle, install_fault, standard, all)
    #[arg(short = 'S', long, default_value = "standard")]
    scenario: String,

    /// How scenarios wait for consistency
    #[arg(long, value_enum, default_value = "native")]
    consistency: ConsistencyArg,

    /// Delay used by the timed shim
    #[arg(long, default_value = "100")]
    shim_delay_ms: u64,

    /// Bound on native consistency waits
    #[arg(long, default_value = "5000")]
    consistency_timeout_ms: u64,

    /// Latency of every link between players
    #[arg(long, default_value = "0")]
    latency_ms: u64,

    /// Loss rate of every link between players (0.0 - 1.0)
    #[arg(long, default_value = "0.0")]
    loss: f64,

    /// Let players gossip over the simulated network instead of forcing local-only
    #[arg(long)]
    networked: bool,

    /// Bundle manifest (JSON object of name -> path)
    #[arg(long)]
    bundles: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON summary on stdout instead of TAP
    #[arg(long)]
    json: bool,

    /// Export the run to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn parse_scenarios(name: &str) -> anyhow::Result<Vec<ScenarioId>> {
    match name {
        "all" => Ok(ScenarioId::all()),
        "standard" => Ok(ScenarioId::standard()),
        other => match other.parse::<ScenarioId>() {
            Ok(id) => Ok(vec![id]),
            Err(e) => {
                let available: Vec<_> = ScenarioId::all().iter().map(|s| s.name()).collect();
                bail!("{}. Available: {}, standard, all", e, available.join(", "))
            }
        },
    }
}

fn load_bundles(path: &Path) -> anyhow::Result<BundleRegistry> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading bundle manifest {}", path.display()))?;
    let base = path.parent().map(PathBuf::from).unwrap_or_default();
    BundleRegistry::from_manifest_json(&json, &base)
        .with_context(|| format!("parsing bundle manifest {}", path.display()))
}

fn run(args: Args) -> anyhow::Result<i32> {
    let ids = parse_scenarios(&args.scenario)?;
    if !args.loss.is_finite() {
        bail!("--loss must be a number between 0.0 and 1.0, got {}", args.loss);
    }

    let seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let consistency = match args.consistency {
        ConsistencyArg::Native => ConsistencyStrategy::Native,
        ConsistencyArg::Shim => ConsistencyStrategy::TimedShim {
            delay: Duration::from_millis(args.shim_delay_ms),
        },
    };
    let config = SimConfig {
        seed,
        consistency,
        consistency_timeout: Some(Duration::from_millis(args.consistency_timeout_ms)),
        latency: Duration::from_millis(args.latency_ms),
        loss_rate: args.loss.clamp(0.0, 1.0),
        ..Default::default()
    };

    let mut world = SimWorld::new(config);
    if let Some(path) = &args.bundles {
        world = world.with_bundles(load_bundles(path)?);
    }

    // TAP goes to stdout unless stdout carries the JSON summary
    let reporter: Arc<dyn Middleware> = if args.json {
        Arc::new(ReportingAdapter::new(std::io::sink()))
    } else {
        Arc::new(ReportingAdapter::stdout())
    };
    let mut layers = vec![reporter];
    if !args.networked {
        layers.push(local_only());
    }

    let mut orchestrator = world.orchestrator(combine(layers))?;
    scenarios::register_all(&mut orchestrator, &world, &ids)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting tokio runtime")?;
    let summary = runtime.block_on(orchestrator.run());
    let virtual_time_ms = world.context.now().as_millis() as u64;

    if let Some(path) = &args.export {
        let export = SimExport::new(
            RunSettings {
                seed,
                consistency: match args.consistency {
                    ConsistencyArg::Native => trellis_core::ConsistencyMode::Native,
                    ConsistencyArg::Shim => trellis_core::ConsistencyMode::TimedApproximation,
                },
                latency_ms: args.latency_ms,
                loss_rate: world.config.loss_rate,
                local_only: !args.networked,
            },
            virtual_time_ms,
            summary.clone(),
        );
        export
            .write_to_file(path)
            .with_context(|| format!("writing export {}", path))?;
        info!("Exported {} scenario reports to {}", summary.len(), path);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!("seed={} virtual time={}ms", seed, virtual_time_ms);
        for report in summary.scenarios.iter().filter(|r| !r.outcome.is_passed()) {
            error!(
                "  - {}: {}",
                report.name,
                report.outcome.reason().unwrap_or("unknown")
            );
        }
    }

    Ok(summary.exit_code())
}

fn main() {
    let args = Args::parse();

    // Logs go to stderr; stdout carries TAP or JSON
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    info!("Trellis Simulator v{}", env!("CARGO_PKG_VERSION"));

    let code = match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            2
        }
    };

    // Exit with proper code for CI
    std::process::exit(code);
}
