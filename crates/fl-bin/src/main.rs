//! Fairlens entrypoint.
//!
//! Loads a network description and a feature specification, runs the
//! two-phase bias analysis, and prints the result line. Diagnostics go
//! through tracing: stderr by default, or a non-blocking file appender when
//! `--log-dir` is given.

use anyhow::Result;
use clap::Parser;
use core_config::{FeatureSpec, load_tunables};
use core_engine::{Analysis, InitialState};
use crossterm::style::Stylize;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

mod network;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(
    name = "fairlens",
    version,
    about = "Bias analysis for feed-forward ReLU classifiers"
)]
struct Args {
    /// Network description (TOML).
    pub network: PathBuf,
    /// Feature specification file naming the sensitive and one-hot groups.
    pub specification: PathBuf,
    /// Maximum disjunctive activations per sensitive value.
    #[arg(long)]
    pub widening: Option<usize>,
    /// Minimum range width for bisection of real features.
    #[arg(long)]
    pub difference: Option<f64>,
    /// Worker threads per pool.
    #[arg(long)]
    pub workers: Option<usize>,
    /// Tunables file (overrides discovery of `fairlens.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Directory for the analysis log file; stderr only when omitted.
    #[arg(long = "log-dir")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Default)]
struct AppStartup {
    log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn configure_logging(&mut self, log_dir: Option<&Path>) {
        let filter = || tracing_subscriber::EnvFilter::from_default_env();
        match log_dir {
            Some(dir) => {
                let file_appender = tracing_appender::rolling::never(dir, "fairlens.log");
                let (writer, guard) = tracing_appender::non_blocking(file_appender);
                match tracing_subscriber::fmt()
                    .with_env_filter(filter())
                    .with_writer(writer)
                    .with_ansi(false)
                    .try_init()
                {
                    Ok(_) => {
                        self.log_guard = Some(guard);
                    }
                    Err(_err) => {
                        // Global subscriber already installed; drop the guard
                        // so the writer shuts down.
                    }
                }
            }
            None => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(filter())
                    .with_writer(std::io::stderr)
                    .try_init();
            }
        }
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "runtime.panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut startup = AppStartup::default();
    startup.configure_logging(args.log_dir.as_deref());
    AppStartup::install_panic_hook();

    let mut tunables = load_tunables(args.config.clone())?;
    if let Some(widening) = args.widening {
        tunables.widening = widening;
    }
    if let Some(difference) = args.difference {
        tunables.difference = difference;
    }
    if let Some(workers) = args.workers {
        tunables.workers = Some(workers);
    }
    info!(
        target: "runtime.startup",
        network = %args.network.display(),
        specification = %args.specification.display(),
        widening = tunables.widening,
        difference = tunables.difference,
        "startup"
    );

    let network = network::load(&args.network)?;
    let spec = FeatureSpec::load(&args.specification)?;
    let analysis = Analysis::new(
        network.cfg,
        InitialState::top(),
        network.inputs,
        network.outputs,
        network.activations,
        &spec,
        &tunables,
    )?;
    let summary = analysis.analyze();

    let headline = format!(
        "{}% of the input space analyzed, {}% biased ({} partitions, {} patterns)",
        summary.feasible, summary.biased, summary.partitions, summary.compressed
    );
    println!("{}", headline.cyan());
    println!("{}", summary.result_line());
    Ok(())
}
