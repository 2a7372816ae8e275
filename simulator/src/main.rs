use anyhow::Context;
use clap::Parser;
use status_bridge::bridge::{bridge_bind_address, StatusBridge};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use surakshacore::interface::RestConfig;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::config::ScenarioConfig;
use workflow::runner::{BackendMode, Runner};

mod generator;
mod status_bridge;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "SURAKSHA safety-core scenario driver")]
struct Args {
    /// Load a scenario from YAML
    #[arg(long)]
    scenario: Option<PathBuf>,
    /// Use the in-memory backend instead of the REST API
    #[arg(long, default_value_t = false)]
    offline: bool,
    /// Backend API base URL
    #[arg(long, env = "SURAKSHA_API_BASE_URL")]
    backend_url: Option<String>,
    /// JSON file holding the live-sharing session between runs
    #[arg(long)]
    store: Option<PathBuf>,
    /// Append a one-line summary of each run here
    #[arg(long, default_value = "tools/data/scenario_runs.log")]
    report: PathBuf,
    /// Keep the HTTP bridge alive after the scenario
    #[arg(long, default_value_t = false)]
    serve: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut scenario = match &args.scenario {
        Some(path) => ScenarioConfig::load(path)?,
        None => ScenarioConfig::default(),
    };
    if let Some(store) = args.store.clone() {
        scenario.store_path = Some(store);
    }

    let mode = if args.offline {
        BackendMode::Offline
    } else {
        let mut rest = RestConfig::from_env();
        if let Some(url) = args.backend_url.clone() {
            rest.base_url = url;
        }
        BackendMode::Rest(rest)
    };

    let runtime = TokioBuilder::new_multi_thread()
        .enable_all()
        .build()
        .context("creating tokio runtime")?;

    runtime.block_on(async {
        let runner = Runner::new(scenario, mode)?;
        let result = runner.execute().await.context("running scenario")?;

        println!("{}", result.summary_line());
        println!("{}", serde_json::to_string_pretty(&result)?);
        append_report(&args.report, &result.summary_line())?;

        if args.serve {
            let bridge = StatusBridge::new(runner.app());
            bridge
                .serve(bridge_bind_address(), async {
                    if let Err(err) = signal::ctrl_c().await {
                        log::error!("awaiting Ctrl+C failed: {err}");
                    }
                })
                .await?;
        }
        Ok::<(), anyhow::Error>(())
    })
}

fn append_report(path: &Path, line: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating report directory {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening report {}", path.display()))?;
    writeln!(file, "{line}")?;
    Ok(())
}
