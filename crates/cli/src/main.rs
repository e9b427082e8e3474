//! cpflow binary: argument parsing, configuration discovery, driver
//! wiring, and result presentation. All orchestration logic lives in
//! `cpflow-engine`; this crate is deliberately thin glue.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;

use cpflow_engine::{
    DockerBackend, DockerCliDriver, DockerStateManager, DockerfileResolver, DriverRegistry, ExecutionContext,
    InMemoryContainerRepository, InMemoryImageRepository, LayeredConfig, TrackedDockerDriver, WorkflowExecutionService, WorkflowOptions,
};
use cpflow_types::{EnvKind, WorkflowExecutionResult};

/// Contest workflow runner: resolves the configured steps for
/// `(language, command)` and executes them locally or in Docker.
#[derive(Debug, Parser)]
#[command(name = "cpflow", version, about)]
struct Cli {
    /// Language the contest solution is written in (config key).
    language: String,
    /// Execution environment: `local` or `docker`.
    env: EnvKind,
    /// Contest identifier, e.g. `abc300`.
    contest: String,
    /// Problem identifier, e.g. `a`.
    problem: String,
    /// Command to run, e.g. `open`, `test`, `submit` (config key).
    command: String,

    /// Additional config files layered over the defaults, in order.
    #[arg(long = "config")]
    config_files: Vec<PathBuf>,

    /// Workspace root mounted into containers.
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Execute independent steps through a bounded worker pool.
    #[arg(long)]
    parallel: bool,

    /// Worker count for `--parallel`.
    #[arg(long, default_value_t = cpflow_engine::DEFAULT_MAX_WORKERS)]
    max_workers: usize,

    /// Disable Docker state tracking and environment preparation.
    #[arg(long)]
    no_state: bool,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(result) => {
            present(&result);
            if result.success { ExitCode::SUCCESS } else { ExitCode::FAILURE }
        }
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: &Cli) -> Result<WorkflowExecutionResult> {
    let config = load_config(cli)?;
    let context = build_context(cli, &config)?;

    let drivers = DriverRegistry::local_defaults().with_docker(tracked_docker_driver());
    let state_manager = if cli.no_state {
        None
    } else {
        Some(DockerStateManager::from_file(state_file_path()))
    };

    let service = WorkflowExecutionService::new(context, config, drivers, state_manager);
    service.run_workflow(WorkflowOptions {
        parallel: cli.parallel,
        max_workers: cli.max_workers,
    })
}

/// Layer order: system config, project config, then explicit `--config`
/// files. Later layers win.
fn load_config(cli: &Cli) -> Result<LayeredConfig> {
    let mut layers: Vec<PathBuf> = Vec::new();
    if let Some(config_dir) = dirs_next::config_dir() {
        layers.push(config_dir.join("cpflow").join("config.yaml"));
    }
    layers.push(PathBuf::from("cpflow.yaml"));
    layers.extend(cli.config_files.iter().cloned());
    LayeredConfig::from_layers(&layers).context("failed to load configuration")
}

fn build_context(cli: &Cli, config: &LayeredConfig) -> Result<ExecutionContext> {
    let dockerfile_path = config
        .get_str(&[&cli.language, "dockerfile"])
        .map(cpflow_util::expand_tilde);
    let oj_dockerfile_path = config
        .get_str(&[&cli.language, "oj_dockerfile"])
        .map(cpflow_util::expand_tilde);
    let resolver = DockerfileResolver::new(dockerfile_path, oj_dockerfile_path);

    let workspace_root = cli
        .workspace
        .canonicalize()
        .with_context(|| format!("workspace directory not found: {}", cli.workspace.display()))?;

    Ok(ExecutionContext::new(
        &cli.language,
        cli.env,
        &cli.contest,
        &cli.problem,
        &cli.command,
        workspace_root,
        resolver,
    ))
}

fn tracked_docker_driver() -> Arc<dyn DockerBackend> {
    Arc::new(TrackedDockerDriver::new(
        Arc::new(DockerCliDriver::default()),
        Arc::new(InMemoryContainerRepository::default()),
        Arc::new(InMemoryImageRepository::default()),
    ))
}

fn state_file_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cpflow")
        .join("docker_state.json")
}

fn present(result: &WorkflowExecutionResult) {
    for (index, step) in result.preparation_results.iter().enumerate() {
        let label = step.label.clone().unwrap_or_else(|| format!("preparation {index}"));
        println!("[prep {}] {} {}", index, if step.success { "ok" } else { "failed" }, label);
    }
    for (index, step) in result.results.iter().enumerate() {
        let label = step.label.clone().unwrap_or_else(|| format!("step {index}"));
        println!("[step {}] {} {}", index, if step.success { "ok" } else { "failed" }, label);
        if step.success && step.show_output && !step.stdout.trim().is_empty() {
            println!("{}", step.stdout.trim_end());
        }
    }
    for warning in &result.warnings {
        eprintln!("warning: {warning}");
    }
    for error in &result.errors {
        eprintln!("error: {error}");
    }
}
