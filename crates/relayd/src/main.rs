use std::ffi::OsStr;

use anyhow::{Context, Result};
use clap::Parser;
use relay_analysis::Engine;
use relay_config::{config_path, ensure_workspace_config, validate_config};
use relayd::cli::Cli;
use relayd::commands::{ingest_sources, run_command};
use relayd::logging::init_logging;

fn main() -> Result<()> {
    let cli = parse_cli();
    init_logging(cli.log_format)?;
    run(cli)
}

fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn run(cli: Cli) -> Result<()> {
    let workspace = cli.workspace.canonicalize().with_context(|| {
        format!(
            "failed to resolve workspace path {}",
            cli.workspace.display()
        )
    })?;

    let config = ensure_workspace_config(&workspace).with_context(|| {
        format!(
            "failed to load or create workspace config at {}",
            config_path(&workspace).display()
        )
    })?;
    for warning in validate_config(&config) {
        tracing::warn!(code = warning.code, "{}", warning.message);
    }

    let engine = Engine::from_config(config);
    let summary = ingest_sources(&engine, &workspace, &cli)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let mut out = std::io::stdout().lock();
    runtime.block_on(run_command(
        &engine,
        &cli.repo,
        &cli.command,
        &summary,
        &mut out,
    ))
}
