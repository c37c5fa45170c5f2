use std::error::Error;
use std::fs;
use std::path::Path;
use std::process::Command;

use clap::Parser;
use relay_analysis::Engine;
use relay_config::{config_path, ensure_workspace_config};
use relayd::cli::Cli;
use relayd::commands::{ingest_sources, run_command};
use serde_json::Value;
use tempfile::tempdir;

#[tokio::test]
async fn git_history_feeds_neighbor_queries() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let workspace = temp.path();
    run_git(workspace, &["init"])?;
    run_git(workspace, &["config", "user.email", "tester@example.com"])?;
    run_git(workspace, &["config", "user.name", "Tester"])?;

    write_file(workspace, "src/api.rs", "fn api() {}\n")?;
    write_file(workspace, "src/api_test.rs", "fn api_test() {}\n")?;
    commit_all(workspace, "add api")?;
    write_file(workspace, "src/api.rs", "fn api() { todo() }\n")?;
    write_file(workspace, "src/api_test.rs", "fn api_test() { check() }\n")?;
    commit_all(workspace, "change api")?;
    write_file(workspace, "README.md", "docs\n")?;
    commit_all(workspace, "docs")?;

    let config = ensure_workspace_config(workspace)?;
    assert!(config_path(workspace).exists());

    let workspace_arg = workspace.display().to_string();
    let cli = Cli::try_parse_from([
        "relayd",
        "--workspace",
        workspace_arg.as_str(),
        "--git",
        "neighbors",
        "src/api.rs",
    ])?;

    let engine = Engine::new(config);
    let summary = ingest_sources(&engine, workspace, &cli)?;
    assert_eq!(summary.ingested, 3);
    assert!(summary.skipped.is_empty());

    let mut out = Vec::new();
    run_command(&engine, &cli.repo, &cli.command, &summary, &mut out).await?;
    let output: Value = serde_json::from_slice(&out)?;

    assert_eq!(output["result_count"], 1);
    assert_eq!(output["neighbors"][0]["path"], "src/api_test.rs");
    assert_eq!(output["neighbors"][0]["jaccard"], 1.0);
    Ok(())
}

#[test]
fn git_flag_outside_a_repository_fails() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let workspace_arg = temp.path().display().to_string();
    let cli = Cli::try_parse_from([
        "relayd",
        "--workspace",
        workspace_arg.as_str(),
        "--git",
        "ingest",
    ])?;

    let engine = Engine::new(Default::default());
    assert!(ingest_sources(&engine, temp.path(), &cli).is_err());
    Ok(())
}

fn write_file(workspace: &Path, relative: &str, content: &str) -> Result<(), Box<dyn Error>> {
    let path = workspace.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

fn commit_all(workspace: &Path, message: &str) -> Result<(), Box<dyn Error>> {
    run_git(workspace, &["add", "."])?;
    run_git(workspace, &["commit", "-m", message])?;
    Ok(())
}

fn run_git(workspace: &Path, args: &[&str]) -> Result<String, Box<dyn Error>> {
    let output = Command::new("git")
        .arg("-C")
        .arg(workspace)
        .args(args)
        .output()?;
    if !output.status.success() {
        return Err(format!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        )
        .into());
    }
    Ok(String::from_utf8(output.stdout)?)
}
