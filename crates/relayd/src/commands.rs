use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use relay_analysis::{Engine, IngestSummary, highest_risk};
use relay_core::{CommitRecord, now_unix_seconds};
use relay_graph::ExploreRequest;
use serde_json::{Value, json};

use crate::cli::{
    Cli, Commands, ConflictsArgs, ExploreArgs, ImpactArgs, NeighborsArgs, OwnersArgs, SearchArgs,
};
use crate::source::{load_commit_file, load_git_commits, load_proposals};

/// Feeds every configured commit source into `engine` under `repo`. Git
/// history is ingested before the commit file.
pub fn ingest_sources(engine: &Engine, workspace: &Path, cli: &Cli) -> Result<IngestSummary> {
    let mut commits = Vec::<CommitRecord>::new();
    let mut parse_skipped = Vec::new();

    if cli.git {
        commits.extend(load_git_commits(workspace, cli.git_limit)?);
    }
    if let Some(path) = &cli.commits {
        let loaded = load_commit_file(path)?;
        commits.extend(loaded.commits);
        parse_skipped = loaded.skipped;
    }

    let mut summary = engine
        .ingest_stream(&cli.repo, commits)
        .context("commit ingestion failed")?;
    parse_skipped.append(&mut summary.skipped);
    summary.skipped = parse_skipped;
    Ok(summary)
}

pub async fn run_command(
    engine: &Engine,
    repo: &str,
    command: &Commands,
    summary: &IngestSummary,
    out: &mut impl Write,
) -> Result<()> {
    let response = match command {
        Commands::Ingest => json!({
            "summary": summary,
            "stats": engine.repo_stats(repo).context("failed to read repository stats")?,
        }),
        Commands::Neighbors(args) => neighbors(engine, repo, args)?,
        Commands::Owners(args) => owners(engine, repo, args)?,
        Commands::Search(args) => search(engine, repo, args).await?,
        Commands::Explore(args) => explore(engine, repo, args)?,
        Commands::Impact(args) => impact(engine, repo, args).await?,
        Commands::Conflicts(args) => conflicts(engine, args)?,
    };
    write_json(out, &response)
}

fn neighbors(engine: &Engine, repo: &str, args: &NeighborsArgs) -> Result<Value> {
    let neighbors = engine
        .neighbors(repo, &args.path, args.min_score, args.limit)
        .context("neighbor query failed")?;
    Ok(json!({
        "path": args.path,
        "result_count": neighbors.len(),
        "neighbors": neighbors,
    }))
}

fn owners(engine: &Engine, repo: &str, args: &OwnersArgs) -> Result<Value> {
    let now = args.now.unwrap_or_else(now_unix_seconds);
    let owners = engine
        .owners(repo, &args.path, args.top_n)
        .context("owner query failed")?;
    let recent_churn = engine
        .recent_churn(repo, &args.path, now)
        .context("churn query failed")?;
    let activity = engine
        .activity(repo, &args.path)
        .context("activity query failed")?;
    Ok(json!({
        "path": args.path,
        "owners": owners,
        "recent_churn": recent_churn,
        "churn_window_days": engine.config().ownership.churn_window_days,
        "activity": activity,
    }))
}

async fn search(engine: &Engine, repo: &str, args: &SearchArgs) -> Result<Value> {
    let response = engine
        .search_text(repo, &args.query, args.size, args.since)
        .await
        .context("search failed")?;
    serde_json::to_value(response).context("failed to serialize search output")
}

fn explore(engine: &Engine, repo: &str, args: &ExploreArgs) -> Result<Value> {
    let config = &engine.config().explore;
    let timeout = args
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.timeout());

    let mut request = ExploreRequest::from_config(args.seeds.iter().cloned(), config)
        .with_deadline(Some(Instant::now() + timeout));
    if let Some(radius) = args.radius {
        request = request.with_radius(radius);
    }
    if let Some(vertex_cap) = args.vertex_cap {
        request = request.with_vertex_cap(vertex_cap);
    }
    if let Some(min_co_change) = args.min_co_change {
        request = request.with_min_co_change_count(min_co_change);
    }
    if let Some(max_connections) = args.max_connections {
        request = request.with_max_connections_per_vertex(max_connections);
    }

    let result = engine.explore(repo, &request).context("graph exploration failed")?;
    serde_json::to_value(result).context("failed to serialize exploration output")
}

async fn impact(engine: &Engine, repo: &str, args: &ImpactArgs) -> Result<Value> {
    let now = args.now.unwrap_or_else(now_unix_seconds);
    match &args.query {
        Some(query) => {
            let impact = engine
                .impact_for_query(repo, query, now)
                .await
                .context("query impact failed")?;
            serde_json::to_value(impact).context("failed to serialize impact output")
        }
        None => {
            let impact = engine
                .impact_set(repo, &args.files, now)
                .context("impact query failed")?;
            serde_json::to_value(impact).context("failed to serialize impact output")
        }
    }
}

fn conflicts(engine: &Engine, args: &ConflictsArgs) -> Result<Value> {
    let proposals = load_proposals(&args.proposals)?;
    let reports = engine.conflicts(&args.candidate, &args.files, &proposals, args.all);
    let notes = reports
        .iter()
        .filter(|report| !report.overlapping_files.is_empty())
        .map(|report| report.describe())
        .collect::<Vec<_>>();

    Ok(json!({
        "candidate_id": args.candidate,
        "highest_risk": highest_risk(&reports),
        "result_count": reports.len(),
        "reports": reports,
        "notes": notes,
    }))
}

fn write_json(out: &mut impl Write, value: &Value) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value).context("failed to serialize JSON output")?;
    writeln!(out).context("failed to write trailing newline")?;
    Ok(())
}
