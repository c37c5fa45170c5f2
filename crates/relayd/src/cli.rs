use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use relay_core::DEFAULT_REPO;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid log format '{other}', expected one of: human, json"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Args)]
pub struct NeighborsArgs {
    #[arg(help = "File path to look up")]
    pub path: String,

    #[arg(long, default_value_t = 0.0, help = "Minimum Jaccard score")]
    pub min_score: f64,

    #[arg(long, help = "Maximum number of neighbors")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct OwnersArgs {
    #[arg(help = "File path to look up")]
    pub path: String,

    #[arg(long, help = "Number of owners to return (defaults to ownership.top_n)")]
    pub top_n: Option<usize>,

    #[arg(long, help = "Reference time for churn, in unix seconds (defaults to now)")]
    pub now: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct SearchArgs {
    #[arg(help = "Query text")]
    pub query: String,

    #[arg(long, default_value_t = 10, help = "Number of results")]
    pub size: usize,

    #[arg(long, help = "Only rank commits at or after this unix timestamp")]
    pub since: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ExploreArgs {
    #[arg(required = true, help = "Seed file paths")]
    pub seeds: Vec<String>,

    #[arg(long, help = "Hop radius (defaults to explore.radius)")]
    pub radius: Option<usize>,

    #[arg(long, help = "Vertex cap including seeds (defaults to explore.vertex_cap)")]
    pub vertex_cap: Option<usize>,

    #[arg(long, help = "Minimum co-change count for an edge to be followed")]
    pub min_co_change: Option<u64>,

    #[arg(
        long,
        help = "Neighbors followed per vertex (defaults to explore.max_connections_per_vertex)"
    )]
    pub max_connections: Option<usize>,

    #[arg(long, help = "Traversal deadline in milliseconds (defaults to explore.timeout_ms)")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ImpactArgs {
    #[arg(
        long,
        conflicts_with = "files",
        required_unless_present = "files",
        help = "Find the change set for a free-text description"
    )]
    pub query: Option<String>,

    #[arg(
        long,
        value_delimiter = ',',
        value_name = "FILE",
        help = "Comma-separated seed files"
    )]
    pub files: Vec<String>,

    #[arg(long, help = "Reference time for churn, in unix seconds (defaults to now)")]
    pub now: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ConflictsArgs {
    #[arg(long, help = "Identifier of the candidate proposal")]
    pub candidate: String,

    #[arg(
        long,
        value_delimiter = ',',
        value_name = "FILE",
        help = "Comma-separated files touched by the candidate"
    )]
    pub files: Vec<String>,

    #[arg(long, help = "JSON file holding the open proposals")]
    pub proposals: PathBuf,

    #[arg(long, help = "Also report proposals without overlap")]
    pub all: bool,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Commands {
    /// Ingest the commit sources and report repository statistics
    Ingest,
    /// List files that historically change together with a file
    Neighbors(NeighborsArgs),
    /// Show the top authors and recent churn of a file
    Owners(OwnersArgs),
    /// Hybrid lexical/dense/sparse search over commits
    Search(SearchArgs),
    /// Expand seed files into a co-change subgraph
    Explore(ExploreArgs),
    /// Build the impact set for seed files or a free-text query
    Impact(ImpactArgs),
    /// Score file overlap between a candidate and open proposals
    Conflicts(ConflictsArgs),
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "Relay change-intelligence engine")]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = ".",
        help = "Workspace root holding .relay/config.toml"
    )]
    pub workspace: PathBuf,

    #[arg(
        long,
        global = true,
        default_value = DEFAULT_REPO,
        help = "Repository name the commits belong to"
    )]
    pub repo: String,

    #[arg(long, global = true, help = "JSON-lines file of commit records")]
    pub commits: Option<PathBuf>,

    #[arg(long, global = true, help = "Read commits from the workspace git repository")]
    pub git: bool,

    #[arg(
        long,
        global = true,
        default_value_t = 1000,
        help = "Maximum commits to read with --git"
    )]
    pub git_limit: usize,

    #[arg(
        long,
        global = true,
        default_value = "human",
        value_parser = parse_log_format,
        help = "Log format: human or json"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "relayd",
            "neighbors",
            "src/a.rs",
            "--repo",
            "web",
            "--commits",
            "history.jsonl",
            "--limit",
            "5",
        ])
        .expect("parse");

        assert_eq!(cli.repo, "web");
        assert_eq!(cli.commits, Some(PathBuf::from("history.jsonl")));
        assert_eq!(
            cli.command,
            Commands::Neighbors(NeighborsArgs {
                path: "src/a.rs".to_owned(),
                min_score: 0.0,
                limit: Some(5),
            })
        );
    }

    #[test]
    fn impact_requires_query_or_files() {
        assert!(Cli::try_parse_from(["relayd", "impact"]).is_err());
        assert!(
            Cli::try_parse_from(["relayd", "impact", "--query", "x", "--files", "a"]).is_err()
        );

        let cli = Cli::try_parse_from(["relayd", "impact", "--files", "a.rs,b.rs"]).expect("parse");
        let Commands::Impact(args) = cli.command else {
            panic!("expected impact command");
        };
        assert_eq!(args.files, vec!["a.rs", "b.rs"]);
    }

    #[test]
    fn log_format_parses_known_values() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!(LogFormat::default().as_str(), "human");
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
