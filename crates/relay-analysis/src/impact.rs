use std::collections::{BTreeMap, BTreeSet};

use relay_core::{normalize_file_set, related_test_files};
use relay_graph::{CoChangeGraph, ExploreResult, OwnerStats, OwnershipTracker};
use relay_retrieval::{RetrievalCandidate, SearchResponse};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedFile {
    pub path: String,
    pub score: f64,
    pub co_occurrence_count: u64,
    /// The seed this file co-changed with most strongly.
    pub via: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedOwners {
    pub path: String,
    pub owners: Vec<OwnerStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChurn {
    pub path: String,
    pub recent_churn: u64,
    pub commit_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_change_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRelationship {
    pub source: String,
    pub tests: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ImpactSet {
    pub seeds: Vec<String>,
    pub related_files: Vec<RelatedFile>,
    pub owners: Vec<SeedOwners>,
    pub recent_churn: Vec<FileChurn>,
    pub test_files: Vec<TestRelationship>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpactOptions {
    pub result_cap: usize,
    pub min_score: f64,
    pub owner_top_n: usize,
    pub now: i64,
    pub churn_window_seconds: i64,
}

/// Files, owners and churn around `seeds`. Related files exclude the
/// seeds themselves and are capped at `options.result_cap`.
pub fn build_impact_set<'a>(
    graph: &CoChangeGraph,
    ownership: &OwnershipTracker,
    seeds: impl IntoIterator<Item = &'a str>,
    options: &ImpactOptions,
) -> ImpactSet {
    let seeds = normalize_file_set(seeds);
    if seeds.is_empty() {
        return ImpactSet::default();
    }

    let mut best = BTreeMap::<String, RelatedFile>::new();
    for seed in &seeds {
        for neighbor in graph.neighbors(seed, options.min_score, None) {
            if seeds.contains(&neighbor.path) {
                continue;
            }
            let candidate = RelatedFile {
                path: neighbor.path.clone(),
                score: neighbor.jaccard,
                co_occurrence_count: neighbor.co_occurrence_count,
                via: seed.clone(),
            };
            let replace = best
                .get(&neighbor.path)
                .is_none_or(|existing| outranks(&candidate, existing));
            if replace {
                best.insert(neighbor.path, candidate);
            }
        }
    }

    let mut related_files = best.into_values().collect::<Vec<_>>();
    related_files.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| right.co_occurrence_count.cmp(&left.co_occurrence_count))
            .then_with(|| left.path.cmp(&right.path))
    });
    let truncated = related_files.len() > options.result_cap;
    related_files.truncate(options.result_cap);

    let owners = seeds
        .iter()
        .map(|seed| SeedOwners {
            path: seed.clone(),
            owners: ownership.owners(seed, options.owner_top_n),
        })
        .collect();

    let recent_churn = seeds
        .iter()
        .chain(related_files.iter().map(|file| &file.path))
        .map(|path| file_churn(graph, ownership, path, options))
        .collect();

    let test_files = seeds
        .iter()
        .filter_map(|seed| {
            let tests = related_test_files(seed, graph.paths());
            (!tests.is_empty()).then(|| TestRelationship {
                source: seed.clone(),
                tests,
            })
        })
        .collect();

    ImpactSet {
        seeds: seeds.into_iter().collect(),
        related_files,
        owners,
        recent_churn,
        test_files,
        truncated,
    }
}

fn outranks(candidate: &RelatedFile, existing: &RelatedFile) -> bool {
    candidate
        .score
        .total_cmp(&existing.score)
        .then_with(|| candidate.co_occurrence_count.cmp(&existing.co_occurrence_count))
        .then_with(|| existing.via.cmp(&candidate.via))
        .is_gt()
}

fn file_churn(
    graph: &CoChangeGraph,
    ownership: &OwnershipTracker,
    path: &str,
    options: &ImpactOptions,
) -> FileChurn {
    let activity = ownership.activity(path);
    FileChurn {
        path: path.to_owned(),
        recent_churn: ownership.recent_churn(path, options.now, options.churn_window_seconds),
        commit_count: activity.as_ref().map_or(0, |activity| activity.commit_count),
        avg_change_size: activity.and_then(|activity| activity.avg_change_size),
        last_modified: graph.node(path).map(|node| node.last_modified),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactedFile {
    pub path: String,
    /// Sum of the fused scores of the matching commits that touched the file.
    pub score: f64,
    pub commit_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorContribution {
    pub author: String,
    pub score: f64,
    pub commit_count: u64,
}

/// Impact analysis driven by a free-text request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryImpact {
    pub query: String,
    pub search: SearchResponse,
    pub impacted_files: Vec<ImpactedFile>,
    pub top_authors: Vec<AuthorContribution>,
    pub impact: ImpactSet,
    pub graph: ExploreResult,
}

/// Rolls the matching commits up into per-file and per-author totals.
pub fn aggregate_candidates(
    candidates: &[RetrievalCandidate],
) -> (Vec<ImpactedFile>, Vec<AuthorContribution>) {
    let mut files = BTreeMap::<&str, (f64, u64)>::new();
    let mut authors = BTreeMap::<&str, (f64, u64)>::new();

    for candidate in candidates {
        let touched = candidate
            .files
            .iter()
            .map(String::as_str)
            .collect::<BTreeSet<_>>();
        for path in touched {
            let entry = files.entry(path).or_insert((0.0, 0));
            entry.0 += candidate.fused_score;
            entry.1 += 1;
        }
        if !candidate.author.is_empty() {
            let entry = authors.entry(candidate.author.as_str()).or_insert((0.0, 0));
            entry.0 += candidate.fused_score;
            entry.1 += 1;
        }
    }

    let mut impacted_files = files
        .into_iter()
        .map(|(path, (score, commit_count))| ImpactedFile {
            path: path.to_owned(),
            score,
            commit_count,
        })
        .collect::<Vec<_>>();
    impacted_files.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| right.commit_count.cmp(&left.commit_count))
            .then_with(|| left.path.cmp(&right.path))
    });

    let mut top_authors = authors
        .into_iter()
        .map(|(author, (score, commit_count))| AuthorContribution {
            author: author.to_owned(),
            score,
            commit_count,
        })
        .collect::<Vec<_>>();
    top_authors.sort_by(|left, right| {
        right
            .commit_count
            .cmp(&left.commit_count)
            .then_with(|| right.score.total_cmp(&left.score))
            .then_with(|| left.author.cmp(&right.author))
    });

    (impacted_files, top_authors)
}
