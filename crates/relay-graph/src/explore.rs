use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use petgraph::unionfind::UnionFind;
use relay_config::ExploreConfig;
use relay_core::normalize_file_set;
use serde::{Deserialize, Serialize};

use crate::cochange::CoChangeGraph;

#[derive(Debug, Clone)]
pub struct ExploreRequest {
    pub seeds: Vec<String>,
    pub radius: usize,
    pub vertex_cap: usize,
    pub min_co_change_count: u64,
    pub max_connections_per_vertex: usize,
    pub deadline: Option<Instant>,
}

impl ExploreRequest {
    pub fn new<I, S>(seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_config(seeds, &ExploreConfig::default())
    }

    /// Request with the configured radius, cap and minimum count. The
    /// configured timeout becomes a deadline measured from now.
    pub fn from_config<I, S>(seeds: I, config: &ExploreConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seeds: seeds.into_iter().map(Into::into).collect(),
            radius: config.radius,
            vertex_cap: config.vertex_cap,
            min_co_change_count: config.min_co_change_count.max(1),
            max_connections_per_vertex: config.max_connections_per_vertex,
            deadline: (config.timeout_ms > 0)
                .then(|| Instant::now() + Duration::from_millis(config.timeout_ms)),
        }
    }

    pub fn with_radius(mut self, radius: usize) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_vertex_cap(mut self, vertex_cap: usize) -> Self {
        self.vertex_cap = vertex_cap;
        self
    }

    pub fn with_min_co_change_count(mut self, min_co_change_count: u64) -> Self {
        self.min_co_change_count = min_co_change_count.max(1);
        self
    }

    pub fn with_max_connections_per_vertex(mut self, max_connections: usize) -> Self {
        self.max_connections_per_vertex = max_connections;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExploreVertex {
    pub path: String,
    /// Best significance over the edges that reached this vertex; 0.0 for seeds.
    pub weight: f64,
    pub hop: usize,
    pub seed: bool,
    pub cluster: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExploreEdge {
    pub source: String,
    pub target: String,
    pub co_occurrence_count: u64,
    pub jaccard: f64,
    pub significance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExploreResult {
    pub vertices: Vec<ExploreVertex>,
    pub edges: Vec<ExploreEdge>,
    pub truncated: bool,
    pub timed_out: bool,
}

struct Discovered {
    weight: f64,
    hop: usize,
    seed: bool,
}

/// Breadth-first expansion from `request.seeds` along co-change edges.
///
/// Every frontier vertex offers at most `max_connections_per_vertex` of its
/// most significant neighbors to the next hop. Each hop then ranks the newly reachable files by significance (observed over
/// expected co-occurrence), then co-occurrence count, then path. When the
/// vertex cap is reached mid-hop only the best-ranked files of that hop are
/// kept. Seeds always come first and count against the cap.
pub fn explore(graph: &CoChangeGraph, request: &ExploreRequest) -> ExploreResult {
    let seeds = normalize_file_set(request.seeds.iter().map(String::as_str));
    if seeds.is_empty() || request.vertex_cap == 0 {
        return ExploreResult {
            truncated: !seeds.is_empty(),
            ..ExploreResult::default()
        };
    }

    let mut result = ExploreResult::default();
    let mut discovered = BTreeMap::<String, Discovered>::new();
    let mut order = Vec::<String>::new();

    for seed in seeds {
        if order.len() >= request.vertex_cap {
            result.truncated = true;
            break;
        }
        discovered.insert(
            seed.clone(),
            Discovered {
                weight: 0.0,
                hop: 0,
                seed: true,
            },
        );
        order.push(seed);
    }

    let min_count = request.min_co_change_count.max(1);
    let mut frontier = order.clone();

    for hop in 1..=request.radius {
        if frontier.is_empty() || result.truncated {
            break;
        }
        if deadline_passed(request.deadline) {
            result.timed_out = true;
            result.truncated = true;
            break;
        }

        let mut candidates = BTreeMap::<String, (f64, u64)>::new();
        for source in &frontier {
            let Some(node) = graph.node(source) else {
                continue;
            };
            // Per-vertex fan-out: only the most significant edges of each
            // frontier vertex compete for the hop.
            let mut edges = node
                .co_changes
                .iter()
                .filter(|(target, co)| **co >= min_count && !discovered.contains_key(*target))
                .map(|(target, co)| {
                    let significance = graph.significance(source, target).unwrap_or(0.0);
                    (target, significance, *co)
                })
                .collect::<Vec<_>>();
            edges.sort_by(|left, right| {
                right
                    .1
                    .total_cmp(&left.1)
                    .then_with(|| right.2.cmp(&left.2))
                    .then_with(|| left.0.cmp(right.0))
            });
            edges.truncate(request.max_connections_per_vertex);

            for (target, significance, co) in edges {
                let entry = candidates.entry(target.clone()).or_insert((0.0, 0));
                if significance > entry.0 || (significance == entry.0 && co > entry.1) {
                    *entry = (significance, co);
                }
            }
        }

        let mut ranked = candidates.into_iter().collect::<Vec<_>>();
        ranked.sort_by(|(left_path, left), (right_path, right)| {
            right
                .0
                .total_cmp(&left.0)
                .then_with(|| right.1.cmp(&left.1))
                .then_with(|| left_path.cmp(right_path))
        });

        let remaining = request.vertex_cap.saturating_sub(order.len());
        if ranked.len() > remaining {
            ranked.truncate(remaining);
            result.truncated = true;
        }

        frontier = Vec::with_capacity(ranked.len());
        for (path, (weight, _)) in ranked {
            discovered.insert(
                path.clone(),
                Discovered {
                    weight,
                    hop,
                    seed: false,
                },
            );
            order.push(path.clone());
            frontier.push(path);
        }
    }

    if result.truncated {
        tracing::debug!(
            vertices = order.len(),
            vertex_cap = request.vertex_cap,
            timed_out = result.timed_out,
            "graph exploration truncated"
        );
    }

    result.edges = collect_edges(graph, &order, min_count);
    let clusters = cluster_labels(&order, &result.edges);
    result.vertices = order
        .into_iter()
        .zip(clusters)
        .filter_map(|(path, cluster)| {
            let info = discovered.remove(&path)?;
            Some(ExploreVertex {
                path,
                weight: info.weight,
                hop: info.hop,
                seed: info.seed,
                cluster,
            })
        })
        .collect();

    result
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

fn collect_edges(graph: &CoChangeGraph, vertices: &[String], min_count: u64) -> Vec<ExploreEdge> {
    let included = vertices.iter().map(String::as_str).collect::<BTreeSet<_>>();
    let mut edges = Vec::new();

    for source in &included {
        let Some(node) = graph.node(source) else {
            continue;
        };
        for (target, co) in &node.co_changes {
            if *co < min_count || target.as_str() <= *source || !included.contains(target.as_str())
            {
                continue;
            }
            let Some(score) = graph.score(source, target) else {
                continue;
            };
            edges.push(ExploreEdge {
                source: (*source).to_owned(),
                target: target.clone(),
                co_occurrence_count: score.co_occurrence_count,
                jaccard: score.jaccard,
                significance: graph.significance(source, target).unwrap_or(0.0),
            });
        }
    }

    edges
}

/// Connected-component labels for `vertices`, numbered in vertex order.
fn cluster_labels(vertices: &[String], edges: &[ExploreEdge]) -> Vec<usize> {
    let index = vertices
        .iter()
        .enumerate()
        .map(|(position, path)| (path.as_str(), position))
        .collect::<BTreeMap<_, _>>();

    let mut components = UnionFind::<usize>::new(vertices.len());
    for edge in edges {
        if let (Some(left), Some(right)) = (
            index.get(edge.source.as_str()),
            index.get(edge.target.as_str()),
        ) {
            components.union(*left, *right);
        }
    }

    let mut labels = BTreeMap::<usize, usize>::new();
    (0..vertices.len())
        .map(|position| {
            let root = components.find(position);
            let next = labels.len();
            *labels.entry(root).or_insert(next)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use relay_core::CommitRecord;

    use super::*;

    fn commit(hash: &str, files: &[&str]) -> CommitRecord {
        CommitRecord::new(hash, "alice", 1, files.iter().copied())
    }

    fn sample_graph() -> CoChangeGraph {
        let mut graph = CoChangeGraph::default();
        graph.ingest(&commit("c1", &["src/auth.rs", "src/session.rs"]));
        graph.ingest(&commit("c2", &["src/auth.rs", "src/session.rs"]));
        graph.ingest(&commit("c3", &["src/auth.rs", "src/hot.rs"]));
        graph.ingest(&commit("c4", &["src/hot.rs", "src/ui.rs"]));
        graph.ingest(&commit("c5", &["src/hot.rs", "src/db.rs"]));
        graph.ingest(&commit("c6", &["src/session.rs", "src/token.rs"]));
        graph.ingest(&commit("c7", &["docs/a.md", "docs/b.md"]));
        graph
    }

    #[test]
    fn empty_seed_set_returns_empty_graph() {
        let result = explore(&sample_graph(), &ExploreRequest::new(Vec::<String>::new()));
        assert!(result.vertices.is_empty());
        assert!(result.edges.is_empty());
        assert!(!result.truncated);
    }

    #[test]
    fn one_hop_ranks_by_significance() {
        let graph = sample_graph();
        let result = explore(&graph, &ExploreRequest::new(["src/auth.rs"]));

        let paths = result
            .vertices
            .iter()
            .map(|vertex| vertex.path.as_str())
            .collect::<Vec<_>>();
        assert_eq!(paths, vec!["src/auth.rs", "src/session.rs", "src/hot.rs"]);
        assert!(result.vertices[0].seed);
        assert_eq!(result.vertices[1].hop, 1);
        assert!(result.vertices[1].weight > result.vertices[2].weight);
        assert_eq!(result.edges.len(), 2);
        assert!(!result.truncated);
    }

    #[test]
    fn radius_two_reaches_second_ring() {
        let graph = sample_graph();
        let result = explore(&graph, &ExploreRequest::new(["src/auth.rs"]).with_radius(2));

        let second_ring = result
            .vertices
            .iter()
            .filter(|vertex| vertex.hop == 2)
            .map(|vertex| vertex.path.as_str())
            .collect::<BTreeSet<_>>();
        assert_eq!(
            second_ring,
            BTreeSet::from(["src/db.rs", "src/token.rs", "src/ui.rs"])
        );
        assert!(result.vertices.iter().all(|vertex| vertex.cluster == 0));
    }

    #[test]
    fn vertex_cap_keeps_most_significant_vertices() {
        let graph = sample_graph();
        let result = explore(
            &graph,
            &ExploreRequest::new(["src/auth.rs"])
                .with_radius(2)
                .with_vertex_cap(2),
        );

        assert!(result.truncated);
        assert_eq!(result.vertices.len(), 2);
        assert_eq!(result.vertices[1].path, "src/session.rs");

        let again = explore(
            &graph,
            &ExploreRequest::new(["src/auth.rs"])
                .with_radius(2)
                .with_vertex_cap(2),
        );
        assert_eq!(again, result);
    }

    #[test]
    fn expired_deadline_returns_seeds_only() {
        let graph = sample_graph();
        let result = explore(
            &graph,
            &ExploreRequest::new(["src/auth.rs"]).with_deadline(Some(Instant::now())),
        );

        assert!(result.timed_out);
        assert!(result.truncated);
        assert_eq!(result.vertices.len(), 1);
        assert!(result.vertices[0].seed);
    }

    #[test]
    fn disconnected_seeds_get_separate_clusters() {
        let graph = sample_graph();
        let result = explore(&graph, &ExploreRequest::new(["src/auth.rs", "docs/a.md"]));

        let cluster_of = |path: &str| {
            result
                .vertices
                .iter()
                .find(|vertex| vertex.path == path)
                .map(|vertex| vertex.cluster)
        };
        assert_ne!(cluster_of("docs/a.md"), cluster_of("src/auth.rs"));
        assert_eq!(cluster_of("docs/a.md"), cluster_of("docs/b.md"));
        assert_eq!(cluster_of("src/auth.rs"), cluster_of("src/session.rs"));
    }

    #[test]
    fn min_co_change_count_drops_weak_neighbors_and_edges() {
        let graph = sample_graph();
        let result = explore(
            &graph,
            &ExploreRequest::new(["src/auth.rs"]).with_min_co_change_count(2),
        );

        let paths = result
            .vertices
            .iter()
            .map(|vertex| vertex.path.as_str())
            .collect::<Vec<_>>();
        assert_eq!(paths, vec!["src/auth.rs", "src/session.rs"]);
        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.edges[0].source, "src/auth.rs");
        assert_eq!(result.edges[0].target, "src/session.rs");
        assert_eq!(result.edges[0].co_occurrence_count, 2);
        assert!(
            result
                .edges
                .iter()
                .all(|edge| edge.source != "src/hot.rs" && edge.target != "src/hot.rs")
        );
    }

    fn hub_graph() -> CoChangeGraph {
        let mut graph = CoChangeGraph::default();
        for index in 1..=5 {
            let partner = format!("h{index}.rs");
            graph.ingest(&commit(&format!("hub{index}"), &["hub.rs", partner.as_str()]));
        }
        graph.ingest(&commit("pair", &["other.rs", "o1.rs"]));
        for index in 0..9 {
            graph.ingest(&commit(&format!("other{index}"), &["other.rs"]));
            graph.ingest(&commit(&format!("o1-{index}"), &["o1.rs"]));
        }
        graph
    }

    #[test]
    fn per_vertex_fan_out_keeps_room_for_every_seed() {
        let graph = hub_graph();
        let request = ExploreRequest::new(["hub.rs", "other.rs"]).with_vertex_cap(5);

        let unlimited = explore(&graph, &request.clone().with_max_connections_per_vertex(20));
        assert!(unlimited.truncated);
        assert!(!unlimited.vertices.iter().any(|vertex| vertex.path == "o1.rs"));

        let limited = explore(&graph, &request.with_max_connections_per_vertex(2));
        let paths = limited
            .vertices
            .iter()
            .map(|vertex| vertex.path.as_str())
            .collect::<Vec<_>>();
        assert_eq!(paths, vec!["hub.rs", "other.rs", "h1.rs", "h2.rs", "o1.rs"]);
        assert!(!limited.truncated);
    }

    #[test]
    fn result_serializes_for_presentation() {
        let result = explore(&sample_graph(), &ExploreRequest::new(["src/auth.rs"]));
        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(value["vertices"][0]["path"], "src/auth.rs");
        assert_eq!(value["truncated"], false);
    }
}
