use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use relay_config::RetrievalConfig;
use relay_core::{CommitRecord, tokenize};
use relay_infer::ExpansionModel;

use crate::{DenseSource, LexicalSource, RankedHit, RetrievalError, Signal, SparseSource};

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

#[derive(Debug, Clone, Copy)]
enum Field {
    Message,
    Author,
    Paths,
}

const FIELDS: [Field; 3] = [Field::Message, Field::Author, Field::Paths];

#[derive(Debug, Clone, Default)]
struct FieldTerms {
    frequencies: HashMap<String, u32>,
    length: usize,
}

impl FieldTerms {
    fn from_tokens(tokens: Vec<String>) -> Self {
        let length = tokens.len();
        let mut frequencies = HashMap::new();
        for token in tokens {
            *frequencies.entry(token).or_insert(0) += 1;
        }
        Self {
            frequencies,
            length,
        }
    }
}

/// A commit as the retrieval signals see it.
#[derive(Debug, Clone)]
pub struct IndexedCommit {
    pub hash: String,
    pub author: String,
    pub timestamp: i64,
    pub message: String,
    pub files: Vec<String>,
    embedding: Option<Vec<f32>>,
    fields: [FieldTerms; 3],
    expanded_terms: HashMap<String, f32>,
}

impl IndexedCommit {
    fn field(&self, field: Field) -> &FieldTerms {
        &self.fields[field as usize]
    }
}

/// In-memory commit index serving the lexical (BM25F over message, author
/// and paths), dense (cosine) and sparse (expanded term overlap) signals.
pub struct CommitIndex {
    commits: Vec<IndexedCommit>,
    positions: HashMap<String, usize>,
    document_frequency: HashMap<String, usize>,
    total_field_lengths: [u64; 3],
    boosts: [f64; 3],
    embedded_commits: usize,
    expansion: Option<Arc<dyn ExpansionModel>>,
}

impl Default for CommitIndex {
    fn default() -> Self {
        Self::new(&RetrievalConfig::default())
    }
}

impl CommitIndex {
    pub fn new(config: &RetrievalConfig) -> Self {
        Self {
            commits: Vec::new(),
            positions: HashMap::new(),
            document_frequency: HashMap::new(),
            total_field_lengths: [0; 3],
            boosts: [
                config.message_boost.max(0.0),
                config.author_boost.max(0.0),
                config.path_boost.max(0.0),
            ],
            embedded_commits: 0,
            expansion: None,
        }
    }

    /// Attaches the expansion model used by the sparse signal. Must be set
    /// before commits are added; earlier commits carry no expanded terms.
    pub fn with_expansion(mut self, model: Arc<dyn ExpansionModel>) -> Self {
        self.expansion = Some(model);
        self
    }

    pub fn has_expansion(&self) -> bool {
        self.expansion.is_some()
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.positions.contains_key(hash)
    }

    pub fn get(&self, hash: &str) -> Option<&IndexedCommit> {
        self.positions
            .get(hash)
            .and_then(|position| self.commits.get(*position))
    }

    pub fn embedded_commits(&self) -> usize {
        self.embedded_commits
    }

    /// Adds `commit`; returns false when its hash is already indexed.
    pub fn insert(&mut self, commit: &CommitRecord) -> bool {
        if self.positions.contains_key(&commit.hash) {
            return false;
        }

        let files = commit.unique_paths();
        let fields = [
            FieldTerms::from_tokens(tokenize(&commit.message)),
            FieldTerms::from_tokens(tokenize(&commit.author)),
            FieldTerms::from_tokens(files.iter().flat_map(|path| tokenize(path)).collect()),
        ];

        let mut distinct_terms = BTreeSet::new();
        for (slot, terms) in fields.iter().enumerate() {
            self.total_field_lengths[slot] += terms.length as u64;
            distinct_terms.extend(terms.frequencies.keys().cloned());
        }
        for term in distinct_terms {
            *self.document_frequency.entry(term).or_insert(0) += 1;
        }

        let expanded_terms = self.expand_document(commit, &files);
        if commit.embedding.is_some() {
            self.embedded_commits += 1;
        }

        self.positions.insert(commit.hash.clone(), self.commits.len());
        self.commits.push(IndexedCommit {
            hash: commit.hash.clone(),
            author: commit.author_or_unknown().to_owned(),
            timestamp: commit.timestamp,
            message: commit.subject().to_owned(),
            files,
            embedding: commit.embedding.clone(),
            fields,
            expanded_terms,
        });
        true
    }

    fn expand_document(&self, commit: &CommitRecord, files: &[String]) -> HashMap<String, f32> {
        let Some(model) = &self.expansion else {
            return HashMap::new();
        };

        let text = format!("{} {}", commit.message, files.join(" "));
        match model.expand(&text) {
            Ok(terms) => terms
                .into_iter()
                .map(|term| (term.term, term.weight))
                .collect(),
            Err(err) => {
                tracing::warn!(
                    commit = %commit.hash,
                    error = %err,
                    "term expansion failed; commit will not match sparse queries"
                );
                HashMap::new()
            }
        }
    }

    fn visible(&self, since: Option<i64>) -> impl Iterator<Item = &IndexedCommit> {
        self.commits
            .iter()
            .filter(move |commit| since.is_none_or(|since| commit.timestamp >= since))
    }

    fn bm25f(&self, commit: &IndexedCommit, query_terms: &[String]) -> f64 {
        let total_docs = self.commits.len() as f64;
        let mut score = 0.0;

        for term in query_terms {
            let df = self.document_frequency.get(term).copied().unwrap_or(0);
            if df == 0 {
                continue;
            }

            let mut weighted_tf = 0.0;
            for field in FIELDS {
                let terms = commit.field(field);
                let Some(tf) = terms.frequencies.get(term) else {
                    continue;
                };
                let average = self.total_field_lengths[field as usize] as f64 / total_docs;
                let norm = if average > 0.0 {
                    1.0 - BM25_B + BM25_B * terms.length as f64 / average
                } else {
                    1.0
                };
                weighted_tf += self.boosts[field as usize] * f64::from(*tf) / norm;
            }
            if weighted_tf <= 0.0 {
                continue;
            }

            let df = df as f64;
            let idf = (1.0 + (total_docs - df + 0.5) / (df + 0.5)).ln();
            score += idf * weighted_tf / (BM25_K1 + weighted_tf);
        }

        score
    }
}

impl LexicalSource for CommitIndex {
    fn rank_lexical(
        &self,
        query: &str,
        since: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RankedHit>, RetrievalError> {
        let mut query_terms = tokenize(query);
        query_terms.sort();
        query_terms.dedup();
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let hits = self
            .visible(since)
            .filter_map(|commit| {
                let score = self.bm25f(commit, &query_terms);
                (score > 0.0).then(|| RankedHit {
                    id: commit.hash.clone(),
                    score,
                })
            })
            .collect();
        Ok(top_hits(hits, limit))
    }
}

impl DenseSource for CommitIndex {
    fn rank_dense(
        &self,
        query_vector: &[f32],
        since: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RankedHit>, RetrievalError> {
        if self.embedded_commits == 0 {
            return Err(RetrievalError::SourceUnavailable {
                signal: Signal::Dense,
                reason: "no commit embeddings are indexed".to_owned(),
            });
        }
        let comparable = self.visible(since).any(|commit| {
            commit
                .embedding
                .as_ref()
                .is_some_and(|embedding| embedding.len() == query_vector.len())
        });
        if !comparable {
            return Err(RetrievalError::SourceUnavailable {
                signal: Signal::Dense,
                reason: format!(
                    "query vector dimension {} matches no indexed embedding",
                    query_vector.len()
                ),
            });
        }

        let hits = self
            .visible(since)
            .filter_map(|commit| {
                let embedding = commit.embedding.as_deref()?;
                let score = cosine_similarity(query_vector, embedding)?;
                Some(RankedHit {
                    id: commit.hash.clone(),
                    score,
                })
            })
            .collect();
        Ok(top_hits(hits, limit))
    }
}

impl SparseSource for CommitIndex {
    fn rank_sparse(
        &self,
        query: &str,
        since: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RankedHit>, RetrievalError> {
        let Some(model) = &self.expansion else {
            return Err(RetrievalError::SourceUnavailable {
                signal: Signal::Sparse,
                reason: "no expansion model attached".to_owned(),
            });
        };

        let query_terms = model
            .expand(query)
            .map_err(|err| RetrievalError::SourceUnavailable {
                signal: Signal::Sparse,
                reason: err.to_string(),
            })?;

        let hits = self
            .visible(since)
            .filter_map(|commit| {
                let score = query_terms
                    .iter()
                    .filter_map(|term| {
                        commit
                            .expanded_terms
                            .get(&term.term)
                            .map(|weight| f64::from(term.weight) * f64::from(*weight))
                    })
                    .sum::<f64>();
                (score > 0.0).then(|| RankedHit {
                    id: commit.hash.clone(),
                    score,
                })
            })
            .collect();
        Ok(top_hits(hits, limit))
    }
}

fn top_hits(mut hits: Vec<RankedHit>, limit: usize) -> Vec<RankedHit> {
    hits.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| left.id.cmp(&right.id))
    });
    hits.truncate(limit);
    hits
}

/// None when the dimensions differ or either vector has zero length.
fn cosine_similarity(left: &[f32], right: &[f32]) -> Option<f64> {
    if left.len() != right.len() || left.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut left_norm = 0.0f64;
    let mut right_norm = 0.0f64;
    for (l, r) in left.iter().zip(right) {
        let (l, r) = (f64::from(*l), f64::from(*r));
        dot += l * r;
        left_norm += l * l;
        right_norm += r * r;
    }
    if left_norm <= f64::EPSILON || right_norm <= f64::EPSILON {
        return None;
    }

    Some(dot / (left_norm.sqrt() * right_norm.sqrt()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use relay_core::CommitRecord;
    use relay_infer::LexiconExpansionModel;

    use super::*;

    fn commit(hash: &str, author: &str, timestamp: i64, message: &str, files: &[&str]) -> CommitRecord {
        CommitRecord::new(hash, author, timestamp, files.iter().copied()).with_message(message)
    }

    fn sample_index() -> CommitIndex {
        let mut index = CommitIndex::default();
        index.insert(&commit(
            "c1",
            "alice",
            100,
            "Fix authentication bug in login",
            &["src/auth/login.ts"],
        ));
        index.insert(&commit(
            "c2",
            "bob",
            200,
            "Add dark mode toggle",
            &["src/settings/theme.ts"],
        ));
        index.insert(&commit(
            "c3",
            "carol",
            300,
            "Refactor session storage",
            &["src/auth/session.ts"],
        ));
        index
    }

    #[test]
    fn duplicate_hashes_are_rejected() {
        let mut index = sample_index();
        assert!(!index.insert(&commit("c1", "mallory", 1, "again", &["x"])));
        assert_eq!(index.len(), 3);
        assert_eq!(index.get("c1").map(|c| c.author.as_str()), Some("alice"));
    }

    #[test]
    fn lexical_ranking_weights_message_over_paths() {
        let index = sample_index();

        let hits = index.rank_lexical("auth", None, 10).expect("lexical");
        // "auth" only appears in paths for c1 and c3.
        assert_eq!(
            hits.iter().map(|hit| hit.id.as_str()).collect::<Vec<_>>(),
            vec!["c1", "c3"]
        );

        let hits = index
            .rank_lexical("authentication bug", None, 10)
            .expect("lexical");
        assert_eq!(hits[0].id, "c1");
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn lexical_ranking_matches_authors() {
        let index = sample_index();
        let hits = index.rank_lexical("Bob", None, 10).expect("lexical");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "c2");
    }

    #[test]
    fn since_filter_drops_older_commits() {
        let index = sample_index();
        let hits = index.rank_lexical("auth", Some(200), 10).expect("lexical");
        assert_eq!(
            hits.iter().map(|hit| hit.id.as_str()).collect::<Vec<_>>(),
            vec!["c3"]
        );
    }

    #[test]
    fn blank_query_matches_nothing() {
        assert!(sample_index().rank_lexical("  ", None, 10).expect("lexical").is_empty());
    }

    #[test]
    fn dense_ranking_uses_cosine_similarity() {
        let mut index = CommitIndex::default();
        index.insert(&commit("near", "a", 1, "x", &["a"]).with_embedding(vec![1.0, 0.1]));
        index.insert(&commit("far", "a", 2, "y", &["b"]).with_embedding(vec![0.0, 1.0]));
        index.insert(&commit("short", "a", 3, "z", &["c"]).with_embedding(vec![1.0]));
        index.insert(&commit("none", "a", 4, "w", &["d"]));

        let hits = index.rank_dense(&[1.0, 0.0], None, 10).expect("dense");
        assert_eq!(
            hits.iter().map(|hit| hit.id.as_str()).collect::<Vec<_>>(),
            vec!["near", "far"]
        );
    }

    #[test]
    fn dense_ranking_without_embeddings_is_unavailable() {
        let err = sample_index()
            .rank_dense(&[1.0, 0.0], None, 10)
            .expect_err("no embeddings");
        assert!(matches!(
            err,
            RetrievalError::SourceUnavailable {
                signal: Signal::Dense,
                ..
            }
        ));
    }

    #[test]
    fn sparse_ranking_matches_expanded_terms() {
        let mut synonyms = BTreeMap::new();
        synonyms.insert("signin".to_owned(), vec!["login".to_owned()]);
        let model = Arc::new(LexiconExpansionModel::new(synonyms, 0.5));

        let mut index = CommitIndex::default().with_expansion(model);
        index.insert(&commit("c1", "alice", 1, "Fix login redirect", &["src/a.ts"]));
        index.insert(&commit("c2", "bob", 2, "Update docs", &["README.md"]));

        let hits = index.rank_sparse("signin broken", None, 10).expect("sparse");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "c1");
        assert_eq!(hits[0].score, 0.5);

        assert!(sample_index().rank_sparse("signin", None, 10).is_err());
    }
}
