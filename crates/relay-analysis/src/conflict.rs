use std::collections::BTreeSet;

use relay_config::ConflictConfig;
use relay_core::{ChangeProposal, normalize_file_set};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskBucket {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl RiskBucket {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn from_score(score: u32, config: &ConflictConfig) -> Self {
        if score == 0 {
            return Self::None;
        }
        if score >= config.high_threshold {
            return Self::High;
        }
        if score >= config.medium_threshold {
            return Self::Medium;
        }
        Self::Low
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub candidate_id: String,
    pub other_candidate_id: String,
    #[serde(default)]
    pub other_title: String,
    #[serde(default)]
    pub other_author: String,
    pub overlapping_files: Vec<String>,
    pub conflict_score: u32,
    pub risk_bucket: RiskBucket,
}

impl ConflictReport {
    /// One-line note for reviewers, e.g. "Conflicts with PR #42 (1 file overlap)".
    pub fn describe(&self) -> String {
        let overlap = self.overlapping_files.len();
        if overlap == 0 {
            return format!("No file overlap with PR #{}", self.other_candidate_id);
        }
        let noun = if overlap == 1 { "file" } else { "files" };
        format!(
            "Conflicts with PR #{} ({overlap} {noun} overlap, {} risk)",
            self.other_candidate_id,
            self.risk_bucket.as_str()
        )
    }
}

pub fn highest_risk(reports: &[ConflictReport]) -> RiskBucket {
    reports
        .iter()
        .map(|report| report.risk_bucket)
        .max()
        .unwrap_or_default()
}

/// Pairwise file-overlap scoring between one candidate and open proposals.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictScorer {
    config: ConflictConfig,
}

impl ConflictScorer {
    pub fn new(config: ConflictConfig) -> Self {
        Self { config }
    }

    /// Reports ordered by score descending, then other id. Only overlapping
    /// proposals are reported unless `include_all` is set. A proposal with
    /// the candidate's own id is not compared against itself.
    pub fn score<'a>(
        &self,
        candidate_id: &str,
        candidate_files: impl IntoIterator<Item = &'a str>,
        others: &[ChangeProposal],
        include_all: bool,
    ) -> Vec<ConflictReport> {
        let candidate = normalize_file_set(candidate_files);

        let mut reports = others
            .iter()
            .filter(|other| other.id != candidate_id)
            .map(|other| self.compare(candidate_id, &candidate, other))
            .filter(|report| include_all || report.conflict_score > 0)
            .collect::<Vec<_>>();

        reports.sort_by(|left, right| {
            right
                .conflict_score
                .cmp(&left.conflict_score)
                .then_with(|| left.other_candidate_id.cmp(&right.other_candidate_id))
        });
        reports
    }

    fn compare(
        &self,
        candidate_id: &str,
        candidate: &BTreeSet<String>,
        other: &ChangeProposal,
    ) -> ConflictReport {
        let other_files = other.normalized_files();
        let overlapping_files = candidate
            .intersection(&other_files)
            .cloned()
            .collect::<Vec<_>>();
        let conflict_score = overlap_score(overlapping_files.len(), candidate.len());

        ConflictReport {
            candidate_id: candidate_id.to_owned(),
            other_candidate_id: other.id.clone(),
            other_title: other.title.clone(),
            other_author: other.author.clone(),
            overlapping_files,
            conflict_score,
            risk_bucket: RiskBucket::from_score(conflict_score, &self.config),
        }
    }
}

/// `round(100 * overlap / candidate)` with halves rounded up; 0 for an
/// empty candidate.
fn overlap_score(overlap: usize, candidate: usize) -> u32 {
    if candidate == 0 {
        return 0;
    }
    let overlap = overlap.min(candidate) as u64;
    let candidate = candidate as u64;
    ((200 * overlap + candidate) / (2 * candidate)) as u32
}

#[cfg(test)]
mod tests {
    use relay_core::ChangeProposal;

    use super::*;

    fn proposal(id: &str, files: &[&str]) -> ChangeProposal {
        ChangeProposal::new(id, files.iter().copied())
    }

    #[test]
    fn empty_candidate_never_conflicts() {
        let scorer = ConflictScorer::default();
        let others = vec![proposal("1", &["a.rs"]), proposal("2", &[])];

        let reports = scorer.score("new", Vec::<&str>::new(), &others, true);

        assert_eq!(reports.len(), 2);
        assert!(
            reports
                .iter()
                .all(|r| r.conflict_score == 0 && r.risk_bucket == RiskBucket::None)
        );
        assert!(scorer.score("new", Vec::<&str>::new(), &others, false).is_empty());
    }

    #[test]
    fn identical_file_sets_score_one_hundred() {
        let scorer = ConflictScorer::default();
        let others = vec![proposal("42", &["src/a.rs", "src/b.rs"])];

        let reports = scorer.score("mine", ["./src/b.rs", "src/a.rs"], &others, false);

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].conflict_score, 100);
        assert_eq!(reports[0].risk_bucket, RiskBucket::High);
        assert_eq!(
            reports[0].overlapping_files,
            vec!["src/a.rs".to_owned(), "src/b.rs".to_owned()]
        );
    }

    #[test]
    fn buckets_follow_configured_thresholds() {
        let config = ConflictConfig::default();
        assert_eq!(RiskBucket::from_score(0, &config), RiskBucket::None);
        assert_eq!(RiskBucket::from_score(19, &config), RiskBucket::Low);
        assert_eq!(RiskBucket::from_score(20, &config), RiskBucket::Medium);
        assert_eq!(RiskBucket::from_score(59, &config), RiskBucket::Medium);
        assert_eq!(RiskBucket::from_score(60, &config), RiskBucket::High);

        let strict = ConflictConfig {
            medium_threshold: 5,
            high_threshold: 10,
        };
        assert_eq!(RiskBucket::from_score(10, &strict), RiskBucket::High);
    }

    #[test]
    fn reports_sort_by_score_then_id_and_skip_self() {
        let scorer = ConflictScorer::default();
        let candidate = ["a", "b", "c"];
        let others = vec![
            proposal("mine", &["a", "b", "c"]),
            proposal("9", &["a"]),
            proposal("10", &["a", "b"]),
            proposal("11", &["c"]),
            proposal("12", &["z"]),
        ];

        let reports = scorer.score("mine", candidate, &others, false);

        assert_eq!(
            reports
                .iter()
                .map(|r| (r.other_candidate_id.as_str(), r.conflict_score))
                .collect::<Vec<_>>(),
            vec![("10", 67), ("11", 33), ("9", 33)]
        );
        assert_eq!(highest_risk(&reports), RiskBucket::High);
        assert_eq!(highest_risk(&[]), RiskBucket::None);
    }

    #[test]
    fn overlap_score_rounds_half_up() {
        assert_eq!(overlap_score(1, 8), 13);
        assert_eq!(overlap_score(1, 200), 1);
        assert_eq!(overlap_score(1, 201), 0);
        assert_eq!(overlap_score(3, 3), 100);
    }

    #[test]
    fn describe_mentions_proposal_and_overlap() {
        let scorer = ConflictScorer::default();
        let mut other = proposal("42", &["src/Settings.tsx"]);
        other.title = "Dark mode".to_owned();

        let reports = scorer.score("mine", ["src/Settings.tsx", "src/Theme.tsx"], &[other], false);

        assert_eq!(
            reports[0].describe(),
            "Conflicts with PR #42 (1 file overlap, medium risk)"
        );
        assert_eq!(reports[0].other_title, "Dark mode");
    }
}
