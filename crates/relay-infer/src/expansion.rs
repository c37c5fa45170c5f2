use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ExpansionModel, InferError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedTerm {
    pub term: String,
    pub weight: f32,
}

/// Expands text through a configured synonym table. Input tokens keep
/// weight 1.0; expansions get the configured weight unless they also occur
/// in the text.
#[derive(Debug, Clone, Default)]
pub struct LexiconExpansionModel {
    synonyms: BTreeMap<String, Vec<String>>,
    expansion_weight: f32,
}

impl LexiconExpansionModel {
    pub fn new(synonyms: BTreeMap<String, Vec<String>>, expansion_weight: f32) -> Self {
        Self {
            synonyms,
            expansion_weight: expansion_weight.clamp(0.0, 1.0),
        }
    }

    pub fn len(&self) -> usize {
        self.synonyms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.synonyms.is_empty()
    }
}

impl ExpansionModel for LexiconExpansionModel {
    fn expand(&self, text: &str) -> Result<Vec<WeightedTerm>, InferError> {
        let mut weights = BTreeMap::<String, f32>::new();

        for token in relay_core::tokenize(text) {
            if let Some(expansions) = self.synonyms.get(&token) {
                for expansion in expansions {
                    let weight = weights.entry(expansion.clone()).or_insert(0.0);
                    *weight = weight.max(self.expansion_weight);
                }
            }
            weights.insert(token, 1.0);
        }

        Ok(weights
            .into_iter()
            .filter(|(_, weight)| *weight > 0.0)
            .map(|(term, weight)| WeightedTerm { term, weight })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lexicon() -> LexiconExpansionModel {
        let mut synonyms = BTreeMap::new();
        synonyms.insert(
            "authentication".to_owned(),
            vec!["auth".to_owned(), "login".to_owned()],
        );
        synonyms.insert("bug".to_owned(), vec!["fix".to_owned()]);
        LexiconExpansionModel::new(synonyms, 0.5)
    }

    #[test]
    fn expansion_keeps_query_terms_at_full_weight() {
        let terms = lexicon().expand("Authentication bug").expect("expand");

        let as_pairs = terms
            .iter()
            .map(|term| (term.term.as_str(), term.weight))
            .collect::<Vec<_>>();
        assert_eq!(
            as_pairs,
            vec![
                ("auth", 0.5),
                ("authentication", 1.0),
                ("bug", 1.0),
                ("fix", 0.5),
                ("login", 0.5)
            ]
        );
    }

    #[test]
    fn expansion_never_downgrades_literal_terms() {
        let terms = lexicon().expand("fix authentication").expect("expand");
        let fix = terms
            .iter()
            .find(|term| term.term == "fix")
            .expect("fix term");
        assert_eq!(fix.weight, 1.0);
    }

    #[test]
    fn empty_text_expands_to_nothing() {
        assert!(lexicon().expand("").expect("expand").is_empty());
    }
}
