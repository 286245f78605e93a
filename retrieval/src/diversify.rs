//! Maximal Marginal Relevance selection.
//!
//! Greedy: seed with the best candidate, then repeatedly take the candidate
//! maximizing `lambda * relevance - (1 - lambda) * max_similarity`, where
//! similarity is Jaccard over lexical term sets. Cost is O(k·n), so callers
//! run it over a bounded candidate pool only.

use std::collections::HashSet;

use finrag_passages::text::{jaccard, term_set};

use crate::fusion::ScoredCandidate;

/// Pick `min(k, n)` distinct candidates balancing relevance and redundancy.
///
/// Repeated passages are dropped first, keeping the earliest. When no more
/// than `k` remain they are returned unchanged.
pub fn select(candidates: Vec<ScoredCandidate>, k: usize, lambda: f32) -> Vec<ScoredCandidate> {
    let mut seen = HashSet::new();
    let candidates: Vec<ScoredCandidate> = candidates
        .into_iter()
        .filter(|c| seen.insert(c.merge_key()))
        .collect();

    if candidates.len() <= k {
        return candidates;
    }
    if k == 0 {
        return Vec::new();
    }

    let lambda = lambda.clamp(0.0, 1.0);
    let term_sets: Vec<HashSet<String>> = candidates
        .iter()
        .map(|c| term_set(&c.passage.text))
        .collect();

    let mut seed = 0;
    for (index, candidate) in candidates.iter().enumerate() {
        if candidate.score > candidates[seed].score {
            seed = index;
        }
    }

    let mut selected = vec![seed];
    let mut remaining: Vec<usize> = (0..candidates.len()).filter(|&i| i != seed).collect();
    let mut max_similarity = vec![0.0f32; candidates.len()];

    while selected.len() < k && !remaining.is_empty() {
        let Some(&latest) = selected.last() else {
            break;
        };

        let mut best: Option<(usize, f32)> = None;
        for (position, &index) in remaining.iter().enumerate() {
            max_similarity[index] =
                max_similarity[index].max(jaccard(&term_sets[index], &term_sets[latest]));
            let marginal =
                lambda * candidates[index].score - (1.0 - lambda) * max_similarity[index];
            if best.is_none_or(|(_, value)| marginal > value) {
                best = Some((position, marginal));
            }
        }

        let Some((position, _)) = best else {
            break;
        };
        selected.push(remaining.remove(position));
    }

    let mut slots: Vec<Option<ScoredCandidate>> = candidates.into_iter().map(Some).collect();
    selected
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::Channel;
    use finrag_passages::{Metadata, Passage};
    use pretty_assertions::assert_eq;

    fn candidate(id: &str, text: &str, score: f32) -> ScoredCandidate {
        ScoredCandidate::new(
            Passage::from_record(Some(id), text, &Metadata::new()),
            score,
            Channel::Fused,
        )
    }

    fn ids(candidates: &[ScoredCandidate]) -> Vec<&str> {
        candidates
            .iter()
            .map(|c| c.passage.passage_id.as_str())
            .collect()
    }

    #[test]
    fn test_small_sets_are_unchanged() {
        let candidates = vec![
            candidate("b", "roth ira limits", 0.2),
            candidate("a", "roth ira limits", 0.9),
        ];
        for lambda in [0.0, 0.5, 1.0] {
            assert_eq!(select(candidates.clone(), 2, lambda), candidates);
            assert_eq!(select(candidates.clone(), 5, lambda), candidates);
        }
    }

    #[test]
    fn test_redundant_candidate_is_skipped() {
        let candidates = vec![
            candidate("a", "roth ira contribution limit for 2024", 0.9),
            candidate("b", "roth ira contribution limit for 2024 explained", 0.85),
            candidate("c", "health savings account deductible rules", 0.6),
        ];

        let picked = select(candidates, 2, 0.5);
        assert_eq!(ids(&picked), vec!["a", "c"]);
    }

    #[test]
    fn test_pure_relevance_follows_scores() {
        let candidates = vec![
            candidate("a", "roth ira contribution limit", 0.9),
            candidate("b", "roth ira contribution limit", 0.8),
            candidate("c", "health savings account", 0.1),
        ];

        let picked = select(candidates, 2, 1.0);
        assert_eq!(ids(&picked), vec!["a", "b"]);
    }

    #[test]
    fn test_output_has_no_duplicates() {
        let candidates = vec![
            candidate("a", "first text", 0.9),
            candidate("a", "first text", 0.9),
            candidate("b", "second text", 0.5),
            candidate("c", "third text", 0.4),
            candidate("b", "second text", 0.5),
        ];

        let picked = select(candidates, 3, 0.7);
        assert_eq!(picked.len(), 3);
        let unique: HashSet<_> = ids(&picked).into_iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_seed_is_highest_score() {
        let candidates = vec![
            candidate("low", "alpha beta gamma", 0.1),
            candidate("high", "delta epsilon zeta", 0.7),
            candidate("mid", "eta theta iota", 0.4),
        ];
        let picked = select(candidates, 1, 0.0);
        assert_eq!(ids(&picked), vec!["high"]);
    }
}
