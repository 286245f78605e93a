//! Merging the vector and keyword channels into one ranked candidate set.

use finrag_passages::Passage;
use indexmap::IndexMap;
use indexmap::map::Entry;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Characters of passage text used as the merge key when a passage has no id.
const CONTENT_KEY_CHARS: usize = 100;

/// Where a candidate's score came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Vector,
    Keyword,
    /// Found by both channels.
    Fused,
}

/// A passage with a relevance score, ephemeral to one retrieval call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub passage: Passage,
    pub score: f32,
    pub channel: Channel,
}

impl ScoredCandidate {
    /// Create a candidate.
    pub fn new(passage: Passage, score: f32, channel: Channel) -> Self {
        Self {
            passage,
            score,
            channel,
        }
    }

    /// Identity used to merge hits on the same passage.
    pub fn merge_key(&self) -> String {
        merge_key(&self.passage)
    }
}

/// The passage id, or a content prefix when the id is missing.
pub fn merge_key(passage: &Passage) -> String {
    if passage.passage_id.is_empty() {
        let prefix: String = passage.text.chars().take(CONTENT_KEY_CHARS).collect();
        format!("content:{prefix}")
    } else {
        passage.passage_id.clone()
    }
}

struct Merged {
    candidate: ScoredCandidate,
    from_keyword: bool,
}

/// Combine both channels: `alpha * vector + (1 - alpha) * keyword`.
///
/// A passage found by one channel keeps only that channel's weighted score.
/// Repeated hits within one channel count once. The result is sorted by
/// score, and equal scores keep first-seen order with vector hits first.
pub fn fuse(
    vector: Vec<ScoredCandidate>,
    keyword: Vec<ScoredCandidate>,
    alpha: f32,
) -> Vec<ScoredCandidate> {
    let alpha = alpha.clamp(0.0, 1.0);
    let mut merged: IndexMap<String, Merged> = IndexMap::with_capacity(vector.len() + keyword.len());

    for mut candidate in vector {
        if let Entry::Vacant(slot) = merged.entry(candidate.merge_key()) {
            candidate.score *= alpha;
            slot.insert(Merged {
                candidate,
                from_keyword: false,
            });
        }
    }

    for mut candidate in keyword {
        let weighted = (1.0 - alpha) * candidate.score;
        match merged.entry(candidate.merge_key()) {
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if !existing.from_keyword {
                    existing.candidate.score += weighted;
                    existing.candidate.channel = Channel::Fused;
                    existing.from_keyword = true;
                }
            }
            Entry::Vacant(slot) => {
                candidate.score = weighted;
                slot.insert(Merged {
                    candidate,
                    from_keyword: true,
                });
            }
        }
    }

    let mut fused: Vec<ScoredCandidate> = merged.into_values().map(|m| m.candidate).collect();
    sort_by_score(&mut fused);
    fused
}

/// Stable sort, highest score first.
pub fn sort_by_score(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by_key(|c| std::cmp::Reverse(OrderedFloat(c.score)));
}
