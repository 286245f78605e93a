//! Section bias: favor passages from sections the query expander flagged.

use crate::config::BiasConfig;
use crate::fusion::ScoredCandidate;

/// Boost every candidate whose section or subsection contains one of
/// `priority_sections`, case-insensitively. Returns how many were boosted.
///
/// Boosted scores are capped at `config.cap`; a score already above the cap
/// is left as is. Order is not changed.
pub fn apply_section_bias(
    candidates: &mut [ScoredCandidate],
    priority_sections: &[String],
    config: &BiasConfig,
) -> usize {
    let priorities: Vec<String> = priority_sections
        .iter()
        .map(|section| section.trim().to_lowercase())
        .filter(|section| !section.is_empty())
        .collect();
    if priorities.is_empty() {
        return 0;
    }

    let mut boosted = 0;
    for candidate in candidates.iter_mut() {
        let labels = [
            candidate.passage.section.as_deref(),
            candidate.passage.subsection.as_deref(),
        ];
        let matches = labels.into_iter().flatten().any(|label| {
            let label = label.to_lowercase();
            priorities.iter().any(|priority| label.contains(priority.as_str()))
        });

        if matches {
            let ceiling = config.cap.max(candidate.score);
            candidate.score = (candidate.score + config.boost).min(ceiling);
            boosted += 1;
        }
    }
    boosted
}
