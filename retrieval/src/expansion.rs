//! Query expansion.
//!
//! The expander first asks the text-generation provider for a structured
//! rewrite of the question. When the provider is missing, fails, answers in
//! the wrong shape, or adds nothing, it falls back to a local abbreviation
//! dictionary plus profile-derived terms. The fallback makes no network calls
//! and is deterministic for identical input.

use std::collections::HashSet;
use std::sync::Arc;

use finrag_passages::terms;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ExpansionConfig;
use crate::error::GenerationError;
use crate::generation::{CompletionRequest, TextGenerator};
use crate::profile::UserProfile;

/// Which path produced an [`ExpandedQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionSource {
    Provider,
    Dictionary,
}

/// A query rewritten for retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedQuery {
    /// The question as asked.
    pub original: String,

    /// Text searched by both channels.
    pub expanded: String,

    /// Synonyms and spelled-out abbreviations.
    pub expansion_terms: Vec<String>,

    /// Terms derived from the user profile.
    pub profile_terms: Vec<String>,

    /// Section headings likely to hold the answer.
    pub priority_sections: Vec<String>,

    pub source: ExpansionSource,
}

struct Abbreviation {
    /// Regex alternation matched case-insensitively at a word start.
    pattern: &'static str,
    expansion: &'static str,
    sections: &'static [&'static str],
}

const DICTIONARY: &[Abbreviation] = &[
    Abbreviation {
        pattern: "ira",
        expansion: "Individual Retirement Account IRA",
        sections: &["IRA", "Individual Retirement"],
    },
    Abbreviation {
        pattern: r"401\(k\)|401k",
        expansion: "401(k) plan 401k",
        sections: &["401(k)"],
    },
    Abbreviation {
        pattern: r"403\(b\)|403b",
        expansion: "403(b) plan 403b",
        sections: &["403(b)"],
    },
    Abbreviation {
        pattern: r"457\(b\)|457b",
        expansion: "457(b) deferred compensation plan 457b",
        sections: &["457(b)"],
    },
    Abbreviation {
        pattern: "hsa",
        expansion: "Health Savings Account HSA",
        sections: &["Health Savings"],
    },
    Abbreviation {
        pattern: "fsa",
        expansion: "Flexible Spending Account FSA",
        sections: &["Flexible Spending"],
    },
    Abbreviation {
        pattern: "magi",
        expansion: "Modified Adjusted Gross Income MAGI",
        sections: &["Phase-Out", "Income Limits"],
    },
    Abbreviation {
        pattern: "agi",
        expansion: "Adjusted Gross Income AGI",
        sections: &["Adjusted Gross Income"],
    },
    Abbreviation {
        pattern: "rmd",
        expansion: "Required Minimum Distribution RMD",
        sections: &["Required Minimum Distributions"],
    },
    Abbreviation {
        pattern: "sep",
        expansion: "Simplified Employee Pension SEP",
        sections: &["SEP"],
    },
    Abbreviation {
        pattern: "etf",
        expansion: "Exchange-Traded Fund ETF",
        sections: &["Investing"],
    },
    Abbreviation {
        pattern: "reit",
        expansion: "Real Estate Investment Trust REIT",
        sections: &["Real Estate"],
    },
    Abbreviation {
        pattern: "apr",
        expansion: "Annual Percentage Rate APR",
        sections: &["Interest Rates", "Credit"],
    },
    Abbreviation {
        pattern: "apy",
        expansion: "Annual Percentage Yield APY",
        sections: &["Savings"],
    },
    Abbreviation {
        pattern: "fica",
        expansion: "Federal Insurance Contributions Act FICA payroll tax",
        sections: &["Payroll"],
    },
    Abbreviation {
        pattern: "eitc",
        expansion: "Earned Income Tax Credit EITC",
        sections: &["Credits"],
    },
    Abbreviation {
        pattern: "ctc",
        expansion: "Child Tax Credit CTC",
        sections: &["Credits"],
    },
    Abbreviation {
        pattern: "qcd",
        expansion: "Qualified Charitable Distribution QCD",
        sections: &["Charitable"],
    },
    Abbreviation {
        pattern: "espp",
        expansion: "Employee Stock Purchase Plan ESPP",
        sections: &["Stock"],
    },
    Abbreviation {
        pattern: "rsu",
        expansion: "Restricted Stock Unit RSU",
        sections: &["Stock"],
    },
];

/// Goal keyword, the term it contributes, and the sections it points at.
const GOAL_TERMS: &[(&[&str], &str, &[&str])] = &[
    (&["retire"], "retirement planning", &["Retirement"]),
    (&["college", "education", "school"], "529 education savings", &["Education"]),
    (&["home", "house", "mortgage"], "home buying mortgage", &["Mortgage", "Home"]),
    (&["debt", "loan", "credit card"], "debt repayment", &["Debt"]),
    (&["emergency"], "emergency fund", &["Emergency Fund"]),
    (&["tax"], "tax planning", &["Tax"]),
    (&["invest", "wealth"], "investing portfolio", &["Investing"]),
];

const CATCH_UP_AGE: u32 = 50;
const RMD_AGE: u32 = 73;

const SYSTEM_PROMPT: &str = "You rewrite personal-finance questions for a document search engine.\n\
Spell out financial abbreviations, add close synonyms, fold in relevant facts from the user \
profile (age bracket, filing status, goals) and name the document section headings most likely \
to contain the answer.\n\
Reply with exactly four lines and nothing else:\n\
EXPANDED_QUERY: <the rewritten question>\n\
EXPANSION_TERMS: <comma-separated synonyms and spelled-out abbreviations>\n\
PROFILE_TERMS: <comma-separated profile-derived terms, or none>\n\
PRIORITY_SECTIONS: <comma-separated section headings, or none>";

struct CompiledAbbreviation {
    regex: Regex,
    entry: &'static Abbreviation,
}

/// Rewrites user questions for retrieval.
pub struct QueryExpander {
    generator: Option<Arc<dyn TextGenerator>>,
    config: ExpansionConfig,
    dictionary: Vec<CompiledAbbreviation>,
}

impl QueryExpander {
    /// Create an expander. Without a generator only the dictionary is used.
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, config: ExpansionConfig) -> Self {
        let dictionary = DICTIONARY
            .iter()
            .filter_map(|entry| {
                match Regex::new(&format!(r"(?i)\b(?:{})s?", entry.pattern)) {
                    Ok(regex) => Some(CompiledAbbreviation { regex, entry }),
                    Err(e) => {
                        warn!("Skipping abbreviation pattern {}: {e}", entry.pattern);
                        None
                    }
                }
            })
            .collect();

        Self {
            generator,
            config,
            dictionary,
        }
    }

    /// Expand `query`, preferring the provider and falling back to the
    /// dictionary.
    pub async fn expand(&self, query: &str, profile: Option<&UserProfile>) -> ExpandedQuery {
        let Some(generator) = self.generator.as_ref().filter(|_| self.config.use_provider) else {
            return self.expand_with_dictionary(query, profile);
        };
        if !generator.is_available() {
            debug!("Generator {} is not configured, using dictionary expansion", generator.name());
            return self.expand_with_dictionary(query, profile);
        }

        match self.expand_with_provider(generator.as_ref(), query, profile).await {
            Ok(expanded) => {
                debug!(
                    "Provider expansion added {} terms and {} priority sections",
                    expanded.expansion_terms.len(),
                    expanded.priority_sections.len()
                );
                expanded
            }
            Err(e) => {
                warn!("Query expansion via {} failed, using dictionary: {e}", generator.name());
                self.expand_with_dictionary(query, profile)
            }
        }
    }

    async fn expand_with_provider(
        &self,
        generator: &dyn TextGenerator,
        query: &str,
        profile: Option<&UserProfile>,
    ) -> Result<ExpandedQuery, GenerationError> {
        let profile_line = profile.map_or_else(|| "no profile information".to_string(), UserProfile::describe);
        let request = CompletionRequest::new(SYSTEM_PROMPT, format!("Question: {query}\nProfile: {profile_line}"))
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        let reply = generator.complete(request).await?;
        Self::parse_reply(query, &reply)
    }

    /// Parse a four-field structured reply.
    ///
    /// Labels are case-insensitive and list fields are comma-separated. Query
    /// terms missing from the rewritten text are appended to it.
    pub fn parse_reply(query: &str, reply: &str) -> Result<ExpandedQuery, GenerationError> {
        let mut expanded: Option<String> = None;
        let mut expansion_terms = Vec::new();
        let mut profile_terms = Vec::new();
        let mut priority_sections = Vec::new();

        for line in reply.lines() {
            let Some((label, value)) = line.split_once(':') else {
                continue;
            };
            let label = label.trim().trim_matches(|c| c == '*' || c == '-').trim().to_uppercase();
            let value = value.trim().trim_matches('*').trim();
            match label.as_str() {
                "EXPANDED_QUERY" => expanded = Some(value.to_string()),
                "EXPANSION_TERMS" => expansion_terms = split_list(value),
                "PROFILE_TERMS" => profile_terms = split_list(value),
                "PRIORITY_SECTIONS" => priority_sections = split_list(value),
                _ => {}
            }
        }

        let Some(mut expanded) = expanded.filter(|text| !text.is_empty()) else {
            return Err(GenerationError::MalformedStructuredReply(
                "missing EXPANDED_QUERY".to_string(),
            ));
        };

        if expanded.eq_ignore_ascii_case(query.trim())
            && expansion_terms.is_empty()
            && profile_terms.is_empty()
        {
            return Err(GenerationError::Degenerate);
        }

        let present: HashSet<String> = terms(&expanded).into_iter().collect();
        let mut missing: Vec<String> = Vec::new();
        for term in terms(query) {
            if !present.contains(&term) && !missing.contains(&term) {
                missing.push(term);
            }
        }
        if !missing.is_empty() {
            expanded = format!("{expanded} {}", missing.join(" "));
        }

        Ok(ExpandedQuery {
            original: query.to_string(),
            expanded,
            expansion_terms,
            profile_terms,
            priority_sections,
            source: ExpansionSource::Provider,
        })
    }

    /// Expand `query` locally: spell out known abbreviations, then append
    /// profile-derived terms.
    pub fn expand_with_dictionary(&self, query: &str, profile: Option<&UserProfile>) -> ExpandedQuery {
        let query = query.trim();
        let mut matches: Vec<(usize, usize, &'static Abbreviation)> = Vec::new();
        for compiled in &self.dictionary {
            for found in compiled.regex.find_iter(query) {
                let at_word_end = query[found.end()..]
                    .chars()
                    .next()
                    .is_none_or(|c| !c.is_alphanumeric());
                if at_word_end {
                    matches.push((found.start(), found.end(), compiled.entry));
                }
            }
        }
        matches.sort_by_key(|&(start, end, _)| (start, std::cmp::Reverse(end)));

        let mut rewritten = String::with_capacity(query.len() * 2);
        let mut expansion_terms = Vec::new();
        let mut priority_sections = Vec::new();
        let mut cursor = 0;
        for (start, end, entry) in matches {
            if start < cursor {
                continue;
            }
            rewritten.push_str(&query[cursor..start]);
            rewritten.push_str(entry.expansion);
            cursor = end;
            push_unique(&mut expansion_terms, entry.expansion);
            for section in entry.sections {
                push_unique(&mut priority_sections, section);
            }
        }
        rewritten.push_str(&query[cursor..]);

        let mut profile_terms = Vec::new();
        if let Some(profile) = profile {
            for (term, sections) in profile_terms_for(profile) {
                push_unique(&mut profile_terms, &term);
                for section in sections {
                    push_unique(&mut priority_sections, section);
                }
            }
        }

        let expanded = if profile_terms.is_empty() {
            rewritten
        } else {
            format!("{rewritten} {}", profile_terms.join(" "))
        };

        ExpandedQuery {
            original: query.to_string(),
            expanded,
            expansion_terms,
            profile_terms,
            priority_sections,
            source: ExpansionSource::Dictionary,
        }
    }
}

fn profile_terms_for(profile: &UserProfile) -> Vec<(String, &'static [&'static str])> {
    let mut derived: Vec<(String, &'static [&'static str])> = Vec::new();

    if let Some(age) = profile.age {
        if age >= CATCH_UP_AGE {
            derived.push((
                "age 50 or older catch-up contributions eligible".to_string(),
                &["Catch-Up"],
            ));
        }
        if age >= RMD_AGE {
            derived.push((
                format!("age {RMD_AGE} required minimum distributions"),
                &["Required Minimum Distributions"],
            ));
        }
    }
    if let Some(status) = profile.filing_status {
        derived.push((format!("filing status {}", status.label()), &["Filing Status"]));
    }
    if let Some(state) = profile.state.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        derived.push((format!("{state} state tax"), &[]));
    }
    for goal in &profile.goals {
        let lowered = goal.to_lowercase();
        let mapped = GOAL_TERMS
            .iter()
            .find(|(keywords, _, _)| keywords.iter().any(|keyword| lowered.contains(*keyword)));
        match mapped {
            Some((_, term, sections)) => derived.push(((*term).to_string(), *sections)),
            None if !lowered.trim().is_empty() => derived.push((lowered.trim().to_string(), &[])),
            None => {}
        }
    }
    if let Some(risk) = profile.risk_tolerance {
        derived.push((
            format!("{} risk tolerance asset allocation", risk.label()),
            &["Asset Allocation"],
        ));
    }

    derived
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| {
            !item.is_empty() && !item.eq_ignore_ascii_case("none") && !item.eq_ignore_ascii_case("n/a")
        })
        .map(String::from)
        .collect()
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::FilingStatus;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct Scripted(Result<&'static str, ()>);

    #[async_trait]
    impl TextGenerator for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<String, GenerationError> {
            self.0
                .map(String::from)
                .map_err(|()| GenerationError::ProviderUnavailable("offline".to_string()))
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn dictionary_only() -> QueryExpander {
        QueryExpander::new(None, ExpansionConfig::default())
    }

    fn scripted(reply: Result<&'static str, ()>) -> QueryExpander {
        QueryExpander::new(Some(Arc::new(Scripted(reply))), ExpansionConfig::default())
    }

    #[test]
    fn test_every_dictionary_pattern_compiles() {
        assert_eq!(dictionary_only().dictionary.len(), DICTIONARY.len());
    }

    #[test]
    fn test_dictionary_spells_out_abbreviations() {
        let expanded = dictionary_only().expand_with_dictionary("What's my IRA limit?", None);
        assert_eq!(expanded.expanded, "What's my Individual Retirement Account IRA limit?");
        assert_eq!(expanded.expansion_terms, vec!["Individual Retirement Account IRA"]);
        assert_eq!(expanded.source, ExpansionSource::Dictionary);
    }

    #[test]
    fn test_dictionary_respects_word_boundaries() {
        let expander = dictionary_only();
        let untouched = expander.expand_with_dictionary("a separate spiral staircase", None);
        assert_eq!(untouched.expanded, "a separate spiral staircase");
        assert!(untouched.expansion_terms.is_empty());

        let magi = expander.expand_with_dictionary("magi limits", None);
        assert_eq!(magi.expanded, "Modified Adjusted Gross Income MAGI limits");
    }

    #[test]
    fn test_dictionary_handles_plan_numbers_and_plurals() {
        let expanded =
            dictionary_only().expand_with_dictionary("Roll my 401(k) into IRAs or a 403b", None);
        assert_eq!(
            expanded.expanded,
            "Roll my 401(k) plan 401k into Individual Retirement Account IRA or a 403(b) plan 403b"
        );
        assert_eq!(expanded.priority_sections[0], "401(k)");
    }

    #[test]
    fn test_profile_terms_are_appended() {
        let profile = UserProfile::new()
            .with_age(55)
            .with_filing_status(FilingStatus::Single)
            .with_state("CA")
            .with_goal("Retire by 60");

        let expanded = dictionary_only().expand_with_dictionary("HSA rules", Some(&profile));
        assert_eq!(
            expanded.profile_terms,
            vec![
                "age 50 or older catch-up contributions eligible",
                "filing status single",
                "CA state tax",
                "retirement planning",
            ]
        );
        assert!(expanded.expanded.starts_with("Health Savings Account HSA rules age 50"));
        assert!(expanded.priority_sections.contains(&"Catch-Up".to_string()));
        assert!(expanded.priority_sections.contains(&"Retirement".to_string()));
    }

    #[test]
    fn test_parse_reply() {
        let reply = "EXPANDED_QUERY: Roth IRA contribution limit for 2024\n\
                     expansion_terms: Roth Individual Retirement Account, annual limit\n\
                     PROFILE_TERMS: none\n\
                     **PRIORITY_SECTIONS:** Contribution Limits, Roth IRA";
        let parsed = QueryExpander::parse_reply("roth limit", reply).unwrap();

        assert_eq!(parsed.expanded, "Roth IRA contribution limit for 2024");
        assert_eq!(
            parsed.expansion_terms,
            vec!["Roth Individual Retirement Account", "annual limit"]
        );
        assert!(parsed.profile_terms.is_empty());
        assert_eq!(parsed.priority_sections, vec!["Contribution Limits", "Roth IRA"]);
    }

    #[test]
    fn test_parse_reply_repairs_dropped_terms() {
        let reply = "EXPANDED_QUERY: Health Savings Account rules\nEXPANSION_TERMS: HSA";
        let parsed = QueryExpander::parse_reply("HSA deductible rules", reply).unwrap();
        assert_eq!(parsed.expanded, "Health Savings Account rules hsa deductible");
    }

    #[test]
    fn test_parse_reply_rejects_bad_shapes() {
        assert!(matches!(
            QueryExpander::parse_reply("ira", "Sure! Here is your query."),
            Err(GenerationError::MalformedStructuredReply(_))
        ));
        assert!(matches!(
            QueryExpander::parse_reply("ira limit", "EXPANDED_QUERY: IRA limit\nEXPANSION_TERMS:"),
            Err(GenerationError::Degenerate)
        ));
    }

    #[tokio::test]
    async fn test_provider_reply_is_used() {
        let expander = scripted(Ok("EXPANDED_QUERY: required minimum distribution age\n\
                                    EXPANSION_TERMS: RMD\n\
                                    PRIORITY_SECTIONS: Required Minimum Distributions"));
        let expanded = expander.expand("rmd age", None).await;
        assert_eq!(expanded.source, ExpansionSource::Provider);
        assert_eq!(expanded.expanded, "required minimum distribution age rmd");
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back_deterministically() {
        let profile = UserProfile::new().with_age(55);
        let failing = scripted(Err(()));
        let degenerate = scripted(Ok("EXPANDED_QUERY: What's my IRA limit?"));

        let first = failing.expand("What's my IRA limit?", Some(&profile)).await;
        let second = degenerate.expand("What's my IRA limit?", Some(&profile)).await;

        assert_eq!(first, second);
        assert_eq!(first.source, ExpansionSource::Dictionary);
        assert!(first.expanded.contains("Individual Retirement Account"));
        assert!(first.expanded.contains("age 50 or older"));
    }
}
