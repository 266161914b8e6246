//! Signature matcher: scores evidence text against the active catalog.
//!
//! Confidence for a pattern is the weighted mean of two hit fractions:
//! distinct keywords found (case-insensitive substring) over total keywords,
//! and distinct regexes that match over total regexes. A pattern that only
//! declares one rule kind puts all of the weight on that kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::catalog::Catalog;
use crate::pattern::{Category, PatternDefinition};

/// Relative weights of the two rule kinds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchWeights {
    #[serde(default = "default_weight")]
    pub keyword: f64,
    #[serde(default = "default_weight")]
    pub regex: f64,
}

fn default_weight() -> f64 {
    0.5
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            keyword: default_weight(),
            regex: default_weight(),
        }
    }
}

/// Default excerpt length in characters
pub const DEFAULT_EXCERPT_CHARS: usize = 240;

/// A pattern that cleared its threshold for a piece of evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub pattern_id: String,
    pub category: Category,
    pub confidence: f64,
    /// The evidence line that triggered the match
    pub excerpt: String,
    pub matched_keywords: Vec<String>,
    pub matched_regexes: Vec<String>,
    /// Named capture groups, used to fill `{name}` placeholders in remediation templates
    #[serde(default)]
    pub captures: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Matcher {
    weights: MatchWeights,
    excerpt_chars: usize,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(MatchWeights::default(), DEFAULT_EXCERPT_CHARS)
    }
}

impl Matcher {
    pub fn new(weights: MatchWeights, excerpt_chars: usize) -> Self {
        Self {
            weights,
            excerpt_chars: excerpt_chars.max(16),
        }
    }

    pub fn weights(&self) -> MatchWeights {
        self.weights
    }

    /// Score evidence against every pattern (or one category), best first.
    ///
    /// Equal confidences keep catalog declaration order.
    pub fn match_evidence(
        &self,
        catalog: &Catalog,
        evidence: &str,
        category_hint: Option<Category>,
    ) -> Vec<MatchResult> {
        let lowered = evidence.to_lowercase();
        let now = Utc::now();

        let mut results: Vec<MatchResult> = catalog
            .patterns()
            .iter()
            .filter(|p| category_hint.map_or(true, |c| p.category == c))
            .filter_map(|p| self.score_pattern(p, evidence, &lowered, now))
            .collect();

        // sort_by is stable, so declaration order breaks ties
        results.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        results
    }

    fn score_pattern(
        &self,
        pattern: &PatternDefinition,
        evidence: &str,
        lowered: &str,
        now: DateTime<Utc>,
    ) -> Option<MatchResult> {
        let matched_keywords: Vec<String> = distinct(
            pattern
                .keywords
                .iter()
                .filter(|k| lowered.contains(&k.to_lowercase()))
                .cloned(),
        );

        let mut matched_regexes = Vec::new();
        let mut captures = BTreeMap::new();
        let mut regex_line: Option<&str> = None;
        for re in &pattern.regexes {
            if let Some(caps) = re.captures(evidence) {
                matched_regexes.push(re.as_str().to_string());
                for name in re.capture_names().flatten() {
                    if let Some(m) = caps.name(name) {
                        captures
                            .entry(name.to_string())
                            .or_insert_with(|| m.as_str().to_string());
                    }
                }
                if regex_line.is_none() {
                    if let Some(whole) = caps.get(0) {
                        regex_line = Some(line_around(evidence, whole.start()));
                    }
                }
            }
        }

        if matched_keywords.is_empty() && matched_regexes.is_empty() {
            return None;
        }

        let confidence = self.confidence(
            matched_keywords.len(),
            pattern.keywords.len(),
            matched_regexes.len(),
            pattern.regexes.len(),
        );
        if confidence < pattern.confidence_threshold {
            return None;
        }

        let line = regex_line.unwrap_or_else(|| {
            evidence
                .lines()
                .find(|l| {
                    let l = l.to_lowercase();
                    matched_keywords.iter().any(|k| l.contains(&k.to_lowercase()))
                })
                .unwrap_or(evidence)
        });

        Some(MatchResult {
            pattern_id: pattern.id.clone(),
            category: pattern.category,
            confidence,
            excerpt: truncate_chars(line.trim(), self.excerpt_chars),
            matched_keywords,
            matched_regexes,
            captures,
            timestamp: now,
        })
    }

    /// Weighted hit fraction, clamped to [0, 1].
    pub fn confidence(
        &self,
        keyword_hits: usize,
        keyword_total: usize,
        regex_hits: usize,
        regex_total: usize,
    ) -> f64 {
        let (mut wk, mut wr) = (self.weights.keyword.max(0.0), self.weights.regex.max(0.0));
        if wk + wr == 0.0 {
            wk = 0.5;
            wr = 0.5;
        }

        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        if keyword_total > 0 {
            weighted += wk * keyword_hits as f64 / keyword_total as f64;
            total_weight += wk;
        }
        if regex_total > 0 {
            weighted += wr * regex_hits as f64 / regex_total as f64;
            total_weight += wr;
        }

        if total_weight == 0.0 {
            return 0.0;
        }
        (weighted / total_weight).clamp(0.0, 1.0)
    }
}

fn distinct(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.iter().any(|o| o.eq_ignore_ascii_case(&item)) {
            out.push(item);
        }
    }
    out
}

fn line_around(text: &str, offset: usize) -> &str {
    let start = text[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end = text[offset..]
        .find('\n')
        .map(|i| offset + i)
        .unwrap_or(text.len());
    &text[start..end]
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
