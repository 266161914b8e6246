//! Occurrences and the per-signature issue record derived from them.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::pattern::Severity;

/// Root cause recorded when an operator turns a remediation down
pub const REJECTED_ROOT_CAUSE: &str = "rejected by operator";

/// Label that never counts as a real cause
pub const UNKNOWN_ROOT_CAUSE: &str = "Unknown";

/// Default retained occurrences per signature
pub const DEFAULT_RETENTION: usize = 3;

/// Default relative rate change that counts as a trend
pub const DEFAULT_TREND_MARGIN: f64 = 0.2;

/// One recorded instance of an issue being detected and handled.
///
/// Fields are private: once built, an occurrence cannot be edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    timestamp: DateTime<Utc>,
    severity: Severity,
    /// Seconds from detection to resolution
    resolution_time: f64,
    success: bool,
    root_cause: String,
    resolution_method: String,
    confidence_score: f64,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    system_context: serde_json::Map<String, serde_json::Value>,
}

impl Occurrence {
    pub fn new(
        timestamp: DateTime<Utc>,
        severity: Severity,
        resolution_time: f64,
        success: bool,
        root_cause: impl Into<String>,
        resolution_method: impl Into<String>,
        confidence_score: f64,
    ) -> Self {
        Self {
            timestamp,
            severity,
            resolution_time: resolution_time.max(0.0),
            success,
            root_cause: root_cause.into(),
            resolution_method: resolution_method.into(),
            confidence_score: confidence_score.clamp(0.0, 1.0),
            system_context: serde_json::Map::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.system_context.insert(key.into(), value);
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn resolution_time(&self) -> f64 {
        self.resolution_time
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn root_cause(&self) -> &str {
        &self.root_cause
    }

    pub fn resolution_method(&self) -> &str {
        &self.resolution_method
    }

    pub fn confidence_score(&self) -> f64 {
        self.confidence_score
    }

    pub fn system_context(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.system_context
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyTrend {
    Improving,
    Stable,
    Concerning,
    #[default]
    InsufficientData,
}

impl FrequencyTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrequencyTrend::Improving => "improving",
            FrequencyTrend::Stable => "stable",
            FrequencyTrend::Concerning => "concerning",
            FrequencyTrend::InsufficientData => "insufficient_data",
        }
    }
}

/// When in the week an issue tends to show up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonalPattern {
    BusinessHours,
    Weekends,
    MaintenanceWindows,
    #[default]
    None,
}

/// Bounded history and derived statistics for one signature.
///
/// Aggregates are only ever produced by [`IssueRecord::recompute`]; the
/// serialized copies exist for readers of the on-disk document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRecord {
    occurrences: VecDeque<Occurrence>,
    success_rate: f64,
    avg_resolution_time: f64,
    frequency_trend: FrequencyTrend,
    #[serde(default)]
    common_causes: Vec<String>,
    #[serde(default)]
    seasonal_pattern: SeasonalPattern,
    #[serde(default)]
    archived: bool,
}

impl IssueRecord {
    pub fn new() -> Self {
        Self {
            occurrences: VecDeque::new(),
            success_rate: 0.0,
            avg_resolution_time: 0.0,
            frequency_trend: FrequencyTrend::InsufficientData,
            common_causes: Vec::new(),
            seasonal_pattern: SeasonalPattern::None,
            archived: false,
        }
    }

    /// Append, evict beyond `retention`, and recompute aggregates.
    pub(crate) fn push(&mut self, occurrence: Occurrence, retention: usize, trend_margin: f64) {
        self.occurrences.push_back(occurrence);
        while self.occurrences.len() > retention.max(1) {
            self.occurrences.pop_front();
        }
        self.archived = false;
        self.recompute(trend_margin);
    }

    /// Rebuild every derived field from the retained window.
    pub(crate) fn recompute(&mut self, trend_margin: f64) {
        let total = self.occurrences.len();
        let successes: Vec<&Occurrence> = self.occurrences.iter().filter(|o| o.success).collect();

        self.success_rate = if total == 0 {
            0.0
        } else {
            successes.len() as f64 / total as f64
        };

        self.avg_resolution_time = if successes.is_empty() {
            0.0
        } else {
            successes.iter().map(|o| o.resolution_time).sum::<f64>() / successes.len() as f64
        };

        let mut causes: Vec<String> = Vec::new();
        for o in &self.occurrences {
            if is_real_cause(&o.root_cause) && !causes.contains(&o.root_cause) {
                causes.push(o.root_cause.clone());
            }
        }
        self.common_causes = causes;

        let timestamps: Vec<DateTime<Utc>> = self.occurrences.iter().map(|o| o.timestamp).collect();
        self.frequency_trend = frequency_trend(&timestamps, trend_margin);
        self.seasonal_pattern = seasonal_pattern(&timestamps);
    }

    /// Trim an over-long window loaded from disk and rebuild aggregates.
    pub(crate) fn normalize(&mut self, retention: usize, trend_margin: f64) {
        while self.occurrences.len() > retention.max(1) {
            self.occurrences.pop_front();
        }
        self.recompute(trend_margin);
    }

    pub(crate) fn set_archived(&mut self, archived: bool) {
        self.archived = archived;
    }

    /// Oldest first.
    pub fn occurrences(&self) -> impl DoubleEndedIterator<Item = &Occurrence> + ExactSizeIterator {
        self.occurrences.iter()
    }

    pub fn len(&self) -> usize {
        self.occurrences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occurrences.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.occurrences.iter().filter(|o| o.success).count()
    }

    pub fn success_rate(&self) -> f64 {
        self.success_rate
    }

    pub fn avg_resolution_time(&self) -> f64 {
        self.avg_resolution_time
    }

    pub fn frequency_trend(&self) -> FrequencyTrend {
        self.frequency_trend
    }

    pub fn common_causes(&self) -> &[String] {
        &self.common_causes
    }

    pub fn seasonal_pattern(&self) -> SeasonalPattern {
        self.seasonal_pattern
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.occurrences.back().map(|o| o.timestamp)
    }

    /// Root-cause labels ranked by recency-weighted frequency.
    ///
    /// The oldest retained occurrence weighs 1, the newest weighs n.
    /// Confidences sum to 1 across the returned labels.
    pub fn predict_root_cause(&self) -> Vec<(String, f64)> {
        let mut tally: Vec<(String, f64)> = Vec::new();
        for (position, occ) in self.occurrences.iter().enumerate() {
            if !is_real_cause(&occ.root_cause) {
                continue;
            }
            let weight = (position + 1) as f64;
            match tally.iter_mut().find(|(label, _)| *label == occ.root_cause) {
                Some((_, w)) => *w += weight,
                None => tally.push((occ.root_cause.clone(), weight)),
            }
        }

        let total: f64 = tally.iter().map(|(_, w)| w).sum();
        if total == 0.0 {
            return Vec::new();
        }
        for (_, w) in tally.iter_mut() {
            *w /= total;
        }
        tally.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        tally
    }

    /// Confidence that `method` will resolve this issue, from past outcomes.
    pub fn recommendation_confidence(&self, method: &str) -> f64 {
        if self.occurrences.is_empty() {
            return 0.3;
        }

        let needle = method.to_lowercase();
        let similar: Vec<&Occurrence> = self
            .occurrences
            .iter()
            .filter(|o| o.resolution_method.to_lowercase().contains(&needle))
            .collect();
        if similar.is_empty() {
            return 0.4;
        }

        let method_rate = similar.iter().filter(|o| o.success).count() as f64 / similar.len() as f64;
        (method_rate * 0.7 + self.success_rate * 0.3).min(0.95)
    }
}

impl Default for IssueRecord {
    fn default() -> Self {
        Self::new()
    }
}

fn is_real_cause(label: &str) -> bool {
    let label = label.trim();
    !label.is_empty() && !label.eq_ignore_ascii_case(UNKNOWN_ROOT_CAUSE)
}

/// Compare occurrence rates of the older and the recent half of the window.
///
/// The window is split by position; with an odd count the middle occurrence
/// closes the older half and opens the recent one. A half's rate is its
/// number of intervals over its time span, so a half with zero span has an
/// infinite rate.
pub fn frequency_trend(timestamps: &[DateTime<Utc>], margin: f64) -> FrequencyTrend {
    if timestamps.len() < 2 {
        return FrequencyTrend::InsufficientData;
    }

    let mut sorted = timestamps.to_vec();
    sorted.sort();
    let n = sorted.len();
    let (older, recent) = if n % 2 == 1 {
        (&sorted[..=n / 2], &sorted[n / 2..])
    } else {
        (&sorted[..n / 2], &sorted[n / 2..])
    };

    // two points leave one occurrence per half, no rate to compare
    let (Some(older_rate), Some(recent_rate)) = (half_rate(older), half_rate(recent)) else {
        return FrequencyTrend::Stable;
    };

    if recent_rate < older_rate * (1.0 - margin) {
        FrequencyTrend::Improving
    } else if recent_rate > older_rate * (1.0 + margin) {
        FrequencyTrend::Concerning
    } else {
        FrequencyTrend::Stable
    }
}

fn half_rate(half: &[DateTime<Utc>]) -> Option<f64> {
    let (first, last) = (half.first()?, half.last()?);
    if half.len() < 2 {
        return None;
    }
    let span_secs = (*last - *first).num_milliseconds() as f64 / 1000.0;
    let intervals = (half.len() - 1) as f64;
    if span_secs <= 0.0 {
        Some(f64::INFINITY)
    } else {
        Some(intervals / span_secs)
    }
}

pub fn seasonal_pattern(timestamps: &[DateTime<Utc>]) -> SeasonalPattern {
    if timestamps.len() < 2 {
        return SeasonalPattern::None;
    }
    let n = timestamps.len() as f64;

    let business = timestamps.iter().filter(|t| (9..=17).contains(&t.hour())).count() as f64;
    if business / n > 0.7 {
        return SeasonalPattern::BusinessHours;
    }

    let weekend = timestamps
        .iter()
        .filter(|t| matches!(t.weekday(), Weekday::Sat | Weekday::Sun))
        .count() as f64;
    if weekend / n > 0.7 {
        return SeasonalPattern::Weekends;
    }

    let night = timestamps
        .iter()
        .filter(|t| t.hour() >= 22 || t.hour() <= 6)
        .count() as f64;
    if night / n > 0.5 {
        return SeasonalPattern::MaintenanceWindows;
    }

    SeasonalPattern::None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    fn occ(ts: DateTime<Utc>, secs: f64, success: bool, cause: &str) -> Occurrence {
        Occurrence::new(ts, Severity::Medium, secs, success, cause, "automated", 0.8)
    }

    #[test]
    fn test_trend_needs_two_points() {
        assert_eq!(frequency_trend(&[], 0.2), FrequencyTrend::InsufficientData);
        assert_eq!(frequency_trend(&[at(1, 0)], 0.2), FrequencyTrend::InsufficientData);
    }

    #[test]
    fn test_trend_even_spacing_is_stable() {
        assert_eq!(frequency_trend(&[at(1, 0), at(2, 0)], 0.2), FrequencyTrend::Stable);
        assert_eq!(
            frequency_trend(&[at(1, 0), at(2, 0), at(3, 0)], 0.2),
            FrequencyTrend::Stable
        );
        assert_eq!(
            frequency_trend(&[at(1, 0), at(3, 0), at(5, 0), at(7, 0)], 0.2),
            FrequencyTrend::Stable
        );
    }

    #[test]
    fn test_trend_small_shift_within_margin_is_stable() {
        // middle point an hour early: 23h vs 25h intervals
        let ts = [at(1, 0), at(1, 23), at(3, 0)];
        assert_eq!(frequency_trend(&ts, 0.2), FrequencyTrend::Stable);
    }

    #[test]
    fn test_trend_ignores_input_order() {
        let ts = [at(10, 0), at(1, 0), at(9, 0)];
        assert_eq!(frequency_trend(&ts, 0.2), FrequencyTrend::Concerning);
    }

    #[test]
    fn test_trend_same_instant_burst_is_concerning() {
        let ts = [at(1, 0), at(5, 0), at(5, 0)];
        assert_eq!(frequency_trend(&ts, 0.2), FrequencyTrend::Concerning);
        let ts = [at(5, 0), at(5, 0), at(5, 0)];
        assert_eq!(frequency_trend(&ts, 0.2), FrequencyTrend::Stable);
    }

    #[test]
    fn test_trend_bunching_recent_is_concerning() {
        let ts = [at(1, 0), at(9, 0), at(10, 0)];
        assert_eq!(frequency_trend(&ts, 0.2), FrequencyTrend::Concerning);
    }

    #[test]
    fn test_trend_bunching_old_is_improving() {
        let ts = [at(1, 0), at(2, 0), at(10, 0)];
        assert_eq!(frequency_trend(&ts, 0.2), FrequencyTrend::Improving);
    }

    #[test]
    fn test_seasonal_weekends() {
        // 2026-03-07 and 2026-03-08 are a Saturday and Sunday
        let ts = [at(7, 3), at(8, 4), at(7, 5)];
        assert_eq!(seasonal_pattern(&ts), SeasonalPattern::Weekends);
    }

    #[test]
    fn test_seasonal_business_hours() {
        let ts = [at(2, 10), at(3, 11), at(4, 15)];
        assert_eq!(seasonal_pattern(&ts), SeasonalPattern::BusinessHours);
    }

    #[test]
    fn test_avg_resolution_counts_successes_only() {
        let mut record = IssueRecord::new();
        record.push(occ(at(1, 0), 10.0, true, "a"), 3, 0.2);
        record.push(occ(at(2, 0), 500.0, false, "a"), 3, 0.2);
        record.push(occ(at(3, 0), 20.0, true, "a"), 3, 0.2);
        assert!((record.avg_resolution_time() - 15.0).abs() < 1e-9);
        assert!((record.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_common_causes_skip_unknown() {
        let mut record = IssueRecord::new();
        record.push(occ(at(1, 0), 1.0, true, "Unknown"), 3, 0.2);
        record.push(occ(at(2, 0), 1.0, true, "log growth"), 3, 0.2);
        record.push(occ(at(3, 0), 1.0, true, "log growth"), 3, 0.2);
        assert_eq!(record.common_causes(), ["log growth".to_string()]);
    }

    #[test]
    fn test_predict_weights_recent_higher() {
        let mut record = IssueRecord::new();
        record.push(occ(at(1, 0), 1.0, true, "old cause"), 3, 0.2);
        record.push(occ(at(2, 0), 1.0, true, "old cause"), 3, 0.2);
        record.push(occ(at(3, 0), 1.0, true, "new cause"), 3, 0.2);
        let ranked = record.predict_root_cause();
        // old: 1 + 2 = 3, new: 3 -> tie broken by label
        assert_eq!(ranked.len(), 2);
        assert!((ranked[0].1 - 0.5).abs() < 1e-9);
        assert_eq!(ranked[0].0, "new cause");
    }

    #[test]
    fn test_recommendation_confidence() {
        let mut record = IssueRecord::new();
        assert_eq!(record.recommendation_confidence("automated"), 0.3);
        record.push(occ(at(1, 0), 1.0, true, "a"), 3, 0.2);
        assert_eq!(record.recommendation_confidence("manual"), 0.4);
        assert!((record.recommendation_confidence("Automated") - 0.95).abs() < 1e-9);
    }
}
