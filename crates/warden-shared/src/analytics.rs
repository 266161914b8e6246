//! Learning analytics: read-only aggregation over every issue record.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::catalog::{Catalog, CatalogHandle};
use crate::history::HistoryStore;
use crate::issue_record::{FrequencyTrend, IssueRecord};
use crate::pattern::Category;

/// Maximum trending issues reported
pub const TRENDING_LIMIT: usize = 10;

/// Success rate below which a procedure review is suggested
const LOW_SUCCESS_RATE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCount {
    /// `None` for signatures no longer in the catalog
    pub category: Option<Category>,
    pub signatures: usize,
    pub occurrences: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub improving_areas: Vec<String>,
    pub stable_areas: Vec<String>,
    pub concerning_areas: Vec<String>,
}

/// Process-wide derived view over the history store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub total_issues_tracked: usize,
    pub total_occurrences: usize,
    pub overall_success_rate: f64,
    /// Seconds, averaged over successful occurrences
    pub avg_resolution_time: f64,
    pub most_common_categories: Vec<CategoryCount>,
    pub trend_analysis: TrendAnalysis,
    pub generated_at: DateTime<Utc>,
}

impl Default for AnalyticsSnapshot {
    fn default() -> Self {
        Self {
            total_issues_tracked: 0,
            total_occurrences: 0,
            overall_success_rate: 0.0,
            avg_resolution_time: 0.0,
            most_common_categories: Vec::new(),
            trend_analysis: TrendAnalysis::default(),
            generated_at: Utc::now(),
        }
    }
}

/// Build a snapshot from a set of records. Archived and empty records are skipped.
///
/// Signatures whose trend is still undetermined are listed as stable.
pub fn compute_snapshot<F>(records: &BTreeMap<String, IssueRecord>, category_of: F) -> AnalyticsSnapshot
where
    F: Fn(&str) -> Option<Category>,
{
    let mut snapshot = AnalyticsSnapshot::default();
    let mut by_category: HashMap<Option<Category>, (usize, usize)> = HashMap::new();
    let mut weighted_success = 0.0;
    let mut resolution_sum = 0.0;
    let mut resolution_count = 0usize;

    for (signature, record) in records {
        if record.is_empty() || record.is_archived() {
            continue;
        }
        let count = record.len();
        snapshot.total_issues_tracked += 1;
        snapshot.total_occurrences += count;
        weighted_success += record.success_rate() * count as f64;

        let successes = record.success_count();
        resolution_sum += record.avg_resolution_time() * successes as f64;
        resolution_count += successes;

        let entry = by_category.entry(category_of(signature)).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += count;

        let areas = &mut snapshot.trend_analysis;
        match record.frequency_trend() {
            FrequencyTrend::Improving => areas.improving_areas.push(signature.clone()),
            FrequencyTrend::Concerning => areas.concerning_areas.push(signature.clone()),
            FrequencyTrend::Stable | FrequencyTrend::InsufficientData => {
                areas.stable_areas.push(signature.clone())
            }
        }
    }

    if snapshot.total_occurrences > 0 {
        snapshot.overall_success_rate = weighted_success / snapshot.total_occurrences as f64;
    }
    if resolution_count > 0 {
        snapshot.avg_resolution_time = resolution_sum / resolution_count as f64;
    }

    let mut ranking: Vec<CategoryCount> = by_category
        .into_iter()
        .map(|(category, (signatures, occurrences))| CategoryCount {
            category,
            signatures,
            occurrences,
        })
        .collect();
    ranking.sort_by(|a, b| {
        b.occurrences
            .cmp(&a.occurrences)
            .then_with(|| a.category.cmp(&b.category))
    });
    snapshot.most_common_categories = ranking;
    snapshot
}

/// An issue with recent activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingIssue {
    pub signature: String,
    pub frequency: usize,
    pub avg_severity: f64,
    pub success_rate: f64,
    pub trend: FrequencyTrend,
    pub last_occurrence: DateTime<Utc>,
}

impl TrendingIssue {
    pub fn score(&self) -> f64 {
        self.frequency as f64 * self.avg_severity
    }
}

/// Issues seen within `window_days` of `now`, ranked by frequency × severity.
pub fn trending(
    records: &BTreeMap<String, IssueRecord>,
    window_days: i64,
    now: DateTime<Utc>,
) -> Vec<TrendingIssue> {
    let cutoff = now - Duration::days(window_days.max(0));
    let mut out: Vec<TrendingIssue> = records
        .iter()
        .filter(|(_, r)| !r.is_archived())
        .filter_map(|(signature, record)| {
            let recent: Vec<_> = record.occurrences().filter(|o| o.timestamp() > cutoff).collect();
            let last = recent.last()?;
            let n = recent.len() as f64;
            Some(TrendingIssue {
                signature: signature.clone(),
                frequency: recent.len(),
                avg_severity: recent.iter().map(|o| o.severity().weight()).sum::<f64>() / n,
                success_rate: recent.iter().filter(|o| o.success()).count() as f64 / n,
                trend: record.frequency_trend(),
                last_occurrence: last.timestamp(),
            })
        })
        .collect();

    out.sort_by(|a, b| b.score().total_cmp(&a.score()));
    out.truncate(TRENDING_LIMIT);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    ProactiveMonitoring,
    ResolutionImprovement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub signature: String,
    pub priority: crate::pattern::Severity,
    pub message: String,
    pub suggested_actions: Vec<String>,
}

/// Suggestions derived from trends and success rates
pub fn proactive_recommendations(records: &BTreeMap<String, IssueRecord>) -> Vec<Recommendation> {
    use crate::pattern::Severity;

    let mut out = Vec::new();
    for (signature, record) in records {
        if record.is_empty() || record.is_archived() {
            continue;
        }

        if record.frequency_trend() == FrequencyTrend::Concerning {
            out.push(Recommendation {
                kind: RecommendationKind::ProactiveMonitoring,
                signature: signature.clone(),
                priority: Severity::High,
                message: format!(
                    "Increasing frequency detected for {}. Consider proactive monitoring.",
                    signature
                ),
                suggested_actions: vec![
                    "Increase monitoring frequency".to_string(),
                    "Review system capacity".to_string(),
                    "Implement preventive measures".to_string(),
                ],
            });
        }

        if record.success_rate() < LOW_SUCCESS_RATE {
            out.push(Recommendation {
                kind: RecommendationKind::ResolutionImprovement,
                signature: signature.clone(),
                priority: Severity::Medium,
                message: format!(
                    "Low success rate ({:.1}%) for {}. Review resolution procedures.",
                    record.success_rate() * 100.0,
                    signature
                ),
                suggested_actions: vec![
                    "Review resolution procedures".to_string(),
                    "Update troubleshooting guides".to_string(),
                    "Consider automation improvements".to_string(),
                ],
            });
        }
    }
    out
}

/// Snapshot provider with a cache keyed on the store generation.
///
/// Any `record` on the store bumps the generation, and a catalog reload swaps
/// the catalog `Arc`; either one invalidates the cached snapshot.
pub struct AnalyticsEngine {
    history: Arc<HistoryStore>,
    catalog: Arc<CatalogHandle>,
    cache: Mutex<Option<CachedSnapshot>>,
}

struct CachedSnapshot {
    generation: u64,
    catalog: Arc<Catalog>,
    snapshot: AnalyticsSnapshot,
}

impl AnalyticsEngine {
    pub fn new(history: Arc<HistoryStore>, catalog: Arc<CatalogHandle>) -> Self {
        Self {
            history,
            catalog,
            cache: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let generation = self.history.generation();
        let catalog = self.catalog.current();

        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(cached) = cache.as_ref() {
            if cached.generation == generation && Arc::ptr_eq(&cached.catalog, &catalog) {
                return cached.snapshot.clone();
            }
        }

        let lookup = Arc::clone(&catalog);
        let snapshot = compute_snapshot(&self.history.records(), move |sig| lookup.category_of(sig));
        *cache = Some(CachedSnapshot {
            generation,
            catalog,
            snapshot: snapshot.clone(),
        });
        snapshot
    }

    pub fn trending(&self, window_days: i64) -> Vec<TrendingIssue> {
        trending(&self.history.records(), window_days, Utc::now())
    }

    pub fn recommendations(&self) -> Vec<Recommendation> {
        proactive_recommendations(&self.history.records())
    }
}
