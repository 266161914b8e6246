//! Shared types and engines for Warden components.
//!
//! Everything here is synchronous: catalog, matcher, safety classifier,
//! history store and analytics. The daemon crate adds execution on top.

pub mod analytics;
pub mod catalog;
pub mod error;
pub mod history;
pub mod issue_record;
pub mod matcher;
pub mod pattern;
pub mod safety;

pub use analytics::{AnalyticsEngine, AnalyticsSnapshot, Recommendation, TrendingIssue};
pub use catalog::{Catalog, CatalogHandle, CatalogSource};
pub use error::{Result, WardenError};
pub use history::{HistoryDocument, HistoryOptions, HistoryStore};
pub use issue_record::{FrequencyTrend, IssueRecord, Occurrence, SeasonalPattern};
pub use matcher::{MatchResult, MatchWeights, Matcher};
pub use pattern::{Category, PatternDefinition, RiskRating, Severity};

/// Default catalog location
pub const CATALOG_PATH: &str = "/etc/warden/patterns.yaml";

/// Default history document location
pub const HISTORY_PATH: &str = "/var/lib/warden/historical_issues.json";

/// State directory for Warden
pub const STATE_DIR: &str = "/var/lib/warden";
