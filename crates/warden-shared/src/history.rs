//! Issue history store: bounded per-signature ledger, flushed to disk on every record.
//!
//! On-disk layout (JSON):
//!
//! ```json
//! {
//!   "issue_history": { "<signature>": { "occurrences": [...], "success_rate": 1.0, ... } },
//!   "learning_analytics": { "total_issues_tracked": 1, ... }
//! }
//! ```
//!
//! A document that fails to parse is moved aside and the store starts empty.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

use crate::analytics::{self, AnalyticsSnapshot};
use crate::catalog::CatalogHandle;
use crate::error::{Result, WardenError};
use crate::issue_record::{IssueRecord, Occurrence, DEFAULT_RETENTION, DEFAULT_TREND_MARGIN};
use crate::pattern::Category;

/// Durable history document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryDocument {
    #[serde(default)]
    pub issue_history: BTreeMap<String, IssueRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_analytics: Option<AnalyticsSnapshot>,
}

impl HistoryDocument {
    /// Read a document. A missing file is an empty document.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&content).map_err(|e| {
            WardenError::HistoryCorruption(format!("{}: {}", path.display(), e))
        })
    }

    /// Write atomically through a sibling temp file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryOptions {
    /// Occurrences kept per signature (N)
    pub retention: usize,
    /// Relative rate change that counts as a trend
    pub trend_margin: f64,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            trend_margin: DEFAULT_TREND_MARGIN,
        }
    }
}

type Slot = Arc<Mutex<IssueRecord>>;

/// Owner of every occurrence and issue record.
pub struct HistoryStore {
    path: Option<PathBuf>,
    options: HistoryOptions,
    records: RwLock<BTreeMap<String, Slot>>,
    persist_lock: Mutex<()>,
    generation: AtomicU64,
    catalog: RwLock<Option<Arc<CatalogHandle>>>,
}

impl HistoryStore {
    /// Store without a backing file
    pub fn in_memory(options: HistoryOptions) -> Self {
        Self::with_records(None, options, BTreeMap::new())
    }

    /// Load the store from `path`. Never fails: corrupt history is set aside.
    pub fn open(path: impl Into<PathBuf>, options: HistoryOptions) -> Self {
        let path = path.into();
        let document = match HistoryDocument::load(&path) {
            Ok(doc) => doc,
            Err(e) => {
                error!("History unreadable, starting empty: {}", e);
                set_aside(&path);
                HistoryDocument::default()
            }
        };

        info!(
            "Loaded history for {} signatures from {}",
            document.issue_history.len(),
            path.display()
        );
        Self::with_records(Some(path), options, document.issue_history)
    }

    fn with_records(
        path: Option<PathBuf>,
        options: HistoryOptions,
        loaded: BTreeMap<String, IssueRecord>,
    ) -> Self {
        let records = loaded
            .into_iter()
            .map(|(sig, mut record)| {
                record.normalize(options.retention, options.trend_margin);
                (sig, Arc::new(Mutex::new(record)))
            })
            .collect();

        Self {
            path,
            options,
            records: RwLock::new(records),
            persist_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            catalog: RwLock::new(None),
        }
    }

    /// Catalog used to attach categories to the persisted analytics.
    pub fn attach_catalog(&self, catalog: Arc<CatalogHandle>) {
        *write(&self.catalog) = Some(catalog);
    }

    pub fn options(&self) -> HistoryOptions {
        self.options
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Bumped on every successful mutation; lets readers invalidate caches.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Append an occurrence and flush.
    ///
    /// The in-memory update always lands; a flush failure is returned to the
    /// caller after it.
    pub fn record(&self, signature: &str, occurrence: Occurrence) -> Result<IssueRecord> {
        let slot = self.slot(signature);
        let updated = {
            let mut record = lock(&slot);
            record.push(occurrence, self.options.retention, self.options.trend_margin);
            record.clone()
        };
        self.generation.fetch_add(1, Ordering::SeqCst);

        info!(
            "Recorded occurrence for {}: retained={}, success_rate={:.2}, trend={}",
            signature,
            updated.len(),
            updated.success_rate(),
            updated.frequency_trend().as_str()
        );

        self.flush()?;
        Ok(updated)
    }

    fn slot(&self, signature: &str) -> Slot {
        if let Some(slot) = read(&self.records).get(signature) {
            return Arc::clone(slot);
        }
        let mut records = write(&self.records);
        Arc::clone(
            records
                .entry(signature.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(IssueRecord::new()))),
        )
    }

    pub fn get(&self, signature: &str) -> Option<IssueRecord> {
        let slot = read(&self.records).get(signature).cloned()?;
        let record = lock(&slot).clone();
        Some(record)
    }

    pub fn signatures(&self) -> Vec<String> {
        read(&self.records).keys().cloned().collect()
    }

    /// Consistent-per-record copy of every record.
    pub fn records(&self) -> BTreeMap<String, IssueRecord> {
        let slots: Vec<(String, Slot)> = read(&self.records)
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        slots
            .into_iter()
            .map(|(k, slot)| {
                let record = lock(&slot).clone();
                (k, record)
            })
            .collect()
    }

    /// Ranked root-cause labels; empty when there is no history.
    pub fn predict_root_cause(&self, signature: &str) -> Vec<(String, f64)> {
        self.get(signature)
            .map(|r| r.predict_root_cause())
            .unwrap_or_default()
    }

    pub fn recommendation_confidence(&self, signature: &str, method: &str) -> f64 {
        self.get(signature)
            .map(|r| r.recommendation_confidence(method))
            .unwrap_or(0.3)
    }

    /// Hide a record from analytics. Returns false for unknown signatures.
    pub fn archive(&self, signature: &str) -> Result<bool> {
        let Some(slot) = read(&self.records).get(signature).cloned() else {
            return Ok(false);
        };
        lock(&slot).set_archived(true);
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!("Archived issue record {}", signature);
        self.flush()?;
        Ok(true)
    }

    fn category_lookup(&self) -> impl Fn(&str) -> Option<Category> {
        let catalog = read(&self.catalog).as_ref().map(|h| h.current());
        move |sig: &str| catalog.as_ref().and_then(|c| c.category_of(sig))
    }

    /// Current analytics over this store.
    pub fn compute_snapshot(&self) -> AnalyticsSnapshot {
        analytics::compute_snapshot(&self.records(), self.category_lookup())
    }

    /// Write the whole document to disk. No-op for in-memory stores.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = lock(&self.persist_lock);
        let issue_history = self.records();
        let learning_analytics = analytics::compute_snapshot(&issue_history, self.category_lookup());
        let document = HistoryDocument {
            issue_history,
            learning_analytics: Some(learning_analytics),
        };

        match document.save(path) {
            Ok(()) => {
                debug!("Flushed history to {}", path.display());
                Ok(())
            }
            Err(e) => {
                error!("Failed to flush history to {}: {}", path.display(), e);
                Err(e)
            }
        }
    }
}

fn set_aside(path: &Path) {
    let backup = path.with_extension("json.corrupt");
    match fs::rename(path, &backup) {
        Ok(()) => warn!("Moved corrupt history to {}", backup.display()),
        Err(e) => warn!("Could not move corrupt history aside: {}", e),
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|p| p.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|p| p.into_inner())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}
