//! Pattern catalog: load, lookup and atomic reload.
//!
//! A catalog document is a list of patterns in declaration order:
//!
//! ```yaml
//! patterns:
//!   - id: disk_full
//!     category: ubuntu_os
//!     keywords: [disk, full]
//!     regex_patterns: ['no space left on device']
//!     remediation: ['df -h', 'journalctl --vacuum-size=200M']
//!     safety_level: MEDIUM
//!     confidence_threshold: 0.5
//! ```
//!
//! Loading is all-or-nothing. A single bad entry rejects the whole document.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::error::{Result, WardenError};
use crate::pattern::{Category, PatternDefinition, PatternSpec};

/// Where a catalog document comes from.
#[derive(Debug, Clone)]
pub enum CatalogSource {
    Yaml(String),
    Json(String),
    /// File path; `.json` is parsed as JSON, anything else as YAML.
    File(PathBuf),
}

impl CatalogSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        CatalogSource::File(path.into())
    }

    fn describe(&self) -> String {
        match self {
            CatalogSource::Yaml(_) => "inline yaml".to_string(),
            CatalogSource::Json(_) => "inline json".to_string(),
            CatalogSource::File(path) => path.display().to_string(),
        }
    }

    fn read_specs(&self) -> Result<Vec<PatternSpec>> {
        match self {
            CatalogSource::Yaml(text) => parse_yaml(text),
            CatalogSource::Json(text) => parse_json(text),
            CatalogSource::File(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    WardenError::catalog(format!("cannot read {}: {}", path.display(), e))
                })?;
                if is_json_path(path) {
                    parse_json(&text)
                } else {
                    parse_yaml(&text)
                }
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogDocument {
    patterns: Vec<PatternSpec>,
}

impl CatalogDocument {
    fn into_specs(self) -> Result<Vec<PatternSpec>> {
        if self.patterns.is_empty() {
            return Err(WardenError::catalog("catalog declares no patterns"));
        }
        Ok(self.patterns)
    }
}

fn parse_yaml(text: &str) -> Result<Vec<PatternSpec>> {
    let doc: CatalogDocument = serde_yaml::from_str(text)
        .map_err(|e| WardenError::catalog(format!("malformed yaml: {}", e)))?;
    doc.into_specs()
}

fn parse_json(text: &str) -> Result<Vec<PatternSpec>> {
    let doc: CatalogDocument = serde_json::from_str(text)
        .map_err(|e| WardenError::catalog(format!("malformed json: {}", e)))?;
    doc.into_specs()
}

fn is_json_path(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// An immutable, validated set of patterns.
#[derive(Debug, Default)]
pub struct Catalog {
    patterns: Vec<Arc<PatternDefinition>>,
    index: HashMap<String, usize>,
}

impl Catalog {
    /// Parse and validate a whole document.
    pub fn load(source: &CatalogSource) -> Result<Self> {
        let specs = source.read_specs()?;
        let catalog = Self::from_specs(specs)?;
        info!(
            "Loaded {} patterns from {}",
            catalog.len(),
            source.describe()
        );
        Ok(catalog)
    }

    pub fn from_specs(specs: Vec<PatternSpec>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut patterns = Vec::with_capacity(specs.len());
        let mut index = HashMap::with_capacity(specs.len());

        for spec in specs {
            let def = PatternDefinition::from_spec(spec)?;
            if !seen.insert(def.id.clone()) {
                return Err(WardenError::catalog(format!("duplicate pattern id '{}'", def.id)));
            }
            index.insert(def.id.clone(), patterns.len());
            patterns.push(Arc::new(def));
        }

        Ok(Self { patterns, index })
    }

    /// Patterns of one category, in declaration order.
    pub fn lookup(&self, category: Category) -> Vec<Arc<PatternDefinition>> {
        self.patterns
            .iter()
            .filter(|p| p.category == category)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<PatternDefinition>> {
        self.index.get(id).map(|&i| Arc::clone(&self.patterns[i]))
    }

    pub fn category_of(&self, id: &str) -> Option<Category> {
        self.index.get(id).map(|&i| self.patterns[i].category)
    }

    /// All patterns in declaration order.
    pub fn patterns(&self) -> &[Arc<PatternDefinition>] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Shared handle over the active catalog.
///
/// Readers take a cheap `Arc` clone and keep a consistent view even if a
/// reload lands while they are matching.
#[derive(Debug, Default)]
pub struct CatalogHandle {
    current: RwLock<Arc<Catalog>>,
}

impl CatalogHandle {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    pub fn load(source: &CatalogSource) -> Result<Self> {
        Ok(Self::new(Catalog::load(source)?))
    }

    pub fn current(&self) -> Arc<Catalog> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn lookup(&self, category: Category) -> Vec<Arc<PatternDefinition>> {
        self.current().lookup(category)
    }

    /// Replace the active catalog. On error the previous one stays active.
    pub fn reload(&self, source: &CatalogSource) -> Result<Arc<Catalog>> {
        let fresh = match Catalog::load(source) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                warn!("Catalog reload from {} rejected: {}", source.describe(), e);
                return Err(e);
            }
        };

        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::clone(&fresh);
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_PATTERNS: &str = r#"
patterns:
  - id: disk_full
    category: ubuntu_os
    keywords: [disk, full]
    safety_level: SAFE
    confidence_threshold: 0.5
  - id: pod_crashloop
    category: kubernetes
    regex_patterns: ['CrashLoopBackOff']
    remediation: ['kubectl get pods -A']
    safety_level: SAFE
    confidence_threshold: 0.8
"#;

    #[test]
    fn test_load_yaml() {
        let catalog = Catalog::load(&CatalogSource::Yaml(TWO_PATTERNS.to_string())).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.category_of("pod_crashloop"), Some(Category::Kubernetes));
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn test_load_json() {
        let json = r#"{"patterns": [{"id": "heal_pending", "category": "glusterfs",
            "keywords": ["heal"], "safety_level": "MEDIUM", "confidence_threshold": 0.3}]}"#;
        let catalog = Catalog::load(&CatalogSource::Json(json.to_string())).unwrap();
        assert_eq!(catalog.lookup(Category::Glusterfs).len(), 1);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let yaml = r#"
patterns:
  - {id: a, category: ubuntu_os, keywords: [x], safety_level: SAFE, confidence_threshold: 0.1}
  - {id: a, category: ubuntu_os, keywords: [y], safety_level: SAFE, confidence_threshold: 0.1}
"#;
        let err = Catalog::load(&CatalogSource::Yaml(yaml.to_string())).unwrap_err();
        assert!(matches!(err, WardenError::CatalogParse(_)));
    }

    #[test]
    fn test_reload_failure_keeps_previous() {
        let handle = CatalogHandle::load(&CatalogSource::Yaml(TWO_PATTERNS.to_string())).unwrap();
        let bad = CatalogSource::Yaml("patterns: [{id: broken}]".to_string());
        assert!(handle.reload(&bad).is_err());
        assert_eq!(handle.current().len(), 2);
    }

    #[test]
    fn test_misspelled_top_level_key_rejected() {
        let handle = CatalogHandle::load(&CatalogSource::Yaml(TWO_PATTERNS.to_string())).unwrap();
        let typo = TWO_PATTERNS.replace("patterns:", "pattern:");
        let err = handle.reload(&CatalogSource::Yaml(typo)).unwrap_err();
        assert!(matches!(err, WardenError::CatalogParse(_)));
        assert_eq!(handle.current().len(), 2);

        let json = r#"{"pattern": []}"#;
        assert!(Catalog::load(&CatalogSource::Json(json.to_string())).is_err());
    }

    #[test]
    fn test_empty_document_rejected() {
        for text in ["patterns: []", "{}", ""] {
            assert!(
                Catalog::load(&CatalogSource::Yaml(text.to_string())).is_err(),
                "{:?}",
                text
            );
        }
    }

    #[test]
    fn test_misspelled_entry_field_rejected() {
        let yaml = r#"
patterns:
  - {id: a, category: ubuntu_os, keyword: [disk], regex_patterns: ['full'], safety_level: SAFE, confidence_threshold: 0.1}
"#;
        let err = Catalog::load(&CatalogSource::Yaml(yaml.to_string())).unwrap_err();
        assert!(err.to_string().contains("keyword"), "{}", err);
    }
}
