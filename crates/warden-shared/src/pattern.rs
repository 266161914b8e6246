//! Pattern definitions: the typed, validated form of a catalog entry.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, WardenError};

/// Domain a pattern belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[serde(alias = "Ubuntu OS", alias = "ubuntu")]
    UbuntuOs,
    #[serde(alias = "Kubernetes", alias = "k8s")]
    Kubernetes,
    #[serde(alias = "GlusterFS", alias = "gluster")]
    Glusterfs,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::UbuntuOs, Category::Kubernetes, Category::Glusterfs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::UbuntuOs => "ubuntu_os",
            Category::Kubernetes => "kubernetes",
            Category::Glusterfs => "glusterfs",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Category::UbuntuOs => "Ubuntu OS",
            Category::Kubernetes => "Kubernetes",
            Category::Glusterfs => "GlusterFS",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ubuntu_os" | "ubuntu os" | "ubuntu" => Ok(Category::UbuntuOs),
            "kubernetes" | "k8s" => Ok(Category::Kubernetes),
            "glusterfs" | "gluster" => Ok(Category::Glusterfs),
            other => Err(WardenError::catalog(format!("unknown category '{}'", other))),
        }
    }
}

/// Risk of running a command. Ordered: Safe < Medium < High.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskRating {
    Safe,
    Medium,
    High,
}

impl RiskRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskRating::Safe => "SAFE",
            RiskRating::Medium => "MEDIUM",
            RiskRating::High => "HIGH",
        }
    }
}

impl fmt::Display for RiskRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational severity of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Weight used when ranking trending issues.
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Low => 1.0,
            Severity::Medium => 2.0,
            Severity::High => 3.0,
            Severity::Critical => 4.0,
        }
    }
}

/// One entry of a catalog document, as written by operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternSpec {
    pub id: String,
    pub category: Category,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub regex_patterns: Vec<String>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default, alias = "remediation_steps")]
    pub remediation: Vec<String>,
    pub safety_level: RiskRating,
    pub confidence_threshold: f64,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub root_cause: Option<String>,
}

/// A validated pattern with compiled detection rules.
#[derive(Debug, Clone)]
pub struct PatternDefinition {
    pub id: String,
    pub category: Category,
    pub name: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub regexes: Vec<Regex>,
    pub symptoms: Vec<String>,
    pub remediation: Vec<String>,
    pub safety_level: RiskRating,
    pub confidence_threshold: f64,
    pub severity: Severity,
    pub root_cause: String,
}

impl PatternDefinition {
    /// Validate a spec and compile its regexes.
    pub fn from_spec(spec: PatternSpec) -> Result<Self> {
        let id = spec.id.trim().to_string();
        if id.is_empty() {
            return Err(WardenError::catalog("pattern id cannot be empty"));
        }

        if !(0.0..=1.0).contains(&spec.confidence_threshold) {
            return Err(WardenError::catalog(format!(
                "pattern '{}': confidence_threshold {} is outside [0, 1]",
                id, spec.confidence_threshold
            )));
        }

        let mut keywords: Vec<String> = Vec::with_capacity(spec.keywords.len());
        for keyword in spec.keywords.iter().map(|k| k.trim()) {
            if !keyword.is_empty() && !keywords.iter().any(|k| k.eq_ignore_ascii_case(keyword)) {
                keywords.push(keyword.to_string());
            }
        }
        let sources: Vec<&String> = spec
            .regex_patterns
            .iter()
            .filter(|r| !r.trim().is_empty())
            .collect();

        if keywords.is_empty() && sources.is_empty() {
            return Err(WardenError::catalog(format!(
                "pattern '{}' has no detection rule (needs a keyword or regex)",
                id
            )));
        }

        let mut regexes = Vec::with_capacity(sources.len());
        for source in sources {
            let re = RegexBuilder::new(source)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    WardenError::catalog(format!("pattern '{}' has invalid regex: {}", id, e))
                })?;
            regexes.push(re);
        }

        Ok(Self {
            name: spec.name.unwrap_or_else(|| id.clone()),
            description: spec.description.unwrap_or_default(),
            root_cause: spec
                .root_cause
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| id.clone()),
            id,
            category: spec.category,
            keywords,
            regexes,
            symptoms: spec.symptoms,
            remediation: spec.remediation,
            safety_level: spec.safety_level,
            confidence_threshold: spec.confidence_threshold,
            severity: spec.severity,
        })
    }
}
