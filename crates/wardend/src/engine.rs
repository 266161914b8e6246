//! The `Warden` facade: one entry point for collaborators.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use warden_shared::analytics::{Recommendation, TrendingIssue};
use warden_shared::{
    AnalyticsEngine, AnalyticsSnapshot, CatalogHandle, CatalogSource, Category, HistoryStore,
    IssueRecord, MatchResult, Matcher, Result,
};

use crate::config::Config;
use crate::intent::{Interpreter, KeywordInterpreter};
use crate::orchestrator::{ExecutionSettings, Orchestrator, RemediationRequest, RemediationState};
use crate::pending::PendingJournal;
use crate::runner::{CommandRunner, ShellRunner};

pub struct Warden<R: CommandRunner = ShellRunner> {
    catalog: Arc<CatalogHandle>,
    catalog_source: CatalogSource,
    matcher: Matcher,
    history: Arc<HistoryStore>,
    analytics: AnalyticsEngine,
    orchestrator: Orchestrator<R>,
    interpreter: Box<dyn Interpreter>,
}

impl Warden<ShellRunner> {
    /// Build from configuration with the real shell runner.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Self::with_runner(config, ShellRunner::new(config.executor.shell.clone()))
    }
}

impl<R: CommandRunner> Warden<R> {
    /// Load the catalog and history named in `config`.
    ///
    /// An unreadable catalog is fatal; unreadable history is set aside.
    pub fn with_runner(config: &Config, runner: R) -> anyhow::Result<Self> {
        config.validate()?;
        let source = CatalogSource::file(config.catalog.path.clone());
        let catalog = CatalogHandle::load(&source)
            .with_context(|| format!("loading catalog {}", config.catalog.path.display()))?;
        let history = HistoryStore::open(config.history.path.clone(), config.history.options());
        let journal = PendingJournal::new(config.executor.pending_path.clone());
        Ok(Self::from_parts(catalog, source, history, config, runner).with_journal(journal))
    }

    pub fn from_parts(
        catalog: CatalogHandle,
        catalog_source: CatalogSource,
        history: HistoryStore,
        config: &Config,
        runner: R,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let history = Arc::new(history);
        history.attach_catalog(Arc::clone(&catalog));

        let settings = ExecutionSettings {
            command_timeout: Duration::from_secs(config.executor.command_timeout_secs),
            max_output_bytes: config.executor.max_output_bytes,
            max_finished: config.executor.max_finished_requests,
        };
        let orchestrator = Orchestrator::new(
            Arc::clone(&catalog),
            Arc::clone(&history),
            Arc::new(runner),
            settings,
        );
        let analytics = AnalyticsEngine::new(Arc::clone(&history), Arc::clone(&catalog));

        info!(
            "Warden ready: {} patterns, {} tracked signatures",
            catalog.current().len(),
            history.signatures().len()
        );

        Self {
            catalog,
            catalog_source,
            matcher: config.matcher.build(),
            history,
            analytics,
            orchestrator,
            interpreter: Box::new(KeywordInterpreter),
        }
    }

    /// Keep requests awaiting approval in `journal` across processes.
    pub fn with_journal(mut self, journal: PendingJournal) -> Self {
        self.orchestrator = self.orchestrator.with_journal(journal);
        self
    }

    pub fn catalog(&self) -> &Arc<CatalogHandle> {
        &self.catalog
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn orchestrator(&self) -> &Orchestrator<R> {
        &self.orchestrator
    }

    // =========================================================================
    // Detection
    // =========================================================================

    pub fn match_evidence(&self, evidence: &str, category_hint: Option<Category>) -> Vec<MatchResult> {
        let catalog = self.catalog.current();
        self.matcher.match_evidence(&catalog, evidence, category_hint)
    }

    /// Interpret free text, then match with the resulting hint.
    ///
    /// A hint that finds nothing falls back to the whole catalog.
    pub fn handle_query(&self, text: &str) -> Vec<MatchResult> {
        let intent = self.interpreter.interpret(text);
        let results = self.match_evidence(&intent.evidence, intent.category_hint);
        if results.is_empty() && intent.category_hint.is_some() {
            return self.match_evidence(&intent.evidence, None);
        }
        results
    }

    /// Re-read the catalog from its original source.
    pub fn reload_catalog(&self) -> Result<usize> {
        let fresh = self.catalog.reload(&self.catalog_source)?;
        info!("Catalog reloaded: {} patterns", fresh.len());
        Ok(fresh.len())
    }

    // =========================================================================
    // Remediation
    // =========================================================================

    pub async fn propose(&self, matched: &MatchResult) -> Result<RemediationRequest> {
        self.orchestrator.propose(matched).await
    }

    pub async fn approve(&self, id: Uuid) -> Result<RemediationRequest> {
        self.orchestrator.approve(id).await
    }

    pub async fn reject(&self, id: Uuid, reason: Option<&str>) -> Result<RemediationRequest> {
        self.orchestrator.reject(id, reason).await
    }

    pub async fn execute(&self, id: Uuid) -> Result<RemediationRequest> {
        self.orchestrator.execute(id).await
    }

    pub async fn pending(&self) -> Vec<RemediationRequest> {
        self.orchestrator.pending().await
    }

    /// Match evidence, propose the best match, and run it if SAFE.
    ///
    /// Returns `None` when nothing matched.
    pub async fn process_evidence(&self, evidence: &str) -> Result<Option<RemediationRequest>> {
        let Some(best) = self.handle_query(evidence).into_iter().next() else {
            return Ok(None);
        };

        let request = self.propose(&best).await?;
        if request.state == RemediationState::AutoExecuting {
            return self.execute(request.id).await.map(Some);
        }
        Ok(Some(request))
    }

    // =========================================================================
    // History and analytics
    // =========================================================================

    pub fn get_history(&self, signature: &str) -> Option<IssueRecord> {
        self.history.get(signature)
    }

    pub fn predict_root_cause(&self, signature: &str) -> Vec<(String, f64)> {
        self.history.predict_root_cause(signature)
    }

    pub fn recommendation_confidence(&self, signature: &str, method: &str) -> f64 {
        self.history.recommendation_confidence(signature, method)
    }

    pub fn archive(&self, signature: &str) -> Result<bool> {
        self.history.archive(signature)
    }

    pub fn snapshot(&self) -> AnalyticsSnapshot {
        self.analytics.snapshot()
    }

    pub fn trending(&self, window_days: i64) -> Vec<TrendingIssue> {
        self.analytics.trending(window_days)
    }

    pub fn recommendations(&self) -> Vec<Recommendation> {
        self.analytics.recommendations()
    }
}
