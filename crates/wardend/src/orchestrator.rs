//! Remediation orchestrator: gating, approval, execution, outcome recording.
//!
//! State machine:
//!
//! ```text
//! PROPOSED -> AUTO_EXECUTING -> SUCCEEDED | FAILED                        (SAFE)
//! PROPOSED -> AWAITING_APPROVAL -> APPROVED -> EXECUTING -> SUCCEEDED | FAILED
//!                               -> REJECTED
//! ```
//!
//! Every finished request (executed or rejected) writes exactly one
//! occurrence into the history store. Awaiting requests never time out and,
//! with a journal attached, survive a restart. Finished requests stay
//! queryable until `max_finished` newer ones have finished.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use warden_shared::issue_record::REJECTED_ROOT_CAUSE;
use warden_shared::safety;
use warden_shared::{
    CatalogHandle, Category, HistoryStore, MatchResult, Occurrence, Result, RiskRating, Severity,
    WardenError,
};

use crate::pending::PendingJournal;
use crate::redact;
use crate::runner::{CommandOutput, CommandRunner};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemediationState {
    Proposed,
    AutoExecuting,
    AwaitingApproval,
    Approved,
    Executing,
    Succeeded,
    Failed,
    Rejected,
}

impl RemediationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemediationState::Proposed => "PROPOSED",
            RemediationState::AutoExecuting => "AUTO_EXECUTING",
            RemediationState::AwaitingApproval => "AWAITING_APPROVAL",
            RemediationState::Approved => "APPROVED",
            RemediationState::Executing => "EXECUTING",
            RemediationState::Succeeded => "SUCCEEDED",
            RemediationState::Failed => "FAILED",
            RemediationState::Rejected => "REJECTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RemediationState::Succeeded | RemediationState::Failed | RemediationState::Rejected
        )
    }

    fn can_execute(&self) -> bool {
        matches!(self, RemediationState::AutoExecuting | RemediationState::Executing)
    }
}

impl fmt::Display for RemediationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rendered remediation command and its rating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedCommand {
    pub command: String,
    pub rating: RiskRating,
    /// Label of the safety rule that fired, if any
    pub rule: Option<String>,
    /// Placeholders no capture could fill
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Option<RemediationState>,
    pub to: RemediationState,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    /// Seconds from execution start to the last command
    pub resolution_time: f64,
    pub steps_executed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// One remediation attempt for one match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationRequest {
    pub id: Uuid,
    pub pattern_id: String,
    pub category: Category,
    pub severity: Severity,
    pub root_cause: String,
    pub confidence: f64,
    pub excerpt: String,
    pub commands: Vec<PlannedCommand>,
    /// Highest command rating, floored at the pattern's declared level
    pub rating: RiskRating,
    pub state: RemediationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub steps: Vec<CommandOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
}

impl RemediationRequest {
    fn transition(&mut self, to: RemediationState, note: Option<String>) {
        let now = Utc::now();
        info!(
            "Request {} ({}): {} -> {}",
            self.id,
            self.pattern_id,
            self.state.as_str(),
            to.as_str()
        );
        self.transitions.push(Transition {
            from: Some(self.state),
            to,
            at: now,
            note,
        });
        self.state = to;
        self.updated_at = now;
    }

    fn invalid(&self, action: &'static str) -> WardenError {
        WardenError::InvalidTransition {
            action,
            state: self.state.as_str().to_string(),
        }
    }
}

/// Fill `{name}` placeholders from named captures; unknown names stay put.
///
/// Captures come from evidence, so every value is shell-quoted and always
/// lands as a single argument. A value that cannot be quoted counts as
/// unresolved.
pub fn render_command(template: &str, captures: &BTreeMap<String, String>) -> (String, Vec<String>) {
    let mut unresolved = Vec::new();
    let rendered = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
        let name = &caps[1];
        match captures.get(name).map(|v| shlex::try_quote(v)) {
            Some(Ok(quoted)) => quoted.into_owned(),
            _ => {
                if !unresolved.iter().any(|u| u == name) {
                    unresolved.push(name.to_string());
                }
                caps[0].to_string()
            }
        }
    });
    (rendered.into_owned(), unresolved)
}

/// Render and rate one template. Unfilled placeholders need an operator.
fn plan_command(template: &str, captures: &BTreeMap<String, String>) -> PlannedCommand {
    let (command, unresolved) = render_command(template, captures);
    let assessment = safety::assess(&command);
    let mut rating = assessment.rating;
    let mut rule = assessment.rule.map(str::to_string);
    if !unresolved.is_empty() && rating < RiskRating::Medium {
        rating = RiskRating::Medium;
        rule = Some("unresolved placeholder".to_string());
    }
    PlannedCommand {
        command,
        rating,
        rule,
        unresolved,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutionSettings {
    pub command_timeout: Duration,
    pub max_output_bytes: usize,
    /// Finished requests kept for lookup
    pub max_finished: usize,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            max_output_bytes: 16_384,
            max_finished: 256,
        }
    }
}

#[derive(Default)]
struct Requests {
    by_id: HashMap<Uuid, RemediationRequest>,
    /// Terminal requests, oldest first
    finished: VecDeque<Uuid>,
}

impl Requests {
    fn retire(&mut self, id: Uuid, keep: usize) {
        self.finished.push_back(id);
        while self.finished.len() > keep {
            if let Some(old) = self.finished.pop_front() {
                self.by_id.remove(&old);
            }
        }
    }
}

/// Marks a request as running until dropped, even if `execute` is cancelled.
struct InFlight<'a> {
    running: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl<'a> InFlight<'a> {
    fn claim(running: &'a Mutex<HashSet<Uuid>>, id: Uuid) -> Option<Self> {
        let fresh = running.lock().unwrap_or_else(|p| p.into_inner()).insert(id);
        fresh.then_some(Self { running, id })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.id);
    }
}

pub struct Orchestrator<R: CommandRunner> {
    catalog: Arc<CatalogHandle>,
    history: Arc<HistoryStore>,
    runner: Arc<R>,
    settings: ExecutionSettings,
    requests: RwLock<Requests>,
    running: Mutex<HashSet<Uuid>>,
    journal: Option<Arc<PendingJournal>>,
}

impl<R: CommandRunner> Orchestrator<R> {
    pub fn new(
        catalog: Arc<CatalogHandle>,
        history: Arc<HistoryStore>,
        runner: Arc<R>,
        settings: ExecutionSettings,
    ) -> Self {
        Self {
            catalog,
            history,
            runner,
            settings,
            requests: RwLock::new(Requests::default()),
            running: Mutex::new(HashSet::new()),
            journal: None,
        }
    }

    /// Persist awaiting requests in `journal`, picking up the ones already there.
    pub fn with_journal(mut self, journal: PendingJournal) -> Self {
        let stored = journal.load();
        if !stored.is_empty() {
            info!(
                "Restored {} request(s) awaiting approval from {}",
                stored.len(),
                journal.path().display()
            );
        }
        let requests = self.requests.get_mut();
        for request in stored {
            requests.by_id.insert(request.id, request);
        }
        self.journal = Some(Arc::new(journal));
        self
    }

    pub fn settings(&self) -> ExecutionSettings {
        self.settings
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Create a request for a match and gate it straight away.
    ///
    /// SAFE requests land in AUTO_EXECUTING; anything else waits for an operator.
    pub async fn propose(&self, matched: &MatchResult) -> Result<RemediationRequest> {
        let pattern = self
            .catalog
            .current()
            .get(&matched.pattern_id)
            .ok_or_else(|| WardenError::UnknownPattern(matched.pattern_id.clone()))?;

        let commands: Vec<PlannedCommand> = pattern
            .remediation
            .iter()
            .map(|t| plan_command(t, &matched.captures))
            .collect();
        let rating = commands
            .iter()
            .map(|c| c.rating)
            .max()
            .unwrap_or(RiskRating::Safe)
            .max(pattern.safety_level);

        let now = Utc::now();
        let mut request = RemediationRequest {
            id: Uuid::new_v4(),
            pattern_id: pattern.id.clone(),
            category: pattern.category,
            severity: pattern.severity,
            root_cause: pattern.root_cause.clone(),
            confidence: matched.confidence,
            excerpt: matched.excerpt.clone(),
            commands,
            rating,
            state: RemediationState::Proposed,
            blocked_reason: None,
            created_at: now,
            updated_at: now,
            transitions: vec![Transition {
                from: None,
                to: RemediationState::Proposed,
                at: now,
                note: None,
            }],
            steps: Vec::new(),
            outcome: None,
        };
        info!(
            "Proposed request {} for {} (confidence {:.2}, rating {}, {} commands)",
            request.id,
            request.pattern_id,
            request.confidence,
            request.rating,
            request.commands.len()
        );

        if rating == RiskRating::Safe {
            request.transition(RemediationState::AutoExecuting, None);
        } else {
            let blocked = self.blocked_reason(&request);
            warn!("{}", blocked);
            request.blocked_reason = Some(blocked.to_string());
            request.transition(RemediationState::AwaitingApproval, Some(blocked.to_string()));
        }

        self.requests
            .write()
            .await
            .by_id
            .insert(request.id, request.clone());
        if request.state == RemediationState::AwaitingApproval {
            let stored = request.clone();
            if let Some(Err(e)) = self.journal_op(move |j| j.insert(&stored)).await {
                warn!("Request {} not journaled, lost on restart: {}", request.id, e);
            }
        }
        Ok(request)
    }

    fn blocked_reason(&self, request: &RemediationRequest) -> WardenError {
        let worst = request
            .commands
            .iter()
            .filter(|c| c.rating == request.rating)
            .find_map(|c| {
                c.rule
                    .as_ref()
                    .map(|rule| format!("'{}' rated {} ({})", c.command, c.rating, rule))
            })
            .unwrap_or_else(|| format!("pattern {} declares {}", request.pattern_id, request.rating));
        WardenError::UnsafeCommandBlocked(worst)
    }

    /// Operator sign-off: AWAITING_APPROVAL -> APPROVED -> EXECUTING.
    pub async fn approve(&self, id: Uuid) -> Result<RemediationRequest> {
        self.sync_if_unknown(id).await;
        let approved = {
            let mut requests = self.requests.write().await;
            let request = requests
                .by_id
                .get_mut(&id)
                .ok_or_else(|| WardenError::RequestNotFound(id.to_string()))?;
            if request.state != RemediationState::AwaitingApproval {
                return Err(request.invalid("approve"));
            }
            request.transition(RemediationState::Approved, None);
            request.transition(RemediationState::Executing, None);
            request.clone()
        };
        self.forget_pending(id).await;
        Ok(approved)
    }

    /// Operator refusal. Recorded as a failed occurrence.
    pub async fn reject(&self, id: Uuid, reason: Option<&str>) -> Result<RemediationRequest> {
        self.sync_if_unknown(id).await;
        let request = {
            let mut requests = self.requests.write().await;
            let request = requests
                .by_id
                .get_mut(&id)
                .ok_or_else(|| WardenError::RequestNotFound(id.to_string()))?;
            if request.state != RemediationState::AwaitingApproval {
                return Err(request.invalid("reject"));
            }
            request.transition(RemediationState::Rejected, reason.map(str::to_string));
            request.outcome = Some(Outcome {
                success: false,
                resolution_time: 0.0,
                steps_executed: 0,
                failure: Some(REJECTED_ROOT_CAUSE.to_string()),
            });
            let rejected = request.clone();
            requests.retire(id, self.settings.max_finished);
            rejected
        };
        self.forget_pending(id).await;

        let mut occurrence = Occurrence::new(
            Utc::now(),
            request.severity,
            0.0,
            false,
            REJECTED_ROOT_CAUSE,
            "rejected",
            request.confidence,
        )
        .with_context("request_id", serde_json::json!(request.id.to_string()));
        if let Some(reason) = reason {
            occurrence = occurrence.with_context("reason", serde_json::json!(reason));
        }
        self.record(&request.pattern_id, occurrence).await;
        Ok(request)
    }

    /// Run the request's commands in order, stopping at the first failure.
    ///
    /// Only AUTO_EXECUTING and EXECUTING requests run, and only once. Command
    /// failures and timeouts end the request in FAILED; they are not errors.
    pub async fn execute(&self, id: Uuid) -> Result<RemediationRequest> {
        let (commands, automated, _running) = {
            let requests = self.requests.read().await;
            let request = requests
                .by_id
                .get(&id)
                .ok_or_else(|| WardenError::RequestNotFound(id.to_string()))?;
            if !request.state.can_execute() {
                return Err(request.invalid("execute"));
            }
            let Some(running) = InFlight::claim(&self.running, id) else {
                return Err(WardenError::InvalidTransition {
                    action: "execute",
                    state: format!("{} (already running)", request.state.as_str()),
                });
            };
            (
                request.commands.clone(),
                request.state == RemediationState::AutoExecuting,
                running,
            )
        };

        // No lock is held while commands run
        let start = Instant::now();
        let mut steps = Vec::with_capacity(commands.len());
        let mut failure = None;
        for planned in &commands {
            let output = self.run_one(&planned.command).await;
            let ok = output.success();
            if !ok {
                failure = Some(if output.timed_out {
                    format!(
                        "timeout after {}s: {}",
                        self.settings.command_timeout.as_secs(),
                        planned.command
                    )
                } else {
                    format!("exit code {}: {}", output.exit_code, planned.command)
                });
            }
            steps.push(output);
            if !ok {
                break;
            }
        }
        let elapsed = start.elapsed().as_secs_f64();
        let success = failure.is_none();
        if let Some(f) = &failure {
            warn!("Request {}: {}", id, WardenError::CommandExecution(f.clone()));
        }

        let request = {
            let mut requests = self.requests.write().await;
            let request = requests
                .by_id
                .get_mut(&id)
                .ok_or_else(|| WardenError::RequestNotFound(id.to_string()))?;
            request.outcome = Some(Outcome {
                success,
                resolution_time: elapsed,
                steps_executed: steps.len(),
                failure: failure.clone(),
            });
            request.steps = steps;
            let to = if success {
                RemediationState::Succeeded
            } else {
                RemediationState::Failed
            };
            request.transition(to, failure.clone());
            let finished = request.clone();
            requests.retire(id, self.settings.max_finished);
            finished
        };

        let method = if automated { "automated" } else { "approved" };
        let mut occurrence = Occurrence::new(
            Utc::now(),
            request.severity,
            elapsed,
            success,
            request.root_cause.clone(),
            method,
            request.confidence,
        )
        .with_context("request_id", serde_json::json!(request.id.to_string()))
        .with_context("steps_executed", serde_json::json!(request.steps.len()));
        if let Some(failure) = &failure {
            occurrence = occurrence.with_context("failure", serde_json::json!(failure));
        }
        self.record(&request.pattern_id, occurrence).await;

        Ok(request)
    }

    async fn run_one(&self, command: &str) -> CommandOutput {
        let limit = self.settings.command_timeout;
        let mut output = match timeout(limit, self.runner.run(command)).await {
            Ok(output) => output,
            Err(_) => {
                warn!("Command timed out after {}s: {}", limit.as_secs(), command);
                CommandOutput::timeout(command, limit)
            }
        };

        output.stdout = redact::sanitize_output(&output.stdout, self.settings.max_output_bytes);
        output.stderr = redact::sanitize_output(&output.stderr, self.settings.max_output_bytes);
        if output.success() {
            info!("Command ok in {}ms: {}", output.duration_ms, command);
        } else {
            warn!(
                "Command failed (exit {}) in {}ms: {}: {}",
                output.exit_code,
                output.duration_ms,
                command,
                output.stderr.lines().next().unwrap_or("")
            );
        }
        output
    }

    /// History flushes to disk, so it runs on the blocking pool.
    async fn record(&self, signature: &str, occurrence: Occurrence) {
        let history = Arc::clone(&self.history);
        let key = signature.to_string();
        match tokio::task::spawn_blocking(move || history.record(&key, occurrence)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!("Outcome for {} kept in memory only: {}", signature, e),
            Err(e) => error!("Recording outcome for {} failed: {}", signature, e),
        }
    }

    async fn journal_op<T, F>(&self, op: F) -> Option<T>
    where
        F: FnOnce(&PendingJournal) -> T + Send + 'static,
        T: Send + 'static,
    {
        let journal = Arc::clone(self.journal.as_ref()?);
        match tokio::task::spawn_blocking(move || op(&journal)).await {
            Ok(value) => Some(value),
            Err(e) => {
                error!("Pending journal task failed: {}", e);
                None
            }
        }
    }

    async fn forget_pending(&self, id: Uuid) {
        if let Some(Err(e)) = self.journal_op(move |j| j.remove(id)).await {
            warn!("Request {} still journaled as pending: {}", id, e);
        }
    }

    async fn sync_if_unknown(&self, id: Uuid) {
        if !self.requests.read().await.by_id.contains_key(&id) {
            self.sync_pending().await;
        }
    }

    /// Align awaiting requests with the journal.
    ///
    /// Another process may have approved or rejected some of ours, or queued
    /// new ones.
    pub async fn sync_pending(&self) {
        let Some(stored) = self.journal_op(|j| j.load()).await else {
            return;
        };
        let stored: HashMap<Uuid, RemediationRequest> =
            stored.into_iter().map(|r| (r.id, r)).collect();

        let mut requests = self.requests.write().await;
        requests.by_id.retain(|id, r| {
            r.state != RemediationState::AwaitingApproval || stored.contains_key(id)
        });
        for (id, request) in stored {
            requests.by_id.entry(id).or_insert(request);
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<RemediationRequest> {
        self.requests.read().await.by_id.get(&id).cloned()
    }

    /// Requests waiting for an operator, oldest first.
    pub async fn pending(&self) -> Vec<RemediationRequest> {
        self.sync_pending().await;
        let requests = self.requests.read().await;
        let mut pending: Vec<RemediationRequest> = requests
            .by_id
            .values()
            .filter(|r| r.state == RemediationState::AwaitingApproval)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }
}
