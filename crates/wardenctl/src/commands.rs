//! Command handlers for wardenctl.

use anyhow::{bail, Context as _, Result};
use chrono::Utc;
use owo_colors::OwoColorize;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use warden_shared::analytics::{self, RecommendationKind};
use warden_shared::safety;
use warden_shared::{
    Catalog, CatalogHandle, CatalogSource, Category, HistoryStore, IssueRecord, MatchResult,
};
use wardend::config::Config;
use wardend::{CommandRunner, RemediationRequest, RemediationState, ScriptedRunner, Warden};

use crate::output;

/// Settings shared by every command
pub struct Context {
    pub config: Config,
    pub json: bool,
}

impl Context {
    pub fn load(config_path: Option<&Path>, json: bool) -> Result<Self> {
        Ok(Self {
            config: Config::load_with(config_path)?,
            json,
        })
    }

    fn catalog_source(&self) -> CatalogSource {
        CatalogSource::file(self.config.catalog.path.clone())
    }

    fn catalog(&self) -> Result<CatalogHandle> {
        CatalogHandle::load(&self.catalog_source())
            .with_context(|| format!("loading catalog {}", self.config.catalog.path.display()))
    }

    /// History store, with categories attached when the catalog loads.
    fn history(&self) -> HistoryStore {
        let store = HistoryStore::open(self.config.history.path.clone(), self.config.history.options());
        match self.catalog() {
            Ok(catalog) => store.attach_catalog(Arc::new(catalog)),
            Err(e) => tracing::warn!("Categories unavailable: {:#}", e),
        }
        store
    }
}

// =============================================================================
// Detection
// =============================================================================

pub fn match_evidence(ctx: &Context, evidence: &str, category: Option<&str>) -> Result<()> {
    let hint = category.map(str::parse::<Category>).transpose()?;
    let catalog = ctx.catalog()?.current();
    let results = ctx.config.matcher.build().match_evidence(&catalog, evidence, hint);

    if ctx.json {
        return output::json(&results);
    }
    if results.is_empty() {
        println!("No known pattern matched.");
        return Ok(());
    }

    output::header(&format!("{} match(es)", results.len()));
    for m in &results {
        print_match(m, &catalog);
    }
    Ok(())
}

fn print_match(m: &MatchResult, catalog: &Catalog) {
    let name = catalog
        .get(&m.pattern_id)
        .map(|p| p.name.clone())
        .unwrap_or_else(|| m.pattern_id.clone());
    println!(
        "{}  {}  {}",
        output::percent(m.confidence).bold(),
        m.pattern_id.bright_cyan(),
        name.dimmed()
    );
    output::kv("  category", m.category.display_name());
    output::kv("  excerpt", &m.excerpt);
    if !m.matched_keywords.is_empty() {
        output::kv("  keywords", m.matched_keywords.join(", "));
    }
    if !m.matched_regexes.is_empty() {
        output::kv("  regexes", m.matched_regexes.join(", "));
    }
}

pub fn classify(ctx: &Context, command: &str) -> Result<()> {
    let assessment = safety::assess(command);
    if ctx.json {
        return output::json(&serde_json::json!({
            "command": command,
            "rating": assessment.rating,
            "rule": assessment.rule,
            "guidance": safety::describe_risk(assessment.rating),
        }));
    }

    output::header("Safety classification");
    output::kv("command", command);
    output::kv("rating", output::rating(assessment.rating));
    if let Some(rule) = assessment.rule {
        output::kv("rule", rule);
    }
    output::kv("guidance", safety::describe_risk(assessment.rating));
    Ok(())
}

// =============================================================================
// Remediation
// =============================================================================

pub async fn run(
    ctx: &Context,
    evidence: &str,
    approve: bool,
    reject: Option<String>,
    dry_run: bool,
) -> Result<()> {
    if dry_run {
        // Simulated commands must not leave a trace in the real history
        let warden = Warden::from_parts(
            ctx.catalog()?,
            ctx.catalog_source(),
            HistoryStore::in_memory(ctx.config.history.options()),
            &ctx.config,
            ScriptedRunner::new(),
        );
        return run_with(ctx, &warden, evidence, approve, reject).await;
    }

    let warden = Warden::from_config(&ctx.config)?;
    run_with(ctx, &warden, evidence, approve, reject).await
}

async fn run_with<R: CommandRunner>(
    ctx: &Context,
    warden: &Warden<R>,
    evidence: &str,
    approve: bool,
    reject: Option<String>,
) -> Result<()> {
    let Some(mut request) = warden.process_evidence(evidence).await? else {
        if ctx.json {
            return output::json(&serde_json::Value::Null);
        }
        println!("No known pattern matched; nothing to remediate.");
        return Ok(());
    };

    if request.state == RemediationState::AwaitingApproval {
        if let Some(reason) = reject.as_deref() {
            request = warden.reject(request.id, Some(reason)).await?;
        } else if approve {
            warden.approve(request.id).await?;
            request = warden.execute(request.id).await?;
        }
    }

    if ctx.json {
        return output::json(&request);
    }
    print_request(&request);
    if request.state == RemediationState::AwaitingApproval {
        output::warn(&format!(
            "Needs operator sign-off: wardenctl approve {0} | wardenctl reject {0} --reason <why>",
            request.id
        ));
    }
    Ok(())
}

pub async fn pending(ctx: &Context) -> Result<()> {
    let warden = Warden::from_config(&ctx.config)?;
    let pending = warden.pending().await;
    if ctx.json {
        return output::json(&pending);
    }
    if pending.is_empty() {
        output::ok("Nothing awaiting approval.");
        return Ok(());
    }

    output::header(&format!("{} awaiting approval", pending.len()));
    for request in &pending {
        println!(
            "  {}  {}  {}  {}",
            request.id,
            output::rating(request.rating),
            request.pattern_id.bright_cyan(),
            request.created_at.format("%Y-%m-%d %H:%M").dimmed()
        );
        if let Some(reason) = &request.blocked_reason {
            println!("      {}", reason.dimmed());
        }
    }
    Ok(())
}

pub async fn approve(ctx: &Context, id: Uuid) -> Result<()> {
    let warden = Warden::from_config(&ctx.config)?;
    warden.approve(id).await?;
    let request = warden.execute(id).await?;
    if ctx.json {
        return output::json(&request);
    }
    print_request(&request);
    Ok(())
}

pub async fn reject(ctx: &Context, id: Uuid, reason: Option<&str>) -> Result<()> {
    let warden = Warden::from_config(&ctx.config)?;
    let request = warden.reject(id, reason).await?;
    if ctx.json {
        return output::json(&request);
    }
    print_request(&request);
    Ok(())
}

fn print_request(request: &RemediationRequest) {
    output::header(&format!("Remediation {}", request.id));
    output::kv("pattern", &request.pattern_id);
    output::kv("category", request.category.display_name());
    output::kv("confidence", output::percent(request.confidence));
    output::kv("rating", output::rating(request.rating));
    output::kv("state", output::state(request.state));
    if let Some(reason) = &request.blocked_reason {
        output::kv("blocked", reason);
    }

    println!();
    for (i, planned) in request.commands.iter().enumerate() {
        let status = match request.steps.get(i) {
            Some(step) if step.success() => "ok".green().to_string(),
            Some(step) if step.timed_out => "timeout".bright_red().to_string(),
            Some(step) => format!("exit {}", step.exit_code).bright_red().to_string(),
            None => "-".dimmed().to_string(),
        };
        println!(
            "  {}. [{}] {}  {}",
            i + 1,
            output::rating(planned.rating),
            planned.command,
            status
        );
    }

    if let Some(outcome) = &request.outcome {
        println!();
        output::kv("success", outcome.success);
        output::kv("duration", format!("{:.2}s", outcome.resolution_time));
        if let Some(failure) = &outcome.failure {
            output::kv("failure", failure);
        }
    }
}

// =============================================================================
// History and analytics
// =============================================================================

pub fn history(ctx: &Context, signature: Option<&str>) -> Result<()> {
    let store = ctx.history();

    match signature {
        Some(sig) => {
            let Some(record) = store.get(sig) else {
                bail!("no history for '{}'", sig);
            };
            if ctx.json {
                return output::json(&record);
            }
            print_record(sig, &record);
        }
        None => {
            let records = store.records();
            if ctx.json {
                return output::json(&records);
            }
            if records.is_empty() {
                println!("No history recorded yet.");
                return Ok(());
            }
            output::header(&format!("{} tracked signature(s)", records.len()));
            for (sig, record) in &records {
                println!(
                    "  {:30} {:>3} occ  {:>7} success  {}{}",
                    sig,
                    record.len(),
                    output::percent(record.success_rate()),
                    output::trend(record.frequency_trend()),
                    if record.is_archived() { "  (archived)" } else { "" }
                );
            }
        }
    }
    Ok(())
}

fn print_record(signature: &str, record: &IssueRecord) {
    output::header(signature);
    output::kv("occurrences", record.len());
    output::kv("success rate", output::percent(record.success_rate()));
    output::kv("avg resolution", format!("{:.1}s", record.avg_resolution_time()));
    output::kv("trend", output::trend(record.frequency_trend()));
    output::kv("seasonal", format!("{:?}", record.seasonal_pattern()));
    if !record.common_causes().is_empty() {
        output::kv("common causes", record.common_causes().join(", "));
    }
    if let Some(last) = record.last_seen() {
        output::kv("last seen", last.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    println!();
    for occ in record.occurrences().rev() {
        println!(
            "  {}  {:8}  {:>7.1}s  {}  {}",
            occ.timestamp().format("%Y-%m-%d %H:%M"),
            format!("{:?}", occ.severity()),
            occ.resolution_time(),
            if occ.success() { "ok".green().to_string() } else { "failed".bright_red().to_string() },
            occ.root_cause()
        );
    }
}

pub fn predict(ctx: &Context, signature: &str) -> Result<()> {
    let ranked = ctx.history().predict_root_cause(signature);
    if ctx.json {
        let items: Vec<_> = ranked
            .iter()
            .map(|(cause, confidence)| serde_json::json!({"root_cause": cause, "confidence": confidence}))
            .collect();
        return output::json(&items);
    }
    if ranked.is_empty() {
        println!("No root-cause history for '{}'.", signature);
        return Ok(());
    }
    output::header(&format!("Likely root causes: {}", signature));
    for (cause, confidence) in ranked {
        println!("  {:>7}  {}", output::percent(confidence), cause);
    }
    Ok(())
}

pub fn snapshot(ctx: &Context) -> Result<()> {
    let snap = ctx.history().compute_snapshot();
    if ctx.json {
        return output::json(&snap);
    }

    output::header("Learning analytics");
    output::kv("issues tracked", snap.total_issues_tracked);
    output::kv("occurrences", snap.total_occurrences);
    output::kv("success rate", output::percent(snap.overall_success_rate));
    output::kv("avg resolution", format!("{:.1}s", snap.avg_resolution_time));

    if !snap.most_common_categories.is_empty() {
        println!();
        for entry in &snap.most_common_categories {
            let name = entry.category.map(|c| c.display_name()).unwrap_or("(uncatalogued)");
            println!("  {:16} {:>4} occurrences over {} signature(s)", name, entry.occurrences, entry.signatures);
        }
    }

    let t = &snap.trend_analysis;
    println!();
    output::kv("improving", t.improving_areas.join(", "));
    output::kv("stable", t.stable_areas.join(", "));
    output::kv("concerning", t.concerning_areas.join(", ").bright_red());
    Ok(())
}

pub fn trending(ctx: &Context, days: i64) -> Result<()> {
    if days <= 0 {
        bail!("--days must be positive");
    }
    let issues = analytics::trending(&ctx.history().records(), days, Utc::now());
    if ctx.json {
        return output::json(&issues);
    }
    if issues.is_empty() {
        println!("Nothing seen in the last {} day(s).", days);
        return Ok(());
    }
    output::header(&format!("Trending over {} day(s)", days));
    for issue in &issues {
        println!(
            "  {:30} score {:>5.1}  {:>3}x  {:>7} success  {}",
            issue.signature,
            issue.score(),
            issue.frequency,
            output::percent(issue.success_rate),
            output::trend(issue.trend)
        );
    }
    Ok(())
}

pub fn recommend(ctx: &Context) -> Result<()> {
    let recs = analytics::proactive_recommendations(&ctx.history().records());
    if ctx.json {
        return output::json(&recs);
    }
    if recs.is_empty() {
        output::ok("No proactive recommendations.");
        return Ok(());
    }
    output::header("Proactive recommendations");
    for rec in &recs {
        let tag = match rec.kind {
            RecommendationKind::ProactiveMonitoring => "monitor",
            RecommendationKind::ResolutionImprovement => "review",
        };
        println!("  [{:?}] {} {}", rec.priority, tag.bright_cyan(), rec.message);
        for action in &rec.suggested_actions {
            println!("      - {}", action.dimmed());
        }
    }
    Ok(())
}

pub fn archive(ctx: &Context, signature: &str) -> Result<()> {
    if ctx.history().archive(signature)? {
        output::ok(&format!("Archived {}", signature));
        Ok(())
    } else {
        bail!("no history for '{}'", signature)
    }
}

pub fn check_catalog(ctx: &Context, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(ctx.config.catalog.path.as_path());
    let catalog = Catalog::load(&CatalogSource::file(path))?;

    if ctx.json {
        let counts: serde_json::Map<String, serde_json::Value> = Category::ALL
            .iter()
            .map(|c| (c.as_str().to_string(), serde_json::json!(catalog.lookup(*c).len())))
            .collect();
        return output::json(&serde_json::json!({
            "path": path,
            "patterns": catalog.len(),
            "by_category": counts,
        }));
    }

    output::ok(&format!("{}: {} patterns", path.display(), catalog.len()));
    for category in Category::ALL {
        let patterns = catalog.lookup(category);
        output::kv(&format!("  {}", category.display_name()), patterns.len());
        for p in patterns {
            let floor = if p.safety_level > warden_shared::RiskRating::Safe {
                format!(" (declared {})", p.safety_level)
            } else {
                String::new()
            };
            println!("      {}{}", p.id, floor.dimmed());
        }
    }
    Ok(())
}
