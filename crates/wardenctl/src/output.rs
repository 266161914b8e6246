//! Terminal formatting helpers.

use owo_colors::OwoColorize;
use serde::Serialize;

use warden_shared::{FrequencyTrend, RiskRating};
use wardend::RemediationState;

pub const SEPARATOR: &str = "------------------------------------------------------------";

/// Key column width
const KW: usize = 18;

pub fn header(title: &str) {
    println!();
    println!("{}", title.bright_cyan().bold());
    println!("{}", SEPARATOR.dimmed());
}

pub fn kv(key: &str, value: impl std::fmt::Display) {
    println!("{:width$} {}", key.dimmed(), value, width = KW);
}

pub fn rating(r: RiskRating) -> String {
    match r {
        RiskRating::Safe => r.as_str().bright_green().to_string(),
        RiskRating::Medium => r.as_str().bright_yellow().to_string(),
        RiskRating::High => r.as_str().bright_red().bold().to_string(),
    }
}

pub fn state(s: RemediationState) -> String {
    match s {
        RemediationState::Succeeded => s.as_str().bright_green().to_string(),
        RemediationState::Failed | RemediationState::Rejected => s.as_str().bright_red().to_string(),
        RemediationState::AwaitingApproval => s.as_str().bright_yellow().to_string(),
        _ => s.as_str().to_string(),
    }
}

pub fn trend(t: FrequencyTrend) -> String {
    match t {
        FrequencyTrend::Improving => t.as_str().green().to_string(),
        FrequencyTrend::Concerning => t.as_str().bright_red().to_string(),
        _ => t.as_str().to_string(),
    }
}

pub fn percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

pub fn ok(message: &str) {
    println!("[OK] {}", message.green());
}

pub fn warn(message: &str) {
    println!("[WARNING] {}", message.bright_red());
}

pub fn json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0.5), "50.0%");
        assert_eq!(percent(2.0 / 3.0), "66.7%");
    }
}
