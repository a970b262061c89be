//! Session token-usage sampling via an external reporting command.
//!
//! The probe is strictly best-effort: any failure (command missing, nonzero
//! exit, unparseable report) degrades to "usage unknown" and the loop keeps
//! going without session-usage feedback.

use std::sync::OnceLock;

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};

/// Matches a labeled numeric field like `Input 1.2K` or `Output: 900`,
/// capturing the number and an optional magnitude suffix.
fn field_regex(label: &str) -> Regex {
    Regex::new(&format!(
        r"(?im)\b{label}\b[^0-9]*([0-9][0-9,]*(?:\.[0-9]+)?)\s*([KMB])?"
    ))
    .expect("invalid usage field regex")
}

fn input_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| field_regex("Input"))
}

fn output_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| field_regex("Output"))
}

/// Samples a running token-usage counter before and after an iteration
pub struct UsageProbe {
    cmd: String,
    args: Vec<String>,
}

impl UsageProbe {
    /// Build a probe for the given reporting command, scoped to a project
    /// when an identifier is configured.
    pub fn new(cmd: String, project: Option<String>) -> Self {
        let mut args = vec!["stats".to_string()];
        if let Some(project) = project {
            args.push("--project".to_string());
            args.push(project);
        }
        Self { cmd, args }
    }

    /// Invoke the reporting command and return the summed Input + Output
    /// token counters, or `None` when the report is unavailable.
    pub async fn sample(&self) -> Option<u64> {
        let output = match Command::new(&self.cmd).args(&self.args).output().await {
            Ok(output) => output,
            Err(e) => {
                warn!("usage command '{}' failed to run: {}", self.cmd, e);
                return None;
            }
        };
        if !output.status.success() {
            warn!(
                "usage command '{}' exited with {:?}",
                self.cmd,
                output.status.code()
            );
            return None;
        }
        let report = String::from_utf8_lossy(&output.stdout);
        let total = parse_usage_report(&report);
        debug!("usage sample: {:?}", total);
        total
    }

    /// Non-negative difference between two samples; `None` unless both are
    /// present.
    pub fn delta(before: Option<u64>, after: Option<u64>) -> Option<u64> {
        match (before, after) {
            (Some(b), Some(a)) => Some(a.saturating_sub(b)),
            _ => None,
        }
    }
}

/// Parse the textual report for the `Input` and `Output` fields and sum
/// them. Returns `None` when either field is missing or the report is empty.
pub fn parse_usage_report(report: &str) -> Option<u64> {
    let input = extract_field(input_regex(), report)?;
    let output = extract_field(output_regex(), report)?;
    Some(input + output)
}

fn extract_field(re: &Regex, report: &str) -> Option<u64> {
    let caps = re.captures(report)?;
    let number: f64 = caps
        .get(1)?
        .as_str()
        .replace(',', "")
        .parse()
        .ok()?;
    let multiplier = match caps.get(2).map(|m| m.as_str().to_ascii_uppercase()) {
        Some(s) if s == "K" => 1e3,
        Some(s) if s == "M" => 1e6,
        Some(s) if s == "B" => 1e9,
        _ => 1.0,
    };
    Some((number * multiplier).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_numbers() {
        assert_eq!(parse_usage_report("Input 1200\nOutput 800"), Some(2000));
    }

    #[test]
    fn test_parse_magnitude_suffixes() {
        assert_eq!(parse_usage_report("Input 1.2K / Output 800"), Some(2000));
        assert_eq!(
            parse_usage_report("Input: 2M\nOutput: 1.5K"),
            Some(2_001_500)
        );
        assert_eq!(
            parse_usage_report("input 1B output 0"),
            Some(1_000_000_000)
        );
    }

    #[test]
    fn test_parse_with_commas() {
        assert_eq!(
            parse_usage_report("Input 1,234 Output 5,678"),
            Some(6_912)
        );
    }

    #[test]
    fn test_missing_field_is_none() {
        assert_eq!(parse_usage_report("Input 1200"), None);
        assert_eq!(parse_usage_report("Output 800"), None);
        assert_eq!(parse_usage_report(""), None);
        assert_eq!(parse_usage_report("no numbers here"), None);
    }

    #[test]
    fn test_delta_never_negative() {
        assert_eq!(UsageProbe::delta(Some(500), Some(300)), Some(0));
        assert_eq!(UsageProbe::delta(Some(300), Some(500)), Some(200));
    }

    #[test]
    fn test_delta_absent_samples() {
        assert_eq!(UsageProbe::delta(None, Some(500)), None);
        assert_eq!(UsageProbe::delta(Some(500), None), None);
        assert_eq!(UsageProbe::delta(None, None), None);
    }

    #[test]
    fn test_scenario_before_after() {
        let before = parse_usage_report("Input 1.2K / Output 800").unwrap();
        let after = parse_usage_report("Input 1.3K / Output 900").unwrap();
        assert_eq!(UsageProbe::delta(Some(before), Some(after)), Some(200));
    }

    #[tokio::test]
    async fn test_sample_missing_command_degrades() {
        let probe = UsageProbe::new("definitely-not-a-real-command-xyz".to_string(), None);
        assert_eq!(probe.sample().await, None);
    }
}
