//! Layer A: static deny-list scan over generated plan text.
//!
//! Matching is case-insensitive substring search against a fixed list of
//! shell-execution, code-execution, prompt-injection, and XSS markers.
//! Operators may append regexes through `verification.extra_deny_patterns`.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::Verdict;

/// Substrings that fail a plan outright. All entries are lowercase.
pub const DENY_LIST: &[&str] = &[
    // shell execution
    "sudo ",
    "rm -rf",
    "chmod ",
    "wget ",
    "curl ",
    // code execution
    "eval(",
    "exec(",
    // prompt injection
    "ignore previous instructions",
    // xss
    "<script>",
];

/// Outcome of the static scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyResult {
    pub verdict: Verdict,
    /// Every deny-list entry or extra pattern that matched, in list order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

impl PolicyResult {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

#[derive(Debug, Clone)]
pub struct PolicyEngine {
    extra: Vec<Regex>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine {
    /// Engine with only the built-in deny list.
    pub fn new() -> Self {
        Self { extra: Vec::new() }
    }

    /// Engine with additional case-insensitive regexes.
    pub fn with_patterns<I, S>(patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extra = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                Regex::new(&format!("(?i){p}")).map_err(|e| ConfigError::Invalid {
                    message: format!("deny pattern '{p}': {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { extra })
    }

    pub fn check(&self, text: &str) -> PolicyResult {
        let lowered = text.to_lowercase();
        let mut violations: Vec<String> = DENY_LIST
            .iter()
            .filter(|pattern| lowered.contains(*pattern))
            .map(|pattern| pattern.to_string())
            .collect();
        violations.extend(
            self.extra
                .iter()
                .filter(|re| re.is_match(text))
                .map(|re| re.as_str().trim_start_matches("(?i)").to_string()),
        );

        let verdict = if violations.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Fail
        };
        PolicyResult {
            verdict,
            violations,
        }
    }
}
