use serde::Deserialize;
use serde_json::Value;

use super::{has_clone_error, FailurePolicy, Normalized, Normalizer};
use crate::error::{CoreError, Result};
use crate::model::{Confidence, Severity, Vulnerability};

pub const BANDIT_TEST: &str = "bandit";
const LANGUAGE: &str = "Python";
const TOOL: &str = "Bandit";

/// MEDIUM/HIGH severity with HIGH confidence fails the container.
pub const BANDIT_POLICY: FailurePolicy = FailurePolicy {
    severities: &[Severity::High, Severity::Medium],
    confidences: &[Confidence::High],
};

#[derive(Debug, Deserialize)]
struct BanditOutput {
    #[serde(default)]
    errors: Option<Value>,
    #[serde(default)]
    results: Vec<BanditIssue>,
}

#[derive(Debug, Deserialize)]
struct BanditIssue {
    #[serde(default)]
    code: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    issue_confidence: String,
    #[serde(default)]
    issue_severity: String,
    #[serde(default)]
    issue_text: String,
    #[serde(default)]
    line_number: i64,
}

pub struct BanditNormalizer {
    policy: FailurePolicy,
}

impl BanditNormalizer {
    pub fn new() -> Self {
        Self { policy: BANDIT_POLICY }
    }

    pub fn with_policy(policy: FailurePolicy) -> Self {
        Self { policy }
    }
}

impl Default for BanditNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

fn reports_errors(errors: &Option<Value>) -> bool {
    match errors {
        None | Some(Value::Null) => false,
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(_) => true,
    }
}

impl BanditIssue {
    fn into_vulnerability(self) -> Option<Vulnerability> {
        let severity = Severity::parse(&self.issue_severity)?;
        let confidence = Confidence::parse(&self.issue_confidence)?;
        Some(Vulnerability {
            language: LANGUAGE.to_string(),
            security_tool: TOOL.to_string(),
            severity,
            confidence,
            file: self.filename,
            line: self.line_number.to_string(),
            details: self.issue_text,
            code: self.code,
        })
    }
}

impl Normalizer for BanditNormalizer {
    fn name(&self) -> String {
        BANDIT_TEST.to_string()
    }

    fn normalize(&self, raw: &str) -> Result<Normalized> {
        if has_clone_error(raw) {
            return Ok(Normalized::infra_error(raw));
        }

        let output: BanditOutput = serde_json::from_str(raw.trim())
            .map_err(|e| CoreError::Tool(format!("invalid bandit output: {}", e)))?;

        if reports_errors(&output.errors) {
            tracing::warn!(errors = ?output.errors, "bandit reported internal errors");
        }

        let vulnerabilities: Vec<Vulnerability> = output
            .results
            .into_iter()
            .filter_map(|issue| {
                let (severity, confidence) = (issue.issue_severity.clone(), issue.issue_confidence.clone());
                let filename = issue.filename.clone();
                let vuln = issue.into_vulnerability();
                if vuln.is_none() {
                    tracing::warn!(
                        severity = %severity,
                        confidence = %confidence,
                        file = %filename,
                        "dropping bandit issue with unknown rating"
                    );
                }
                vuln
            })
            .collect();

        let (result, info) = self.policy.judge(&vulnerabilities);
        Ok(Normalized {
            result,
            info,
            vulnerabilities,
            follow_ups: Vec::new(),
        })
    }
}
