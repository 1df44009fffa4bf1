use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use super::{has_clone_error, FailurePolicy, Normalized, Normalizer};
use crate::error::{CoreError, Result};
use crate::model::{Confidence, Severity, Vulnerability};

pub const GOSEC_TEST: &str = "gosec";
const LANGUAGE: &str = "Go";
const TOOL: &str = "GoSec";

pub const GOSEC_POLICY: FailurePolicy = FailurePolicy {
    severities: &[Severity::High, Severity::Medium],
    confidences: &[Confidence::High],
};

#[derive(Debug, Deserialize)]
struct GosecOutput {
    #[serde(rename = "Golang errors", default)]
    golang_errors: HashMap<String, Value>,
    #[serde(rename = "Issues", default)]
    issues: Vec<GosecIssue>,
}

#[derive(Debug, Deserialize)]
struct GosecIssue {
    #[serde(default)]
    severity: String,
    #[serde(default)]
    confidence: String,
    #[serde(default)]
    details: String,
    #[serde(default)]
    file: String,
    #[serde(default)]
    code: String,
    // gosec 以字符串形式输出行号（也可能是 "12-14" 这样的范围）
    #[serde(default)]
    line: String,
}

pub struct GosecNormalizer {
    policy: FailurePolicy,
}

impl GosecNormalizer {
    pub fn new() -> Self {
        Self { policy: GOSEC_POLICY }
    }
}

impl Default for GosecNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer for GosecNormalizer {
    fn name(&self) -> String {
        GOSEC_TEST.to_string()
    }

    fn normalize(&self, raw: &str) -> Result<Normalized> {
        if has_clone_error(raw) {
            return Ok(Normalized::infra_error(raw));
        }

        let output: GosecOutput = serde_json::from_str(raw.trim())
            .map_err(|e| CoreError::Tool(format!("invalid gosec output: {}", e)))?;

        if !output.golang_errors.is_empty() {
            tracing::warn!(
                packages = output.golang_errors.len(),
                "gosec reported Go compilation errors"
            );
        }

        let vulnerabilities: Vec<Vulnerability> = output
            .issues
            .into_iter()
            .filter_map(|issue| {
                let (severity, confidence) =
                    match (Severity::parse(&issue.severity), Confidence::parse(&issue.confidence)) {
                        (Some(severity), Some(confidence)) => (severity, confidence),
                        _ => {
                            tracing::warn!(
                                severity = %issue.severity,
                                confidence = %issue.confidence,
                                file = %issue.file,
                                "dropping gosec issue with unknown rating"
                            );
                            return None;
                        }
                    };
                Some(Vulnerability {
                    language: LANGUAGE.to_string(),
                    security_tool: TOOL.to_string(),
                    severity,
                    confidence,
                    file: issue.file,
                    line: issue.line,
                    details: issue.details,
                    code: issue.code,
                })
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContainerResult;

    #[test]
    fn medium_high_issue_fails() {
        let raw = r#"{
            "Golang errors": {},
            "Issues": [{
                "severity": "MEDIUM",
                "confidence": "HIGH",
                "rule_id": "G104",
                "details": "Errors unhandled.",
                "file": "/go/src/code/main.go",
                "code": "os.Remove(path)",
                "line": "42",
                "column": "2"
            }],
            "Stats": {"files": 1, "lines": 80, "nosec": 0, "found": 1}
        }"#;
        let normalized = GosecNormalizer::new().normalize(raw).unwrap();
        assert_eq!(normalized.result, ContainerResult::Failed);
        assert_eq!(normalized.vulnerabilities[0].language, "Go");
        assert_eq!(normalized.vulnerabilities[0].line, "42");
    }

    #[test]
    fn no_issues_pass_even_with_compile_errors() {
        let raw = r#"{"Golang errors": {"pkg": [{"line": 1}]}, "Issues": [], "Stats": {}}"#;
        let normalized = GosecNormalizer::new().normalize(raw).unwrap();
        assert_eq!(normalized.result, ContainerResult::Passed);
        assert!(normalized.vulnerabilities.is_empty());
    }

    #[test]
    fn issue_with_unknown_rating_is_dropped() {
        let raw = r#"{
            "Golang errors": {},
            "Issues": [
                {"severity": "CRITICAL", "confidence": "HIGH", "file": "a.go", "line": "1"},
                {"severity": "LOW", "confidence": "high", "file": "b.go", "line": "7"}
            ]
        }"#;
        let normalized = GosecNormalizer::new().normalize(raw).unwrap();
        assert_eq!(normalized.vulnerabilities.len(), 1);
        assert_eq!(normalized.vulnerabilities[0].file, "b.go");
        assert_eq!(normalized.result, ContainerResult::Passed);
    }
}
