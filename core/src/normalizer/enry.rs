use std::collections::BTreeMap;

use super::{has_clone_error, FollowUp, Normalized, Normalizer};
use crate::error::{CoreError, Result};
use crate::model::ContainerResult;

pub const ENRY_TEST: &str = "enry";

/// 语言检测：输出为 `{"Python": ["app.py", ...], "Go": [...]}`，
/// 每个检测到的语言产生一个后续任务请求
pub struct EnryNormalizer;

impl EnryNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EnryNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer for EnryNormalizer {
    fn name(&self) -> String {
        ENRY_TEST.to_string()
    }

    fn normalize(&self, raw: &str) -> Result<Normalized> {
        if has_clone_error(raw) {
            return Ok(Normalized::infra_error(raw));
        }

        let languages: BTreeMap<String, Vec<String>> = serde_json::from_str(raw.trim())
            .map_err(|e| CoreError::Tool(format!("invalid enry output: {}", e)))?;

        if languages.is_empty() {
            return Ok(Normalized::verdict(ContainerResult::Passed, "No languages detected."));
        }

        let names: Vec<&str> = languages.keys().map(String::as_str).collect();
        let mut normalized = Normalized::verdict(
            ContainerResult::Passed,
            format!("Languages detected: {}.", names.join(", ")),
        );
        normalized.follow_ups = languages
            .keys()
            .map(|language| FollowUp {
                language: language.clone(),
            })
            .collect();
        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_follow_up_per_language() {
        let raw = r#"{"Python": ["app.py", "lib/util.py"], "Go": ["main.go"]}"#;
        let normalized = EnryNormalizer::new().normalize(raw).unwrap();
        assert_eq!(normalized.result, ContainerResult::Passed);
        let languages: Vec<&str> = normalized.follow_ups.iter().map(|f| f.language.as_str()).collect();
        assert_eq!(languages, vec!["Go", "Python"]);
        assert_eq!(normalized.info, "Languages detected: Go, Python.");
        assert!(normalized.vulnerabilities.is_empty());
    }

    #[test]
    fn clone_error_emits_no_follow_ups() {
        let normalized = EnryNormalizer::new().normalize("ERROR_CLONING").unwrap();
        assert_eq!(normalized.result, ContainerResult::Error);
        assert!(normalized.follow_ups.is_empty());
    }

    #[test]
    fn empty_repository_detects_nothing() {
        let normalized = EnryNormalizer::new().normalize("{}").unwrap();
        assert_eq!(normalized.result, ContainerResult::Passed);
        assert!(normalized.follow_ups.is_empty());
    }
}
