use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 扫描目标，身份为 (URL, Branch)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    #[serde(rename = "repositoryURL")]
    pub url: String,
    #[serde(rename = "repositoryBranch", default)]
    pub branch: String,
    #[serde(rename = "securityTests", default)]
    pub security_tests: Vec<String>,
    #[serde(rename = "createdAt", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Repository {
    pub fn new(url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: branch.into(),
            security_tests: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_security_tests(mut self, tests: Vec<String>) -> Self {
        self.security_tests = tests;
        self
    }
}
