use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Severity {
    /// 工具原始输出中的等级字符串（如 "HIGH"），未知值返回 None
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl Confidence {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 归一化后的漏洞记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vulnerability {
    pub language: String,
    pub security_tool: String,
    pub severity: Severity,
    pub confidence: Confidence,
    pub file: String,
    pub line: String,
    pub details: String,
    pub code: String,
}

/// Findings of one tool grouped by severity, insertion order kept inside each bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityBuckets {
    #[serde(default)]
    pub low_vulns: Vec<Vulnerability>,
    #[serde(default)]
    pub medium_vulns: Vec<Vulnerability>,
    #[serde(default)]
    pub high_vulns: Vec<Vulnerability>,
}

impl SeverityBuckets {
    pub fn from_vulnerabilities(vulnerabilities: &[Vulnerability]) -> Self {
        let mut buckets = Self::default();
        for vuln in vulnerabilities {
            buckets.push(vuln.clone());
        }
        buckets
    }

    pub fn push(&mut self, vuln: Vulnerability) {
        match vuln.severity {
            Severity::Low => self.low_vulns.push(vuln),
            Severity::Medium => self.medium_vulns.push(vuln),
            Severity::High => self.high_vulns.push(vuln),
        }
    }

    pub fn bucket(&self, severity: Severity) -> &[Vulnerability] {
        match severity {
            Severity::Low => &self.low_vulns,
            Severity::Medium => &self.medium_vulns,
            Severity::High => &self.high_vulns,
        }
    }

    pub fn len(&self) -> usize {
        self.low_vulns.len() + self.medium_vulns.len() + self.high_vulns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One tool's contribution to the aggregated report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolReport {
    pub language: String,
    pub tool: String,
    pub buckets: SeverityBuckets,
}

/// Analysis 内的聚合报告：language -> tool -> severity buckets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedReport {
    #[serde(flatten)]
    pub languages: BTreeMap<String, BTreeMap<String, SeverityBuckets>>,
}

impl AggregatedReport {
    /// Replaces the tool's entry, so applying the same report twice is a no-op.
    pub fn apply(&mut self, report: ToolReport) {
        self.languages
            .entry(report.language)
            .or_default()
            .insert(report.tool, report.buckets);
    }

    pub fn get(&self, language: &str, tool: &str) -> Option<&SeverityBuckets> {
        self.languages.get(language).and_then(|tools| tools.get(tool))
    }

    /// All vulnerabilities of a language at the given severity, across tools.
    pub fn vulnerabilities(&self, language: &str, severity: Severity) -> Vec<&Vulnerability> {
        self.languages
            .get(language)
            .map(|tools| {
                tools
                    .values()
                    .flat_map(|buckets| buckets.bucket(severity).iter())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.languages
            .values()
            .flat_map(|tools| tools.values())
            .map(SeverityBuckets::len)
            .sum()
    }
}
