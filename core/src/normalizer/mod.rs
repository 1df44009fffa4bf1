// Normalizer module - 工具输出归一化
// 每个安全测试对应一个 Normalizer，把原始输出转换为统一的 verdict + 漏洞列表

pub mod bandit;
pub mod enry;
pub mod gosec;
pub mod registry;

use std::collections::BTreeMap;

use crate::error::Result;
use crate::model::{Confidence, ContainerResult, SeverityBuckets, Severity, ToolReport, Vulnerability};

pub use bandit::BanditNormalizer;
pub use enry::EnryNormalizer;
pub use gosec::GosecNormalizer;
pub use registry::NormalizerRegistry;

/// Printed by job commands when the repository could not be cloned.
pub const CLONE_ERROR_MARKER: &str = "ERROR_CLONING";

pub const NO_ISSUES_FOUND: &str = "No issues found.";
pub const ISSUES_FOUND: &str = "Issues found.";

/// 由检测类工具（enry）发出的后续任务请求，由 Orchestrator 负责提交
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowUp {
    pub language: String,
}

/// 归一化结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub result: ContainerResult,
    pub info: String,
    pub vulnerabilities: Vec<Vulnerability>,
    pub follow_ups: Vec<FollowUp>,
}

impl Normalized {
    pub fn verdict(result: ContainerResult, info: impl Into<String>) -> Self {
        Self {
            result,
            info: info.into(),
            vulnerabilities: Vec::new(),
            follow_ups: Vec::new(),
        }
    }

    /// Infrastructure failure inside the job (clone/setup), not a finding.
    pub fn infra_error(raw: &str) -> Self {
        Self::verdict(ContainerResult::Error, format!("Container error: {}", raw.trim()))
    }

    /// Vulnerabilities grouped per (language, tool), ready to merge into the report.
    pub fn tool_reports(&self) -> Vec<ToolReport> {
        let mut grouped: BTreeMap<(String, String), SeverityBuckets> = BTreeMap::new();
        for vuln in &self.vulnerabilities {
            grouped
                .entry((vuln.language.clone(), vuln.security_tool.clone()))
                .or_default()
                .push(vuln.clone());
        }
        grouped
            .into_iter()
            .map(|((language, tool), buckets)| ToolReport { language, tool, buckets })
            .collect()
    }
}

pub fn has_clone_error(raw: &str) -> bool {
    raw.contains(CLONE_ERROR_MARKER)
}

/// 判定阈值表：severity 在 `severities` 内且 confidence 在 `confidences` 内的发现才算失败
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    pub severities: &'static [Severity],
    pub confidences: &'static [Confidence],
}

impl FailurePolicy {
    pub fn is_failing(&self, severity: Severity, confidence: Confidence) -> bool {
        self.severities.contains(&severity) && self.confidences.contains(&confidence)
    }

    /// Verdict for a finding-based tool. A tool-level error signal is only
    /// logged by the caller: whenever findings exist the per-finding scan decides.
    pub fn judge(&self, vulnerabilities: &[Vulnerability]) -> (ContainerResult, String) {
        if vulnerabilities
            .iter()
            .any(|v| self.is_failing(v.severity, v.confidence))
        {
            (ContainerResult::Failed, ISSUES_FOUND.to_string())
        } else {
            (ContainerResult::Passed, NO_ISSUES_FOUND.to_string())
        }
    }
}

/// 所有 Normalizer 都需要实现此接口
pub trait Normalizer: Send + Sync {
    /// Name of the security test this normalizer handles.
    fn name(&self) -> String;

    /// Pure mapping of raw job output. `Err` means the output could not be
    /// parsed and the container must not be updated.
    fn normalize(&self, raw: &str) -> Result<Normalized>;
}
