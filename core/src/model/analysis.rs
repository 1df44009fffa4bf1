use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::repository::Repository;
use super::vulnerability::AggregatedReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Running,
    Finished,
    TimedOut,
}

impl AnalysisStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Finished => "finished",
            Self::TimedOut => "timedout",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(Self::Running),
            "finished" => Some(Self::Finished),
            "timedout" => Some(Self::TimedOut),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisResult {
    Passed,
    Failed,
    Error,
}

impl AnalysisResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Finished,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Finished => "finished",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(Self::Running),
            "finished" => Some(Self::Finished),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerResult {
    Passed,
    Failed,
    Error,
}

impl ContainerResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// 一次容器化工具运行（Analysis 独占）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    #[serde(rename = "CID")]
    pub cid: String,
    #[serde(rename = "securityTest")]
    pub security_test: String,
    #[serde(rename = "cStatus")]
    pub c_status: ContainerStatus,
    #[serde(rename = "cResult", default, skip_serializing_if = "Option::is_none")]
    pub c_result: Option<ContainerResult>,
    #[serde(rename = "cInfo", default)]
    pub c_info: String,
    #[serde(rename = "cOutput", default)]
    pub c_output: String,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "finishedAt", default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Container {
    pub fn launched(cid: impl Into<String>, security_test: impl Into<String>) -> Self {
        Self {
            cid: cid.into(),
            security_test: security_test.into(),
            c_status: ContainerStatus::Running,
            c_result: None,
            c_info: String::new(),
            c_output: String::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.c_status == ContainerStatus::Finished
    }

    pub fn apply(&mut self, update: &ContainerUpdate) {
        self.c_status = ContainerStatus::Finished;
        self.c_result = Some(update.result);
        self.c_info = update.info.clone();
        self.c_output = update.output.clone();
        if self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
    }
}

/// The only mutable Container fields, written once by the job's normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerUpdate {
    pub result: ContainerResult,
    pub info: String,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(rename = "RID")]
    pub rid: String,
    #[serde(rename = "repositoryURL")]
    pub url: String,
    #[serde(rename = "repositoryBranch")]
    pub branch: String,
    pub status: AnalysisStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(rename = "results", default)]
    pub report: AggregatedReport,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "finishedAt", default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Analysis {
    pub fn start(rid: impl Into<String>, repository: &Repository) -> Self {
        Self {
            rid: rid.into(),
            url: repository.url.clone(),
            branch: repository.branch.clone(),
            status: AnalysisStatus::Running,
            result: None,
            containers: Vec::new(),
            report: AggregatedReport::default(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn container(&self, cid: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.cid == cid)
    }

    pub fn container_mut(&mut self, cid: &str) -> Option<&mut Container> {
        self.containers.iter_mut().find(|c| c.cid == cid)
    }

    pub fn has_security_test(&self, name: &str) -> bool {
        self.containers.iter().any(|c| c.security_test == name)
    }

    /// An analysis without containers has not finished: the detection job is still being attached.
    pub fn all_containers_finished(&self) -> bool {
        !self.containers.is_empty() && self.containers.iter().all(Container::is_finished)
    }

    /// `error` containers do not flip the verdict; only a `failed` one does.
    pub fn final_result(&self) -> AnalysisResult {
        if self
            .containers
            .iter()
            .any(|c| c.c_result == Some(ContainerResult::Failed))
        {
            AnalysisResult::Failed
        } else {
            AnalysisResult::Passed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(cid: &str, result: ContainerResult) -> Container {
        let mut container = Container::launched(cid, "bandit");
        container.apply(&ContainerUpdate {
            result,
            info: String::new(),
            output: String::new(),
        });
        container
    }

    fn analysis_with(containers: Vec<Container>) -> Analysis {
        let mut analysis = Analysis::start("r1", &Repository::new("https://h/o/r.git", "main"));
        analysis.containers = containers;
        analysis
    }

    #[test]
    fn empty_analysis_is_not_finished() {
        assert!(!analysis_with(vec![]).all_containers_finished());
    }

    #[test]
    fn error_containers_do_not_fail_the_analysis() {
        let analysis = analysis_with(vec![
            finished("a", ContainerResult::Passed),
            finished("b", ContainerResult::Error),
        ]);
        assert!(analysis.all_containers_finished());
        assert_eq!(analysis.final_result(), AnalysisResult::Passed);
    }

    #[test]
    fn one_failed_container_fails_the_analysis() {
        let analysis = analysis_with(vec![
            finished("a", ContainerResult::Passed),
            finished("b", ContainerResult::Failed),
        ]);
        assert_eq!(analysis.final_result(), AnalysisResult::Failed);
    }

    #[test]
    fn status_serializes_like_the_wire_format() {
        let json = serde_json::to_string(&AnalysisStatus::TimedOut).unwrap();
        assert_eq!(json, "\"timedout\"");
        assert_eq!(AnalysisStatus::parse("timedout"), Some(AnalysisStatus::TimedOut));
    }
}
