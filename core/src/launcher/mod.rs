// Launcher module - 任务启动接口
// 容器运行时由外部实现（见 web-backend 的 DockerLauncher），这里只定义契约

use async_trait::async_trait;

use crate::model::SecurityTest;

const REPO_PLACEHOLDER: &str = "%GIT_REPO%";
const BRANCH_PLACEHOLDER: &str = "%GIT_BRANCH%";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to submit job: {0}")]
    Submit(String),

    #[error("failed to collect job output: {0}")]
    Wait(String),

    #[error("job launcher unavailable: {0}")]
    Unavailable(String),
}

/// 一次任务：某个安全测试作用于某个 (URL, Branch)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub rid: String,
    pub security_test: SecurityTest,
    pub url: String,
    pub branch: String,
}

impl JobSpec {
    pub fn new(rid: &str, security_test: SecurityTest, url: &str, branch: &str) -> Self {
        Self {
            rid: rid.to_string(),
            security_test,
            url: url.to_string(),
            branch: branch.to_string(),
        }
    }

    pub fn image(&self) -> &str {
        &self.security_test.image
    }

    /// The security test's command with the target substituted in.
    pub fn command(&self) -> String {
        self.security_test
            .cmd
            .replace(REPO_PLACEHOLDER, &self.url)
            .replace(BRANCH_PLACEHOLDER, &self.branch)
    }
}

#[async_trait]
pub trait JobLauncher: Send + Sync {
    /// Starts the job and returns its CID without waiting for it to finish.
    async fn submit(&self, job: &JobSpec) -> Result<String, LaunchError>;

    /// Resolves once the job has exited, yielding its raw output.
    async fn wait_output(&self, cid: &str) -> Result<String, LaunchError>;
}
