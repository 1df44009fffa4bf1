use std::time::Duration;

use crate::normalizer::enry::ENRY_TEST;

/// 编排配置：进程启动时构造一次，通过 Arc 传给 Orchestrator / Monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Interval between two completion checks of an analysis.
    pub poll_interval: Duration,
    /// Deadline for an analysis, measured from the moment its monitor starts.
    pub analysis_timeout: Duration,
    /// Catalog name of the language-detection security test.
    pub detection_test: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            analysis_timeout: Duration::from_secs(10 * 60),
            detection_test: ENRY_TEST.to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_analysis_timeout(mut self, timeout: Duration) -> Self {
        self.analysis_timeout = timeout;
        self
    }
}
