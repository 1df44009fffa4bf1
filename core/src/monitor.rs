// Monitor - 每个 Analysis 一个后台监视任务
// 周期性检查所有 Container 是否完成，超过截止时间则标记为 timedout

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::model::AnalysisStatus;
use crate::store::RepositoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Watching,
    TimedOut,
    Done,
}

impl MonitorState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Watching)
    }
}

pub struct CompletionMonitor {
    rid: String,
    store: Arc<dyn RepositoryStore>,
    config: Arc<OrchestratorConfig>,
}

impl CompletionMonitor {
    pub fn new(rid: &str, store: Arc<dyn RepositoryStore>, config: Arc<OrchestratorConfig>) -> Self {
        Self {
            rid: rid.to_string(),
            store,
            config,
        }
    }

    pub fn spawn(self) -> JoinHandle<MonitorState> {
        tokio::spawn(self.run())
    }

    /// Polls until every container finished or the deadline passes, whichever comes first.
    pub async fn run(self) -> MonitorState {
        let started = Instant::now();
        let deadline = time::sleep_until(started + self.config.analysis_timeout);
        tokio::pin!(deadline);

        let mut ticker = time::interval_at(started + self.config.poll_interval, self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(rid = %self.rid, "monitoring analysis");

        loop {
            tokio::select! {
                biased;
                _ = ticker.tick() => {
                    let state = self.check().await;
                    if state.is_terminal() {
                        return state;
                    }
                }
                _ = &mut deadline => {
                    self.time_out().await;
                    return MonitorState::TimedOut;
                }
            }
        }
    }

    /// One poll tick. Store failures keep the monitor watching; the next tick retries.
    pub async fn check(&self) -> MonitorState {
        let analysis = match self.store.find_analysis(&self.rid).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(rid = %self.rid, error = %e, "could not read analysis, retrying on next tick");
                return MonitorState::Watching;
            }
        };

        if analysis.status.is_terminal() {
            return MonitorState::Done;
        }
        if !analysis.all_containers_finished() {
            return MonitorState::Watching;
        }

        let result = analysis.final_result();
        match self
            .store
            .finish_analysis(&self.rid, AnalysisStatus::Finished, Some(result))
            .await
        {
            Ok(_) => info!(rid = %self.rid, result = result.as_str(), "analysis finished"),
            // 不重试：分析会停留在 running，只能依靠日志发现
            Err(e) => error!(rid = %self.rid, error = %e, "failed to write final analysis status"),
        }
        MonitorState::Done
    }

    async fn time_out(&self) {
        match self
            .store
            .finish_analysis(&self.rid, AnalysisStatus::TimedOut, None)
            .await
        {
            Ok(true) => warn!(
                rid = %self.rid,
                timeout_secs = self.config.analysis_timeout.as_secs(),
                "analysis timed out"
            ),
            Ok(false) => debug!(rid = %self.rid, "analysis already terminal at deadline"),
            Err(e) => error!(rid = %self.rid, error = %e, "failed to mark analysis as timed out"),
        }
    }
}
