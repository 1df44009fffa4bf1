// Orchestrator - 分析生命周期
// 创建 Analysis，启动语言检测任务，按检测结果扇出各语言的安全测试，并启动 Monitor

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::launcher::{JobLauncher, JobSpec};
use crate::model::{Analysis, Container, ContainerResult, ContainerUpdate, Repository, SecurityTest};
use crate::monitor::{CompletionMonitor, MonitorState};
use crate::normalizer::{FollowUp, NormalizerRegistry};
use crate::store::RepositoryStore;

#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn RepositoryStore>,
    launcher: Arc<dyn JobLauncher>,
    normalizers: Arc<NormalizerRegistry>,
    config: Arc<OrchestratorConfig>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RepositoryStore>,
        launcher: Arc<dyn JobLauncher>,
        normalizers: Arc<NormalizerRegistry>,
        config: Arc<OrchestratorConfig>,
    ) -> Self {
        Self {
            store,
            launcher,
            normalizers,
            config,
        }
    }

    /// Fire-and-forget entry point. Every failure is logged and abandons the
    /// analysis; on success the analysis' monitor handle is returned.
    pub async fn start_analysis(&self, rid: &str, repository: &Repository) -> Option<JoinHandle<MonitorState>> {
        // step 1: 写入新的 Analysis
        let analysis = Analysis::start(rid, repository);
        if let Err(e) = self.store.insert_analysis(&analysis).await {
            error!(rid = %rid, error = %e, "failed to insert new analysis");
            return None;
        }

        // step 2: 启动语言检测，后续安全测试由检测结果扇出
        let detection = match self.store.find_security_test(&self.config.detection_test).await {
            Ok(test) => test,
            Err(e) => {
                error!(
                    rid = %rid,
                    security_test = %self.config.detection_test,
                    error = %e,
                    "failed to find language detection securityTest"
                );
                return None;
            }
        };
        if let Err(e) = self.launch(&analysis, detection).await {
            error!(rid = %rid, error = %e, "failed to launch language detection");
            return None;
        }

        // step 3: Monitor 负责把 Analysis 推进到终态
        let monitor = CompletionMonitor::new(rid, self.store.clone(), self.config.clone());
        Some(monitor.spawn())
    }

    /// Submits one job, attaches its container to the analysis and starts waiting for its output.
    async fn launch(&self, analysis: &Analysis, security_test: SecurityTest) -> Result<String> {
        let name = security_test.name.clone();
        let job = JobSpec::new(&analysis.rid, security_test, &analysis.url, &analysis.branch);
        let cid = self.launcher.submit(&job).await?;

        if let Err(e) = self
            .store
            .push_container(&analysis.rid, &Container::launched(cid.as_str(), name.as_str()))
            .await
        {
            error!(rid = %analysis.rid, cid = %cid, error = %e, "job launched but its container could not be recorded");
            return Err(e.into());
        }

        info!(rid = %analysis.rid, cid = %cid, security_test = %name, "job launched");

        self.spawn_watcher(analysis.rid.clone(), cid.clone(), name);
        Ok(cid)
    }

    // 装箱后再 spawn：watch_job 会经由扇出再次调用 launch
    fn spawn_watcher(&self, rid: String, cid: String, security_test: String) {
        let orchestrator = self.clone();
        let watcher: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
            orchestrator.watch_job(&rid, &cid, &security_test).await;
        });
        tokio::spawn(watcher);
    }

    async fn watch_job(&self, rid: &str, cid: &str, security_test: &str) {
        match self.launcher.wait_output(cid).await {
            Ok(raw) => {
                if let Err(e) = self.complete_job(rid, cid, security_test, &raw).await {
                    error!(rid = %rid, cid = %cid, security_test = %security_test, error = %e, "failed to apply job output");
                }
            }
            // Container 保持 running，最终由 Monitor 判定超时
            Err(e) => error!(rid = %rid, cid = %cid, error = %e, "failed to collect job output"),
        }
    }

    /// Applies a finished job's raw output: fan-out first, then the report,
    /// then the container's verdict. Safe to re-apply with the same output.
    /// Output for an analysis that is no longer running is dropped.
    pub async fn complete_job(&self, rid: &str, cid: &str, security_test: &str, raw: &str) -> Result<()> {
        // 终态分析不再接受任何写入：超时之后到达的输出直接丢弃
        let analysis = self.store.find_analysis(rid).await?;
        if analysis.status.is_terminal() {
            debug!(rid = %rid, cid = %cid, status = ?analysis.status, "analysis already terminal, ignoring job output");
            return Ok(());
        }

        let normalizer = match self.normalizers.get(security_test) {
            Some(normalizer) => normalizer,
            None => {
                warn!(rid = %rid, cid = %cid, security_test = %security_test, "no normalizer registered");
                let update = ContainerUpdate {
                    result: ContainerResult::Error,
                    info: format!("No normalizer registered for {}.", security_test),
                    output: raw.to_string(),
                };
                self.store.update_container(rid, cid, &update).await?;
                return Ok(());
            }
        };

        let normalized = normalizer.normalize(raw)?;

        // 扇出的 Container 必须先于检测 Container 完成写入，否则 Monitor 可能提前判定全部完成
        if !normalized.follow_ups.is_empty() {
            self.fan_out(&analysis, &normalized.follow_ups).await;
        }

        for report in normalized.tool_reports() {
            self.store.set_tool_report(rid, &report).await?;
        }

        let update = ContainerUpdate {
            result: normalized.result,
            info: normalized.info,
            output: raw.to_string(),
        };
        self.store.update_container(rid, cid, &update).await?;

        debug!(rid = %rid, cid = %cid, result = ?update.result, "container finished");
        Ok(())
    }

    async fn fan_out(&self, analysis: &Analysis, follow_ups: &[FollowUp]) {
        let rid = analysis.rid.as_str();
        let mut launched: HashSet<String> = HashSet::new();
        for follow_up in follow_ups {
            let tests = match self.store.find_security_tests_by_language(&follow_up.language).await {
                Ok(tests) => tests,
                Err(e) => {
                    error!(rid = %rid, language = %follow_up.language, error = %e, "failed to find securityTests");
                    continue;
                }
            };
            if tests.is_empty() {
                debug!(rid = %rid, language = %follow_up.language, "no securityTest for language");
            }

            for test in tests {
                if analysis.has_security_test(&test.name) || !launched.insert(test.name.clone()) {
                    continue;
                }
                let name = test.name.clone();
                if let Err(e) = self.launch(analysis, test).await {
                    error!(rid = %rid, security_test = %name, error = %e, "failed to launch securityTest");
                }
            }
        }
    }
}
