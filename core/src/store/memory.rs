use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{RepositoryStore, StoreError, StoreResult};
use crate::model::{
    Analysis, AnalysisResult, AnalysisStatus, Container, ContainerUpdate, Repository, SecurityTest,
    ToolReport,
};

#[derive(Default)]
struct Collections {
    repositories: Vec<Repository>,
    analyses: Vec<Analysis>,
    security_tests: Vec<SecurityTest>,
}

/// 内存存储，用于测试和不需要持久化的部署
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Collections>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn analysis_mut<'a>(analyses: &'a mut [Analysis], rid: &str) -> StoreResult<&'a mut Analysis> {
    analyses
        .iter_mut()
        .find(|a| a.rid == rid)
        .ok_or_else(|| StoreError::NotFound(format!("analysis {}", rid)))
}

/// Container and report writes only land on running analyses.
fn running_analysis_mut<'a>(analyses: &'a mut [Analysis], rid: &str) -> StoreResult<&'a mut Analysis> {
    let analysis = analysis_mut(analyses, rid)?;
    if analysis.status.is_terminal() {
        return Err(StoreError::Terminal(format!("analysis {}", rid)));
    }
    Ok(analysis)
}

#[async_trait]
impl RepositoryStore for InMemoryStore {
    async fn find_repository(&self, url: &str, branch: &str) -> StoreResult<Repository> {
        let inner = self.inner.read().await;
        inner
            .repositories
            .iter()
            .find(|r| r.url == url && r.branch == branch)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("repository {}@{}", url, branch)))
    }

    async fn insert_repository(&self, repository: &Repository) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner
            .repositories
            .iter()
            .any(|r| r.url == repository.url && r.branch == repository.branch)
        {
            return Err(StoreError::Duplicate(format!(
                "repository {}@{}",
                repository.url, repository.branch
            )));
        }
        inner.repositories.push(repository.clone());
        Ok(())
    }

    async fn find_analysis(&self, rid: &str) -> StoreResult<Analysis> {
        let inner = self.inner.read().await;
        inner
            .analyses
            .iter()
            .find(|a| a.rid == rid)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("analysis {}", rid)))
    }

    async fn find_latest_analysis(&self, url: &str, branch: &str) -> StoreResult<Analysis> {
        let inner = self.inner.read().await;
        // 插入顺序即创建顺序，取最后一个
        inner
            .analyses
            .iter()
            .rev()
            .find(|a| a.url == url && a.branch == branch)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("analysis for {}@{}", url, branch)))
    }

    async fn insert_analysis(&self, analysis: &Analysis) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.analyses.iter().any(|a| a.rid == analysis.rid) {
            return Err(StoreError::Duplicate(format!("analysis {}", analysis.rid)));
        }
        inner.analyses.push(analysis.clone());
        Ok(())
    }

    async fn push_container(&self, rid: &str, container: &Container) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let analysis = running_analysis_mut(&mut inner.analyses, rid)?;
        if analysis.container(&container.cid).is_some() {
            return Err(StoreError::Duplicate(format!("container {}", container.cid)));
        }
        analysis.containers.push(container.clone());
        Ok(())
    }

    async fn update_container(&self, rid: &str, cid: &str, update: &ContainerUpdate) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let analysis = running_analysis_mut(&mut inner.analyses, rid)?;
        let container = analysis
            .container_mut(cid)
            .ok_or_else(|| StoreError::NotFound(format!("container {}", cid)))?;
        container.apply(update);
        Ok(())
    }

    async fn set_tool_report(&self, rid: &str, report: &ToolReport) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let analysis = running_analysis_mut(&mut inner.analyses, rid)?;
        analysis.report.apply(report.clone());
        Ok(())
    }

    async fn finish_analysis(
        &self,
        rid: &str,
        status: AnalysisStatus,
        result: Option<AnalysisResult>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let analysis = analysis_mut(&mut inner.analyses, rid)?;
        if analysis.status.is_terminal() {
            return Ok(false);
        }
        analysis.status = status;
        analysis.result = result;
        analysis.finished_at = Some(Utc::now());
        Ok(true)
    }

    async fn find_security_test(&self, name: &str) -> StoreResult<SecurityTest> {
        let inner = self.inner.read().await;
        inner
            .security_tests
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("securityTest {}", name)))
    }

    async fn find_security_tests_by_language(&self, language: &str) -> StoreResult<Vec<SecurityTest>> {
        let inner = self.inner.read().await;
        Ok(inner
            .security_tests
            .iter()
            .filter(|t| t.default && t.matches_language(language))
            .cloned()
            .collect())
    }

    async fn insert_security_test(&self, test: &SecurityTest) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.security_tests.iter().any(|t| t.name == test.name) {
            return Err(StoreError::Duplicate(format!("securityTest {}", test.name)));
        }
        inner.security_tests.push(test.clone());
        Ok(())
    }
}
