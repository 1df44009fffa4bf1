// Store module - 持久化接口
// Repository / Analysis / SecurityTest 三个集合的抽象操作，所有跨任务协作都经由这里

pub mod memory;

use async_trait::async_trait;

use crate::model::{
    Analysis, AnalysisResult, AnalysisStatus, Container, ContainerUpdate, Repository, SecurityTest,
    ToolReport,
};

pub use memory::InMemoryStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Duplicate(String),

    /// Write refused: the analysis already reached a terminal status.
    #[error("{0} is no longer running")]
    Terminal(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// 存储 trait - 每个写操作都只作用于一个主键（RID，或 RID 内的 CID）
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    async fn find_repository(&self, url: &str, branch: &str) -> StoreResult<Repository>;

    async fn insert_repository(&self, repository: &Repository) -> StoreResult<()>;

    async fn find_analysis(&self, rid: &str) -> StoreResult<Analysis>;

    /// Most recently created analysis for the target.
    async fn find_latest_analysis(&self, url: &str, branch: &str) -> StoreResult<Analysis>;

    async fn insert_analysis(&self, analysis: &Analysis) -> StoreResult<()>;

    /// Container and report writes fail with `Terminal` once the analysis
    /// has left `running`.
    async fn push_container(&self, rid: &str, container: &Container) -> StoreResult<()>;

    /// Positional update of one element of the analysis' container sequence.
    async fn update_container(&self, rid: &str, cid: &str, update: &ContainerUpdate) -> StoreResult<()>;

    async fn set_tool_report(&self, rid: &str, report: &ToolReport) -> StoreResult<()>;

    /// Moves a running analysis to a terminal status. Returns `false` when the
    /// analysis was already terminal and nothing was written.
    async fn finish_analysis(
        &self,
        rid: &str,
        status: AnalysisStatus,
        result: Option<AnalysisResult>,
    ) -> StoreResult<bool>;

    async fn find_security_test(&self, name: &str) -> StoreResult<SecurityTest>;

    /// Default catalog entries for a language, matched case-insensitively.
    async fn find_security_tests_by_language(&self, language: &str) -> StoreResult<Vec<SecurityTest>>;

    async fn insert_security_test(&self, test: &SecurityTest) -> StoreResult<()>;
}
