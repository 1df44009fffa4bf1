// ScanForge Core Library
// 核心功能库：扫描请求准入、分析编排、完成监视与工具输出归一化

pub mod admission;
pub mod catalog;
pub mod config;
pub mod launcher;
pub mod model;
pub mod monitor;
pub mod normalizer;
pub mod orchestrator;
pub mod store;

// 重新导出常用类型
pub use admission::{validate_branch, validate_url, Admission, AdmissionController};
pub use catalog::{default_security_tests, load_security_tests_from_dir, Catalog};
pub use config::OrchestratorConfig;
pub use launcher::{JobLauncher, JobSpec, LaunchError};
pub use model::{
    AggregatedReport, Analysis, AnalysisResult, AnalysisStatus, Confidence, Container, ContainerResult,
    ContainerStatus, Repository, SecurityTest, Severity, Vulnerability,
};
pub use monitor::{CompletionMonitor, MonitorState};
pub use normalizer::{Normalized, Normalizer, NormalizerRegistry};
pub use orchestrator::Orchestrator;
pub use store::{InMemoryStore, RepositoryStore, StoreError};

pub mod error {
    use thiserror::Error;

    use crate::launcher::LaunchError;
    use crate::store::StoreError;

    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum CoreError {
        #[error("{0}")]
        InvalidInput(String),

        #[error("{0}")]
        Conflict(String),

        #[error("{0}")]
        NotFound(String),

        #[error("Internal error: {0}")]
        Internal(String),

        #[error("Tool error: {0}")]
        Tool(String),
    }

    impl From<StoreError> for CoreError {
        fn from(error: StoreError) -> Self {
            match error {
                StoreError::NotFound(what) => CoreError::NotFound(format!("{} not found", what)),
                StoreError::Duplicate(what) => CoreError::Conflict(format!("{} already exists", what)),
                StoreError::Terminal(what) => CoreError::Conflict(format!("{} is no longer running", what)),
                StoreError::Backend(reason) => CoreError::Internal(reason),
            }
        }
    }

    impl From<LaunchError> for CoreError {
        fn from(error: LaunchError) -> Self {
            CoreError::Internal(error.to_string())
        }
    }

    pub type Result<T> = std::result::Result<T, CoreError>;
}
