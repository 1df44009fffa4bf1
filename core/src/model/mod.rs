// Model module - 数据模型
// Repository / Analysis / SecurityTest 三个集合，以及归一化后的漏洞记录

pub mod analysis;
pub mod repository;
pub mod vulnerability;

pub use analysis::{Analysis, AnalysisResult, AnalysisStatus, Container, ContainerResult, ContainerStatus, ContainerUpdate};
pub use repository::Repository;
pub use security_test::SecurityTest;
pub use vulnerability::{AggregatedReport, Confidence, SeverityBuckets, Severity, ToolReport, Vulnerability};
