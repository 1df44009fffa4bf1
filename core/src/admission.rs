// Admission - 扫描请求准入控制
// 校验 URL / 分支，保证同一 (URL, Branch) 同时最多只有一个 running 的分析

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::{Analysis, AnalysisStatus, Repository};
use crate::orchestrator::Orchestrator;
use crate::store::{RepositoryStore, StoreError};

const URL_PATTERN: &str = r"((git|ssh|https?)|(git@[\w.]+))(:(//)?)([\w.@:/~-]+)(\.git)(/)?";
const BRANCH_PATTERN: &str = r"^[A-Za-z0-9_.-]*$";

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(URL_PATTERN).unwrap())
}

fn branch_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(BRANCH_PATTERN).unwrap())
}

/// Returns only the part of the input that matches the git remote grammar.
pub fn validate_url(raw: &str) -> Result<String> {
    url_regex()
        .find(raw)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| CoreError::InvalidInput("This is not a valid repository URL.".to_string()))
}

pub fn validate_branch(raw: &str) -> Result<String> {
    if branch_regex().is_match(raw) {
        Ok(raw.to_string())
    } else {
        Err(CoreError::InvalidInput("This is not a valid branch.".to_string()))
    }
}

/// 准入成功的回执
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub rid: String,
}

pub struct AdmissionController {
    store: Arc<dyn RepositoryStore>,
    orchestrator: Orchestrator,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn RepositoryStore>, orchestrator: Orchestrator) -> Self {
        Self { store, orchestrator }
    }

    /// Validates and admits a scan request, then starts the analysis in the
    /// background. Never waits for the scan itself.
    pub async fn submit(&self, rid: Option<String>, url: &str, branch: &str) -> Result<Admission> {
        let url = validate_url(url)?;
        let branch = validate_branch(branch)?;

        let requested = rid.filter(|rid| !rid.trim().is_empty());
        if let Some(rid) = &requested {
            self.ensure_rid_free(rid).await?;
        }

        let repository = match self.store.find_repository(&url, &branch).await {
            Ok(repository) => {
                self.ensure_single_flight(&url, &branch).await?;
                repository
            }
            Err(StoreError::NotFound(_)) => self.register_repository(&url, &branch).await?,
            Err(e) => return Err(CoreError::Internal(format!("finding repository: {}", e))),
        };

        let rid = requested.unwrap_or_else(|| Uuid::new_v4().to_string());

        info!(rid = %rid, url = %url, branch = %branch, "analysis request accepted");

        let orchestrator = self.orchestrator.clone();
        let background_rid = rid.clone();
        tokio::spawn(async move {
            orchestrator.start_analysis(&background_rid, &repository).await;
        });

        Ok(Admission { rid })
    }

    pub async fn status(&self, rid: &str) -> Result<Analysis> {
        match self.store.find_analysis(rid).await {
            Ok(analysis) => Ok(analysis),
            Err(StoreError::NotFound(_)) => Err(CoreError::NotFound("Analysis not found.".to_string())),
            Err(e) => Err(CoreError::Internal(format!("finding analysis: {}", e))),
        }
    }

    async fn ensure_rid_free(&self, rid: &str) -> Result<()> {
        match self.store.find_analysis(rid).await {
            Ok(_) => {
                warn!(rid = %rid, "requested RID already in use");
                Err(CoreError::Conflict("This RID is already in use.".to_string()))
            }
            Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(CoreError::Internal(format!("finding analysis: {}", e))),
        }
    }

    async fn ensure_single_flight(&self, url: &str, branch: &str) -> Result<()> {
        match self.store.find_latest_analysis(url, branch).await {
            Ok(analysis) if analysis.status == AnalysisStatus::Running => {
                warn!(rid = %analysis.rid, url = %url, branch = %branch, "analysis already running for target");
                Err(CoreError::Conflict(
                    "An analysis is already in place for this URL and branch.".to_string(),
                ))
            }
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(CoreError::Internal(format!("finding analysis: {}", e))),
        }
    }

    async fn register_repository(&self, url: &str, branch: &str) -> Result<Repository> {
        match self.store.insert_repository(&Repository::new(url, branch)).await {
            // 并发请求可能已经插入了同一个仓库
            Ok(()) | Err(StoreError::Duplicate(_)) => {}
            Err(e) => return Err(CoreError::Internal(format!("inserting repository: {}", e))),
        }

        // read-after-write
        self.store
            .find_repository(url, branch)
            .await
            .map_err(|e| CoreError::Internal(format!("finding repository after insert: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_keeps_only_the_matched_remote() {
        assert_eq!(
            validate_url("please clone git@host:repo.git now").unwrap(),
            "git@host:repo.git"
        );
        assert_eq!(
            validate_url("https://github.com/org/repo.git").unwrap(),
            "https://github.com/org/repo.git"
        );
        assert_eq!(
            validate_url("ssh://git@github.com/org/repo.git; rm -rf /").unwrap(),
            "ssh://git@github.com/org/repo.git"
        );
    }

    #[test]
    fn malformed_urls_are_rejected() {
        for url in [
            "https://github.com/org/repo",
            "ftp://github.com/org/repo.git",
            "github.com/org/repo.git",
            "",
        ] {
            let err = validate_url(url).unwrap_err();
            assert!(matches!(err, CoreError::InvalidInput(_)), "{}", url);
        }
    }

    #[test]
    fn branch_grammar() {
        assert!(validate_branch("main").is_ok());
        assert!(validate_branch("release-1.2_rc").is_ok());
        assert!(validate_branch("").is_ok());
        assert!(validate_branch("feature/x").is_err());
        assert!(validate_branch("main; ls").is_err());
    }
}
