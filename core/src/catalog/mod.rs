// Catalog module - 安全测试目录与仓库登记

pub mod loader;

use std::sync::Arc;

use tracing::info;

use crate::admission::{validate_branch, validate_url};
use crate::error::{CoreError, Result};
use crate::model::{Repository, SecurityTest};
use crate::normalizer::bandit::BANDIT_TEST;
use crate::normalizer::enry::ENRY_TEST;
use crate::normalizer::gosec::GOSEC_TEST;
use crate::store::{RepositoryStore, StoreError};

pub use loader::load_security_tests_from_dir;

/// Clones the target into `code/`, printing the clone-failure marker instead of failing the job.
fn clone_then(cmd: &str) -> String {
    format!(
        "git clone -b %GIT_BRANCH% --single-branch %GIT_REPO% code --quiet 2> /tmp/errorGitClone \
         || {{ echo \"ERROR_CLONING $(cat /tmp/errorGitClone)\"; exit 0; }}; cd code && {}",
        cmd
    )
}

/// 内置的默认安全测试（启动时若不存在则写入）
pub fn default_security_tests() -> Vec<SecurityTest> {
    vec![
        SecurityTest::new(ENRY_TEST, "huskyci/enry", &clone_then("enry --json"), "Generic", true),
        SecurityTest::new(
            BANDIT_TEST,
            "huskyci/bandit",
            &clone_then("bandit -r . -f json 2> /dev/null"),
            "Python",
            true,
        ),
        SecurityTest::new(
            GOSEC_TEST,
            "huskyci/gosec",
            &clone_then("gosec -quiet -fmt=json ./... 2> /dev/null"),
            "Go",
            true,
        ),
    ]
}

pub struct Catalog {
    store: Arc<dyn RepositoryStore>,
}

impl Catalog {
    pub fn new(store: Arc<dyn RepositoryStore>) -> Self {
        Self { store }
    }

    pub async fn create_security_test(&self, test: &SecurityTest) -> Result<()> {
        if test.name.trim().is_empty() || test.image.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "A securityTest needs a name and an image.".to_string(),
            ));
        }

        match self.store.find_security_test(&test.name).await {
            Ok(_) => {
                return Err(CoreError::Conflict(
                    "This securityTest is already registered.".to_string(),
                ))
            }
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        self.store.insert_security_test(test).await?;
        info!(security_test = %test.name, image = %test.image, "securityTest created");
        Ok(())
    }

    pub async fn create_repository(&self, repository: &Repository) -> Result<Repository> {
        let url = validate_url(&repository.url)?;
        let branch = validate_branch(&repository.branch)?;

        match self.store.find_repository(&url, &branch).await {
            Ok(_) => return Err(CoreError::Conflict("Repository already registered.".to_string())),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let repository = Repository::new(url, branch).with_security_tests(repository.security_tests.clone());
        self.store.insert_repository(&repository).await?;
        info!(url = %repository.url, branch = %repository.branch, "repository created");
        Ok(repository)
    }

    /// Inserts each test whose name is not in the catalog yet. Returns how many were added.
    pub async fn ensure_defaults(&self, tests: &[SecurityTest]) -> Result<usize> {
        let mut inserted = 0;
        for test in tests {
            match self.store.find_security_test(&test.name).await {
                Ok(_) => continue,
                Err(StoreError::NotFound(_)) => {
                    info!(security_test = %test.name, "securityTest missing from catalog, inserting it");
                    self.store.insert_security_test(test).await?;
                    inserted += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn catalog() -> (Arc<InMemoryStore>, Catalog) {
        let store = Arc::new(InMemoryStore::new());
        (store.clone(), Catalog::new(store))
    }

    #[tokio::test]
    async fn duplicate_security_test_is_a_conflict() {
        let (_, catalog) = catalog();
        let test = SecurityTest::new("brakeman", "huskyci/brakeman", "brakeman -f json", "Ruby", true);
        catalog.create_security_test(&test).await.unwrap();

        let err = catalog.create_security_test(&test).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn ensure_defaults_is_idempotent() {
        let (store, catalog) = catalog();
        let defaults = default_security_tests();
        assert_eq!(catalog.ensure_defaults(&defaults).await.unwrap(), 3);
        assert_eq!(catalog.ensure_defaults(&defaults).await.unwrap(), 0);
        assert_eq!(store.find_security_test("enry").await.unwrap().image, "huskyci/enry");
    }

    #[tokio::test]
    async fn create_repository_stores_the_matched_url() {
        let (store, catalog) = catalog();
        let input = Repository::new("clone git@github.com:org/repo.git please", "main");
        let created = catalog.create_repository(&input).await.unwrap();
        assert_eq!(created.url, "git@github.com:org/repo.git");
        assert!(store.find_repository("git@github.com:org/repo.git", "main").await.is_ok());

        let err = catalog.create_repository(&input).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[test]
    fn default_commands_carry_placeholders() {
        for test in default_security_tests() {
            assert!(test.cmd.contains("%GIT_REPO%"), "{}", test.name);
            assert!(test.cmd.contains("%GIT_BRANCH%"), "{}", test.name);
            assert!(test.cmd.contains("ERROR_CLONING"), "{}", test.name);
        }
    }
}
