use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use scanforge_core::{
    default_security_tests, load_security_tests_from_dir, AdmissionController, Catalog, JobLauncher,
    NormalizerRegistry, Orchestrator, RepositoryStore,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

use crate::config::ServerConfig;
use crate::launcher::DockerLauncher;
use crate::store::SqliteStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RepositoryStore>,
    pub admission: Arc<AdmissionController>,
    pub catalog: Arc<Catalog>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Startup requirement checks in order: docker hosts, store, catalog.
    /// The first failure aborts startup.
    pub async fn bootstrap(config: ServerConfig) -> anyhow::Result<Self> {
        // 1. Docker 主机
        let launcher = DockerLauncher::new(&config.docker_hosts, config.docker_api_port)?;
        launcher.ping_all().await.context("Docker API check failed")?;
        tracing::info!(hosts = ?config.docker_hosts, "docker hosts are reachable");

        // 2. 数据库
        let db = init_db(&config.database).await?;
        let store = Arc::new(SqliteStore::new(db));
        store.migrate().await.context("Failed to create tables")?;
        store.ping().await.context("Database check failed")?;

        // 3. 默认安全测试
        let state = Self::assemble(store, Arc::new(launcher), config);
        state.install_catalog().await?;
        Ok(state)
    }

    pub fn assemble(
        store: Arc<dyn RepositoryStore>,
        launcher: Arc<dyn JobLauncher>,
        config: ServerConfig,
    ) -> Self {
        let orchestrator = Orchestrator::new(
            store.clone(),
            launcher,
            Arc::new(NormalizerRegistry::with_defaults()),
            Arc::new(config.orchestrator.clone()),
        );
        Self {
            admission: Arc::new(AdmissionController::new(store.clone(), orchestrator)),
            catalog: Arc::new(Catalog::new(store.clone())),
            store,
            config: Arc::new(config),
        }
    }

    async fn install_catalog(&self) -> anyhow::Result<()> {
        let inserted = self
            .catalog
            .ensure_defaults(&default_security_tests())
            .await
            .context("Failed to check default securityTests")?;
        tracing::info!(inserted, "default securityTests checked");

        if let Some(dir) = &self.config.security_tests_dir {
            let tests = load_security_tests_from_dir(dir)?;
            let inserted = self
                .catalog
                .ensure_defaults(&tests)
                .await
                .context("Failed to install securityTests from directory")?;
            tracing::info!(dir = %dir.display(), found = tests.len(), inserted, "securityTests loaded");
        }
        Ok(())
    }
}

async fn init_db(path: &Path) -> anyhow::Result<Pool<Sqlite>> {
    tracing::info!("Database path: {}", path.display());

    // 使用 SqliteConnectOptions 来确保数据库文件可以被创建
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    Ok(pool)
}
