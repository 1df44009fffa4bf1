// SQLite 存储：RepositoryStore 的持久化实现
// Container 与工具报告各自成行，写入天然按 (RID, CID) / (RID, language, tool) 分区

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scanforge_core::model::{
    AggregatedReport, Analysis, AnalysisResult, AnalysisStatus, Container, ContainerResult,
    ContainerStatus, ContainerUpdate, Repository, SecurityTest, SeverityBuckets, ToolReport,
};
use scanforge_core::store::{RepositoryStore, StoreError, StoreResult};
use sqlx::{FromRow, Pool, Sqlite};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS repositories (
    url TEXT NOT NULL,
    branch TEXT NOT NULL,
    security_tests TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    PRIMARY KEY (url, branch)
);

CREATE TABLE IF NOT EXISTS analyses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rid TEXT UNIQUE NOT NULL,
    url TEXT NOT NULL,
    branch TEXT NOT NULL,
    status TEXT NOT NULL,
    result TEXT,
    created_at TEXT NOT NULL,
    finished_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_analyses_target ON analyses (url, branch);

CREATE TABLE IF NOT EXISTS containers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rid TEXT NOT NULL,
    cid TEXT NOT NULL,
    security_test TEXT NOT NULL,
    status TEXT NOT NULL,
    result TEXT,
    info TEXT NOT NULL DEFAULT '',
    output TEXT NOT NULL DEFAULT '',
    started_at TEXT NOT NULL,
    finished_at TEXT,
    UNIQUE (rid, cid),
    FOREIGN KEY(rid) REFERENCES analyses(rid)
);

CREATE TABLE IF NOT EXISTS tool_reports (
    rid TEXT NOT NULL,
    language TEXT NOT NULL,
    tool TEXT NOT NULL,
    buckets TEXT NOT NULL,
    PRIMARY KEY (rid, language, tool),
    FOREIGN KEY(rid) REFERENCES analyses(rid)
);

CREATE TABLE IF NOT EXISTS security_tests (
    name TEXT PRIMARY KEY,
    image TEXT NOT NULL,
    cmd TEXT NOT NULL,
    language TEXT NOT NULL DEFAULT '',
    is_default INTEGER NOT NULL DEFAULT 0
);
"#;

#[derive(FromRow)]
struct RepositoryRow {
    url: String,
    branch: String,
    security_tests: String,
    created_at: String,
}

#[derive(FromRow)]
struct AnalysisRow {
    rid: String,
    url: String,
    branch: String,
    status: String,
    result: Option<String>,
    created_at: String,
    finished_at: Option<String>,
}

#[derive(FromRow)]
struct ContainerRow {
    cid: String,
    security_test: String,
    status: String,
    result: Option<String>,
    info: String,
    output: String,
    started_at: String,
    finished_at: Option<String>,
}

#[derive(FromRow)]
struct ToolReportRow {
    language: String,
    tool: String,
    buckets: String,
}

#[derive(FromRow)]
struct SecurityTestRow {
    name: String,
    image: String,
    cmd: String,
    language: String,
    is_default: bool,
}

fn backend(error: sqlx::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

/// Unique-constraint violations become `Duplicate`, everything else `Backend`.
fn insert_error(error: sqlx::Error, what: String) -> StoreError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate(what),
        _ => backend(error),
    }
}

fn timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("bad timestamp {:?}: {}", raw, e)))
}

fn optional_timestamp(raw: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    raw.as_deref().map(timestamp).transpose()
}

fn unknown(column: &str, raw: &str) -> StoreError {
    StoreError::Backend(format!("unknown {} value {:?}", column, raw))
}

impl RepositoryRow {
    fn into_model(self) -> StoreResult<Repository> {
        let security_tests: Vec<String> =
            serde_json::from_str(&self.security_tests).map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Repository {
            url: self.url,
            branch: self.branch,
            security_tests,
            created_at: timestamp(&self.created_at)?,
        })
    }
}

impl ContainerRow {
    fn into_model(self) -> StoreResult<Container> {
        let c_status = ContainerStatus::parse(&self.status).ok_or_else(|| unknown("container status", &self.status))?;
        let c_result = match self.result.as_deref() {
            Some(raw) => Some(ContainerResult::parse(raw).ok_or_else(|| unknown("container result", raw))?),
            None => None,
        };
        Ok(Container {
            cid: self.cid,
            security_test: self.security_test,
            c_status,
            c_result,
            c_info: self.info,
            c_output: self.output,
            started_at: timestamp(&self.started_at)?,
            finished_at: optional_timestamp(self.finished_at)?,
        })
    }
}

impl From<SecurityTestRow> for SecurityTest {
    fn from(row: SecurityTestRow) -> Self {
        SecurityTest {
            name: row.name,
            image: row.image,
            cmd: row.cmd,
            language: row.language,
            default: row.is_default,
        }
    }
}

pub struct SqliteStore {
    db: Pool<Sqlite>,
}

impl SqliteStore {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Creates the tables if they do not exist yet.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(SCHEMA).execute(&self.db).await.map_err(backend)?;
        Ok(())
    }

    pub async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.db).await.map_err(backend)?;
        Ok(())
    }

    async fn load_analysis(&self, row: AnalysisRow) -> StoreResult<Analysis> {
        let containers = sqlx::query_as::<_, ContainerRow>(
            "SELECT cid, security_test, status, result, info, output, started_at, finished_at \
             FROM containers WHERE rid = ? ORDER BY id",
        )
        .bind(&row.rid)
        .fetch_all(&self.db)
        .await
        .map_err(backend)?
        .into_iter()
        .map(ContainerRow::into_model)
        .collect::<StoreResult<Vec<_>>>()?;

        let mut report = AggregatedReport::default();
        let reports = sqlx::query_as::<_, ToolReportRow>(
            "SELECT language, tool, buckets FROM tool_reports WHERE rid = ?",
        )
        .bind(&row.rid)
        .fetch_all(&self.db)
        .await
        .map_err(backend)?;
        for entry in reports {
            let buckets: SeverityBuckets =
                serde_json::from_str(&entry.buckets).map_err(|e| StoreError::Backend(e.to_string()))?;
            report.apply(ToolReport {
                language: entry.language,
                tool: entry.tool,
                buckets,
            });
        }

        let status = AnalysisStatus::parse(&row.status).ok_or_else(|| unknown("analysis status", &row.status))?;
        let result = match row.result.as_deref() {
            Some(raw) => Some(AnalysisResult::parse(raw).ok_or_else(|| unknown("analysis result", raw))?),
            None => None,
        };

        Ok(Analysis {
            rid: row.rid,
            url: row.url,
            branch: row.branch,
            status,
            result,
            containers,
            report,
            created_at: timestamp(&row.created_at)?,
            finished_at: optional_timestamp(row.finished_at)?,
        })
    }

    async fn analysis_exists(&self, rid: &str) -> StoreResult<()> {
        let found: Option<(i64,)> = sqlx::query_as("SELECT id FROM analyses WHERE rid = ?")
            .bind(rid)
            .fetch_optional(&self.db)
            .await
            .map_err(backend)?;
        found
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("analysis {}", rid)))
    }

    /// Explains why a write guarded by `RUNNING_GUARD` touched no row.
    async fn ensure_running(&self, rid: &str) -> StoreResult<()> {
        let found: Option<(String,)> = sqlx::query_as("SELECT status FROM analyses WHERE rid = ?")
            .bind(rid)
            .fetch_optional(&self.db)
            .await
            .map_err(backend)?;
        match found {
            None => Err(StoreError::NotFound(format!("analysis {}", rid))),
            Some((status,)) if status != AnalysisStatus::Running.as_str() => {
                Err(StoreError::Terminal(format!("analysis {}", rid)))
            }
            Some(_) => Ok(()),
        }
    }
}

// 容器与报告只能写入仍在 running 的分析，绑定参数为 RID
const RUNNING_GUARD: &str = "EXISTS (SELECT 1 FROM analyses WHERE analyses.rid = ? AND analyses.status = 'running')";

const ANALYSIS_COLUMNS: &str = "rid, url, branch, status, result, created_at, finished_at";

#[async_trait]
impl RepositoryStore for SqliteStore {
    async fn find_repository(&self, url: &str, branch: &str) -> StoreResult<Repository> {
        sqlx::query_as::<_, RepositoryRow>(
            "SELECT url, branch, security_tests, created_at FROM repositories WHERE url = ? AND branch = ?",
        )
        .bind(url)
        .bind(branch)
        .fetch_optional(&self.db)
        .await
        .map_err(backend)?
        .ok_or_else(|| StoreError::NotFound(format!("repository {}@{}", url, branch)))?
        .into_model()
    }

    async fn insert_repository(&self, repository: &Repository) -> StoreResult<()> {
        let security_tests =
            serde_json::to_string(&repository.security_tests).map_err(|e| StoreError::Backend(e.to_string()))?;
        sqlx::query("INSERT INTO repositories (url, branch, security_tests, created_at) VALUES (?, ?, ?, ?)")
            .bind(&repository.url)
            .bind(&repository.branch)
            .bind(security_tests)
            .bind(repository.created_at.to_rfc3339())
            .execute(&self.db)
            .await
            .map_err(|e| insert_error(e, format!("repository {}@{}", repository.url, repository.branch)))?;
        Ok(())
    }

    async fn find_analysis(&self, rid: &str) -> StoreResult<Analysis> {
        let row = sqlx::query_as::<_, AnalysisRow>(&format!(
            "SELECT {} FROM analyses WHERE rid = ?",
            ANALYSIS_COLUMNS
        ))
        .bind(rid)
        .fetch_optional(&self.db)
        .await
        .map_err(backend)?
        .ok_or_else(|| StoreError::NotFound(format!("analysis {}", rid)))?;
        self.load_analysis(row).await
    }

    async fn find_latest_analysis(&self, url: &str, branch: &str) -> StoreResult<Analysis> {
        let row = sqlx::query_as::<_, AnalysisRow>(&format!(
            "SELECT {} FROM analyses WHERE url = ? AND branch = ? ORDER BY id DESC LIMIT 1",
            ANALYSIS_COLUMNS
        ))
        .bind(url)
        .bind(branch)
        .fetch_optional(&self.db)
        .await
        .map_err(backend)?
        .ok_or_else(|| StoreError::NotFound(format!("analysis for {}@{}", url, branch)))?;
        self.load_analysis(row).await
    }

    async fn insert_analysis(&self, analysis: &Analysis) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO analyses (rid, url, branch, status, result, created_at, finished_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&analysis.rid)
        .bind(&analysis.url)
        .bind(&analysis.branch)
        .bind(analysis.status.as_str())
        .bind(analysis.result.map(|r| r.as_str()))
        .bind(analysis.created_at.to_rfc3339())
        .bind(analysis.finished_at.map(|t| t.to_rfc3339()))
        .execute(&self.db)
        .await
        .map_err(|e| insert_error(e, format!("analysis {}", analysis.rid)))?;
        Ok(())
    }

    async fn push_container(&self, rid: &str, container: &Container) -> StoreResult<()> {
        let done = sqlx::query(&format!(
            "INSERT INTO containers (rid, cid, security_test, status, result, info, output, started_at, finished_at) \
             SELECT ?, ?, ?, ?, ?, ?, ?, ?, ? WHERE {}",
            RUNNING_GUARD
        ))
        .bind(rid)
        .bind(&container.cid)
        .bind(&container.security_test)
        .bind(container.c_status.as_str())
        .bind(container.c_result.map(|r| r.as_str()))
        .bind(&container.c_info)
        .bind(&container.c_output)
        .bind(container.started_at.to_rfc3339())
        .bind(container.finished_at.map(|t| t.to_rfc3339()))
        .bind(rid)
        .execute(&self.db)
        .await
        .map_err(|e| insert_error(e, format!("container {}", container.cid)))?;

        if done.rows_affected() == 0 {
            self.ensure_running(rid).await?;
        }
        Ok(())
    }

    async fn update_container(&self, rid: &str, cid: &str, update: &ContainerUpdate) -> StoreResult<()> {
        let done = sqlx::query(&format!(
            "UPDATE containers SET status = ?, result = ?, info = ?, output = ?, \
             finished_at = COALESCE(finished_at, ?) WHERE rid = ? AND cid = ? AND {}",
            RUNNING_GUARD
        ))
        .bind(ContainerStatus::Finished.as_str())
        .bind(update.result.as_str())
        .bind(&update.info)
        .bind(&update.output)
        .bind(Utc::now().to_rfc3339())
        .bind(rid)
        .bind(cid)
        .bind(rid)
        .execute(&self.db)
        .await
        .map_err(backend)?;

        if done.rows_affected() == 0 {
            self.ensure_running(rid).await?;
            return Err(StoreError::NotFound(format!("container {}", cid)));
        }
        Ok(())
    }

    async fn set_tool_report(&self, rid: &str, report: &ToolReport) -> StoreResult<()> {
        let buckets = serde_json::to_string(&report.buckets).map_err(|e| StoreError::Backend(e.to_string()))?;
        let done = sqlx::query(&format!(
            "INSERT OR REPLACE INTO tool_reports (rid, language, tool, buckets) SELECT ?, ?, ?, ? WHERE {}",
            RUNNING_GUARD
        ))
        .bind(rid)
        .bind(&report.language)
        .bind(&report.tool)
        .bind(buckets)
        .bind(rid)
        .execute(&self.db)
        .await
        .map_err(backend)?;

        if done.rows_affected() == 0 {
            self.ensure_running(rid).await?;
        }
        Ok(())
    }

    async fn finish_analysis(
        &self,
        rid: &str,
        status: AnalysisStatus,
        result: Option<AnalysisResult>,
    ) -> StoreResult<bool> {
        // 只有 running 的分析可以被推进到终态
        let done = sqlx::query(
            "UPDATE analyses SET status = ?, result = ?, finished_at = ? WHERE rid = ? AND status = ?",
        )
        .bind(status.as_str())
        .bind(result.map(|r| r.as_str()))
        .bind(Utc::now().to_rfc3339())
        .bind(rid)
        .bind(AnalysisStatus::Running.as_str())
        .execute(&self.db)
        .await
        .map_err(backend)?;

        if done.rows_affected() == 0 {
            self.analysis_exists(rid).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn find_security_test(&self, name: &str) -> StoreResult<SecurityTest> {
        sqlx::query_as::<_, SecurityTestRow>(
            "SELECT name, image, cmd, language, is_default FROM security_tests WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.db)
        .await
        .map_err(backend)?
        .map(SecurityTest::from)
        .ok_or_else(|| StoreError::NotFound(format!("securityTest {}", name)))
    }

    async fn find_security_tests_by_language(&self, language: &str) -> StoreResult<Vec<SecurityTest>> {
        let rows = sqlx::query_as::<_, SecurityTestRow>(
            "SELECT name, image, cmd, language, is_default FROM security_tests \
             WHERE is_default = 1 AND lower(language) = lower(?) ORDER BY name",
        )
        .bind(language)
        .fetch_all(&self.db)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(SecurityTest::from).collect())
    }

    async fn insert_security_test(&self, test: &SecurityTest) -> StoreResult<()> {
        sqlx::query("INSERT INTO security_tests (name, image, cmd, language, is_default) VALUES (?, ?, ?, ?, ?)")
            .bind(&test.name)
            .bind(&test.image)
            .bind(&test.cmd)
            .bind(&test.language)
            .bind(test.default)
            .execute(&self.db)
            .await
            .map_err(|e| insert_error(e, format!("securityTest {}", test.name)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanforge_core::model::{Confidence, Severity, Vulnerability};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteStore {
        // 每个连接都是独立的内存库，必须固定为单连接
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteStore::new(db);
        store.migrate().await.unwrap();
        store
    }

    fn repo() -> Repository {
        Repository::new("https://github.com/org/repo.git", "main")
    }

    #[tokio::test]
    async fn repositories_are_unique_per_url_and_branch() {
        let store = store().await;
        let repository = repo().with_security_tests(vec!["bandit".to_string()]);
        store.insert_repository(&repository).await.unwrap();

        let found = store.find_repository(&repository.url, "main").await.unwrap();
        assert_eq!(found.security_tests, vec!["bandit"]);

        let dup = store.insert_repository(&repository).await;
        assert!(matches!(dup, Err(StoreError::Duplicate(_))));

        store
            .insert_repository(&Repository::new(repository.url.as_str(), "develop"))
            .await
            .unwrap();
        assert!(store.find_repository(&repository.url, "release").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn analysis_round_trips_with_containers_and_report() {
        let store = store().await;
        store.insert_analysis(&Analysis::start("r1", &repo())).await.unwrap();
        store.push_container("r1", &Container::launched("c1", "enry")).await.unwrap();
        store.push_container("r1", &Container::launched("c2", "bandit")).await.unwrap();

        let dup = store.push_container("r1", &Container::launched("c1", "enry")).await;
        assert!(matches!(dup, Err(StoreError::Duplicate(_))));

        let vuln = Vulnerability {
            language: "Python".to_string(),
            security_tool: "Bandit".to_string(),
            severity: Severity::High,
            confidence: Confidence::High,
            file: "./app.py".to_string(),
            line: "3".to_string(),
            details: "exec".to_string(),
            code: "exec(x)".to_string(),
        };
        let report = ToolReport {
            language: "Python".to_string(),
            tool: "Bandit".to_string(),
            buckets: SeverityBuckets::from_vulnerabilities(&[vuln]),
        };
        store.set_tool_report("r1", &report).await.unwrap();
        store.set_tool_report("r1", &report).await.unwrap();

        let update = ContainerUpdate {
            result: ContainerResult::Failed,
            info: "Issues found.".to_string(),
            output: "{}".to_string(),
        };
        store.update_container("r1", "c2", &update).await.unwrap();

        let analysis = store.find_analysis("r1").await.unwrap();
        assert_eq!(analysis.status, AnalysisStatus::Running);
        assert_eq!(analysis.containers.len(), 2);
        assert_eq!(analysis.containers[0].cid, "c1");
        assert!(!analysis.containers[0].is_finished());
        assert_eq!(analysis.containers[1].c_result, Some(ContainerResult::Failed));
        assert!(analysis.containers[1].finished_at.is_some());
        assert_eq!(analysis.report.total(), 1);
        assert_eq!(analysis.report.vulnerabilities("Python", Severity::High).len(), 1);
    }

    #[tokio::test]
    async fn finish_analysis_only_moves_running_analyses() {
        let store = store().await;
        store.insert_analysis(&Analysis::start("r1", &repo())).await.unwrap();

        assert!(store
            .finish_analysis("r1", AnalysisStatus::Finished, Some(AnalysisResult::Passed))
            .await
            .unwrap());
        assert!(!store.finish_analysis("r1", AnalysisStatus::TimedOut, None).await.unwrap());

        let analysis = store.find_analysis("r1").await.unwrap();
        assert_eq!(analysis.status, AnalysisStatus::Finished);
        assert_eq!(analysis.result, Some(AnalysisResult::Passed));
        assert!(analysis.finished_at.is_some());

        let missing = store.finish_analysis("nope", AnalysisStatus::TimedOut, None).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn writes_to_a_terminal_analysis_are_refused() {
        let store = store().await;
        store.insert_analysis(&Analysis::start("r1", &repo())).await.unwrap();
        store.push_container("r1", &Container::launched("c1", "enry")).await.unwrap();
        store.finish_analysis("r1", AnalysisStatus::TimedOut, None).await.unwrap();

        let pushed = store.push_container("r1", &Container::launched("c2", "bandit")).await;
        assert!(matches!(pushed, Err(StoreError::Terminal(_))));

        let update = ContainerUpdate {
            result: ContainerResult::Passed,
            info: "No issues found.".to_string(),
            output: "{}".to_string(),
        };
        let updated = store.update_container("r1", "c1", &update).await;
        assert!(matches!(updated, Err(StoreError::Terminal(_))));

        let report = ToolReport {
            language: "Python".to_string(),
            tool: "Bandit".to_string(),
            buckets: SeverityBuckets::default(),
        };
        let reported = store.set_tool_report("r1", &report).await;
        assert!(matches!(reported, Err(StoreError::Terminal(_))));

        let missing = store.push_container("nope", &Container::launched("c3", "enry")).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));

        let analysis = store.find_analysis("r1").await.unwrap();
        assert_eq!(analysis.status, AnalysisStatus::TimedOut);
        assert_eq!(analysis.containers.len(), 1);
        assert!(!analysis.containers[0].is_finished());
        assert!(analysis.report.get("Python", "Bandit").is_none());
    }

    #[tokio::test]
    async fn latest_analysis_is_the_most_recent_insert() {
        let store = store().await;
        store.insert_analysis(&Analysis::start("r1", &repo())).await.unwrap();
        store.finish_analysis("r1", AnalysisStatus::TimedOut, None).await.unwrap();
        store.insert_analysis(&Analysis::start("r2", &repo())).await.unwrap();

        let latest = store.find_latest_analysis(&repo().url, "main").await.unwrap();
        assert_eq!(latest.rid, "r2");
        assert_eq!(latest.status, AnalysisStatus::Running);
    }

    #[tokio::test]
    async fn security_tests_by_language_are_case_insensitive_defaults() {
        let store = store().await;
        store
            .insert_security_test(&SecurityTest::new("bandit", "huskyci/bandit", "bandit", "Python", true))
            .await
            .unwrap();
        store
            .insert_security_test(&SecurityTest::new("safety", "huskyci/safety", "safety", "Python", false))
            .await
            .unwrap();

        let tests = store.find_security_tests_by_language("PYTHON").await.unwrap();
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].name, "bandit");
        assert!(tests[0].default);

        let dup = store
            .insert_security_test(&SecurityTest::new("bandit", "other", "x", "Python", true))
            .await;
        assert!(matches!(dup, Err(StoreError::Duplicate(_))));
    }
}
