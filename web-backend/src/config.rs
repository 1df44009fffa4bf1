// 服务配置：启动时从环境变量（.env 由 dotenv 加载）构造一次

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use scanforge_core::OrchestratorConfig;
use serde::Serialize;

pub const RELEASE_DATE: &str = "2026-10-19";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub project: &'static str,
    pub version: &'static str,
    pub date: &'static str,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            project: "scanforge",
            version: env!("CARGO_PKG_VERSION"),
            date: RELEASE_DATE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub database: PathBuf,
    pub docker_hosts: Vec<String>,
    pub docker_api_port: u16,
    pub security_tests_dir: Option<PathBuf>,
    pub orchestrator: OrchestratorConfig,
    pub version: VersionInfo,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let docker_hosts: Vec<String> = get("DOCKER_HOSTS_LIST")
            .ok_or_else(|| anyhow!("DOCKER_HOSTS_LIST is not set"))?
            .split(',')
            .map(|host| host.trim().to_string())
            .filter(|host| !host.is_empty())
            .collect();
        if docker_hosts.is_empty() {
            return Err(anyhow!("DOCKER_HOSTS_LIST holds no host"));
        }

        let port = parse_or(get("SCANFORGE_PORT"), 9999, "SCANFORGE_PORT")?;
        let docker_api_port = parse_or(get("DOCKER_API_PORT"), 2376, "DOCKER_API_PORT")?;

        let mut orchestrator = OrchestratorConfig::default();
        if let Some(secs) = get("SCANFORGE_POLL_SECONDS") {
            let secs: u64 = secs.parse().context("SCANFORGE_POLL_SECONDS must be a number of seconds")?;
            orchestrator = orchestrator.with_poll_interval(Duration::from_secs(secs.max(1)));
        }
        if let Some(secs) = get("SCANFORGE_TIMEOUT_SECONDS") {
            let secs: u64 = secs.parse().context("SCANFORGE_TIMEOUT_SECONDS must be a number of seconds")?;
            orchestrator = orchestrator.with_analysis_timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            port,
            database: get("SCANFORGE_DATABASE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./scanforge.db")),
            docker_hosts,
            docker_api_port,
            security_tests_dir: get("SCANFORGE_SECURITY_TESTS_DIR").map(PathBuf::from),
            orchestrator,
            version: VersionInfo::default(),
        })
    }
}

fn parse_or(raw: Option<String>, default: u16, key: &str) -> Result<u16> {
    match raw {
        Some(raw) => raw.parse().with_context(|| format!("{} must be a port number", key)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_hosts_are_set() {
        let config = config_from(&[("DOCKER_HOSTS_LIST", "docker-a, docker-b,")]).unwrap();
        assert_eq!(config.docker_hosts, vec!["docker-a", "docker-b"]);
        assert_eq!(config.port, 9999);
        assert_eq!(config.docker_api_port, 2376);
        assert_eq!(config.database, PathBuf::from("./scanforge.db"));
        assert_eq!(config.orchestrator, OrchestratorConfig::default());
        assert!(config.security_tests_dir.is_none());
    }

    #[test]
    fn docker_hosts_are_required() {
        assert!(config_from(&[]).is_err());
        assert!(config_from(&[("DOCKER_HOSTS_LIST", " , ")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("DOCKER_HOSTS_LIST", "localhost"),
            ("SCANFORGE_PORT", "8080"),
            ("SCANFORGE_POLL_SECONDS", "2"),
            ("SCANFORGE_TIMEOUT_SECONDS", "30"),
            ("SCANFORGE_SECURITY_TESTS_DIR", "/etc/scanforge/tests"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.orchestrator.poll_interval, Duration::from_secs(2));
        assert_eq!(config.orchestrator.analysis_timeout, Duration::from_secs(30));
        assert_eq!(config.security_tests_dir, Some(PathBuf::from("/etc/scanforge/tests")));

        assert!(config_from(&[("DOCKER_HOSTS_LIST", "localhost"), ("SCANFORGE_PORT", "http")]).is_err());
    }
}
