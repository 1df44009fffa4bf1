// DockerLauncher - 通过 Docker Engine HTTP API 运行安全测试容器
// 多个 Docker 主机轮询分配，记住每个 CID 所在的主机直到读取完输出

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use scanforge_core::{JobLauncher, JobSpec, LaunchError};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct CreatedContainer {
    #[serde(rename = "Id")]
    id: String,
}

pub struct DockerLauncher {
    client: Client,
    hosts: Vec<String>,
    next: AtomicUsize,
    placements: Mutex<HashMap<String, String>>,
}

/// `host` -> `http://host:port`; entries that already carry a scheme are kept as-is.
fn endpoint(host: &str, port: u16) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("http://{}:{}", host, port)
    }
}

impl DockerLauncher {
    pub fn new(hosts: &[String], port: u16) -> anyhow::Result<Self> {
        // 不设置整体超时：wait 会一直阻塞到容器退出
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            hosts: hosts.iter().map(|host| endpoint(host, port)).collect(),
            next: AtomicUsize::new(0),
            placements: Mutex::new(HashMap::new()),
        })
    }

    fn next_host(&self) -> Result<String, LaunchError> {
        if self.hosts.is_empty() {
            return Err(LaunchError::Unavailable("no docker host configured".to_string()));
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.hosts.len();
        Ok(self.hosts[index].clone())
    }

    async fn host_of(&self, cid: &str) -> Option<String> {
        self.placements.lock().await.get(cid).cloned()
    }

    async fn remember(&self, cid: &str, host: &str) {
        self.placements.lock().await.insert(cid.to_string(), host.to_string());
    }

    async fn forget(&self, cid: &str) {
        self.placements.lock().await.remove(cid);
    }

    /// Every configured host must answer `GET /_ping`.
    pub async fn ping_all(&self) -> anyhow::Result<()> {
        for host in &self.hosts {
            let response = self
                .client
                .get(format!("{}/_ping", host))
                .timeout(Duration::from_secs(10))
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("docker host {} unreachable: {}", host, e))?;
            if !response.status().is_success() {
                anyhow::bail!("docker host {} answered {}", host, response.status());
            }
            debug!(host = %host, "docker host is up");
        }
        Ok(())
    }

    async fn create(&self, host: &str, job: &JobSpec) -> Result<reqwest::Response, LaunchError> {
        self.client
            .post(format!("{}/containers/create", host))
            .json(&json!({
                "Image": job.image(),
                "Cmd": ["/bin/sh", "-c", job.command()],
                "Tty": true,
            }))
            .send()
            .await
            .map_err(|e| LaunchError::Unavailable(format!("{}: {}", host, e)))
    }

    async fn pull(&self, host: &str, image: &str) -> Result<(), LaunchError> {
        info!(host = %host, image = %image, "pulling image");
        let response = self
            .client
            .post(format!("{}/images/create", host))
            .query(&[("fromImage", image)])
            .send()
            .await
            .map_err(|e| LaunchError::Submit(format!("pulling {}: {}", image, e)))?;
        let status = response.status();
        // 拉取进度以流的形式返回，读完才算拉取结束
        let body = response
            .text()
            .await
            .map_err(|e| LaunchError::Submit(format!("pulling {}: {}", image, e)))?;
        if !status.is_success() {
            return Err(LaunchError::Submit(format!("pulling {}: {} {}", image, status, body.trim())));
        }
        Ok(())
    }

    async fn start(&self, host: &str, cid: &str) -> Result<(), LaunchError> {
        let response = self
            .client
            .post(format!("{}/containers/{}/start", host, cid))
            .send()
            .await
            .map_err(|e| LaunchError::Submit(format!("starting {}: {}", cid, e)))?;
        match response.status() {
            status if status.is_success() || status == StatusCode::NOT_MODIFIED => Ok(()),
            status => Err(LaunchError::Submit(format!("starting {}: {}", cid, status))),
        }
    }

    async fn remove(&self, host: &str, cid: &str) {
        let removed = self
            .client
            .delete(format!("{}/containers/{}", host, cid))
            .query(&[("force", "1")])
            .send()
            .await;
        match removed {
            Ok(response) if response.status().is_success() || response.status() == StatusCode::NOT_FOUND => {}
            Ok(response) => warn!(cid = %cid, status = %response.status(), "failed to remove container"),
            Err(e) => warn!(cid = %cid, error = %e, "failed to remove container"),
        }
    }

    async fn collect_output(&self, host: &str, cid: &str) -> Result<String, LaunchError> {
        let waited = self
            .client
            .post(format!("{}/containers/{}/wait", host, cid))
            .send()
            .await
            .map_err(|e| LaunchError::Wait(format!("waiting for {}: {}", cid, e)))?;
        if !waited.status().is_success() {
            return Err(LaunchError::Wait(format!("waiting for {}: {}", cid, waited.status())));
        }

        // Tty 模式下日志不带多路复用头，直接就是原始输出
        self.client
            .get(format!("{}/containers/{}/logs", host, cid))
            .query(&[("stdout", "1"), ("stderr", "1")])
            .send()
            .await
            .map_err(|e| LaunchError::Wait(format!("reading logs of {}: {}", cid, e)))?
            .text()
            .await
            .map_err(|e| LaunchError::Wait(format!("reading logs of {}: {}", cid, e)))
    }
}

#[async_trait]
impl JobLauncher for DockerLauncher {
    async fn submit(&self, job: &JobSpec) -> Result<String, LaunchError> {
        let host = self.next_host()?;

        let mut response = self.create(&host, job).await?;
        if response.status() == StatusCode::NOT_FOUND {
            self.pull(&host, job.image()).await?;
            response = self.create(&host, job).await?;
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LaunchError::Submit(format!("creating container: {} {}", status, body.trim())));
        }
        let created: CreatedContainer = response
            .json()
            .await
            .map_err(|e| LaunchError::Submit(format!("reading created container: {}", e)))?;

        // 启动失败的容器不会有人等待，立即回收
        if let Err(e) = self.start(&host, &created.id).await {
            self.remove(&host, &created.id).await;
            return Err(e);
        }
        self.remember(&created.id, &host).await;

        debug!(rid = %job.rid, cid = %created.id, host = %host, image = %job.image(), "container started");
        Ok(created.id)
    }

    async fn wait_output(&self, cid: &str) -> Result<String, LaunchError> {
        let host = self
            .host_of(cid)
            .await
            .ok_or_else(|| LaunchError::Wait(format!("unknown container {}", cid)))?;

        // 无论成功与否，容器都在这里被移除
        let collected = self.collect_output(&host, cid).await;
        self.remove(&host, cid).await;
        self.forget(cid).await;
        collected
    }
}
