//! HTTP client for the agent service that hosts the scanner, generator,
//! healer and (optionally) policy.
//!
//! Every operation is a JSON `POST` to `<base_url>/<route>`. Non-2xx replies
//! become errors carrying the response body.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Diagnosis, Generator, HealOutcome, Healer, PolicySink, Scanner};
use crate::config::AgentConfig;
use crate::storage::Endpoint;

pub struct AgentServiceClient {
    client: Client,
    base_url: String,
}

impl AgentServiceClient {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build agent service HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B, R>(&self, route: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, route);
        debug!(%url, "calling agent service");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("agent service unreachable at {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("agent service /{route} returned {status}: {}", text.trim());
        }

        response
            .json::<R>()
            .await
            .with_context(|| format!("invalid response from agent service /{route}"))
    }
}

#[derive(Serialize)]
struct ScanRequest<'a> {
    archive_path: &'a Path,
    extract_dir: &'a Path,
}

#[derive(Deserialize)]
struct ScanResponse {
    #[serde(default)]
    endpoints: Vec<Endpoint>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    project_name: &'a str,
    endpoints: &'a [Endpoint],
    base_url: &'a str,
    output_dir: &'a Path,
}

#[derive(Deserialize)]
struct GenerateResponse {
    test_file_path: PathBuf,
}

#[derive(Serialize)]
struct HealRequest<'a> {
    test_file: &'a Path,
    failure_logs: &'a str,
}

#[derive(Serialize)]
struct DiagnoseRequest<'a> {
    source_file: &'a Path,
    error_logs: &'a str,
}

#[derive(Serialize)]
struct PolicyUpdate<'a> {
    endpoint: &'a str,
    action: &'a str,
    reward: f64,
}

#[async_trait::async_trait]
impl Scanner for AgentServiceClient {
    async fn scan(&self, archive: &Path, extract_dir: &Path) -> Result<Vec<Endpoint>> {
        let response: ScanResponse = self
            .post(
                "scan",
                &ScanRequest {
                    archive_path: archive,
                    extract_dir,
                },
            )
            .await?;
        Ok(response.endpoints)
    }
}

#[async_trait::async_trait]
impl Generator for AgentServiceClient {
    async fn generate(
        &self,
        project_name: &str,
        endpoints: &[Endpoint],
        base_url: &str,
        output_dir: &Path,
    ) -> Result<PathBuf> {
        let response: GenerateResponse = self
            .post(
                "generate",
                &GenerateRequest {
                    project_name,
                    endpoints,
                    base_url,
                    output_dir,
                },
            )
            .await?;
        Ok(response.test_file_path)
    }
}

#[async_trait::async_trait]
impl Healer for AgentServiceClient {
    async fn heal_test(&self, test_file: &Path, failure_logs: &str) -> Result<HealOutcome> {
        self.post(
            "heal",
            &HealRequest {
                test_file,
                failure_logs,
            },
        )
        .await
    }

    async fn diagnose(&self, source_file: &Path, error_logs: &str) -> Result<Diagnosis> {
        self.post(
            "diagnose",
            &DiagnoseRequest {
                source_file,
                error_logs,
            },
        )
        .await
    }
}

#[async_trait::async_trait]
impl PolicySink for AgentServiceClient {
    async fn update(&self, endpoint: &str, action: &str, reward: f64) -> Result<()> {
        let _: serde_json::Value = self
            .post(
                "policy",
                &PolicyUpdate {
                    endpoint,
                    action,
                    reward,
                },
            )
            .await?;
        Ok(())
    }
}
