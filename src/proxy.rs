//! Client for the LLM request-metering proxy.
//!
//! The proxy (`amsterdam`) issues a scoped API credential per run and
//! reports token usage keyed by that credential. It runs as a locally
//! spawned subprocess for the lifetime of the sweep and is torn down
//! through the teardown registry.

use std::collections::HashMap;

use async_trait::async_trait;
use rand::RngCore;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::ProvisionError;
use crate::process::ServiceProcess;
use crate::result::LlmMetric;

const SERVICE: &str = "LLM proxy";
const BASE_URL: &str = "http://localhost:50081";
/// Endpoint as seen from inside workspace containers.
const CONTAINER_ENDPOINT: &str = "http://host.docker.internal:50081/v1/openai/v1";
const STARTUP_TIMEOUT_SECS: u64 = 60;

/// A scoped per-run credential issued by the proxy.
#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    pub token: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The credential-issuing seam the run executor depends on.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn create_project(&self, name: &str) -> Result<Project, ProvisionError>;

    async fn get_metrics(&self, token: &str) -> Result<Vec<LlmMetric>, ProvisionError>;
}

/// HTTP client plus supervised subprocess for the metering proxy.
pub struct LlmProxy {
    admin_token: String,
    client: Client,
    base_url: String,
    endpoint: String,
    process: Mutex<Option<ServiceProcess>>,
}

impl Default for LlmProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmProxy {
    pub fn new() -> Self {
        let mut token_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut token_bytes);

        Self {
            admin_token: hex::encode(token_bytes),
            client: Client::new(),
            base_url: BASE_URL.to_string(),
            endpoint: CONTAINER_ENDPOINT.to_string(),
            process: Mutex::new(None),
        }
    }

    /// The API base URL agents inside workspaces should talk to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Spawns the proxy process and blocks until it is healthy.
    pub async fn run(&self) -> Result<(), ProvisionError> {
        let env = HashMap::from([
            ("ADMIN_TOKEN".to_string(), self.admin_token.clone()),
            ("PORT".to_string(), "50081".to_string()),
            (
                "DATABASE_URL".to_string(),
                "sqlite://tmp/llm_proxy.db".to_string(),
            ),
        ]);

        info!("Starting LLM proxy");
        let process = ServiceProcess::spawn(SERVICE, "amsterdam", &env)?;
        process
            .wait_healthy(
                &self.client,
                &format!("{}/health", self.base_url),
                STARTUP_TIMEOUT_SECS,
            )
            .await?;

        *self.process.lock().await = Some(process);
        Ok(())
    }

    /// Stops the proxy subprocess. Idempotent.
    pub async fn stop(&self) {
        if let Some(mut process) = self.process.lock().await.take() {
            info!("Stopping LLM proxy");
            process.stop().await;
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        bearer: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, ProvisionError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.client.request(method, &url).bearer_auth(bearer);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::Http {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ProvisionError::MalformedResponse {
                service: SERVICE,
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl CredentialIssuer for LlmProxy {
    async fn create_project(&self, name: &str) -> Result<Project, ProvisionError> {
        info!(project = name, "Creating metering project");
        self.request(
            Method::POST,
            "admin/v1/projects",
            &self.admin_token,
            Some(json!({
                "name": name,
                "description": "Created by agent test harness",
            })),
        )
        .await
    }

    async fn get_metrics(&self, token: &str) -> Result<Vec<LlmMetric>, ProvisionError> {
        self.request(Method::GET, "v1/metrics", token, None).await
    }
}
