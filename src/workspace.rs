//! Client for the workspace provisioning service.
//!
//! Workspaces are isolated, remotely-managed sandboxes containing a
//! repository checkout. They are served by a locally spawned `derrick`
//! process speaking HTTP; this module owns that process for the duration
//! of one (agent, target) pair and exposes the narrow command/file API the
//! run executor consumes.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::ProvisionError;
use crate::model::Repository;
use crate::process::ServiceProcess;

const SERVICE: &str = "workspace provider";
const BASE_URL: &str = "http://localhost:50080";
const STARTUP_TIMEOUT_SECS: u64 = 60;

/// Exit code and combined stdout/stderr of one remote command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    pub fn failed(&self) -> bool {
        !self.succeeded()
    }
}

/// An ephemeral sandboxed checkout, identified by an opaque id.
#[derive(Debug, Clone, Deserialize)]
pub struct Workspace {
    pub id: String,
}

/// The command-execution seam the run executor depends on.
///
/// Production uses [`WorkspaceProvider`]; tests script this trait.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn create_workspace(
        &self,
        env: &HashMap<String, String>,
    ) -> Result<Workspace, ProvisionError>;

    async fn run_command_with_output(
        &self,
        workspace_id: &str,
        command: &str,
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, ProvisionError>;

    async fn write_file(
        &self,
        workspace_id: &str,
        path: &str,
        content: &[u8],
    ) -> Result<(), ProvisionError>;

    async fn read_file(&self, workspace_id: &str, path: &str) -> Result<Vec<u8>, ProvisionError>;
}

/// HTTP client plus supervised subprocess for the workspace provider.
pub struct WorkspaceProvider {
    name: String,
    workspace_config: serde_json::Value,
    client: Client,
    base_url: String,
    command_timeout_secs: u64,
    process: Mutex<Option<ServiceProcess>>,
}

impl WorkspaceProvider {
    /// Prepares a provider bound to one repository with the combined
    /// (repository + agent) setup script. Nothing is spawned until
    /// [`WorkspaceProvider::run`].
    pub fn new(
        name: impl Into<String>,
        repository: &Repository,
        setup_script: &str,
        command_timeout_secs: u64,
    ) -> Self {
        let name = name.into();
        let workspace_config = json!({
            "name": name,
            "repositories": [{
                "url": repository.url,
                "path": format!("/{}", repository.name),
            }],
            "setup_script": setup_script,
        });

        Self {
            name,
            workspace_config,
            client: Client::new(),
            base_url: BASE_URL.to_string(),
            command_timeout_secs,
            process: Mutex::new(None),
        }
    }

    /// Spawns the provider process and blocks until its health endpoint
    /// answers or the startup window elapses.
    pub async fn run(&self) -> Result<(), ProvisionError> {
        let config_path =
            std::env::temp_dir().join(format!("workspace_config_{}.json", Uuid::new_v4()));
        tokio::fs::write(&config_path, serde_json::to_vec(&self.workspace_config)?).await?;

        let command = format!(
            "derrick --provisioning-mode docker --workspace-config-path {} --server-mode http",
            config_path.display()
        );

        info!(name = %self.name, "Starting workspace provider");
        let process = ServiceProcess::spawn(SERVICE, &command, &HashMap::new())?;
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

    /// Stops the provider subprocess. Idempotent.
    pub async fn stop(&self) {
        if let Some(mut process) = self.process.lock().await.take() {
            info!(name = %self.name, "Stopping workspace provider");
            process.stop().await;
        }
    }

    pub async fn delete_workspace(&self, workspace_id: &str) -> Result<(), ProvisionError> {
        self.request::<serde_json::Value>(
            Method::DELETE,
            &format!("workspaces/{workspace_id}"),
            None,
        )
        .await?;
        Ok(())
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, ProvisionError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.client.request(method, &url);
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
impl CommandExecutor for WorkspaceProvider {
    async fn create_workspace(
        &self,
        env: &HashMap<String, String>,
    ) -> Result<Workspace, ProvisionError> {
        info!(name = %self.name, "Creating workspace");
        self.request(Method::POST, "workspaces", Some(json!({ "env": env })))
            .await
    }

    async fn run_command_with_output(
        &self,
        workspace_id: &str,
        command: &str,
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, ProvisionError> {
        self.request(
            Method::POST,
            &format!("workspaces/{workspace_id}/cmd_with_output"),
            Some(json!({
                "cmd": command,
                "env": env,
                "timeout": self.command_timeout_secs,
            })),
        )
        .await
    }

    async fn write_file(
        &self,
        workspace_id: &str,
        path: &str,
        content: &[u8],
    ) -> Result<(), ProvisionError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(content);
        self.request::<serde_json::Value>(
            Method::POST,
            &format!("workspaces/{workspace_id}/write_file"),
            Some(json!({ "path": path, "content": encoded })),
        )
        .await?;
        Ok(())
    }

    async fn read_file(&self, workspace_id: &str, path: &str) -> Result<Vec<u8>, ProvisionError> {
        #[derive(Deserialize)]
        struct ReadFileResponse {
            content: String,
        }

        let response: ReadFileResponse = self
            .request(
                Method::POST,
                &format!("workspaces/{workspace_id}/read_file"),
                Some(json!({ "path": path })),
            )
            .await?;

        base64::engine::general_purpose::STANDARD
            .decode(response.content)
            .map_err(|e| ProvisionError::MalformedResponse {
                service: SERVICE,
                message: format!("invalid base64 file content: {e}"),
            })
    }
}
