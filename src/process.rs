//! Supervised service subprocesses.
//!
//! The workspace provider and the LLM proxy run as long-lived local
//! processes. Each one is owned by a supervisor task that waits on the
//! child and publishes liveness through a watch channel, so callers observe
//! unexpected termination instead of polling the process table. The
//! supervisor is also the only place that kills the child, on an explicit
//! stop signal.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info};

use crate::error::ProvisionError;

const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A locally-spawned service process supervised for the lifetime of a sweep.
pub struct ServiceProcess {
    service: &'static str,
    stop_tx: Option<oneshot::Sender<()>>,
    liveness: watch::Receiver<bool>,
    supervisor: Option<JoinHandle<()>>,
}

impl ServiceProcess {
    /// Spawns `command` through the shell with the given extra environment,
    /// inheriting stdout/stderr so service logs interleave with ours.
    pub fn spawn(
        service: &'static str,
        command: &str,
        env: &HashMap<String, String>,
    ) -> Result<Self, ProvisionError> {
        info!(service = service, command = command, "Spawning service process");

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|source| ProvisionError::Spawn { service, source })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let (live_tx, live_rx) = watch::channel(true);

        let supervisor = tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let _ = live_tx.send(false);
                    match status {
                        Ok(status) => {
                            error!(service = service, %status, "Service process exited early")
                        }
                        Err(e) => error!(service = service, error = %e, "Failed waiting on service process"),
                    }
                }
                _ = stop_rx => {
                    if let Err(e) = child.kill().await {
                        error!(service = service, error = %e, "Failed to kill service process");
                    }
                    let _ = child.wait().await;
                    let _ = live_tx.send(false);
                    info!(service = service, "Service process stopped");
                }
            }
        });

        Ok(Self {
            service,
            stop_tx: Some(stop_tx),
            liveness: live_rx,
            supervisor: Some(supervisor),
        })
    }

    /// Whether the child process is still running.
    pub fn is_alive(&self) -> bool {
        *self.liveness.borrow()
    }

    /// Blocks until `health_url` answers 2xx, the process dies, or the
    /// startup window elapses.
    pub async fn wait_healthy(
        &self,
        client: &reqwest::Client,
        health_url: &str,
        timeout_secs: u64,
    ) -> Result<(), ProvisionError> {
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);
        let mut liveness = self.liveness.clone();

        loop {
            if !*liveness.borrow() {
                return Err(ProvisionError::ServiceExited {
                    service: self.service,
                });
            }

            if let Ok(response) = client.get(health_url).send().await {
                if response.status().is_success() {
                    info!(service = self.service, "Service is healthy");
                    return Ok(());
                }
            }

            if Instant::now() >= deadline {
                return Err(ProvisionError::StartupTimeout {
                    service: self.service,
                    seconds: timeout_secs,
                });
            }

            tokio::select! {
                _ = tokio::time::sleep(HEALTH_POLL_INTERVAL) => {}
                _ = liveness.changed() => {}
            }
        }
    }

    /// Signals the supervisor to kill the child and waits for it to finish.
    pub async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(supervisor) = self.supervisor.take() {
            let _ = supervisor.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_terminates_child() {
        let mut process = ServiceProcess::spawn("sleeper", "sleep 30", &HashMap::new()).unwrap();
        assert!(process.is_alive());

        process.stop().await;
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn test_early_exit_flips_liveness() {
        let process = ServiceProcess::spawn("one-shot", "true", &HashMap::new()).unwrap();

        let mut liveness = process.liveness.clone();
        while *liveness.borrow() {
            liveness.changed().await.unwrap();
        }
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn test_wait_healthy_fails_when_process_dies() {
        let process = ServiceProcess::spawn("dead", "false", &HashMap::new()).unwrap();
        let client = reqwest::Client::new();

        let result = process
            .wait_healthy(&client, "http://127.0.0.1:1/health", 5)
            .await;
        assert!(matches!(
            result,
            Err(ProvisionError::ServiceExited { service: "dead" })
        ));
    }
}
