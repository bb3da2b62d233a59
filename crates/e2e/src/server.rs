//! Server management - spawning and health checking the static file server

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{E2eError, E2eResult};

/// Handle to a running server process
pub struct ServerHandle {
    child: Child,
    base_url: String,
}

impl ServerHandle {
    /// Spawn the configured server and wait until `base_url` answers
    pub async fn spawn(config: &ServerConfig, project_root: &Path, base_url: &str) -> E2eResult<Self> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| E2eError::ServerStartup("empty server command".to_string()))?;

        let cwd = config.cwd.clone().unwrap_or_else(|| project_root.to_path_buf());
        info!("Spawning static server: {} (in {})", config.command.join(" "), cwd.display());

        let child = Command::new(program)
            .args(args)
            .current_dir(&cwd)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| E2eError::ServerStartup(format!("Failed to spawn {}: {}", program, e)))?;

        let mut handle = ServerHandle {
            child,
            base_url: base_url.to_string(),
        };

        if let Err(e) = handle.wait_for_healthy(config.startup_timeout()).await {
            let _ = handle.stop();
            return Err(e);
        }

        info!("Server is healthy at {}", handle.base_url);
        Ok(handle)
    }

    /// Poll the base URL until it responds or `timeout_duration` elapses
    async fn wait_for_healthy(&mut self, timeout_duration: Duration) -> E2eResult<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let start = std::time::Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout_duration {
            attempts += 1;

            if let Ok(Some(status)) = self.child.try_wait() {
                return Err(E2eError::ServerStartup(format!("server exited early with {}", status)));
            }

            match client.get(&self.base_url).send().await {
                // Any HTTP answer means the listener is up; a 404 on `/` is fine
                Ok(_) => return Ok(()),
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for server to start...");
                    }
                    // Connection refused is expected while server is starting
                    if !e.is_connect() {
                        warn!("Health check error: {}", e);
                    }
                }
            }

            sleep(Duration::from_millis(100)).await;
        }

        Err(E2eError::ServerHealthCheck(attempts))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Stop the server
    pub fn stop(&mut self) -> E2eResult<()> {
        if let Ok(Some(_)) = self.child.try_wait() {
            return Ok(());
        }
        info!("Stopping server (pid: {})", self.child.id());

        // Try graceful shutdown first
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.child.id() as i32);
            if kill(pid, Signal::SIGTERM).is_ok() {
                for _ in 0..10 {
                    if let Ok(Some(_)) = self.child.try_wait() {
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }

        // Force kill if still running
        let _ = self.child.kill();
        let _ = self.child.wait();

        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_failure_is_startup_error() {
        let config = ServerConfig {
            command: vec!["definitely-not-a-real-binary-7f3a".to_string()],
            cwd: None,
            startup_timeout_ms: 200,
        };
        let result = ServerHandle::spawn(&config, Path::new("."), "http://127.0.0.1:1").await;
        assert!(matches!(result, Err(E2eError::ServerStartup(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_early_exit_is_reported() {
        let config = ServerConfig {
            command: vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()],
            cwd: None,
            startup_timeout_ms: 2_000,
        };
        let result = ServerHandle::spawn(&config, Path::new("."), "http://127.0.0.1:1").await;
        assert!(result.is_err());
    }
}
