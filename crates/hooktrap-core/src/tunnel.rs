//! Reverse tunnel management over an external ssh subprocess.
//!
//! The tunnel maps a public localhost.run hostname to the local capture
//! port. The relay is a third-party, network-dependent service, so every
//! failure mode here is recoverable: callers fall back to a local-only URL.
//!
//! Spawning is isolated behind [`TunnelLauncher`] so discovery, failure, and
//! timeout paths are testable with scripted output instead of real ssh.

use crate::scanner::{scan_line, ScanOutcome};
use crate::{HooktrapError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Tunnel behavior knobs. Defaults match production use against localhost.run.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Path or name of the ssh binary.
    pub ssh_path: String,
    /// Relay host to open the reverse forward against.
    pub relay_host: String,
    /// How long to wait for the relay to announce a URL.
    pub discovery_window: Duration,
    /// Delay before the post-establish verification probe.
    pub stabilization_delay: Duration,
    /// Probe the local server before spawning ssh.
    pub probe_local: bool,
    /// Probe the discovered URL after establishment (diagnostic only).
    pub verify_url: bool,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            ssh_path: "ssh".to_string(),
            relay_host: "localhost.run".to_string(),
            discovery_window: Duration::from_secs(20),
            stabilization_delay: Duration::from_secs(2),
            probe_local: true,
            verify_url: true,
        }
    }
}

/// Handle to a running tunnel subprocess.
#[async_trait]
pub trait TunnelProc: Send {
    /// Kill the process and wait for it to exit.
    async fn kill(&mut self) -> std::io::Result<()>;
}

/// A launched tunnel subprocess with both output streams attached.
pub struct TunnelChild {
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,
    pub proc: Box<dyn TunnelProc>,
}

/// Seam between the tunnel manager and the real subprocess.
#[async_trait]
pub trait TunnelLauncher: Send + Sync {
    async fn launch(&self, local_port: u16) -> Result<TunnelChild>;
}

/// Launches the real ssh reverse forward.
pub struct SshLauncher {
    ssh_path: String,
    relay_host: String,
}

impl SshLauncher {
    pub fn new(ssh_path: String, relay_host: String) -> Self {
        Self { ssh_path, relay_host }
    }
}

struct SshProc(tokio::process::Child);

#[async_trait]
impl TunnelProc for SshProc {
    async fn kill(&mut self) -> std::io::Result<()> {
        self.0.kill().await
    }
}

#[async_trait]
impl TunnelLauncher for SshLauncher {
    async fn launch(&self, local_port: u16) -> Result<TunnelChild> {
        let mut child = Command::new(&self.ssh_path)
            .args([
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
                "-R",
                &format!("80:127.0.0.1:{local_port}"),
                &self.relay_host,
            ])
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HooktrapError::SpawnFailed(format!("{}: {e}", self.ssh_path)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HooktrapError::SpawnFailed("ssh stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| HooktrapError::SpawnFailed("ssh stderr not captured".to_string()))?;

        info!(target: "hooktrap::tunnel", "Spawned {} -R 80:127.0.0.1:{} {}", self.ssh_path, local_port, self.relay_host);

        Ok(TunnelChild {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            proc: Box::new(SshProc(child)),
        })
    }
}

/// Spawns, monitors, and tears down the tunnel subprocess.
pub struct TunnelManager {
    launcher: Arc<dyn TunnelLauncher>,
    config: TunnelConfig,
    active: Mutex<Option<Box<dyn TunnelProc>>>,
}

impl TunnelManager {
    pub fn new(config: TunnelConfig) -> Self {
        let launcher = Arc::new(SshLauncher::new(
            config.ssh_path.clone(),
            config.relay_host.clone(),
        ));
        Self::with_launcher(launcher, config)
    }

    pub fn with_launcher(launcher: Arc<dyn TunnelLauncher>, config: TunnelConfig) -> Self {
        Self {
            launcher,
            config,
            active: Mutex::new(None),
        }
    }

    /// Whether a tunnel subprocess is currently held.
    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Open a reverse tunnel to the given local port and return the public URL.
    ///
    /// Fails with `TunnelProbeUnreachable` when the local server does not
    /// answer, `TunnelConnectError` on an ssh-reported failure, and
    /// `TunnelTimeout` when the relay stays silent. The subprocess is killed
    /// on every failure path.
    pub async fn establish(&self, local_port: u16) -> Result<String> {
        if self.config.probe_local {
            let local_url = format!("http://localhost:{local_port}");
            reqwest::get(&local_url)
                .await
                .map_err(|e| {
                    warn!(target: "hooktrap::tunnel", "Local probe of {} failed: {}", local_url, e);
                    HooktrapError::TunnelProbeUnreachable(local_url.clone())
                })?;
            debug!(target: "hooktrap::tunnel", "Local server {} is reachable", local_url);
        }

        let child = self.launcher.launch(local_port).await?;

        // Hold the handle before waiting so teardown can always reach it.
        {
            let mut active = self.active.lock().await;
            if let Some(mut stale) = active.replace(child.proc) {
                warn!(target: "hooktrap::tunnel", "Replacing stale tunnel process");
                let _ = stale.kill().await;
            }
        }

        let (tx, mut rx) = mpsc::channel(2);
        spawn_scan(child.stdout, "stdout", tx.clone());
        spawn_scan(child.stderr, "stderr", tx);

        let window = self.config.discovery_window;
        match tokio::time::timeout(window, rx.recv()).await {
            Ok(Some(ScanOutcome::Url(url))) => {
                info!(target: "hooktrap::tunnel", "Tunnel established: {}", url);
                if self.config.verify_url {
                    spawn_verification_probe(url.clone(), self.config.stabilization_delay);
                }
                Ok(url)
            }
            Ok(Some(ScanOutcome::Failure(message))) => {
                warn!(target: "hooktrap::tunnel", "Tunnel connection failed: {}", message);
                self.teardown().await;
                Err(HooktrapError::TunnelConnectError(message))
            }
            Ok(None) => {
                // Both streams closed without a decisive line.
                warn!(target: "hooktrap::tunnel", "Tunnel process exited before announcing a URL");
                self.teardown().await;
                Err(HooktrapError::TunnelConnectError(
                    "tunnel process exited before announcing a URL".to_string(),
                ))
            }
            Err(_) => {
                warn!(target: "hooktrap::tunnel", "No tunnel URL within {:?}", window);
                self.teardown().await;
                Err(HooktrapError::TunnelTimeout(window.as_secs()))
            }
        }
    }

    /// Kill the tunnel subprocess and wait for exit. No-op when inactive.
    pub async fn teardown(&self) {
        if let Some(mut proc) = self.active.lock().await.take() {
            info!(target: "hooktrap::tunnel", "Stopping tunnel process");
            if let Err(e) = proc.kill().await {
                warn!(target: "hooktrap::tunnel", "Failed to kill tunnel process: {}", e);
            }
        }
    }
}

/// Read lines from one output stream, stopping at the first decisive outcome.
fn spawn_scan(
    stream: Box<dyn AsyncRead + Send + Unpin>,
    label: &'static str,
    tx: mpsc::Sender<ScanOutcome>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "hooktrap::tunnel", "ssh {}: {}", label, line);
            if let Some(outcome) = scan_line(&line) {
                let _ = tx.send(outcome).await;
                return;
            }
        }
    });
}

/// Probe the discovered URL once after a stabilization delay. Diagnostic
/// only: the establish result is already decided when this runs.
fn spawn_verification_probe(url: String, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match reqwest::get(&url).await {
            Ok(resp) => {
                info!(target: "hooktrap::tunnel", "Tunnel URL {} verified ({})", url, resp.status())
            }
            Err(e) => warn!(target: "hooktrap::tunnel", "Tunnel URL {} verification failed: {}", url, e),
        }
    });
}
