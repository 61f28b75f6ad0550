//! SSH port-forward tunnel to a gateway instance
//!
//! A [`TunnelHandle`] owns one background forwarding process. It moves from
//! `Starting` to `Ready` once the local port accepts connections and to
//! `Stopped` when the process is terminated. Stopping is idempotent, and a
//! handle that is dropped without being stopped still kills its process.

use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};

/// Where a tunnel forwards to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    /// Public address of the gateway instance
    pub address: String,
    pub local_port: u16,
    pub remote_port: u16,
    pub user: Option<String>,
    pub identity: Option<PathBuf>,
}

impl TunnelSpec {
    pub fn new(address: impl Into<String>, local_port: u16, remote_port: u16) -> Self {
        Self {
            address: address.into(),
            local_port,
            remote_port,
            user: None,
            identity: None,
        }
    }

    /// `user@address`, or the bare address
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.address),
            None => self.address.clone(),
        }
    }
}

/// A running forwarding process
#[async_trait]
pub trait TunnelProcess: Send {
    /// OS process id, if still known
    fn id(&self) -> Option<u32>;

    /// Exit status if the process has already exited
    fn try_exit_status(&mut self) -> std::io::Result<Option<String>>;

    /// Kill the process and reap it
    async fn terminate(&mut self) -> std::io::Result<()>;
}

/// Starts forwarding processes
pub trait TunnelSpawner: Send + Sync {
    fn spawn(&self, spec: &TunnelSpec) -> Result<Box<dyn TunnelProcess>>;
}

/// Checks whether something accepts connections on a local port
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn is_open(&self, port: u16) -> bool;
}

/// Probes with a plain TCP connect to the loopback address
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl PortProbe for TcpProbe {
    async fn is_open(&self, port: u16) -> bool {
        TcpStream::connect(("127.0.0.1", port)).await.is_ok()
    }
}

/// Spawns `ssh -N -L` forwarding processes
#[derive(Debug, Clone)]
pub struct SshSpawner {
    binary: String,
}

impl SshSpawner {
    pub fn new() -> Self {
        Self {
            binary: "ssh".to_string(),
        }
    }

    /// Use a different `ssh` executable
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Arguments passed to ssh for `spec`
    pub fn args(spec: &TunnelSpec) -> Vec<String> {
        let mut args = vec![
            "-N".to_string(),
            "-o".to_string(),
            "ExitOnForwardFailure=yes".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-L".to_string(),
            format!(
                "127.0.0.1:{}:localhost:{}",
                spec.local_port, spec.remote_port
            ),
        ];
        if let Some(identity) = &spec.identity {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.push(spec.destination());
        args
    }
}

impl Default for SshSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelSpawner for SshSpawner {
    fn spawn(&self, spec: &TunnelSpec) -> Result<Box<dyn TunnelProcess>> {
        let args = Self::args(spec);
        debug!(binary = %self.binary, ?args, "Spawning tunnel process");

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SyncError::TunnelSpawn {
                address: spec.address.clone(),
                source,
            })?;

        Ok(Box::new(SshProcess { child }))
    }
}

struct SshProcess {
    child: Child,
}

#[async_trait]
impl TunnelProcess for SshProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_exit_status(&mut self) -> std::io::Result<Option<String>> {
        Ok(self.child.try_wait()?.map(|status| status.to_string()))
    }

    async fn terminate(&mut self) -> std::io::Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.kill().await
    }
}

/// Lifecycle state of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Starting,
    Ready,
    Stopped,
}

/// Owned handle to one forwarding process
pub struct TunnelHandle {
    spec: TunnelSpec,
    process: Option<Box<dyn TunnelProcess>>,
    probe: Arc<dyn PortProbe>,
    state: TunnelState,
    show_progress: bool,
}

impl TunnelHandle {
    pub fn spec(&self) -> &TunnelSpec {
        &self.spec
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.id())
    }

    /// Poll the local port until it accepts a connection
    ///
    /// Gives up with `TunnelTimeout` after `timeout`, with `Cancelled` when
    /// `cancel` fires, and with `TunnelExited` if the process dies first.
    /// Returns the number of failed probes.
    pub async fn wait_until_ready(
        &mut self,
        poll_interval: Duration,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<u32> {
        if self.show_progress {
            eprint!("⏳ Waiting for tunnel to {} ", self.spec.address);
        }
        let outcome = self.poll_ready(poll_interval, timeout, cancel).await;
        if self.show_progress {
            eprintln!();
        }
        outcome
    }

    async fn poll_ready(
        &mut self,
        poll_interval: Duration,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<u32> {
        let port = self.spec.local_port;
        let deadline = Instant::now() + timeout;
        let mut failed = 0u32;

        loop {
            if self.state == TunnelState::Stopped {
                return Err(SyncError::TunnelExited {
                    status: "stopped".to_string(),
                });
            }

            if self.probe.is_open(port).await {
                self.state = TunnelState::Ready;
                info!(port, failed_probes = failed, "Tunnel ready");
                return Ok(failed);
            }

            if let Some(process) = self.process.as_mut() {
                if let Some(status) = process.try_exit_status()? {
                    return Err(SyncError::TunnelExited { status });
                }
            }

            failed += 1;
            debug!(port, attempt = failed, "Tunnel not accepting connections yet");
            if self.show_progress {
                eprint!(".");
                let _ = std::io::stderr().flush();
            }

            if Instant::now() >= deadline {
                return Err(SyncError::TunnelTimeout { port, timeout });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    /// Terminate the forwarding process
    ///
    /// Only the direct child is killed. Helpers it forks itself, such as a
    /// `ProxyCommand` from the user's ssh config, are not tracked and may
    /// outlive it. Calling this on a stopped handle does nothing.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };
        self.state = TunnelState::Stopped;

        let pid = process.id();
        process.terminate().await?;
        info!(?pid, address = %self.spec.address, "Tunnel stopped");
        Ok(())
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        if self.process.is_some() {
            warn!(
                address = %self.spec.address,
                "Tunnel handle dropped without stop, killing process"
            );
        }
    }
}

/// Starts tunnels and checks the local port
pub struct TunnelManager {
    spawner: Arc<dyn TunnelSpawner>,
    probe: Arc<dyn PortProbe>,
    show_progress: bool,
}

impl TunnelManager {
    pub fn new(spawner: Arc<dyn TunnelSpawner>) -> Self {
        Self {
            spawner,
            probe: Arc::new(TcpProbe),
            show_progress: true,
        }
    }

    /// Replace the readiness probe
    pub fn with_probe(mut self, probe: Arc<dyn PortProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Print a dot per failed readiness probe
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Fail with `PortInUse` if something already listens on `port`
    pub async fn assert_port_free(&self, port: u16) -> Result<()> {
        if self.probe.is_open(port).await {
            return Err(SyncError::PortInUse { port });
        }
        Ok(())
    }

    /// Launch the forwarding process
    ///
    /// Returns as soon as the process is spawned; use
    /// [`TunnelHandle::wait_until_ready`] before sending traffic.
    pub async fn start(&self, spec: TunnelSpec) -> Result<TunnelHandle> {
        self.assert_port_free(spec.local_port).await?;

        let process = self.spawner.spawn(&spec)?;
        info!(
            pid = ?process.id(),
            address = %spec.address,
            local_port = spec.local_port,
            remote_port = spec.remote_port,
            "Tunnel process started"
        );

        Ok(TunnelHandle {
            spec,
            process: Some(process),
            probe: self.probe.clone(),
            state: TunnelState::Starting,
            show_progress: self.show_progress,
        })
    }
}
