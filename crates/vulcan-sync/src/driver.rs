//! Orchestration of a sync run
//!
//! In direct mode every project is synced against the given base URL. In
//! tunneled mode the run checks its preconditions, selects a gateway,
//! opens a tunnel, syncs every project through it and always stops the
//! tunnel before returning.

use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::admin::UPSERT_CAPABILITY;
use crate::error::{Result, SyncError};
use crate::executor::{SyncExecutor, SyncResult};
use crate::selector::GatewaySelector;
use crate::settings::Settings;
use crate::tunnel::{TunnelHandle, TunnelManager, TunnelSpec};

/// Top-level command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Upsert the configuration of the given projects
    Load,
}

impl FromStr for Command {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "load" | "l" => Ok(Command::Load),
            other => Err(SyncError::InvalidCommand(other.to_string())),
        }
    }
}

/// How the control plane is reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Explicit admin API URL, no discovery or tunnel
    Direct(String),
    /// Discover a gateway and tunnel to it
    Tunneled,
}

impl Mode {
    /// Direct mode when `base_url` is set and non-empty
    pub fn from_override(base_url: Option<&str>) -> Self {
        match base_url.map(str::trim) {
            Some(url) if !url.is_empty() => Mode::Direct(url.to_string()),
            _ => Mode::Tunneled,
        }
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub results: Vec<SyncResult>,
}

impl RunReport {
    /// Last non-zero project exit code, or 0 when every project succeeded
    pub fn exit_code(&self) -> i32 {
        self.results
            .iter()
            .filter_map(|r| r.exit_code)
            .filter(|code| *code != 0)
            .last()
            .unwrap_or(0)
    }

    pub fn failed(&self) -> impl Iterator<Item = &SyncResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

/// Notice printed when a project fails, `None` on success
pub fn fatal_notice(result: &SyncResult) -> Option<String> {
    result.exit_code.map(|code| {
        format!(
            "❌ Fatal error syncing '{}' (exit code {})",
            result.project, code
        )
    })
}

/// Sequences selection, tunneling and sync for one invocation
pub struct Orchestrator {
    settings: Settings,
    selector: GatewaySelector,
    tunnels: TunnelManager,
    executor: SyncExecutor,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        selector: GatewaySelector,
        tunnels: TunnelManager,
        executor: SyncExecutor,
    ) -> Self {
        Self {
            settings,
            selector,
            tunnels,
            executor,
        }
    }

    /// Run `command` for `projects`
    ///
    /// Errors are returned only for failures that abort the whole run
    /// (invalid command, empty project list, preconditions, discovery,
    /// tunnel). Per-project
    /// failures are reported in the [`RunReport`].
    pub async fn run(
        &self,
        command: &str,
        base_url_override: Option<&str>,
        projects: &[String],
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let Command::Load = command.parse::<Command>()?;
        if projects.is_empty() {
            return Err(SyncError::NoProjects);
        }

        match Mode::from_override(base_url_override) {
            Mode::Direct(base_url) => {
                info!(base_url = %base_url, "Using admin API directly");
                self.sync_all(&base_url, projects, cancel).await
            }
            Mode::Tunneled => self.run_tunneled(projects, cancel).await,
        }
    }

    /// Checks that must pass before anything is spawned
    pub async fn check_preconditions(&self) -> Result<()> {
        let admin = self.executor.admin();
        if !admin.supports(UPSERT_CAPABILITY).await? {
            return Err(SyncError::CapabilityMissing {
                client: admin.name(),
                capability: UPSERT_CAPABILITY.to_string(),
            });
        }

        self.tunnels.assert_port_free(self.settings.local_port).await
    }

    async fn run_tunneled(
        &self,
        projects: &[String],
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        self.check_preconditions().await?;

        let address = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            address = self.selector.select_gateway_address(&self.settings.pool) => address?,
        };

        let spec = TunnelSpec {
            address,
            local_port: self.settings.local_port,
            remote_port: self.settings.remote_port,
            user: self.settings.ssh_user.clone(),
            identity: self.settings.ssh_identity.clone(),
        };
        let mut handle = self.tunnels.start(spec).await?;

        let outcome = self.sync_through(&mut handle, projects, cancel).await;

        if let Err(e) = handle.stop().await {
            warn!("Failed to stop tunnel: {}", e);
        }
        outcome
    }

    async fn sync_through(
        &self,
        handle: &mut TunnelHandle,
        projects: &[String],
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        handle
            .wait_until_ready(
                self.settings.poll_interval,
                self.settings.ready_timeout,
                cancel,
            )
            .await?;
        eprintln!("✅ Tunnel ready on local port {}", handle.spec().local_port);

        self.sync_all(&self.settings.tunnel_base_url(), projects, cancel).await
    }

    async fn sync_all(
        &self,
        base_url: &str,
        projects: &[String],
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let mut results = Vec::with_capacity(projects.len());

        for project in projects {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            info!(project = %project, base_url = %base_url, "Syncing project");
            let result = self.executor.sync_project(base_url, project).await;

            if let Some(notice) = fatal_notice(&result) {
                error!(project = %project, exit_code = ?result.exit_code, "Project sync failed");
                eprintln!("{}", notice);
            }
            results.push(result);
        }

        Ok(RunReport { results })
    }
}
