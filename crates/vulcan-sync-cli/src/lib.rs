//! Command-line front end for vulcan sync
//!
//! Parses arguments, layers them over the config file and wires the
//! production adapters into an [`Orchestrator`].

use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use vulcan_sync::{
    AwsCli, ConfigManager, GatewaySelector, Orchestrator, RunReport, Settings, SpecStore,
    SshSpawner, SyncExecutor, TunnelManager, VctlClient,
};

/// Push project routing configuration to a Vulcan control plane
#[derive(Parser, Debug)]
#[command(name = "vulcan-sync")]
#[command(about = "Push project routing configuration to a Vulcan control plane", long_about = None)]
#[command(version = env!("GIT_TAG"), disable_version_flag = true)]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
#[command(override_usage = "vulcan-sync <load|l> <project> [project...]")]
pub struct Cli {
    /// Command to run (load, l)
    pub command: Option<String>,

    /// Projects to sync
    pub projects: Vec<String>,

    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    pub version: Option<bool>,

    /// Admin API URL; skips gateway discovery and the tunnel
    #[arg(long = "url", env = "VULCAN_URL")]
    pub url: Option<String>,

    /// Config file (defaults to ~/.vulcan-sync/config.json)
    #[arg(long, env = "VULCAN_SYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Root of the project configuration store
    #[arg(long, env = "VULCAN_SYNC_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Load balancer whose instances act as gateways
    #[arg(long, env = "VULCAN_SYNC_POOL")]
    pub pool: Option<String>,

    /// AWS region for discovery
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// SSH login user
    #[arg(long, env = "VULCAN_SYNC_SSH_USER")]
    pub ssh_user: Option<String>,

    /// SSH identity file
    #[arg(short = 'i', long)]
    pub identity: Option<PathBuf>,

    /// Admin client executable
    #[arg(long)]
    pub admin_client: Option<String>,

    /// Seconds to wait for the tunnel to accept connections
    #[arg(long)]
    pub ready_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Settings from defaults, the config file and then the command line
    pub fn settings(&self) -> vulcan_sync::Result<Settings> {
        let settings = ConfigManager::load_settings(self.config.as_deref())?;
        Ok(self.apply_overrides(settings))
    }

    pub fn apply_overrides(&self, mut settings: Settings) -> Settings {
        if let Some(config_dir) = &self.config_dir {
            settings.config_dir = config_dir.clone();
        }
        if let Some(pool) = &self.pool {
            settings.pool = pool.clone();
        }
        if self.region.is_some() {
            settings.region = self.region.clone();
        }
        if self.ssh_user.is_some() {
            settings.ssh_user = self.ssh_user.clone();
        }
        if self.identity.is_some() {
            settings.ssh_identity = self.identity.clone();
        }
        if let Some(admin_client) = &self.admin_client {
            settings.admin_client = admin_client.clone();
        }
        if let Some(secs) = self.ready_timeout {
            settings.ready_timeout = Duration::from_secs(secs);
        }
        settings
    }
}

/// Orchestrator backed by the aws, ssh and vctl executables
pub fn build_orchestrator(settings: Settings) -> Orchestrator {
    let aws = Arc::new(AwsCli::new(settings.region.clone()));
    let selector = GatewaySelector::new(aws.clone(), aws);
    let tunnels = TunnelManager::new(Arc::new(SshSpawner::new()));
    let executor = SyncExecutor::new(
        SpecStore::new(settings.config_dir.clone()),
        Arc::new(VctlClient::new(settings.admin_client.clone())),
    );
    Orchestrator::new(settings, selector, tunnels, executor)
}

/// Signals that end a run: Ctrl-C everywhere, plus SIGTERM and SIGHUP on unix
///
/// Handlers are installed by [`ShutdownSignals::new`], so a signal arriving
/// afterwards no longer kills the process before the tunnel is stopped.
pub struct ShutdownSignals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    pub fn new() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                terminate: signal(SignalKind::terminate())?,
                hangup: signal(SignalKind::hangup())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Wait for the next shutdown signal and return its name
    pub async fn recv(&mut self) -> &'static str {
        #[cfg(unix)]
        {
            tokio::select! {
                Ok(()) = tokio::signal::ctrl_c() => "interrupt",
                Some(()) = self.terminate.recv() => "terminate",
                Some(()) = self.hangup.recv() => "hangup",
                else => std::future::pending().await,
            }
        }
        #[cfg(not(unix))]
        {
            match tokio::signal::ctrl_c().await {
                Ok(()) => "interrupt",
                Err(_) => std::future::pending().await,
            }
        }
    }
}

/// Cancel `cancel` on the first shutdown signal
pub fn cancel_on_shutdown(
    mut signals: ShutdownSignals,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let signal = signals.recv().await;
        warn!(signal, "Shutting down, stopping tunnel");
        cancel.cancel();
    })
}

/// One summary line per project
pub fn summary_lines(report: &RunReport) -> Vec<String> {
    report
        .results
        .iter()
        .map(|result| match result.exit_code {
            None => format!("✅ {}", result.project),
            Some(code) => format!(
                "❌ {} (exit code {}, {} failed)",
                result.project,
                code,
                result.failures.len()
            ),
        })
        .collect()
}
