//! Control-plane admin client
//!
//! The admin client performs the actual upserts. The production adapter
//! runs `vctl <kind> upsert --vulcan <url> <args...>` and inherits the
//! terminal so its output reaches the user unchanged.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::spec::TargetKind;

/// Capability the admin client must offer for a sync
pub const UPSERT_CAPABILITY: &str = "upsert";

/// Exit code reported when the admin client cannot be executed at all
pub const EXIT_NOT_EXECUTABLE: i32 = 127;

/// Performs upserts against the control plane
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdminClient: Send + Sync {
    /// Name shown in messages
    fn name(&self) -> String;

    /// Whether the client offers `capability`
    async fn supports(&self, capability: &str) -> Result<bool>;

    /// Create or update one target on the control plane at `base_url`
    async fn upsert(&self, base_url: &str, kind: &TargetKind, args: &[String]) -> Result<()>;
}

/// `vctl` command line adapter
#[derive(Debug, Clone)]
pub struct VctlClient {
    binary: String,
}

impl VctlClient {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Full argument list for one upsert
    pub fn upsert_args(base_url: &str, kind: &TargetKind, args: &[String]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 4);
        argv.push(kind.as_str().to_string());
        argv.push("upsert".to_string());
        argv.push("--vulcan".to_string());
        argv.push(base_url.to_string());
        argv.extend(args.iter().cloned());
        argv
    }
}

#[async_trait]
impl AdminClient for VctlClient {
    fn name(&self) -> String {
        self.binary.clone()
    }

    async fn supports(&self, capability: &str) -> Result<bool> {
        let output = match Command::new(&self.binary)
            .args(["backend", "--help"])
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(binary = %self.binary, "Failed to run admin client: {}", e);
                return Ok(false);
            }
        };

        // Older vctl builds print help on stderr
        let help = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        Ok(help
            .split_whitespace()
            .any(|word| word.trim_end_matches(&[',', ':'][..]) == capability))
    }

    async fn upsert(&self, base_url: &str, kind: &TargetKind, args: &[String]) -> Result<()> {
        let argv = Self::upsert_args(base_url, kind, args);
        debug!(binary = %self.binary, ?argv, "Running upsert");

        let status = Command::new(&self.binary)
            .args(&argv)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                warn!(binary = %self.binary, "Failed to run admin client: {}", e);
                SyncError::Upsert {
                    kind: kind.clone(),
                    exit_code: EXIT_NOT_EXECUTABLE,
                }
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(SyncError::Upsert {
                kind: kind.clone(),
                // killed by a signal
                exit_code: status.code().unwrap_or(1),
            })
        }
    }
}
