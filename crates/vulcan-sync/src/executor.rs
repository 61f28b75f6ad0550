//! Per-project sync
//!
//! Upserts a project's backend, frontend and middlewares, in that order.
//! Every target is attempted even when an earlier one failed; the failures
//! are collected into the project's [`SyncResult`].

use std::sync::Arc;
use tracing::{error, info};

use crate::admin::AdminClient;
use crate::error::{Result, SyncError};
use crate::spec::{ProjectSyncSpec, TargetKind};
use crate::store::SpecStore;

/// One failed step of a project sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    /// Target kind, or the store path that could not be read
    pub target: String,
    pub exit_code: i32,
    pub message: String,
}

impl SyncFailure {
    fn new(target: impl Into<String>, err: &SyncError) -> Self {
        Self {
            target: target.into(),
            exit_code: err.exit_code(),
            message: err.to_string(),
        }
    }
}

/// Outcome of one project's sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub project: String,
    pub success: bool,
    /// Code of the last failure
    pub exit_code: Option<i32>,
    pub failures: Vec<SyncFailure>,
}

impl SyncResult {
    fn from_failures(project: &str, failures: Vec<SyncFailure>) -> Self {
        Self {
            project: project.to_string(),
            success: failures.is_empty(),
            exit_code: failures.last().map(|f| f.exit_code),
            failures,
        }
    }
}

/// Loads specs from the store and pushes them through the admin client
pub struct SyncExecutor {
    store: SpecStore,
    admin: Arc<dyn AdminClient>,
}

impl SyncExecutor {
    pub fn new(store: SpecStore, admin: Arc<dyn AdminClient>) -> Self {
        Self { store, admin }
    }

    pub fn admin(&self) -> &Arc<dyn AdminClient> {
        &self.admin
    }

    pub fn load_spec(&self, project: &str, kind: TargetKind) -> Result<ProjectSyncSpec> {
        self.store.load_spec(project, kind)
    }

    /// Upsert one spec; arguments are passed through untouched
    pub async fn upsert(&self, base_url: &str, spec: &ProjectSyncSpec) -> Result<()> {
        self.admin
            .upsert(base_url, &spec.kind, &spec.args.to_argv())
            .await
    }

    async fn sync_target(
        &self,
        base_url: &str,
        project: &str,
        spec: Result<ProjectSyncSpec>,
        failures: &mut Vec<SyncFailure>,
    ) {
        let spec = match spec {
            Ok(spec) => spec,
            Err(e) => {
                error!(project = %project, "{}", e);
                let target = match &e {
                    SyncError::SpecNotFound { kind, .. } | SyncError::InvalidSpec { kind, .. } => {
                        kind.to_string()
                    }
                    _ => "spec".to_string(),
                };
                failures.push(SyncFailure::new(target, &e));
                return;
            }
        };

        info!(
            project = %project,
            kind = %spec.kind,
            id = spec.args.get("id").unwrap_or("-"),
            "Upserting"
        );
        if let Err(e) = self.upsert(base_url, &spec).await {
            error!(project = %project, kind = %spec.kind, "{}", e);
            failures.push(SyncFailure::new(spec.kind.as_str(), &e));
        }
    }

    /// Sync every target of `project` against `base_url`
    pub async fn sync_project(&self, base_url: &str, project: &str) -> SyncResult {
        let mut failures = Vec::new();

        if let Err(e) = SpecStore::validate_project(project) {
            failures.push(SyncFailure::new("project", &e));
            return SyncResult::from_failures(project, failures);
        }

        for kind in [TargetKind::Backend, TargetKind::Frontend] {
            let spec = self.load_spec(project, kind);
            self.sync_target(base_url, project, spec, &mut failures).await;
        }

        match self.store.middleware_entries(project) {
            Ok(entries) => {
                for entry in entries {
                    let spec = self.store.load_middleware(project, &entry);
                    self.sync_target(base_url, project, spec, &mut failures).await;
                }
            }
            Err(e) => {
                error!(project = %project, "Failed to list middlewares: {}", e);
                failures.push(SyncFailure::new("middlewares", &e));
            }
        }

        SyncResult::from_failures(project, failures)
    }
}
