//! Project spec storage
//!
//! Reads per-project specs from a directory tree:
//!
//! ```text
//! <root>/<project>/backend
//! <root>/<project>/frontend
//! <root>/<project>/middlewares/<kind>[.<suffix>]
//! ```
//!
//! The store is read-only.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::spec::{ProjectSyncSpec, SpecArgs, TargetKind};

const MIDDLEWARES_DIR: &str = "middlewares";

/// Filesystem-backed spec store
#[derive(Debug, Clone)]
pub struct SpecStore {
    base_dir: PathBuf,
}

impl SpecStore {
    /// Create a store rooted at `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the base directory path (for display purposes)
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Validate project name (alphanumeric, hyphens, underscores, inner dots)
    pub fn validate_project(name: &str) -> Result<()> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.');
        if valid {
            Ok(())
        } else {
            Err(SyncError::InvalidProject(name.to_string()))
        }
    }

    fn project_dir(&self, project: &str) -> PathBuf {
        self.base_dir.join(project)
    }

    fn spec_path(&self, project: &str, kind: &TargetKind) -> PathBuf {
        let dir = self.project_dir(project);
        match kind {
            TargetKind::Backend => dir.join("backend"),
            TargetKind::Frontend => dir.join("frontend"),
            TargetKind::Middleware(kind) => dir.join(MIDDLEWARES_DIR).join(kind),
        }
    }

    /// Load the spec for `kind`
    pub fn load_spec(&self, project: &str, kind: TargetKind) -> Result<ProjectSyncSpec> {
        Self::validate_project(project)?;
        let path = self.spec_path(project, &kind);
        self.load_path(project, kind, &path)
    }

    fn load_path(&self, project: &str, kind: TargetKind, path: &Path) -> Result<ProjectSyncSpec> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SyncError::SpecNotFound {
                    project: project.to_string(),
                    kind,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let args = SpecArgs::parse(&text).map_err(|message| SyncError::InvalidSpec {
            project: project.to_string(),
            kind: kind.clone(),
            message,
        })?;

        debug!(project = %project, kind = %kind, path = %path.display(), "Loaded spec");
        Ok(ProjectSyncSpec { kind, args })
    }

    /// List the middleware entries of a project, sorted by entry name
    ///
    /// A project without a `middlewares` directory has no middlewares.
    pub fn middleware_entries(&self, project: &str) -> Result<Vec<String>> {
        Self::validate_project(project)?;
        let dir = self.project_dir(project).join(MIDDLEWARES_DIR);

        let read_dir = match fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    entries.push(name.to_string());
                }
            }
        }

        // read_dir order is platform dependent
        entries.sort();
        Ok(entries)
    }

    /// Load the middleware spec stored under `entry`
    pub fn load_middleware(&self, project: &str, entry: &str) -> Result<ProjectSyncSpec> {
        Self::validate_project(project)?;
        let kind = TargetKind::from_middleware_entry(entry).ok_or_else(|| {
            SyncError::InvalidSpec {
                project: project.to_string(),
                kind: TargetKind::Middleware(entry.to_string()),
                message: "middleware entry name has no kind".to_string(),
            }
        })?;
        let path = self.project_dir(project).join(MIDDLEWARES_DIR).join(entry);
        self.load_path(project, kind, &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (SpecStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SpecStore::new(temp_dir.path());
        (store, temp_dir)
    }

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_validate_project() {
        assert!(SpecStore::validate_project("my-service").is_ok());
        assert!(SpecStore::validate_project("api_v2.internal").is_ok());
        assert!(SpecStore::validate_project("").is_err());
        assert!(SpecStore::validate_project("../etc").is_err());
        assert!(SpecStore::validate_project(".hidden").is_err());
        assert!(SpecStore::validate_project("a/b").is_err());
    }

    #[test]
    fn test_load_backend_and_frontend() {
        let (store, temp) = create_test_store();
        write(temp.path(), "web/backend", "--id b1 --type http\n");
        write(temp.path(), "web/frontend", "--id f1 --b b1\n");

        let backend = store.load_spec("web", TargetKind::Backend).unwrap();
        assert_eq!(backend.kind, TargetKind::Backend);
        assert_eq!(backend.args.get("id"), Some("b1"));

        let frontend = store.load_spec("web", TargetKind::Frontend).unwrap();
        assert_eq!(frontend.args.to_argv(), vec!["--id", "f1", "--b", "b1"]);
    }

    #[test]
    fn test_missing_spec() {
        let (store, _temp) = create_test_store();
        let err = store.load_spec("web", TargetKind::Backend).unwrap_err();
        assert!(matches!(
            err,
            SyncError::SpecNotFound { ref project, kind: TargetKind::Backend } if project == "web"
        ));
    }

    #[test]
    fn test_middleware_entries_sorted() {
        let (store, temp) = create_test_store();
        write(temp.path(), "web/middlewares/ratelimit", "--id rl");
        write(temp.path(), "web/middlewares/connlimit", "--id cl");
        write(temp.path(), "web/middlewares/.swp", "junk");
        fs::create_dir_all(temp.path().join("web/middlewares/nested")).unwrap();

        let entries = store.middleware_entries("web").unwrap();
        assert_eq!(entries, vec!["connlimit", "ratelimit"]);
    }

    #[test]
    fn test_no_middlewares_dir() {
        let (store, temp) = create_test_store();
        write(temp.path(), "web/backend", "--id b1");
        assert!(store.middleware_entries("web").unwrap().is_empty());
    }

    #[test]
    fn test_load_middleware_with_suffix() {
        let (store, temp) = create_test_store();
        write(temp.path(), "web/middlewares/ratelimit.api", "--id rl-api");

        let spec = store.load_middleware("web", "ratelimit.api").unwrap();
        assert_eq!(spec.kind, TargetKind::Middleware("ratelimit".to_string()));
        assert_eq!(spec.args.get("id"), Some("rl-api"));
    }

    #[test]
    fn test_invalid_spec_text() {
        let (store, temp) = create_test_store();
        write(temp.path(), "web/backend", "--id 'b1");
        let err = store.load_spec("web", TargetKind::Backend).unwrap_err();
        assert!(matches!(err, SyncError::InvalidSpec { .. }));
    }
}
