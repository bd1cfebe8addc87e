//! On-disk registry: one YAML record per resource.
//!
//! Layout: `<root>/<workspace>/{environments,computes}/<name>.yaml`.
//! Creation writes a unique temp file and hard-links it into place, so at
//! most one concurrent creator of a name succeeds and records are never
//! observed half-written. Compute creation also holds `<workspace>/.lock`
//! across the quota check and the link, so distinct names cannot overrun
//! the quota together.

use super::{already_exists, check_quota, check_spec, new_record, not_found, Registry};
use crate::core::error::{Error, Result};
use crate::core::parser;
use crate::core::types::*;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const LOCK_FILE: &str = ".lock";
const LOCK_RETRY: Duration = Duration::from_millis(10);
const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Registry backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    root: PathBuf,
    workspace: String,
    quota: Quota,
    create_lock: Arc<Mutex<()>>,
}

/// Exclusive `<workspace>/.lock` file, removed on drop.
struct WorkspaceLock {
    path: PathBuf,
}

impl WorkspaceLock {
    fn acquire(path: PathBuf) -> Result<Self> {
        let deadline = Instant::now() + LOCK_TIMEOUT;
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(Error::Registry(format!(
                            "timed out waiting for {} (remove it if no runtarget process is running)",
                            path.display()
                        )));
                    }
                    std::thread::sleep(LOCK_RETRY);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release workspace lock");
        }
    }
}

impl LocalRegistry {
    /// Open (creating if needed) the registry for a workspace.
    pub fn open(root: &Path, workspace: &str, quota: Quota) -> Result<Self> {
        let errors = parser::validate_workspace_name(workspace);
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        for kind in [ResourceKind::Environment, ResourceKind::Compute] {
            std::fs::create_dir_all(root.join(workspace).join(kind.collection()))?;
        }
        debug!(root = %root.display(), workspace, "opened local registry");
        Ok(Self {
            root: root.to_path_buf(),
            workspace: workspace.to_string(),
            quota,
            create_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Registry root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Derive the record path for a resource.
    pub fn record_path(&self, kind: ResourceKind, name: &str) -> PathBuf {
        self.collection_dir(kind).join(format!("{}.yaml", name))
    }

    fn collection_dir(&self, kind: ResourceKind) -> PathBuf {
        self.root.join(&self.workspace).join(kind.collection())
    }

    fn load(&self, path: &Path) -> Result<RegistryRecord> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::Registry(format!("invalid record {}: {}", path.display(), e)))
    }

    /// Link a fully written temp file to `path`; fails if `path` exists.
    fn publish(&self, kind: ResourceKind, name: &str, yaml: &str) -> Result<()> {
        let path = self.record_path(kind, name);
        let tmp_path = self.collection_dir(kind).join(format!(
            ".{}.{}.tmp",
            name,
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::write(&tmp_path, yaml)?;
        let linked = std::fs::hard_link(&tmp_path, &path);
        let _ = std::fs::remove_file(&tmp_path);
        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(already_exists(&self.workspace, kind, name))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Registry for LocalRegistry {
    fn workspace(&self) -> &str {
        &self.workspace
    }

    fn record(&self, kind: ResourceKind, name: &str) -> Result<RegistryRecord> {
        let path = self.record_path(kind, name);
        if !path.exists() {
            return Err(not_found(&self.workspace, kind, name));
        }
        self.load(&path)
    }

    fn create(&self, name: &str, spec: &ResourceSpec) -> Result<Handle> {
        let kind = spec.kind();
        check_spec(name, spec)?;

        // Quota counts every compute target, so the count and the link
        // happen under one workspace-wide lock.
        let (_guard, _lock) = match kind {
            ResourceKind::Compute => {
                let guard = self.create_lock.lock();
                let lock = WorkspaceLock::acquire(self.root.join(&self.workspace).join(LOCK_FILE))?;
                (Some(guard), Some(lock))
            }
            ResourceKind::Environment => (None, None),
        };

        if self.record_path(kind, name).exists() {
            return Err(already_exists(&self.workspace, kind, name));
        }
        if kind == ResourceKind::Compute {
            let existing = self.list(ResourceKind::Compute)?;
            check_quota(&self.quota, &existing, name, spec)?;
        }

        let record = new_record(&self.workspace, name, spec, ProvisioningState::Succeeded)?;
        let yaml = serde_yaml_ng::to_string(&record)?;
        self.publish(kind, name, &yaml)?;

        info!(%kind, name, workspace = %self.workspace, hash = %record.spec_hash, "registered");
        Ok(record.handle())
    }

    fn list(&self, kind: ResourceKind) -> Result<Vec<RegistryRecord>> {
        let dir = self.collection_dir(kind);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "yaml"))
            .collect();
        paths.sort();
        paths.iter().map(|p| self.load(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_spec() -> ResourceSpec {
        ResourceSpec::Environment(EnvironmentSpec {
            python_version: Some("3.8".to_string()),
            packages: vec!["scikit-learn".to_string()],
            ..Default::default()
        })
    }

    fn cluster_spec(max_nodes: u32) -> ResourceSpec {
        ResourceSpec::Compute(ComputeTargetSpec::Managed(ManagedCluster::new(
            "STANDARD_DS11_V2",
            0,
            max_nodes,
        )))
    }

    #[test]
    fn test_open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        LocalRegistry::open(dir.path(), "ws", Quota::default()).unwrap();
        assert!(dir.path().join("ws/environments").is_dir());
        assert!(dir.path().join("ws/computes").is_dir());
    }

    #[test]
    fn test_open_rejects_empty_workspace() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LocalRegistry::open(dir.path(), "", Quota::default()).is_err());
    }

    #[test]
    fn test_open_rejects_workspace_outside_root() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("registry");
        for bad in ["../escaped", "/abs", "team/ws"] {
            let err = LocalRegistry::open(&root, bad, Quota::default()).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "accepted {:?}", bad);
        }
        assert!(!parent.path().join("escaped").exists());
        assert!(!root.exists());
    }

    #[test]
    fn test_record_path() {
        let reg = LocalRegistry {
            root: PathBuf::from("/registry"),
            workspace: "ws".to_string(),
            quota: Quota::default(),
            create_lock: Arc::new(Mutex::new(())),
        };
        assert_eq!(
            reg.record_path(ResourceKind::Compute, "aml-cluster"),
            PathBuf::from("/registry/ws/computes/aml-cluster.yaml")
        );
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let reg = LocalRegistry::open(dir.path(), "ws", Quota::default()).unwrap();
        let err = reg.get(ResourceKind::Environment, "ghost").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_create_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let reg = LocalRegistry::open(dir.path(), "ws", Quota::default()).unwrap();
        let created = reg.create("sklearn-env", &env_spec()).unwrap();
        assert_eq!(created.state, ProvisioningState::Succeeded);

        let found = reg.get(ResourceKind::Environment, "sklearn-env").unwrap();
        assert_eq!(found, created);
        let record = reg.record(ResourceKind::Environment, "sklearn-env").unwrap();
        assert_eq!(record.spec, env_spec());
    }

    #[test]
    fn test_create_twice_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let reg = LocalRegistry::open(dir.path(), "ws", Quota::default()).unwrap();
        reg.create("aml-cluster", &cluster_spec(4)).unwrap();
        let err = reg.create("aml-cluster", &cluster_spec(8)).unwrap_err();
        assert!(err.is_already_exists());

        // The first definition is untouched
        let record = reg.record(ResourceKind::Compute, "aml-cluster").unwrap();
        assert_eq!(record.spec, cluster_spec(4));
    }

    #[test]
    fn test_publish_conflict_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let reg = LocalRegistry::open(dir.path(), "ws", Quota::default()).unwrap();
        reg.publish(ResourceKind::Compute, "c1", "first").unwrap();
        let err = reg
            .publish(ResourceKind::Compute, "c1", "second")
            .unwrap_err();
        assert!(err.is_already_exists());

        let names: Vec<_> = std::fs::read_dir(dir.path().join("ws/computes"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["c1.yaml"]);
    }

    #[test]
    fn test_create_rejects_invalid_spec() {
        let dir = tempfile::tempdir().unwrap();
        let reg = LocalRegistry::open(dir.path(), "ws", Quota::default()).unwrap();
        let bad = ResourceSpec::Compute(ComputeTargetSpec::Managed(ManagedCluster::new(
            "S", 5, 2,
        )));
        let err = reg.create("aml-cluster", &bad).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!reg.record_path(ResourceKind::Compute, "aml-cluster").exists());
    }

    #[test]
    fn test_create_quota_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let quota = Quota {
            max_compute_targets: None,
            max_total_nodes: Some(6),
        };
        let reg = LocalRegistry::open(dir.path(), "ws", quota).unwrap();
        reg.create("cpu-cluster", &cluster_spec(4)).unwrap();
        let err = reg.create("gpu-cluster", &cluster_spec(4)).unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded(_)));
        assert!(reg.get(ResourceKind::Compute, "gpu-cluster").is_err());
    }

    #[test]
    fn test_concurrent_distinct_creates_respect_quota() {
        let dir = tempfile::tempdir().unwrap();
        let quota = Quota {
            max_compute_targets: Some(1),
            max_total_nodes: None,
        };
        let shared = LocalRegistry::open(dir.path(), "ws", quota.clone()).unwrap();

        let results: Vec<Result<Handle>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let root = dir.path();
                    let quota = quota.clone();
                    let shared = &shared;
                    s.spawn(move || {
                        let name = format!("c{}", i);
                        // Half share one instance, half open their own.
                        if i % 2 == 0 {
                            shared.create(&name, &cluster_spec(2))
                        } else {
                            LocalRegistry::open(root, "ws", quota)?.create(&name, &cluster_spec(2))
                        }
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let created = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(created, 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, Error::QuotaExceeded(_))));
        assert_eq!(shared.list(ResourceKind::Compute).unwrap().len(), 1);
        assert!(!dir.path().join("ws").join(LOCK_FILE).exists());
    }

    #[test]
    fn test_list_sorted_and_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let reg = LocalRegistry::open(dir.path(), "ws", Quota::default()).unwrap();
        reg.create("zeta-env", &env_spec()).unwrap();
        reg.create("alpha-env", &env_spec()).unwrap();
        reg.create("aml-cluster", &cluster_spec(2)).unwrap();

        let envs = reg.list(ResourceKind::Environment).unwrap();
        let names: Vec<_> = envs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alpha-env", "zeta-env"]);
        assert_eq!(reg.list(ResourceKind::Compute).unwrap().len(), 1);

        let other = LocalRegistry::open(dir.path(), "other-ws", Quota::default()).unwrap();
        assert!(other.list(ResourceKind::Environment).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let reg = LocalRegistry::open(dir.path(), "ws", Quota::default()).unwrap();
        std::fs::write(
            reg.record_path(ResourceKind::Environment, "broken"),
            "not: [a record",
        )
        .unwrap();
        let err = reg.get(ResourceKind::Environment, "broken").unwrap_err();
        assert!(matches!(err, Error::Registry(_)));
    }
}
