//! Drift detection: compare declared spec hashes to registered ones.
//!
//! Get-or-create never updates a registered resource, so a definition that
//! changed after registration is silently reused. Drift makes that visible.
//! Resources not yet registered are not drift.

use super::eventlog;
use super::hasher;
use crate::core::error::Result;
use crate::core::types::{Project, ProvenanceEvent, ResourceKind};
use crate::registry::Registry;
use std::path::Path;
use tracing::warn;

/// A single drift finding.
#[derive(Debug, Clone)]
pub struct DriftFinding {
    pub kind: ResourceKind,
    pub name: String,
    pub declared_hash: String,
    pub registered_hash: String,
    pub detail: String,
}

/// Check every declared resource for drift against the registry.
pub fn detect_drift<R: Registry + ?Sized>(
    project: &Project,
    registry: &R,
) -> Result<Vec<DriftFinding>> {
    let mut findings = Vec::new();

    for (kind, name, spec) in project.declared() {
        let record = match registry.record(kind, &name) {
            Ok(r) => r,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e),
        };
        let declared = hasher::spec_hash(&spec)?;
        if declared == record.spec_hash {
            continue;
        }

        let detail = format!(
            "{} '{}' differs from its registered definition (created {} by {})",
            kind, name, record.created_at, record.created_by
        );
        warn!(%kind, name = %name, "drift detected");
        findings.push(DriftFinding {
            kind,
            name,
            declared_hash: declared,
            registered_hash: record.spec_hash,
            detail,
        });
    }

    Ok(findings)
}

/// Append a `drift_detected` event for each finding.
pub fn log_findings(registry_dir: &Path, workspace: &str, findings: &[DriftFinding]) -> Result<()> {
    for f in findings {
        eventlog::append_event(
            registry_dir,
            workspace,
            ProvenanceEvent::DriftDetected {
                kind: f.kind,
                name: f.name.clone(),
                declared_hash: f.declared_hash.clone(),
                registered_hash: f.registered_hash.clone(),
            },
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::*;
    use crate::registry::MemoryRegistry;

    fn project() -> Project {
        let yaml = r#"
version: "1.0"
workspace: { name: ws }
environments:
  sklearn-env:
    packages: [scikit-learn]
compute:
  aml-cluster: { kind: managed, vm_size: STANDARD_DS11_V2, max_nodes: 4 }
"#;
        serde_yaml_ng::from_str(yaml).unwrap()
    }

    #[test]
    fn test_no_drift_when_unregistered() {
        let reg = MemoryRegistry::new("ws");
        assert!(detect_drift(&project(), &reg).unwrap().is_empty());
    }

    #[test]
    fn test_no_drift_when_matching() {
        let p = project();
        let reg = MemoryRegistry::new("ws");
        for (_, name, spec) in p.declared() {
            reg.insert(&name, &spec).unwrap();
        }
        assert!(detect_drift(&p, &reg).unwrap().is_empty());
    }

    #[test]
    fn test_drift_detected() {
        let p = project();
        let reg = MemoryRegistry::new("ws");
        reg.insert(
            "aml-cluster",
            &ResourceSpec::Compute(ComputeTargetSpec::Managed(ManagedCluster::new(
                "STANDARD_DS11_V2",
                0,
                8,
            ))),
        )
        .unwrap();
        let findings = detect_drift(&p, &reg).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].name, "aml-cluster");
        assert_eq!(findings[0].kind, ResourceKind::Compute);
        assert_ne!(findings[0].declared_hash, findings[0].registered_hash);
        assert!(findings[0].detail.contains("differs"));
    }

    #[test]
    fn test_user_managed_package_changes_are_not_drift() {
        let mut p = project();
        let byo = EnvironmentSpec {
            user_managed_dependencies: true,
            ..Default::default()
        };
        p.environments.insert("byo".to_string(), byo.clone());
        let reg = MemoryRegistry::new("ws");
        reg.insert("byo", &ResourceSpec::Environment(byo)).unwrap();

        p.environments["byo"].packages = vec!["numpy".to_string()];
        assert!(detect_drift(&p, &reg).unwrap().is_empty());
    }

    #[test]
    fn test_log_findings() {
        let dir = tempfile::tempdir().unwrap();
        let findings = vec![DriftFinding {
            kind: ResourceKind::Environment,
            name: "sklearn-env".to_string(),
            declared_hash: "blake3:a".to_string(),
            registered_hash: "blake3:b".to_string(),
            detail: String::new(),
        }];
        log_findings(dir.path(), "ws", &findings).unwrap();
        let events = eventlog::read_events(dir.path(), "ws").unwrap();
        assert!(matches!(
            events[0].event,
            ProvenanceEvent::DriftDetected { .. }
        ));
    }
}
