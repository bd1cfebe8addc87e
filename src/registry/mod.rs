//! Registry abstraction: where environments and compute targets are registered.
//!
//! The registry owns every resource; callers only hold handles. `get` misses
//! with [`Error::NotFound`], `create` is non-clobbering and fails with
//! [`Error::AlreadyExists`] when the name is taken.

pub mod local;
pub mod memory;

pub use local::LocalRegistry;
pub use memory::MemoryRegistry;

use crate::core::error::{Error, Result};
use crate::core::parser;
use crate::core::types::*;
use crate::provenance::{eventlog, hasher};

/// A workspace-scoped resource registry.
pub trait Registry: Send + Sync {
    /// Workspace this registry is scoped to.
    fn workspace(&self) -> &str;

    /// Fetch the full record of a registered resource.
    fn record(&self, kind: ResourceKind, name: &str) -> Result<RegistryRecord>;

    /// Register a new resource. Fails with `AlreadyExists` if the name is taken.
    fn create(&self, name: &str, spec: &ResourceSpec) -> Result<Handle>;

    /// All records of one kind, sorted by name.
    fn list(&self, kind: ResourceKind) -> Result<Vec<RegistryRecord>>;

    /// Look up a resource by name.
    fn get(&self, kind: ResourceKind, name: &str) -> Result<Handle> {
        self.record(kind, name).map(|r| r.handle())
    }
}

pub(crate) fn not_found(workspace: &str, kind: ResourceKind, name: &str) -> Error {
    Error::NotFound {
        kind,
        name: name.to_string(),
        workspace: workspace.to_string(),
    }
}

pub(crate) fn already_exists(workspace: &str, kind: ResourceKind, name: &str) -> Error {
    Error::AlreadyExists {
        kind,
        name: name.to_string(),
        workspace: workspace.to_string(),
    }
}

/// Reject specs the registry would refuse to store.
pub(crate) fn check_spec(name: &str, spec: &ResourceSpec) -> Result<()> {
    let errors = parser::validate_spec(name, spec);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(errors))
    }
}

/// Enforce compute quotas against the already registered records.
pub(crate) fn check_quota(
    quota: &Quota,
    existing: &[RegistryRecord],
    name: &str,
    spec: &ResourceSpec,
) -> Result<()> {
    let ResourceSpec::Compute(compute) = spec else {
        return Ok(());
    };
    let registered: Vec<&ComputeTargetSpec> = existing
        .iter()
        .filter_map(|r| match &r.spec {
            ResourceSpec::Compute(c) => Some(c),
            ResourceSpec::Environment(_) => None,
        })
        .collect();

    if let Some(max) = quota.max_compute_targets {
        let count = u32::try_from(registered.len()).unwrap_or(u32::MAX);
        if count >= max {
            return Err(Error::QuotaExceeded(format!(
                "cannot create compute '{}': workspace already has {} of {} compute targets",
                name, count, max
            )));
        }
    }

    if let (Some(max), ComputeTargetSpec::Managed(cluster)) = (quota.max_total_nodes, compute) {
        let used = registered
            .iter()
            .filter_map(|c| match c {
                ComputeTargetSpec::Managed(m) => Some(m.max_nodes),
                ComputeTargetSpec::Attached(_) => None,
            })
            .fold(0u32, u32::saturating_add);
        if used.saturating_add(cluster.max_nodes) > max {
            return Err(Error::QuotaExceeded(format!(
                "cannot create compute '{}': requests {} nodes but only {} of {} remain",
                name,
                cluster.max_nodes,
                max.saturating_sub(used),
                max
            )));
        }
    }

    Ok(())
}

/// Build the record for a newly created resource.
pub(crate) fn new_record(
    workspace: &str,
    name: &str,
    spec: &ResourceSpec,
    state: ProvisioningState,
) -> Result<RegistryRecord> {
    Ok(RegistryRecord {
        schema: "1.0".to_string(),
        kind: spec.kind(),
        name: name.to_string(),
        workspace: workspace.to_string(),
        spec_hash: hasher::spec_hash(spec)?,
        state,
        created_at: eventlog::now_iso8601(),
        created_by: format!("runtarget {}", env!("CARGO_PKG_VERSION")),
        failure_reason: None,
        spec: spec.clone(),
    })
}
