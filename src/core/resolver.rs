//! Get-or-create resolution of environments and compute targets.
//!
//! Given a name and a fallback spec, return a handle to the registered
//! resource with that name, creating it from the spec only when the lookup
//! misses. Specs are validated before any registry call. A create that loses
//! a race to a concurrent caller (`AlreadyExists`) adopts the winner's
//! resource. Validation and quota failures are terminal and never retried.
//!
//! After create (or when a lookup finds a resource still provisioning) the
//! resolver blocks until the resource settles, polling per [`WaitPolicy`].

use super::error::{Error, Result};
use super::parser;
use super::types::*;
use crate::provenance::hasher;
use crate::registry::Registry;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Resolve `name` against the registry, creating it from `spec` if absent.
pub fn get_or_create<R: Registry + ?Sized>(
    registry: &R,
    name: &str,
    spec: &ResourceSpec,
    wait: &WaitPolicy,
) -> Result<Resolved> {
    let kind = spec.kind();

    let errors = parser::validate_spec(name, spec);
    if !errors.is_empty() {
        return Err(Error::Validation(errors));
    }
    warn_ignored_packages(name, spec);

    let declared_hash = hasher::spec_hash(spec)?;

    let (handle, outcome) = match registry.get(kind, name) {
        Ok(existing) => {
            if existing.spec_hash != declared_hash {
                warn!(
                    %kind,
                    name,
                    registered = %existing.spec_hash,
                    declared = %declared_hash,
                    "registered definition differs from declared spec; reusing registered"
                );
            }
            debug!(%kind, name, id = %existing.id, "found existing");
            (existing, ResolveOutcome::Found)
        }
        Err(e) if e.is_not_found() => {
            info!(%kind, name, workspace = registry.workspace(), "not found; creating");
            match registry.create(name, spec) {
                Ok(created) => (created, ResolveOutcome::Created),
                Err(e) if e.is_already_exists() => {
                    info!(%kind, name, "created concurrently by another caller; adopting");
                    (registry.get(kind, name)?, ResolveOutcome::Adopted)
                }
                Err(e) => return Err(e),
            }
        }
        Err(e) => return Err(e),
    };

    let handle = wait_for_completion(registry, handle, wait)?;
    Ok(Resolved { handle, outcome })
}

/// Get-or-create an environment.
pub fn resolve_environment<R: Registry + ?Sized>(
    registry: &R,
    name: &str,
    env: &EnvironmentSpec,
    wait: &WaitPolicy,
) -> Result<Resolved> {
    get_or_create(registry, name, &ResourceSpec::Environment(env.clone()), wait)
}

/// Get-or-create a compute target.
pub fn resolve_compute<R: Registry + ?Sized>(
    registry: &R,
    name: &str,
    compute: &ComputeTargetSpec,
    wait: &WaitPolicy,
) -> Result<Resolved> {
    get_or_create(registry, name, &ResourceSpec::Compute(compute.clone()), wait)
}

/// Block until a handle leaves the `creating` state.
pub fn wait_for_completion<R: Registry + ?Sized>(
    registry: &R,
    mut handle: Handle,
    wait: &WaitPolicy,
) -> Result<Handle> {
    let start = Instant::now();
    loop {
        match handle.state {
            ProvisioningState::Succeeded => return Ok(handle),
            ProvisioningState::Failed => {
                let reason = registry
                    .record(handle.kind, &handle.name)
                    .ok()
                    .and_then(|r| r.failure_reason)
                    .unwrap_or_else(|| "no reason reported".to_string());
                return Err(Error::ProvisioningFailed {
                    kind: handle.kind,
                    name: handle.name,
                    reason,
                });
            }
            ProvisioningState::Creating => {
                if start.elapsed() >= wait.timeout() {
                    return Err(Error::Timeout {
                        kind: handle.kind,
                        name: handle.name,
                        seconds: wait.timeout_seconds,
                    });
                }
                debug!(kind = %handle.kind, name = %handle.name, "still provisioning");
                std::thread::sleep(wait.poll_interval());
                handle = registry.get(handle.kind, &handle.name)?;
            }
        }
    }
}

fn warn_ignored_packages(name: &str, spec: &ResourceSpec) {
    if let ResourceSpec::Environment(env) = spec {
        if env.user_managed_dependencies && env.has_package_source() {
            warn!(
                environment = name,
                "user_managed_dependencies is set; declared packages are ignored"
            );
        }
    }
}
