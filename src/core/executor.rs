//! Executor: resolve every declared resource and bind runs.
//!
//! apply: parse → validate → (plan) → for each resource: get-or-create → events.
//! bind: snapshot source → resolve environment + compute → manifest → event.

use super::error::{Error, Result};
use super::planner::{self, PlanFilter};
use super::resolver;
use super::types::*;
use crate::provenance::{eventlog, hasher};
use crate::registry::Registry;
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};

/// Configuration for an apply run.
pub struct ApplyConfig<'a> {
    pub project: &'a Project,
    pub registry: &'a dyn Registry,
    /// Where the event log lives. `None` disables event logging.
    pub registry_dir: Option<&'a Path>,
    pub filter: PlanFilter<'a>,
    pub dry_run: bool,
}

/// Shared context for recording resource outcomes.
struct RecordCtx<'a> {
    registry_dir: Option<&'a Path>,
    workspace: &'a str,
}

impl RecordCtx<'_> {
    fn log(&self, event: ProvenanceEvent) {
        if let Some(dir) = self.registry_dir {
            if let Err(e) = eventlog::append_event(dir, self.workspace, event) {
                warn!(error = %e, "failed to append provenance event");
            }
        }
    }
}

impl<'a> ApplyConfig<'a> {
    fn record_ctx(&self) -> RecordCtx<'a> {
        RecordCtx {
            registry_dir: self
                .registry_dir
                .filter(|_| self.project.policy.event_log),
            workspace: &self.project.workspace.name,
        }
    }
}

/// Execute the apply loop.
pub fn apply(cfg: &ApplyConfig) -> Result<ApplyResult> {
    let start = Instant::now();
    let workspace = cfg.project.workspace.name.clone();

    if cfg.dry_run {
        let plan = planner::plan(cfg.project, cfg.registry, &cfg.filter)?;
        return Ok(ApplyResult {
            workspace,
            resources_created: 0,
            resources_reused: plan.to_reuse,
            resources_failed: 0,
            resolved: Vec::new(),
            failures: Vec::new(),
            total_duration: start.elapsed(),
        });
    }

    let ctx = cfg.record_ctx();
    let run_id = eventlog::generate_run_id();
    ctx.log(ProvenanceEvent::ApplyStarted {
        workspace: workspace.clone(),
        run_id: run_id.clone(),
        runtarget_version: env!("CARGO_PKG_VERSION").to_string(),
    });
    info!(workspace = %workspace, run_id = %run_id, "apply started");

    let mut result = ApplyResult {
        workspace: workspace.clone(),
        resources_created: 0,
        resources_reused: 0,
        resources_failed: 0,
        resolved: Vec::new(),
        failures: Vec::new(),
        total_duration: start.elapsed(),
    };
    let mut first_error = None;

    for (kind, name, spec) in cfg.project.declared() {
        if !cfg.filter.matches(kind, &name) {
            continue;
        }
        let resource_start = Instant::now();
        let wait = &cfg.project.workspace.wait;

        match resolver::get_or_create(cfg.registry, &name, &spec, wait) {
            Ok(resolved) => {
                record_success(&ctx, &resolved, resource_start.elapsed().as_secs_f64());
                match resolved.outcome {
                    ResolveOutcome::Created => result.resources_created += 1,
                    ResolveOutcome::Found | ResolveOutcome::Adopted => {
                        result.resources_reused += 1
                    }
                }
                result.resolved.push(resolved);
            }
            Err(e) => {
                let should_stop = record_failure(
                    &ctx,
                    kind,
                    &name,
                    &e,
                    &cfg.project.policy.failure,
                );
                result.resources_failed += 1;
                result.failures.push((kind, name, e.to_string()));
                if should_stop {
                    first_error = Some(e);
                    break;
                }
            }
        }
    }

    result.total_duration = start.elapsed();
    ctx.log(ProvenanceEvent::ApplyCompleted {
        workspace,
        run_id,
        resources_created: result.resources_created,
        resources_reused: result.resources_reused,
        resources_failed: result.resources_failed,
        total_seconds: result.total_duration.as_secs_f64(),
    });

    match first_error {
        Some(e) => Err(e),
        None => Ok(result),
    }
}

/// Record a resolved resource into the event log.
fn record_success(ctx: &RecordCtx, resolved: &Resolved, duration: f64) {
    let handle = &resolved.handle;
    let event = match resolved.outcome {
        ResolveOutcome::Created => ProvenanceEvent::ResourceCreated {
            kind: handle.kind,
            name: handle.name.clone(),
            id: handle.id.clone(),
            duration_seconds: duration,
            hash: handle.spec_hash.clone(),
        },
        ResolveOutcome::Found => ProvenanceEvent::ResourceFound {
            kind: handle.kind,
            name: handle.name.clone(),
            id: handle.id.clone(),
        },
        ResolveOutcome::Adopted => ProvenanceEvent::ResourceAdopted {
            kind: handle.kind,
            name: handle.name.clone(),
            id: handle.id.clone(),
        },
    };
    ctx.log(event);
}

/// Record a resource failure into the event log. Returns true if apply should stop.
fn record_failure(
    ctx: &RecordCtx,
    kind: ResourceKind,
    name: &str,
    err: &Error,
    failure_policy: &FailurePolicy,
) -> bool {
    ctx.log(ProvenanceEvent::ResourceFailed {
        kind,
        name: name.to_string(),
        error: err.to_string(),
    });

    if *failure_policy == FailurePolicy::StopOnFirst {
        error!(%kind, name, error = %err, "stopping after first failure");
        return true;
    }
    warn!(%kind, name, error = %err, "resource failed; continuing");
    false
}

/// Resolve a run's environment and compute target and produce its manifest.
///
/// `base_dir` is the directory the run's `source_directory` is relative to.
/// The source is snapshotted before anything is resolved, so a run with a
/// missing script never creates resources.
pub fn bind_run(
    project: &Project,
    run_name: &str,
    registry: &dyn Registry,
    base_dir: &Path,
    registry_dir: Option<&Path>,
) -> Result<RunBinding> {
    let run = project
        .runs
        .get(run_name)
        .ok_or_else(|| Error::Config(format!("unknown run '{}'", run_name)))?;
    let env = project.environments.get(&run.environment).ok_or_else(|| {
        Error::Config(format!(
            "run '{}' references undeclared environment '{}'",
            run_name, run.environment
        ))
    })?;
    let compute = project.compute.get(&run.compute).ok_or_else(|| {
        Error::Config(format!(
            "run '{}' references undeclared compute '{}'",
            run_name, run.compute
        ))
    })?;

    let source = base_dir.join(&run.source_directory);
    if !source.join(&run.script).is_file() {
        return Err(Error::Config(format!(
            "run '{}': script '{}' not found in {}",
            run_name,
            run.script,
            source.display()
        )));
    }
    let snapshot_hash = hasher::hash_directory(&source)?;

    let wait = &project.workspace.wait;
    let environment = resolver::resolve_environment(registry, &run.environment, env, wait)?;
    let compute = resolver::resolve_compute(registry, &run.compute, compute, wait)?;

    let binding = RunBinding {
        run: run_name.to_string(),
        workspace: registry.workspace().to_string(),
        script: run.script.clone(),
        source_directory: run.source_directory.clone(),
        arguments: run.arguments.clone(),
        snapshot_hash,
        environment: environment.handle,
        compute: compute.handle,
        bound_at: eventlog::now_iso8601(),
    };

    let ctx = RecordCtx {
        registry_dir: registry_dir.filter(|_| project.policy.event_log),
        workspace: &project.workspace.name,
    };
    ctx.log(ProvenanceEvent::RunBound {
        run: binding.run.clone(),
        environment_id: binding.environment.id.clone(),
        compute_id: binding.compute.id.clone(),
        snapshot_hash: binding.snapshot_hash.clone(),
    });
    info!(run = run_name, environment = %binding.environment.id, compute = %binding.compute.id, "run bound");

    Ok(binding)
}
