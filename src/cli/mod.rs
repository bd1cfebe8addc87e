//! CLI subcommands: init, validate, plan, apply, resolve, status, drift, export, bind, schema.

use crate::core::conda::{self, ExportFormat};
use crate::core::error::{Error, Result};
use crate::core::executor;
use crate::core::parser;
use crate::core::planner::{self, PlanFilter};
use crate::core::resolver;
use crate::core::types::*;
use crate::provenance::drift;
use crate::registry::{LocalRegistry, Registry};
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new runtarget project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate runtarget.yaml without touching the registry
    Validate {
        /// Path to runtarget.yaml
        #[arg(short, long, default_value = "runtarget.yaml")]
        file: PathBuf,
    },

    /// Show what get-or-create would do for each declared resource
    Plan {
        /// Path to runtarget.yaml
        #[arg(short, long, default_value = "runtarget.yaml")]
        file: PathBuf,

        /// Only environments or only compute targets
        #[arg(short, long)]
        kind: Option<ResourceKind>,

        /// Target a specific resource
        #[arg(short, long)]
        name: Option<String>,

        /// Registry directory (default: from the project file)
        #[arg(long)]
        registry: Option<PathBuf>,
    },

    /// Get or create every declared environment and compute target
    Apply {
        /// Path to runtarget.yaml
        #[arg(short, long, default_value = "runtarget.yaml")]
        file: PathBuf,

        /// Only environments or only compute targets
        #[arg(short, long)]
        kind: Option<ResourceKind>,

        /// Target a specific resource
        #[arg(short, long)]
        name: Option<String>,

        /// Show the plan without creating anything
        #[arg(long)]
        dry_run: bool,

        /// Registry directory (default: from the project file)
        #[arg(long)]
        registry: Option<PathBuf>,
    },

    /// Get or create a single resource and print its handle
    Resolve {
        /// Path to runtarget.yaml
        #[arg(short, long, default_value = "runtarget.yaml")]
        file: PathBuf,

        /// Resource kind (environment, compute)
        kind: ResourceKind,

        /// Declared resource name
        name: String,

        /// Registry directory (default: from the project file)
        #[arg(long)]
        registry: Option<PathBuf>,
    },

    /// List registered resources
    Status {
        /// Path to runtarget.yaml
        #[arg(short, long, default_value = "runtarget.yaml")]
        file: PathBuf,

        /// Only environments or only compute targets
        #[arg(short, long)]
        kind: Option<ResourceKind>,

        /// Registry directory (default: from the project file)
        #[arg(long)]
        registry: Option<PathBuf>,
    },

    /// Report declared definitions that differ from registered ones
    Drift {
        /// Path to runtarget.yaml
        #[arg(short, long, default_value = "runtarget.yaml")]
        file: PathBuf,

        /// Registry directory (default: from the project file)
        #[arg(long)]
        registry: Option<PathBuf>,

        /// Exit non-zero on any drift (for CI/cron)
        #[arg(long)]
        tripwire: bool,
    },

    /// Render an environment's package list
    Export {
        /// Path to runtarget.yaml
        #[arg(short, long, default_value = "runtarget.yaml")]
        file: PathBuf,

        /// Declared environment name
        environment: String,

        /// Output format (conda, pip)
        #[arg(long, default_value = "conda")]
        format: ExportFormat,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Resolve a run's environment and compute target and print its manifest
    Bind {
        /// Path to runtarget.yaml
        #[arg(short, long, default_value = "runtarget.yaml")]
        file: PathBuf,

        /// Declared run name
        run: String,

        /// Write the manifest to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Registry directory (default: from the project file)
        #[arg(long)]
        registry: Option<PathBuf>,
    },

    /// Print the JSON schema of runtarget.yaml
    Schema,
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan {
            file,
            kind,
            name,
            registry,
        } => cmd_plan(
            &file,
            registry.as_deref(),
            PlanFilter {
                kind,
                name: name.as_deref(),
            },
        ),
        Commands::Apply {
            file,
            kind,
            name,
            dry_run,
            registry,
        } => cmd_apply(
            &file,
            registry.as_deref(),
            PlanFilter {
                kind,
                name: name.as_deref(),
            },
            dry_run,
        ),
        Commands::Resolve {
            file,
            kind,
            name,
            registry,
        } => cmd_resolve(&file, registry.as_deref(), kind, &name),
        Commands::Status {
            file,
            kind,
            registry,
        } => cmd_status(&file, registry.as_deref(), kind),
        Commands::Drift {
            file,
            registry,
            tripwire,
        } => cmd_drift(&file, registry.as_deref(), tripwire),
        Commands::Export {
            file,
            environment,
            format,
            output,
        } => cmd_export(&file, &environment, format, output.as_deref()),
        Commands::Bind {
            file,
            run,
            output,
            registry,
        } => cmd_bind(&file, registry.as_deref(), &run, output.as_deref()),
        Commands::Schema => cmd_schema(),
    }
}

const PROJECT_TEMPLATE: &str = r#"version: "1.0"

workspace:
  name: my-workspace
  registry: .runtarget

environments:
  sklearn-env:
    python_version: "3.8"
    packages: [scikit-learn]
    pip_packages: [azureml-defaults]

compute:
  cpu-cluster:
    kind: managed
    vm_size: STANDARD_DS11_V2
    min_nodes: 0
    max_nodes: 2

runs: {}

policy:
  failure: stop_on_first
  event_log: true
"#;

fn cmd_init(path: &Path) -> Result<()> {
    let config_path = path.join("runtarget.yaml");
    if config_path.exists() {
        return Err(Error::Config(format!(
            "{} already exists",
            config_path.display()
        )));
    }

    let registry_dir = path.join(".runtarget");
    std::fs::create_dir_all(&registry_dir)?;
    std::fs::write(&config_path, PROJECT_TEMPLATE)?;

    println!("Initialized runtarget project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", registry_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<()> {
    let project = load_and_report(file)?;
    println!(
        "OK: {} ({} environments, {} compute targets, {} runs)",
        project.workspace.name,
        project.environments.len(),
        project.compute.len(),
        project.runs.len()
    );
    Ok(())
}

/// Load and validate a project file, printing every validation finding.
fn load_and_report(file: &Path) -> Result<Project> {
    match parser::load_project(file) {
        Err(Error::Validation(errors)) => {
            for e in &errors {
                eprintln!("  ERROR: {}", e);
            }
            Err(Error::Validation(errors))
        }
        other => other,
    }
}

/// Directory relative paths in a project file are resolved against.
fn project_dir(file: &Path) -> &Path {
    file.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Open the workspace registry; `--registry` overrides the project setting.
fn open_registry(
    file: &Path,
    project: &Project,
    registry: Option<&Path>,
) -> Result<(LocalRegistry, PathBuf)> {
    let dir = match registry {
        Some(dir) => dir.to_path_buf(),
        None => project_dir(file).join(&project.workspace.registry),
    };
    let reg = LocalRegistry::open(
        &dir,
        &project.workspace.name,
        project.workspace.quota.clone(),
    )?;
    Ok((reg, dir))
}

fn cmd_plan(file: &Path, registry: Option<&Path>, filter: PlanFilter) -> Result<()> {
    let project = load_and_report(file)?;
    let (reg, _) = open_registry(file, &project, registry)?;
    let plan = planner::plan(&project, &reg, &filter)?;
    print_plan(&plan);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &ExecutionPlan) {
    println!(
        "Planning: {} ({} resources)",
        plan.workspace,
        plan.changes.len()
    );
    println!();

    let mut current_kind = None;
    for change in &plan.changes {
        if current_kind != Some(change.kind) {
            current_kind = Some(change.kind);
            println!("{}:", change.kind.collection());
        }
        let symbol = match change.action {
            PlanAction::Create => "+",
            PlanAction::Reuse => " ",
            PlanAction::ReuseDrifted => "~",
        };
        println!("  {} {}", symbol, change.description);
    }

    println!();
    println!(
        "Plan: {} to create, {} to reuse ({} drifted).",
        plan.to_create, plan.to_reuse, plan.drifted
    );
}

fn cmd_apply(
    file: &Path,
    registry: Option<&Path>,
    filter: PlanFilter,
    dry_run: bool,
) -> Result<()> {
    let project = load_and_report(file)?;
    let (reg, registry_dir) = open_registry(file, &project, registry)?;

    if dry_run {
        let plan = planner::plan(&project, &reg, &filter)?;
        print_plan(&plan);
        println!("Dry run: nothing created.");
        return Ok(());
    }

    let cfg = executor::ApplyConfig {
        project: &project,
        registry: &reg,
        registry_dir: Some(&registry_dir),
        filter,
        dry_run: false,
    };
    let result = executor::apply(&cfg)?;

    for resolved in &result.resolved {
        println!(
            "  {} {} {} -> {}",
            resolved.outcome, resolved.handle.kind, resolved.handle.name, resolved.handle.id
        );
    }
    for (kind, name, error) in &result.failures {
        println!("  FAILED {} {}: {}", kind, name, error);
    }

    println!();
    if result.resources_failed > 0 {
        println!(
            "Apply completed with errors: {} created, {} reused, {} FAILED",
            result.resources_created, result.resources_reused, result.resources_failed
        );
        return Err(Error::ApplyFailed(result.resources_failed));
    }

    println!(
        "Apply complete: {} created, {} reused ({:.1}s).",
        result.resources_created,
        result.resources_reused,
        result.total_duration.as_secs_f64()
    );
    Ok(())
}

fn cmd_resolve(file: &Path, registry: Option<&Path>, kind: ResourceKind, name: &str) -> Result<()> {
    let project = load_and_report(file)?;
    let spec = project.spec(kind, name).ok_or_else(|| {
        Error::invalid(format!("{} '{}' is not declared in {}", kind, name, file.display()))
    })?;
    let (reg, _) = open_registry(file, &project, registry)?;
    let resolved = resolver::get_or_create(&reg, name, &spec, &project.workspace.wait)?;

    println!("{}: {}", resolved.outcome, resolved.handle.id);
    println!("  state: {}", resolved.handle.state);
    println!("  hash:  {}", resolved.handle.spec_hash);
    Ok(())
}

fn cmd_status(file: &Path, registry: Option<&Path>, kind: Option<ResourceKind>) -> Result<()> {
    let project = parser::parse_project_file(file)?;
    let (reg, dir) = open_registry(file, &project, registry)?;

    println!("Workspace: {} ({})", reg.workspace(), dir.display());
    let mut found = false;
    for k in [ResourceKind::Environment, ResourceKind::Compute] {
        if kind.is_some_and(|want| want != k) {
            continue;
        }
        let records = reg.list(k)?;
        if records.is_empty() {
            continue;
        }
        found = true;
        println!("  {}:", k.collection());
        for r in &records {
            let declared = if project.spec(k, &r.name).is_some() {
                ""
            } else {
                " (undeclared)"
            };
            println!(
                "    {}: {} [{}] created {}{}",
                r.name,
                r.state,
                describe_spec(&r.spec),
                r.created_at,
                declared
            );
        }
    }

    if !found {
        println!("No resources registered. Run `runtarget apply` first.");
    }
    Ok(())
}

fn describe_spec(spec: &ResourceSpec) -> String {
    match spec {
        ResourceSpec::Environment(env) if env.user_managed_dependencies => {
            format!("user-managed {}", env.interpreter())
        }
        ResourceSpec::Environment(env) => format!(
            "{}, {} packages",
            env.package_manager,
            env.packages.len() + env.pip_packages.len()
        ),
        ResourceSpec::Compute(ComputeTargetSpec::Managed(m)) => {
            format!("{} {}..{}", m.vm_size, m.min_nodes, m.max_nodes)
        }
        ResourceSpec::Compute(ComputeTargetSpec::Attached(a)) => {
            format!("attached {}", a.address)
        }
    }
}

fn cmd_drift(file: &Path, registry: Option<&Path>, tripwire_mode: bool) -> Result<()> {
    let project = load_and_report(file)?;
    let (reg, dir) = open_registry(file, &project, registry)?;
    let findings = drift::detect_drift(&project, &reg)?;

    if findings.is_empty() {
        println!("No drift detected.");
        return Ok(());
    }

    for f in &findings {
        println!("  DRIFTED: {} ({})", f.name, f.detail);
        println!("    Declared:   {}", f.declared_hash);
        println!("    Registered: {}", f.registered_hash);
    }
    if project.policy.event_log {
        drift::log_findings(&dir, &project.workspace.name, &findings)?;
    }

    println!();
    println!("Drift detected: {} resource(s)", findings.len());
    if tripwire_mode {
        return Err(Error::Drift(findings.len()));
    }
    Ok(())
}

fn cmd_export(
    file: &Path,
    environment: &str,
    format: ExportFormat,
    output: Option<&Path>,
) -> Result<()> {
    let project = load_and_report(file)?;
    let env = project.environments.get(environment).ok_or_else(|| {
        Error::invalid(format!(
            "environment '{}' is not declared in {}",
            environment,
            file.display()
        ))
    })?;
    let rendered = conda::export(environment, env, format)?;
    write_or_print(&rendered, output)
}

fn cmd_bind(file: &Path, registry: Option<&Path>, run: &str, output: Option<&Path>) -> Result<()> {
    let project = load_and_report(file)?;
    let (reg, dir) = open_registry(file, &project, registry)?;
    let binding = executor::bind_run(&project, run, &reg, project_dir(file), Some(&dir))?;
    let manifest = serde_json::to_string_pretty(&binding)?;
    write_or_print(&manifest, output)
}

fn cmd_schema() -> Result<()> {
    let schema = schemars::schema_for!(Project);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn write_or_print(content: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)?;
            println!("Wrote {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}
