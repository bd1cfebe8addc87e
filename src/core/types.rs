//! Project, spec, registry, and provenance types.
//!
//! Defines the YAML schema for environments, compute targets, runs, and
//! workspace policy, plus the records the registry keeps about them. All
//! config types derive Serialize/Deserialize for YAML roundtripping and
//! JsonSchema for `runtarget schema`.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Top-level runtarget.yaml
// ============================================================================

/// Root configuration: the declared environments, compute targets, and runs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Project {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Workspace the resources are resolved in
    pub workspace: WorkspaceConfig,

    /// Environment declarations (order-preserving)
    #[serde(default)]
    pub environments: IndexMap<String, EnvironmentSpec>,

    /// Compute target declarations (order-preserving)
    #[serde(default)]
    pub compute: IndexMap<String, ComputeTargetSpec>,

    /// Script runs bound to an environment and a compute target
    #[serde(default)]
    pub runs: IndexMap<String, RunSpec>,

    /// Execution policy
    #[serde(default)]
    pub policy: Policy,
}

impl Project {
    /// Look up the declared spec for a resource.
    pub fn spec(&self, kind: ResourceKind, name: &str) -> Option<ResourceSpec> {
        match kind {
            ResourceKind::Environment => self
                .environments
                .get(name)
                .map(|e| ResourceSpec::Environment(e.clone())),
            ResourceKind::Compute => self
                .compute
                .get(name)
                .map(|c| ResourceSpec::Compute(c.clone())),
        }
    }

    /// All declared resources, environments first, each in declaration order.
    pub fn declared(&self) -> Vec<(ResourceKind, String, ResourceSpec)> {
        let envs = self.environments.iter().map(|(name, spec)| {
            (
                ResourceKind::Environment,
                name.clone(),
                ResourceSpec::Environment(spec.clone()),
            )
        });
        let computes = self.compute.iter().map(|(name, spec)| {
            (
                ResourceKind::Compute,
                name.clone(),
                ResourceSpec::Compute(spec.clone()),
            )
        });
        envs.chain(computes).collect()
    }
}

// ============================================================================
// Workspace
// ============================================================================

/// Workspace identity, registry location, and registry-side limits.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkspaceConfig {
    /// Workspace name (scopes resource name uniqueness)
    pub name: String,

    /// Registry directory, relative to the project file
    #[serde(default = "default_registry")]
    pub registry: String,

    /// Capacity limits enforced on creation
    #[serde(default)]
    pub quota: Quota,

    /// Wait-for-completion policy
    #[serde(default)]
    pub wait: WaitPolicy,
}

fn default_registry() -> String {
    ".runtarget".to_string()
}

/// Registry-side capacity limits. `None` means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Quota {
    /// Maximum number of registered compute targets
    #[serde(default)]
    pub max_compute_targets: Option<u32>,

    /// Maximum sum of `max_nodes` across managed clusters
    #[serde(default)]
    pub max_total_nodes: Option<u32>,
}

/// How long and how often to poll a resource that is still provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WaitPolicy {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl WaitPolicy {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_timeout_seconds() -> u64 {
    1200
}

// ============================================================================
// Environments
// ============================================================================

/// A named, reusable declaration of runtime and package set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EnvironmentSpec {
    /// Package manager (conda, pip)
    #[serde(default)]
    pub package_manager: PackageManager,

    /// Python version, rendered as a `python=<v>` conda dependency
    #[serde(default)]
    pub python_version: Option<String>,

    /// Conda channels
    #[serde(default)]
    pub channels: Vec<String>,

    /// Packages installed by the package manager
    #[serde(default)]
    pub packages: Vec<String>,

    /// Pip packages installed inside a conda environment
    #[serde(default)]
    pub pip_packages: Vec<String>,

    /// Conda specification file, merged at load time
    #[serde(default)]
    pub conda_file: Option<String>,

    /// Pip requirements file, merged at load time
    #[serde(default)]
    pub pip_requirements: Option<String>,

    /// Container base image or build file
    #[serde(default)]
    pub docker: Option<DockerSpec>,

    /// Caller manages its own interpreter and dependencies
    #[serde(default)]
    pub user_managed_dependencies: bool,

    /// Interpreter used when dependencies are user-managed
    #[serde(default)]
    pub interpreter_path: Option<String>,

    /// Variables set in the run environment
    #[serde(default)]
    pub environment_variables: IndexMap<String, String>,
}

impl EnvironmentSpec {
    /// Interpreter the run would use; `python` when none is given.
    pub fn interpreter(&self) -> &str {
        self.interpreter_path.as_deref().unwrap_or("python")
    }

    /// True when at least one inline package or package file is declared.
    pub fn has_package_source(&self) -> bool {
        !self.packages.is_empty()
            || !self.pip_packages.is_empty()
            || self.conda_file.is_some()
            || self.pip_requirements.is_some()
    }
}

/// Package manager enum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PackageManager {
    #[default]
    Conda,
    Pip,
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conda => write!(f, "conda"),
            Self::Pip => write!(f, "pip"),
        }
    }
}

/// Container settings. At most one of the two fields may be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DockerSpec {
    #[serde(default)]
    pub base_image: Option<String>,

    #[serde(default)]
    pub dockerfile: Option<String>,
}

// ============================================================================
// Compute targets
// ============================================================================

/// A named, reusable declaration of the resource a script runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComputeTargetSpec {
    /// Elastic cluster owned by the workspace
    Managed(ManagedCluster),
    /// Externally provisioned machine reached over SSH
    Attached(AttachedCompute),
}

impl ComputeTargetSpec {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Managed(_) => "managed",
            Self::Attached(_) => "attached",
        }
    }
}

/// Sizing for a managed elastic cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ManagedCluster {
    /// Machine size (e.g., STANDARD_DS11_V2)
    pub vm_size: String,

    #[serde(default)]
    pub min_nodes: u32,

    #[serde(default = "default_max_nodes")]
    pub max_nodes: u32,

    #[serde(default)]
    pub priority: VmPriority,

    #[serde(default = "default_idle_seconds")]
    pub idle_seconds_before_scaledown: u64,
}

impl ManagedCluster {
    pub fn new(vm_size: &str, min_nodes: u32, max_nodes: u32) -> Self {
        Self {
            vm_size: vm_size.to_string(),
            min_nodes,
            max_nodes,
            priority: VmPriority::default(),
            idle_seconds_before_scaledown: default_idle_seconds(),
        }
    }
}

fn default_max_nodes() -> u32 {
    1
}

fn default_idle_seconds() -> u64 {
    1800
}

/// Preemption priority of cluster nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VmPriority {
    #[default]
    Dedicated,
    LowPriority,
}

impl fmt::Display for VmPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dedicated => write!(f, "dedicated"),
            Self::LowPriority => write!(f, "low_priority"),
        }
    }
}

/// Connection details for attached compute. Secrets are referenced, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AttachedCompute {
    /// Host name or IP address
    pub address: String,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    pub username: String,

    /// Path to an SSH private key
    #[serde(default)]
    pub private_key_file: Option<String>,

    /// Name of the environment variable holding the password
    #[serde(default)]
    pub password_env: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

// ============================================================================
// Runs
// ============================================================================

/// A training script bound to an environment and compute target.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunSpec {
    /// Entry script, relative to `source_directory`
    pub script: String,

    #[serde(default = "default_source_directory")]
    pub source_directory: String,

    #[serde(default)]
    pub arguments: Vec<String>,

    /// Declared environment name
    pub environment: String,

    /// Declared compute target name
    pub compute: String,
}

fn default_source_directory() -> String {
    ".".to_string()
}

// ============================================================================
// Policy
// ============================================================================

/// Execution policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Policy {
    /// Failure handling
    #[serde(default)]
    pub failure: FailurePolicy,

    /// Append provenance events to the workspace event log
    #[serde(default = "default_true")]
    pub event_log: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            failure: FailurePolicy::default(),
            event_log: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Failure handling strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    StopOnFirst,
    ContinueIndependent,
}

// ============================================================================
// Registry-side types
// ============================================================================

/// Kind of registered resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Environment,
    Compute,
}

impl ResourceKind {
    /// Collection segment used in ids and registry paths.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Environment => "environments",
            Self::Compute => "computes",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Environment => write!(f, "environment"),
            Self::Compute => write!(f, "compute"),
        }
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "environment" | "env" => Ok(Self::Environment),
            "compute" | "compute-target" => Ok(Self::Compute),
            other => Err(format!(
                "unknown resource kind '{}' (expected environment or compute)",
                other
            )),
        }
    }
}

/// A declarative spec submitted to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceSpec {
    Environment(EnvironmentSpec),
    Compute(ComputeTargetSpec),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Environment(_) => ResourceKind::Environment,
            Self::Compute(_) => ResourceKind::Compute,
        }
    }
}

/// Provisioning state of a registered resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    Creating,
    Succeeded,
    Failed,
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "CREATING"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Reference to a registered resource. Equal ids mean the same resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle {
    pub kind: ResourceKind,
    pub name: String,
    pub workspace: String,
    pub id: String,
    pub spec_hash: String,
    pub state: ProvisioningState,
}

/// Derive the registry id of a resource.
pub fn resource_id(workspace: &str, kind: ResourceKind, name: &str) -> String {
    format!("/workspaces/{}/{}/{}", workspace, kind.collection(), name)
}

/// What the registry persists for each resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryRecord {
    /// Record schema version
    pub schema: String,

    pub kind: ResourceKind,

    pub name: String,

    pub workspace: String,

    /// BLAKE3 hash of the normalized spec at creation
    pub spec_hash: String,

    pub state: ProvisioningState,

    pub created_at: String,

    /// Tool and version that created the record
    pub created_by: String,

    #[serde(default)]
    pub failure_reason: Option<String>,

    /// The spec as submitted
    pub spec: ResourceSpec,
}

impl RegistryRecord {
    pub fn handle(&self) -> Handle {
        Handle {
            kind: self.kind,
            name: self.name.clone(),
            workspace: self.workspace.clone(),
            id: resource_id(&self.workspace, self.kind, &self.name),
            spec_hash: self.spec_hash.clone(),
            state: self.state,
        }
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Which branch of get-or-create produced a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Existing resource reused
    Found,
    /// Created from the declared spec
    Created,
    /// Creation lost a race; the concurrent creator's resource is reused
    Adopted,
}

impl fmt::Display for ResolveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Found => write!(f, "FOUND"),
            Self::Created => write!(f, "CREATED"),
            Self::Adopted => write!(f, "ADOPTED"),
        }
    }
}

/// Result of a get-or-create call.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub handle: Handle,
    pub outcome: ResolveOutcome,
}

// ============================================================================
// Plan
// ============================================================================

/// Action get-or-create will take on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Reuse,
    /// Registered definition differs from the declared one; it is reused as-is.
    ReuseDrifted,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Reuse => write!(f, "REUSE"),
            Self::ReuseDrifted => write!(f, "REUSE-DRIFTED"),
        }
    }
}

/// A single planned resolution.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub kind: ResourceKind,

    pub name: String,

    pub action: PlanAction,

    /// Human-readable description
    pub description: String,
}

/// Full resolution plan.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Workspace name
    pub workspace: String,

    /// Planned changes, environments first
    pub changes: Vec<PlannedChange>,

    /// Summary counts
    pub to_create: u32,
    pub to_reuse: u32,
    pub drifted: u32,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    ApplyStarted {
        workspace: String,
        run_id: String,
        runtarget_version: String,
    },
    ResourceFound {
        kind: ResourceKind,
        name: String,
        id: String,
    },
    ResourceCreated {
        kind: ResourceKind,
        name: String,
        id: String,
        duration_seconds: f64,
        hash: String,
    },
    ResourceAdopted {
        kind: ResourceKind,
        name: String,
        id: String,
    },
    ResourceFailed {
        kind: ResourceKind,
        name: String,
        error: String,
    },
    ApplyCompleted {
        workspace: String,
        run_id: String,
        resources_created: u32,
        resources_reused: u32,
        resources_failed: u32,
        total_seconds: f64,
    },
    DriftDetected {
        kind: ResourceKind,
        name: String,
        declared_hash: String,
        registered_hash: String,
    },
    RunBound {
        run: String,
        environment_id: String,
        compute_id: String,
        snapshot_hash: String,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Apply result
// ============================================================================

/// Result of resolving every declared resource in a workspace.
#[derive(Debug, Clone)]
pub struct ApplyResult {
    pub workspace: String,
    pub resources_created: u32,
    pub resources_reused: u32,
    pub resources_failed: u32,
    pub resolved: Vec<Resolved>,
    pub failures: Vec<(ResourceKind, String, String)>,
    pub total_duration: Duration,
}

/// Manifest pairing a run's script with its resolved handles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunBinding {
    pub run: String,
    pub workspace: String,
    pub script: String,
    pub source_directory: String,
    pub arguments: Vec<String>,
    /// BLAKE3 hash of the source directory contents
    pub snapshot_hash: String,
    pub environment: Handle,
    pub compute: Handle,
    pub bound_at: String,
}

// ============================================================================
// Tests
// ============================================================================
