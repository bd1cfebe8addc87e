//! Error taxonomy for resolution, registry access, and project loading.

use super::types::ResourceKind;
use thiserror::Error;

/// A single structural problem found while validating a spec or project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Lookup miss. Drives the create branch of get-or-create.
    #[error("{kind} '{name}' not found in workspace '{workspace}'")]
    NotFound {
        kind: ResourceKind,
        name: String,
        workspace: String,
    },

    #[error("{kind} '{name}' already exists in workspace '{workspace}'")]
    AlreadyExists {
        kind: ResourceKind,
        name: String,
        workspace: String,
    },

    #[error("validation failed: {}", join_messages(.0))]
    Validation(Vec<ValidationError>),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("provisioning of {kind} '{name}' failed: {reason}")]
    ProvisioningFailed {
        kind: ResourceKind,
        name: String,
        reason: String,
    },

    #[error("timed out after {seconds}s waiting for {kind} '{name}'")]
    Timeout {
        kind: ResourceKind,
        name: String,
        seconds: u64,
    },

    /// Apply finished but some resources could not be resolved.
    #[error("{0} resource(s) failed")]
    ApplyFailed(u32),

    #[error("{0} drift finding(s)")]
    Drift(usize),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build a validation error from a single message.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation(vec![ValidationError::new(message)])
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Terminal failures are surfaced to the caller and never retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::QuotaExceeded(_) | Self::ProvisioningFailed { .. }
        )
    }
}

fn join_messages(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
