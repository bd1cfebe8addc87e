//! YAML parsing and validation.
//!
//! Parses runtarget.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - The workspace name is a single path segment
//! - Resource names follow the per-kind naming rules
//! - Environments declare packages unless dependencies are user-managed
//! - Managed clusters have `min_nodes <= max_nodes`
//! - Runs reference declared environments and compute targets

use super::conda;
use super::error::{Error, Result, ValidationError};
use super::types::*;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static COMPUTE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9-]{1,15}$").expect("compute name pattern compiles")
});

static ENVIRONMENT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,254}$").expect("environment name pattern compiles")
});

static WORKSPACE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,254}$").expect("workspace name pattern compiles")
});

/// Parse a runtarget.yaml file from disk.
pub fn parse_project_file(path: &Path) -> Result<Project> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
    parse_project(&content)
}

/// Parse a runtarget.yaml from a string.
pub fn parse_project(yaml: &str) -> Result<Project> {
    serde_yaml_ng::from_str(yaml).map_err(|e| Error::Config(format!("YAML parse error: {}", e)))
}

/// Parse, validate, merge referenced package files, and validate again.
///
/// Package file paths are resolved relative to the project file's directory.
/// User-managed environments keep their file references unread.
pub fn load_project(path: &Path) -> Result<Project> {
    let mut project = parse_project_file(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let errors = validate_project(&project);
    if !errors.is_empty() {
        return Err(Error::Validation(errors));
    }

    for (name, env) in project.environments.iter_mut() {
        if env.user_managed_dependencies {
            continue;
        }
        *env = conda::materialize(env, base_dir).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("environment '{}': {}", name, msg)),
            other => other,
        })?;
    }

    let errors = validate_project(&project);
    if errors.is_empty() {
        Ok(project)
    } else {
        Err(Error::Validation(errors))
    }
}

/// Check a workspace name. It becomes a registry directory and part of
/// every resource id, so it must be one path segment.
pub fn validate_workspace_name(name: &str) -> Vec<ValidationError> {
    if name.trim().is_empty() {
        return vec![ValidationError::new("workspace name must not be empty")];
    }
    if WORKSPACE_NAME.is_match(name) {
        return Vec::new();
    }
    vec![ValidationError::new(format!(
        "workspace name '{}' must start with a letter or digit and contain only letters, digits, '.', '_' or '-'",
        name
    ))]
}

/// Check a resource name against the rules for its kind.
pub fn validate_name(kind: ResourceKind, name: &str) -> Vec<ValidationError> {
    if name.trim().is_empty() {
        return vec![ValidationError::new(format!("{} name must not be empty", kind))];
    }
    let ok = match kind {
        ResourceKind::Environment => ENVIRONMENT_NAME.is_match(name),
        ResourceKind::Compute => COMPUTE_NAME.is_match(name),
    };
    if ok {
        return Vec::new();
    }
    let rule = match kind {
        ResourceKind::Environment => {
            "must start with a letter or digit and contain only letters, digits, '.', '_' or '-'"
        }
        ResourceKind::Compute => {
            "must be 2-16 characters, start with a letter, and contain only letters, digits or '-'"
        }
    };
    vec![ValidationError::new(format!(
        "{} name '{}' {}",
        kind, name, rule
    ))]
}

/// Validate an environment spec. Returns a list of errors (empty = valid).
pub fn validate_environment(name: &str, env: &EnvironmentSpec) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if !env.user_managed_dependencies && !env.has_package_source() {
        errors.push(ValidationError::new(format!(
            "environment '{}' has no packages (declare packages or set user_managed_dependencies)",
            name
        )));
    }

    if env.package_manager == PackageManager::Pip {
        if !env.channels.is_empty() {
            errors.push(ValidationError::new(format!(
                "environment '{}' declares channels, which require the conda package manager",
                name
            )));
        }
        if !env.pip_packages.is_empty() {
            errors.push(ValidationError::new(format!(
                "environment '{}' declares pip_packages, which require the conda package manager (use packages)",
                name
            )));
        }
        if env.conda_file.is_some() {
            errors.push(ValidationError::new(format!(
                "environment '{}' declares conda_file, which requires the conda package manager",
                name
            )));
        }
    }

    if env
        .packages
        .iter()
        .chain(env.pip_packages.iter())
        .any(|p| p.trim().is_empty())
    {
        errors.push(ValidationError::new(format!(
            "environment '{}' has an empty package entry",
            name
        )));
    }

    if let Some(ref v) = env.python_version {
        if v.trim().is_empty() {
            errors.push(ValidationError::new(format!(
                "environment '{}' has an empty python_version",
                name
            )));
        }
    }

    if let Some(ref docker) = env.docker {
        match (&docker.base_image, &docker.dockerfile) {
            (Some(_), Some(_)) => errors.push(ValidationError::new(format!(
                "environment '{}' sets both docker.base_image and docker.dockerfile",
                name
            ))),
            (Some(image), None) if image.trim().is_empty() => errors.push(ValidationError::new(
                format!("environment '{}' has an empty docker.base_image", name),
            )),
            _ => {}
        }
    }

    if let Some(ref interpreter) = env.interpreter_path {
        if interpreter.trim().is_empty() {
            errors.push(ValidationError::new(format!(
                "environment '{}' has an empty interpreter_path",
                name
            )));
        }
    }

    errors
}

/// Validate a compute target spec. Returns a list of errors (empty = valid).
pub fn validate_compute(name: &str, compute: &ComputeTargetSpec) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    match compute {
        ComputeTargetSpec::Managed(m) => {
            if m.vm_size.trim().is_empty() {
                errors.push(ValidationError::new(format!(
                    "compute '{}' (managed) has no vm_size",
                    name
                )));
            }
            if m.max_nodes == 0 {
                errors.push(ValidationError::new(format!(
                    "compute '{}' (managed) max_nodes must be at least 1",
                    name
                )));
            }
            if m.min_nodes > m.max_nodes {
                errors.push(ValidationError::new(format!(
                    "compute '{}' (managed) min_nodes ({}) exceeds max_nodes ({})",
                    name, m.min_nodes, m.max_nodes
                )));
            }
        }
        ComputeTargetSpec::Attached(a) => {
            if a.address.trim().is_empty() {
                errors.push(ValidationError::new(format!(
                    "compute '{}' (attached) has no address",
                    name
                )));
            }
            if a.username.trim().is_empty() {
                errors.push(ValidationError::new(format!(
                    "compute '{}' (attached) has no username",
                    name
                )));
            }
            if a.ssh_port == 0 {
                errors.push(ValidationError::new(format!(
                    "compute '{}' (attached) ssh_port must not be 0",
                    name
                )));
            }
            if a.private_key_file.is_none() && a.password_env.is_none() {
                errors.push(ValidationError::new(format!(
                    "compute '{}' (attached) needs private_key_file or password_env",
                    name
                )));
            }
        }
    }

    errors
}

/// Validate a name together with its spec.
pub fn validate_spec(name: &str, spec: &ResourceSpec) -> Vec<ValidationError> {
    let mut errors = validate_name(spec.kind(), name);
    match spec {
        ResourceSpec::Environment(env) => errors.extend(validate_environment(name, env)),
        ResourceSpec::Compute(compute) => errors.extend(validate_compute(name, compute)),
    }
    errors
}

/// Validate a parsed project. Returns a list of errors (empty = valid).
pub fn validate_project(project: &Project) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if project.version != "1.0" {
        errors.push(ValidationError::new(format!(
            "version must be \"1.0\", got \"{}\"",
            project.version
        )));
    }

    errors.extend(validate_workspace_name(&project.workspace.name));

    for (name, env) in &project.environments {
        errors.extend(validate_name(ResourceKind::Environment, name));
        errors.extend(validate_environment(name, env));
    }

    for (name, compute) in &project.compute {
        errors.extend(validate_name(ResourceKind::Compute, name));
        errors.extend(validate_compute(name, compute));
    }

    for (id, run) in &project.runs {
        if run.script.trim().is_empty() {
            errors.push(ValidationError::new(format!("run '{}' has no script", id)));
        }
        if !project.environments.contains_key(&run.environment) {
            errors.push(ValidationError::new(format!(
                "run '{}' references unknown environment '{}'",
                id, run.environment
            )));
        }
        if !project.compute.contains_key(&run.compute) {
            errors.push(ValidationError::new(format!(
                "run '{}' references unknown compute '{}'",
                id, run.compute
            )));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(errors: &[ValidationError]) -> Vec<&str> {
        errors.iter().map(|e| e.message.as_str()).collect()
    }

    #[test]
    fn test_parse_valid() {
        let yaml = r#"
version: "1.0"
workspace:
  name: ws
environments:
  sklearn-env:
    packages: [scikit-learn]
compute:
  aml-cluster:
    kind: managed
    vm_size: STANDARD_DS11_V2
    max_nodes: 4
runs:
  train:
    script: train.py
    environment: sklearn-env
    compute: aml-cluster
"#;
        let project = parse_project(yaml).unwrap();
        let errors = validate_project(&project);
        assert!(errors.is_empty(), "unexpected errors: {:?}", messages(&errors));
    }

    #[test]
    fn test_bad_version() {
        let yaml = r#"
version: "2.0"
workspace: { name: ws }
"#;
        let project = parse_project(yaml).unwrap();
        let errors = validate_project(&project);
        assert!(errors.iter().any(|e| e.message.contains("version")));
    }

    #[test]
    fn test_empty_workspace_name() {
        let yaml = r#"
version: "1.0"
workspace: { name: "" }
"#;
        let project = parse_project(yaml).unwrap();
        let errors = validate_project(&project);
        assert!(errors.iter().any(|e| e.message.contains("workspace name")));
    }

    #[test]
    fn test_workspace_name_must_be_one_segment() {
        assert!(validate_workspace_name("ws").is_empty());
        assert!(validate_workspace_name("ml-prod.v2_eu").is_empty());
        for bad in ["../escaped", "..", ".hidden", "/abs", "team/ws", "a\\b", "has space"] {
            assert!(!validate_workspace_name(bad).is_empty(), "accepted {:?}", bad);
        }

        let yaml = r#"
version: "1.0"
workspace: { name: "../escaped" }
"#;
        let project = parse_project(yaml).unwrap();
        let errors = validate_project(&project);
        assert!(errors.iter().any(|e| e.message.contains("workspace name '../escaped'")));
    }

    #[test]
    fn test_min_nodes_exceeds_max_nodes() {
        let spec = ComputeTargetSpec::Managed(ManagedCluster::new("STANDARD_DS11_V2", 5, 4));
        let errors = validate_compute("aml-cluster", &spec);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("min_nodes (5) exceeds max_nodes (4)"));
    }

    #[test]
    fn test_zero_max_nodes() {
        let spec = ComputeTargetSpec::Managed(ManagedCluster::new("S", 0, 0));
        let errors = validate_compute("c1", &spec);
        assert!(errors.iter().any(|e| e.message.contains("at least 1")));
    }

    #[test]
    fn test_user_managed_without_packages_is_accepted() {
        let env = EnvironmentSpec {
            user_managed_dependencies: true,
            ..Default::default()
        };
        assert!(validate_environment("byo-env", &env).is_empty());
    }

    #[test]
    fn test_empty_packages_without_user_managed_is_rejected() {
        let env = EnvironmentSpec::default();
        let errors = validate_environment("empty-env", &env);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("no packages"));
    }

    #[test]
    fn test_conda_file_counts_as_package_source() {
        let env = EnvironmentSpec {
            conda_file: Some("environment.yml".to_string()),
            ..Default::default()
        };
        assert!(validate_environment("file-env", &env).is_empty());
    }

    #[test]
    fn test_pip_manager_rejects_conda_fields() {
        let env = EnvironmentSpec {
            package_manager: PackageManager::Pip,
            channels: vec!["conda-forge".to_string()],
            packages: vec!["torch".to_string()],
            pip_packages: vec!["mlflow".to_string()],
            ..Default::default()
        };
        let errors = validate_environment("pip-env", &env);
        assert!(errors.iter().any(|e| e.message.contains("channels")));
        assert!(errors.iter().any(|e| e.message.contains("pip_packages")));
    }

    #[test]
    fn test_docker_image_and_file_exclusive() {
        let env = EnvironmentSpec {
            packages: vec!["numpy".to_string()],
            docker: Some(DockerSpec {
                base_image: Some("mcr.microsoft.com/azureml/base:latest".to_string()),
                dockerfile: Some("FROM ubuntu".to_string()),
            }),
            ..Default::default()
        };
        let errors = validate_environment("docker-env", &env);
        assert!(errors.iter().any(|e| e.message.contains("both")));
    }

    #[test]
    fn test_empty_package_entry() {
        let env = EnvironmentSpec {
            packages: vec!["numpy".to_string(), " ".to_string()],
            ..Default::default()
        };
        let errors = validate_environment("e", &env);
        assert!(errors.iter().any(|e| e.message.contains("empty package")));
    }

    #[test]
    fn test_attached_needs_credentials() {
        let spec = ComputeTargetSpec::Attached(AttachedCompute {
            address: "10.0.0.5".to_string(),
            ssh_port: 22,
            username: "azureuser".to_string(),
            private_key_file: None,
            password_env: None,
        });
        let errors = validate_compute("dsvm", &spec);
        assert!(errors.iter().any(|e| e.message.contains("private_key_file")));
    }

    #[test]
    fn test_compute_name_rules() {
        assert!(validate_name(ResourceKind::Compute, "aml-cluster").is_empty());
        assert!(!validate_name(ResourceKind::Compute, "a").is_empty());
        assert!(!validate_name(ResourceKind::Compute, "1cluster").is_empty());
        assert!(!validate_name(ResourceKind::Compute, "cluster_with_underscore").is_empty());
        assert!(!validate_name(ResourceKind::Compute, "a-very-long-cluster-name").is_empty());
        assert!(!validate_name(ResourceKind::Compute, "").is_empty());
    }

    #[test]
    fn test_environment_name_rules() {
        assert!(validate_name(ResourceKind::Environment, "sklearn-env").is_empty());
        assert!(validate_name(ResourceKind::Environment, "AzureML-Minimal.v2").is_empty());
        assert!(!validate_name(ResourceKind::Environment, "-leading-dash").is_empty());
        assert!(!validate_name(ResourceKind::Environment, "has space").is_empty());
    }

    #[test]
    fn test_run_unknown_references() {
        let yaml = r#"
version: "1.0"
workspace: { name: ws }
runs:
  train:
    script: train.py
    environment: ghost-env
    compute: ghost
"#;
        let project = parse_project(yaml).unwrap();
        let errors = validate_project(&project);
        assert!(errors.iter().any(|e| e.message.contains("unknown environment")));
        assert!(errors.iter().any(|e| e.message.contains("unknown compute")));
    }

    #[test]
    fn test_load_project_merges_conda_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("environment.yml"),
            r#"
name: experiment-env
dependencies:
  - python=3.8
  - scikit-learn
  - pip
  - pip:
    - azureml-defaults
"#,
        )
        .unwrap();
        let path = dir.path().join("runtarget.yaml");
        std::fs::write(
            &path,
            r#"
version: "1.0"
workspace: { name: ws }
environments:
  experiment-env:
    conda_file: environment.yml
"#,
        )
        .unwrap();
        let project = load_project(&path).unwrap();
        let env = &project.environments["experiment-env"];
        assert!(env.conda_file.is_none());
        assert_eq!(env.python_version.as_deref(), Some("3.8"));
        assert_eq!(env.packages, vec!["scikit-learn"]);
        assert_eq!(env.pip_packages, vec!["azureml-defaults"]);
    }

    #[test]
    fn test_load_project_reports_all_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtarget.yaml");
        std::fs::write(
            &path,
            r#"
version: "1.0"
workspace: { name: ws }
environments:
  empty-env: {}
compute:
  aml-cluster: { kind: managed, vm_size: S, min_nodes: 3, max_nodes: 2 }
"#,
        )
        .unwrap();
        match load_project(&path) {
            Err(Error::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_project_pip_rejects_conda_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("environment.yml"),
            "dependencies:\n  - numpy\n  - cudatoolkit=11.2\n",
        )
        .unwrap();
        let path = dir.path().join("runtarget.yaml");
        std::fs::write(
            &path,
            r#"
version: "1.0"
workspace: { name: ws }
environments:
  pip-env:
    package_manager: pip
    conda_file: environment.yml
"#,
        )
        .unwrap();
        match load_project(&path) {
            Err(Error::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.message.contains("conda_file")));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_project_leaves_user_managed_files_unread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtarget.yaml");
        std::fs::write(
            &path,
            r#"
version: "1.0"
workspace: { name: ws }
environments:
  byo:
    user_managed_dependencies: true
    conda_file: missing.yml
"#,
        )
        .unwrap();
        let project = load_project(&path).unwrap();
        let env = &project.environments["byo"];
        assert_eq!(env.conda_file.as_deref(), Some("missing.yml"));
        assert!(env.packages.is_empty());
    }

    #[test]
    fn test_load_project_missing_package_file_names_environment_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtarget.yaml");
        std::fs::write(
            &path,
            r#"
version: "1.0"
workspace: { name: ws }
environments:
  train-env:
    conda_file: missing.yml
"#,
        )
        .unwrap();
        let err = load_project(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        let msg = err.to_string();
        assert!(msg.starts_with("configuration error: environment 'train-env': cannot read"));
        assert_eq!(msg.matches("configuration error").count(), 1);
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = parse_project("not: [valid: yaml: {{");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_missing_file() {
        let result = parse_project_file(Path::new("/nonexistent/runtarget.yaml"));
        assert!(result.is_err());
    }
}
