//! Conda specification and pip requirements rendering and parsing.
//!
//! An environment's package list serializes to the conda format:
//!
//! ```yaml
//! name: sklearn-env
//! dependencies:
//!   - python=3.8
//!   - scikit-learn
//!   - pip
//!   - pip:
//!     - azureml-defaults
//! ```

use super::error::{Error, Result, ValidationError};
use super::types::{EnvironmentSpec, PackageManager};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A conda environment specification file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CondaSpecification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,

    #[serde(default)]
    pub dependencies: Vec<CondaDependency>,
}

/// One entry of `dependencies:`, either a package string or the nested pip list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CondaDependency {
    Package(String),
    Pip { pip: Vec<String> },
}

/// Output format for `runtarget export`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Conda,
    Pip,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "conda" => Ok(Self::Conda),
            "pip" | "requirements" => Ok(Self::Pip),
            other => Err(format!("unknown export format '{}' (expected conda or pip)", other)),
        }
    }
}

/// Build the conda specification for an environment.
pub fn to_conda(name: &str, env: &EnvironmentSpec) -> CondaSpecification {
    let mut dependencies = Vec::new();
    if let Some(ref v) = env.python_version {
        dependencies.push(CondaDependency::Package(format!("python={}", v)));
    }

    let pip = match env.package_manager {
        PackageManager::Conda => {
            for pkg in &env.packages {
                dependencies.push(CondaDependency::Package(pkg.clone()));
            }
            env.pip_packages.clone()
        }
        PackageManager::Pip => env.packages.clone(),
    };

    if !pip.is_empty() {
        if !env.packages.iter().any(|p| p == "pip") || env.package_manager == PackageManager::Pip {
            dependencies.push(CondaDependency::Package("pip".to_string()));
        }
        dependencies.push(CondaDependency::Pip { pip });
    }

    CondaSpecification {
        name: Some(name.to_string()),
        channels: env.channels.clone(),
        dependencies,
    }
}

/// Render an environment as a conda specification YAML document.
pub fn render_conda(name: &str, env: &EnvironmentSpec) -> Result<String> {
    Ok(serde_yaml_ng::to_string(&to_conda(name, env))?)
}

/// Render the pip-installed packages of an environment as a requirements file.
///
/// For a conda environment only `pip_packages` are written: conda packages
/// are not installable with pip and stay in the conda export.
pub fn render_requirements(env: &EnvironmentSpec) -> String {
    let pkgs = match env.package_manager {
        PackageManager::Pip => &env.packages,
        PackageManager::Conda => &env.pip_packages,
    };
    let mut out = String::new();
    for pkg in pkgs {
        out.push_str(pkg);
        out.push('\n');
    }
    out
}

/// Render an environment in the requested export format.
pub fn export(name: &str, env: &EnvironmentSpec, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Conda => render_conda(name, env),
        ExportFormat::Pip => Ok(render_requirements(env)),
    }
}

/// Parse a conda specification YAML document.
pub fn parse_conda(yaml: &str) -> Result<CondaSpecification> {
    serde_yaml_ng::from_str(yaml)
        .map_err(|e| Error::Config(format!("invalid conda specification: {}", e)))
}

/// Parse a pip requirements file. Include and constraint directives are rejected.
pub fn parse_requirements(text: &str) -> Result<Vec<String>> {
    let mut packages = Vec::new();
    for (lineno, raw) in text.lines().enumerate() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('-') {
            return Err(Error::Config(format!(
                "requirements line {}: unsupported directive '{}'",
                lineno + 1,
                line
            )));
        }
        packages.push(line.to_string());
    }
    Ok(packages)
}

/// Cut a line at the first `#` that starts it or follows whitespace.
/// A `#` inside a token, as in `pkg @ https://host/a.whl#sha256=...`, is kept.
fn strip_comment(line: &str) -> &str {
    let mut after_space = true;
    for (i, c) in line.char_indices() {
        if c == '#' && after_space {
            return &line[..i];
        }
        after_space = c.is_whitespace();
    }
    line
}

/// Split a python dependency like `python=3.8` or `python==3.8.*` into its version.
fn python_version_of(dep: &str) -> Option<String> {
    let rest = dep.strip_prefix("python")?;
    let version = rest.trim_start_matches(['=', '>', '<', '~']);
    if rest.is_empty() || version.len() == rest.len() {
        return None;
    }
    Some(version.to_string())
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

/// Merge referenced conda/pip files into the inline lists and clear the references.
pub fn materialize(env: &EnvironmentSpec, base_dir: &Path) -> Result<EnvironmentSpec> {
    let mut out = env.clone();

    if out.conda_file.is_some() && out.package_manager == PackageManager::Pip {
        return Err(Error::Validation(vec![ValidationError::new(
            "conda_file requires the conda package manager",
        )]));
    }

    if let Some(file) = out.conda_file.take() {
        let path = base_dir.join(&file);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let spec = parse_conda(&content)?;
        for channel in spec.channels {
            push_unique(&mut out.channels, channel);
        }
        for dep in spec.dependencies {
            match dep {
                CondaDependency::Package(p) if p == "pip" => {}
                CondaDependency::Package(p) => match python_version_of(&p) {
                    Some(v) => {
                        if out.python_version.is_none() {
                            out.python_version = Some(v);
                        }
                    }
                    None => push_unique(&mut out.packages, p),
                },
                CondaDependency::Pip { pip } => {
                    for p in pip {
                        push_unique(&mut out.pip_packages, p);
                    }
                }
            }
        }
    }

    if let Some(file) = out.pip_requirements.take() {
        let path = base_dir.join(&file);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let target = match out.package_manager {
            PackageManager::Pip => &mut out.packages,
            PackageManager::Conda => &mut out.pip_packages,
        };
        for p in parse_requirements(&content)? {
            push_unique(target, p);
        }
    }

    Ok(out)
}
