//! Plan generation: what get-or-create would do for each declared resource.
//!
//! Planning is read-only: it looks every resource up in the registry and
//! compares spec hashes, but never creates anything.

use super::error::Result;
use super::types::*;
use crate::provenance::hasher;
use crate::registry::Registry;

/// Restricts a plan or apply to a subset of declared resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanFilter<'a> {
    pub kind: Option<ResourceKind>,
    pub name: Option<&'a str>,
}

impl PlanFilter<'_> {
    pub fn matches(&self, kind: ResourceKind, name: &str) -> bool {
        self.kind.is_none_or(|k| k == kind) && self.name.is_none_or(|n| n == name)
    }
}

/// Generate a plan by looking up each declared resource in the registry.
pub fn plan<R: Registry + ?Sized>(
    project: &Project,
    registry: &R,
    filter: &PlanFilter,
) -> Result<ExecutionPlan> {
    let mut changes = Vec::new();
    let mut to_create = 0u32;
    let mut to_reuse = 0u32;
    let mut drifted = 0u32;

    for (kind, name, spec) in project.declared() {
        if !filter.matches(kind, &name) {
            continue;
        }
        let action = determine_action(registry, kind, &name, &spec)?;
        let description = describe_action(&name, &spec, &action);

        match action {
            PlanAction::Create => to_create += 1,
            PlanAction::Reuse => to_reuse += 1,
            PlanAction::ReuseDrifted => {
                to_reuse += 1;
                drifted += 1;
            }
        }

        changes.push(PlannedChange {
            kind,
            name,
            action,
            description,
        });
    }

    Ok(ExecutionPlan {
        workspace: project.workspace.name.clone(),
        changes,
        to_create,
        to_reuse,
        drifted,
    })
}

fn determine_action<R: Registry + ?Sized>(
    registry: &R,
    kind: ResourceKind,
    name: &str,
    spec: &ResourceSpec,
) -> Result<PlanAction> {
    match registry.record(kind, name) {
        Ok(record) => {
            if record.spec_hash == hasher::spec_hash(spec)? {
                Ok(PlanAction::Reuse)
            } else {
                Ok(PlanAction::ReuseDrifted)
            }
        }
        Err(e) if e.is_not_found() => Ok(PlanAction::Create),
        Err(e) => Err(e),
    }
}

/// Generate a human-readable description of a planned action.
pub fn describe_action(name: &str, spec: &ResourceSpec, action: &PlanAction) -> String {
    match action {
        PlanAction::Create => match spec {
            ResourceSpec::Environment(env) if env.user_managed_dependencies => {
                format!("{}: register user-managed ({})", name, env.interpreter())
            }
            ResourceSpec::Environment(env) => {
                let mut pkgs: Vec<&str> = env.packages.iter().map(String::as_str).collect();
                pkgs.extend(env.pip_packages.iter().map(String::as_str));
                if pkgs.is_empty() {
                    format!("{}: create {} environment", name, env.package_manager)
                } else {
                    format!("{}: create with {}", name, pkgs.join(", "))
                }
            }
            ResourceSpec::Compute(ComputeTargetSpec::Managed(m)) => format!(
                "{}: create {} cluster, {}..{} nodes",
                name, m.vm_size, m.min_nodes, m.max_nodes
            ),
            ResourceSpec::Compute(ComputeTargetSpec::Attached(a)) => format!(
                "{}: attach {}@{}:{}",
                name, a.username, a.address, a.ssh_port
            ),
        },
        PlanAction::Reuse => format!("{}: reuse registered", name),
        PlanAction::ReuseDrifted => {
            format!("{}: reuse registered (definition differs from declared)", name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;

    fn make_project() -> Project {
        let yaml = r#"
version: "1.0"
workspace:
  name: ws
environments:
  sklearn-env:
    python_version: "3.8"
    packages: [scikit-learn]
    pip_packages: [azureml-defaults]
compute:
  aml-cluster:
    kind: managed
    vm_size: STANDARD_DS11_V2
    max_nodes: 4
  dsvm:
    kind: attached
    address: 10.0.0.5
    username: azureuser
    private_key_file: ~/.ssh/id_rsa
"#;
        serde_yaml_ng::from_str(yaml).unwrap()
    }

    #[test]
    fn test_plan_all_create() {
        let project = make_project();
        let reg = MemoryRegistry::new("ws");
        let plan = plan(&project, &reg, &PlanFilter::default()).unwrap();
        assert_eq!(plan.to_create, 3);
        assert_eq!(plan.to_reuse, 0);
        assert!(plan.changes.iter().all(|c| c.action == PlanAction::Create));
        assert_eq!(plan.changes[0].kind, ResourceKind::Environment);
        assert_eq!(reg.create_calls(), 0);
    }

    #[test]
    fn test_plan_reuse_after_registration() {
        let project = make_project();
        let reg = MemoryRegistry::new("ws");
        for (_, name, spec) in project.declared() {
            reg.create(&name, &spec).unwrap();
        }
        let plan = plan(&project, &reg, &PlanFilter::default()).unwrap();
        assert_eq!(plan.to_reuse, 3);
        assert_eq!(plan.to_create, 0);
        assert_eq!(plan.drifted, 0);
    }

    #[test]
    fn test_plan_reuse_drifted() {
        let project = make_project();
        let reg = MemoryRegistry::new("ws");
        reg.insert(
            "aml-cluster",
            &ResourceSpec::Compute(ComputeTargetSpec::Managed(ManagedCluster::new(
                "STANDARD_NC6",
                0,
                2,
            ))),
        )
        .unwrap();
        let plan = plan(&project, &reg, &PlanFilter::default()).unwrap();
        let change = plan
            .changes
            .iter()
            .find(|c| c.name == "aml-cluster")
            .unwrap();
        assert_eq!(change.action, PlanAction::ReuseDrifted);
        assert_eq!(plan.drifted, 1);
        assert_eq!(plan.to_create, 2);
    }

    #[test]
    fn test_plan_filter() {
        let project = make_project();
        let reg = MemoryRegistry::new("ws");
        let only_compute = PlanFilter {
            kind: Some(ResourceKind::Compute),
            name: None,
        };
        assert_eq!(plan(&project, &reg, &only_compute).unwrap().changes.len(), 2);

        let one = PlanFilter {
            kind: None,
            name: Some("dsvm"),
        };
        let p = plan(&project, &reg, &one).unwrap();
        assert_eq!(p.changes.len(), 1);
        assert_eq!(p.changes[0].name, "dsvm");
    }

    #[test]
    fn test_describe_action() {
        let project = make_project();
        let env = project.spec(ResourceKind::Environment, "sklearn-env").unwrap();
        let desc = describe_action("sklearn-env", &env, &PlanAction::Create);
        assert!(desc.contains("scikit-learn, azureml-defaults"));

        let cluster = project.spec(ResourceKind::Compute, "aml-cluster").unwrap();
        let desc = describe_action("aml-cluster", &cluster, &PlanAction::Create);
        assert!(desc.contains("STANDARD_DS11_V2"));
        assert!(desc.contains("0..4"));

        let dsvm = project.spec(ResourceKind::Compute, "dsvm").unwrap();
        let desc = describe_action("dsvm", &dsvm, &PlanAction::Create);
        assert!(desc.contains("azureuser@10.0.0.5:22"));

        let byo = ResourceSpec::Environment(EnvironmentSpec {
            user_managed_dependencies: true,
            ..Default::default()
        });
        assert!(describe_action("byo", &byo, &PlanAction::Create).contains("user-managed (python)"));
    }
}
