use crate::{api::rbac::v1 as rbac, ClusterRole, PolicyRule, Role, Subject};
use vantage_core::SubjectKind;

const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount";

/// The role referenced by a binding.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoleRef {
    pub kind: RoleRefKind,
    pub name: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoleRefKind {
    Role,
    ClusterRole,
}

/// Reads a binding's role reference. Unknown kinds are ignored.
pub fn role_ref(role_ref: &rbac::RoleRef) -> Option<RoleRef> {
    let kind = match role_ref.kind.as_str() {
        "Role" => RoleRefKind::Role,
        "ClusterRole" => RoleRefKind::ClusterRole,
        kind => {
            tracing::debug!(%kind, name = %role_ref.name, "Unsupported role reference");
            return None;
        }
    };
    Some(RoleRef {
        kind,
        name: role_ref.name.clone(),
    })
}

/// Returns the index keys for a binding's subjects of the given kind.
///
/// Service accounts authenticate as users named `system:serviceaccount:<ns>:<name>`, so they are
/// keyed into the user index. A service account without a namespace inherits `default_ns`.
pub fn subject_keys<'s>(
    subjects: &'s [Subject],
    kind: SubjectKind,
    default_ns: Option<&'s str>,
) -> impl Iterator<Item = String> + 's {
    subjects.iter().filter_map(move |s| match (kind, s.kind.as_str()) {
        (SubjectKind::User, "User") | (SubjectKind::Group, "Group") => Some(s.name.clone()),
        (SubjectKind::User, "ServiceAccount") => {
            let ns = s.namespace.as_deref().or(default_ns)?;
            Some(format!("{SERVICE_ACCOUNT_PREFIX}:{ns}:{}", s.name))
        }
        _ => None,
    })
}

/// Converts Kubernetes policy rules into domain rules, dropping non-resource URL rules.
pub fn convert_rules(rules: Option<&[PolicyRule]>) -> Vec<vantage_core::PolicyRule> {
    rules
        .unwrap_or_default()
        .iter()
        .filter(|r| r.resources.as_ref().is_some_and(|r| !r.is_empty()))
        .map(|r| vantage_core::PolicyRule {
            api_groups: r.api_groups.clone().unwrap_or_default(),
            resources: r.resources.clone().unwrap_or_default(),
            resource_names: r.resource_names.clone().unwrap_or_default(),
            verbs: r.verbs.clone(),
        })
        .collect()
}

pub fn role_rules(role: &Role) -> Vec<vantage_core::PolicyRule> {
    convert_rules(role.rules.as_deref())
}

pub fn cluster_role_rules(role: &ClusterRole) -> Vec<vantage_core::PolicyRule> {
    convert_rules(role.rules.as_deref())
}
