use crate::metrics::SizedIndex;
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::{collections::hash_map::Entry, sync::Arc};
use tracing::info_span;
use vantage_core::PolicyRule;
use vantage_k8s_api::{self as k8s, ResourceExt, RoleRef, RoleRefKind};

pub type SharedRoleIndex = Arc<RwLock<RoleIndex>>;

/// Holds the rules of every `Role` and `ClusterRole` in the cluster.
#[derive(Debug, Default)]
pub struct RoleIndex {
    by_ns: HashMap<String, HashMap<String, RoleEntry>>,
    cluster: HashMap<String, RoleEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RoleEntry {
    pub rules: Vec<PolicyRule>,
    pub revision: String,
}

// === impl RoleIndex ===

impl RoleIndex {
    pub fn shared() -> SharedRoleIndex {
        Arc::new(RwLock::new(Self::default()))
    }

    /// Resolves a binding's role reference.
    ///
    /// A `Role` reference is resolved in the binding's namespace; cluster bindings (with no
    /// namespace) cannot reference a `Role`.
    pub(crate) fn resolve(&self, namespace: Option<&str>, role: &RoleRef) -> Option<&RoleEntry> {
        match role.kind {
            RoleRefKind::Role => self.by_ns.get(namespace?)?.get(&role.name),
            RoleRefKind::ClusterRole => self.cluster.get(&role.name),
        }
    }

    pub(crate) fn revision(&self, namespace: Option<&str>, role: &RoleRef) -> &str {
        self.resolve(namespace, role)
            .map(|r| r.revision.as_str())
            .unwrap_or_default()
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Role> for RoleIndex {
    fn apply(&mut self, role: k8s::Role) {
        let Some(ns) = role.namespace() else {
            tracing::warn!(name = %role.name_any(), "Role has no namespace");
            return;
        };
        let name = role.name_unchecked();
        let _span = info_span!("apply", %ns, %name).entered();

        let entry = RoleEntry {
            rules: k8s::role_rules(&role),
            revision: role.resource_version().unwrap_or_default(),
        };
        tracing::debug!(rules = entry.rules.len(), "Indexing Role");
        self.by_ns.entry(ns).or_default().insert(name, entry);
    }

    fn delete(&mut self, ns: String, name: String) {
        let _span = info_span!("delete", %ns, %name).entered();

        if let Entry::Occupied(mut roles) = self.by_ns.entry(ns) {
            tracing::debug!("Deleting Role");
            roles.get_mut().remove(&name);
            if roles.get().is_empty() {
                roles.remove();
            }
        }
    }
}

impl kubert::index::IndexClusterResource<k8s::ClusterRole> for RoleIndex {
    fn apply(&mut self, role: k8s::ClusterRole) {
        let name = role.name_unchecked();
        let _span = info_span!("apply", %name).entered();

        let entry = RoleEntry {
            rules: k8s::cluster_role_rules(&role),
            revision: role.resource_version().unwrap_or_default(),
        };
        tracing::debug!(rules = entry.rules.len(), "Indexing ClusterRole");
        self.cluster.insert(name, entry);
    }

    fn delete(&mut self, name: String) {
        let _span = info_span!("delete", %name).entered();
        tracing::debug!("Deleting ClusterRole");
        self.cluster.remove(&name);
    }
}

impl SizedIndex<k8s::Role> for RoleIndex {
    fn size(&self, namespace: &str) -> usize {
        self.by_ns.get(namespace).map(|r| r.len()).unwrap_or(0)
    }
}

impl SizedIndex<k8s::ClusterRole> for RoleIndex {
    fn size(&self, _: &str) -> usize {
        self.cluster.len()
    }
}
