use crate::{
    metrics::SizedIndex,
    roles::{RoleIndex, SharedRoleIndex},
};
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, sync::Arc};
use tracing::info_span;
use vantage_core::{AccessSet, SubjectKind, WILDCARD};
use vantage_k8s_api::{self as k8s, ResourceExt, RoleRef, RoleRefKind};

pub type SharedPolicyRuleIndex = Arc<RwLock<PolicyRuleIndex>>;

/// Indexes `RoleBinding` and `ClusterRoleBinding` resources by the name of each bound subject of
/// a single kind.
#[derive(Debug)]
pub struct PolicyRuleIndex {
    kind: SubjectKind,
    roles: SharedRoleIndex,

    /// Bindings by subject name, ordered so that revision digests are stable.
    by_subject: HashMap<String, BTreeMap<BindingId, Binding>>,

    /// The subject names under which each binding is indexed.
    by_binding: HashMap<BindingId, Vec<String>>,
}

/// Identifies a binding. Cluster bindings have no namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct BindingId {
    namespace: Option<String>,
    name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Binding {
    role: RoleRef,
    revision: String,
}

// === impl PolicyRuleIndex ===

impl PolicyRuleIndex {
    pub fn new(kind: SubjectKind, roles: SharedRoleIndex) -> Self {
        Self {
            kind,
            roles,
            by_subject: HashMap::default(),
            by_binding: HashMap::default(),
        }
    }

    pub fn shared(kind: SubjectKind, roles: SharedRoleIndex) -> SharedPolicyRuleIndex {
        Arc::new(RwLock::new(Self::new(kind, roles)))
    }

    pub fn kind(&self) -> SubjectKind {
        self.kind
    }

    pub(crate) fn roles(&self) -> &SharedRoleIndex {
        &self.roles
    }

    /// Computes the grants of every binding of `subject`.
    ///
    /// Role bindings are scoped to the binding's namespace and cluster role bindings to all
    /// namespaces. Bindings whose role cannot be found are skipped.
    pub fn get(&self, subject: &str) -> AccessSet {
        self.get_at(subject, &self.roles.read())
    }

    /// Computes the grants of `subject` against a role index the caller has already locked.
    pub(crate) fn get_at(&self, subject: &str, roles: &RoleIndex) -> AccessSet {
        let mut access = AccessSet::new();
        let Some(bindings) = self.by_subject.get(subject) else {
            return access;
        };

        for (id, binding) in bindings {
            let ns = id.namespace.as_deref();
            let Some(role) = roles.resolve(ns, &binding.role) else {
                tracing::debug!(
                    kind = %self.kind,
                    %subject,
                    binding = %id.name,
                    role = %binding.role.name,
                    "Skipping binding to missing role",
                );
                continue;
            };
            let scope = ns.unwrap_or(WILDCARD);
            for rule in &role.rules {
                access.add_rule(scope, rule);
            }
        }
        access
    }

    /// Feeds the revisions of every binding of `subject`, and of the roles they reference, into
    /// `hasher`. The digest changes whenever the subject's effective grants may have changed.
    pub fn hash_revisions(&self, subject: &str, hasher: &mut Sha256) {
        self.hash_revisions_at(subject, &self.roles.read(), hasher)
    }

    pub(crate) fn hash_revisions_at(
        &self,
        subject: &str,
        roles: &RoleIndex,
        hasher: &mut Sha256,
    ) {
        let Some(bindings) = self.by_subject.get(subject) else {
            return;
        };

        for (id, binding) in bindings {
            let ns = id.namespace.as_deref();
            let kind = match binding.role.kind {
                RoleRefKind::Role => "Role",
                RoleRefKind::ClusterRole => "ClusterRole",
            };
            for part in [
                ns.unwrap_or_default(),
                id.name.as_str(),
                binding.revision.as_str(),
                kind,
                binding.role.name.as_str(),
                roles.revision(ns, &binding.role),
            ] {
                hasher.update(part.as_bytes());
                hasher.update([0]);
            }
        }
    }

    fn insert(
        &mut self,
        id: BindingId,
        role: Option<RoleRef>,
        revision: String,
        subjects: Vec<String>,
    ) {
        self.remove(&id);

        let Some(role) = role else {
            return;
        };
        if subjects.is_empty() {
            return;
        }

        tracing::debug!(kind = %self.kind, subjects = ?subjects, "Indexing binding");
        let binding = Binding { role, revision };
        for subject in &subjects {
            self.by_subject
                .entry(subject.clone())
                .or_default()
                .insert(id.clone(), binding.clone());
        }
        self.by_binding.insert(id, subjects);
    }

    fn remove(&mut self, id: &BindingId) {
        let Some(subjects) = self.by_binding.remove(id) else {
            return;
        };

        for subject in subjects {
            if let Some(bindings) = self.by_subject.get_mut(&subject) {
                bindings.remove(id);
                if bindings.is_empty() {
                    self.by_subject.remove(&subject);
                }
            }
        }
    }

    fn subjects(
        &self,
        subjects: Option<&[k8s::Subject]>,
        default_ns: Option<&str>,
    ) -> Vec<String> {
        let mut keys = k8s::subject_keys(subjects.unwrap_or_default(), self.kind, default_ns)
            .collect::<Vec<_>>();
        keys.sort();
        keys.dedup();
        keys
    }
}

impl kubert::index::IndexNamespacedResource<k8s::RoleBinding> for PolicyRuleIndex {
    fn apply(&mut self, binding: k8s::RoleBinding) {
        let Some(ns) = binding.namespace() else {
            tracing::warn!(name = %binding.name_any(), "RoleBinding has no namespace");
            return;
        };
        let name = binding.name_unchecked();
        let _span = info_span!("apply", kind = %self.kind, %ns, %name).entered();

        let subjects = self.subjects(binding.subjects.as_deref(), Some(ns.as_str()));
        let role = k8s::role_ref(&binding.role_ref);
        let revision = binding.resource_version().unwrap_or_default();
        let id = BindingId {
            namespace: Some(ns),
            name,
        };
        self.insert(id, role, revision, subjects);
    }

    fn delete(&mut self, ns: String, name: String) {
        let _span = info_span!("delete", kind = %self.kind, %ns, %name).entered();
        tracing::debug!("Deleting RoleBinding");
        self.remove(&BindingId {
            namespace: Some(ns),
            name,
        });
    }
}

impl kubert::index::IndexClusterResource<k8s::ClusterRoleBinding> for PolicyRuleIndex {
    fn apply(&mut self, binding: k8s::ClusterRoleBinding) {
        let name = binding.name_unchecked();
        let _span = info_span!("apply", kind = %self.kind, %name).entered();

        let subjects = self.subjects(binding.subjects.as_deref(), None);
        let role = k8s::role_ref(&binding.role_ref);
        let revision = binding.resource_version().unwrap_or_default();
        let id = BindingId {
            namespace: None,
            name,
        };
        self.insert(id, role, revision, subjects);
    }

    fn delete(&mut self, name: String) {
        let _span = info_span!("delete", kind = %self.kind, %name).entered();
        tracing::debug!("Deleting ClusterRoleBinding");
        self.remove(&BindingId {
            namespace: None,
            name,
        });
    }
}

impl SizedIndex<k8s::RoleBinding> for PolicyRuleIndex {
    fn size(&self, namespace: &str) -> usize {
        self.by_binding
            .keys()
            .filter(|id| id.namespace.as_deref() == Some(namespace))
            .count()
    }
}

impl SizedIndex<k8s::ClusterRoleBinding> for PolicyRuleIndex {
    fn size(&self, _: &str) -> usize {
        self.by_binding
            .keys()
            .filter(|id| id.namespace.is_none())
            .count()
    }
}
