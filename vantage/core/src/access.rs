use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

/// Matches any value on every axis of a grant: verb, group, resource, namespace, and name.
pub const WILDCARD: &str = "*";

/// An API group and resource kind, e.g. `apps`/`deployments`. The core group is `""`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupResource {
    pub group: String,
    pub resource: String,
}

/// A namespace and object name, either of which may be [`WILDCARD`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Access {
    pub namespace: String,
    pub resource_name: String,
}

/// The distinct grants that apply to a single verb and group-resource.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessList(Vec<Access>);

/// The namespaces in which a subject holds at least one grant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Namespaces {
    All,
    Some(BTreeSet<String>),
}

/// The merged authorization grants of a subject.
///
/// Grants are keyed by verb and group-resource; each key holds a set of scopes, so adding the same
/// scope twice has no effect.
#[derive(Clone, Debug, Default)]
pub struct AccessSet {
    id: Option<String>,
    set: BTreeMap<Key, BTreeSet<Access>>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    verb: String,
    gr: GroupResource,
}

#[inline]
fn matches(grant: &str, value: &str) -> bool {
    grant == WILDCARD || grant == value
}

// === impl GroupResource ===

impl GroupResource {
    pub fn new(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
        }
    }
}

impl fmt::Display for GroupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            return self.resource.fmt(f);
        }
        write!(f, "{}.{}", self.resource, self.group)
    }
}

// === impl Access ===

impl Access {
    pub fn new(namespace: impl Into<String>, resource_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            resource_name: resource_name.into(),
        }
    }

    /// Unrestricted access across all namespaces and names.
    pub fn all() -> Self {
        Self::new(WILDCARD, WILDCARD)
    }

    pub fn grants(&self, namespace: &str, name: &str) -> bool {
        matches(&self.namespace, namespace) && matches(&self.resource_name, name)
    }

    pub fn is_all(&self) -> bool {
        self.namespace == WILDCARD && self.resource_name == WILDCARD
    }
}

// === impl AccessList ===

impl AccessList {
    pub fn grants(&self, namespace: &str, name: &str) -> bool {
        self.0.iter().any(|a| a.grants(namespace, name))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Access> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for AccessList {
    type Item = Access;
    type IntoIter = std::vec::IntoIter<Access>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a AccessList {
    type Item = &'a Access;
    type IntoIter = std::slice::Iter<'a, Access>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Access> for AccessList {
    fn from_iter<I: IntoIterator<Item = Access>>(iter: I) -> Self {
        let set = iter.into_iter().collect::<BTreeSet<_>>();
        Self(set.into_iter().collect())
    }
}

// === impl AccessSet ===

impl AccessSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// An identifier for the RBAC state this set was computed from, if known.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn add(&mut self, verb: impl Into<String>, gr: GroupResource, access: Access) {
        let key = Key {
            verb: verb.into(),
            gr,
        };
        self.set.entry(key).or_default().insert(access);
    }

    /// Unions every grant in `other` into this set.
    pub fn merge(&mut self, other: &AccessSet) {
        for (key, accesses) in &other.set {
            match self.set.get_mut(key) {
                Some(existing) => existing.extend(accesses.iter().cloned()),
                None => {
                    self.set.insert(key.clone(), accesses.clone());
                }
            }
        }
    }

    /// Returns every grant whose verb, group, and resource match the request exactly or by
    /// wildcard.
    pub fn access_list_for(&self, verb: &str, gr: &GroupResource) -> AccessList {
        let mut result = BTreeSet::new();
        for v in [verb, WILDCARD] {
            for g in [gr.group.as_str(), WILDCARD] {
                for r in [gr.resource.as_str(), WILDCARD] {
                    let key = Key {
                        verb: v.to_string(),
                        gr: GroupResource::new(g, r),
                    };
                    if let Some(accesses) = self.set.get(&key) {
                        result.extend(accesses.iter().cloned());
                    }
                }
            }
        }
        AccessList(result.into_iter().collect())
    }

    pub fn grants(&self, verb: &str, gr: &GroupResource, namespace: &str, name: &str) -> bool {
        self.access_list_for(verb, gr).grants(namespace, name)
    }

    /// Lists the namespaces in which `verb` is granted on `gr`.
    pub fn namespaces(&self, verb: &str, gr: &GroupResource) -> Namespaces {
        let mut namespaces = BTreeSet::new();
        for access in self.access_list_for(verb, gr) {
            if access.namespace == WILDCARD {
                return Namespaces::All;
            }
            namespaces.insert(access.namespace);
        }
        Namespaces::Some(namespaces)
    }

    /// Iterates over every `(verb, group-resource, access)` grant in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &GroupResource, &Access)> + '_ {
        self.set.iter().flat_map(|(key, accesses)| {
            accesses
                .iter()
                .map(move |a| (key.verb.as_str(), &key.gr, a))
        })
    }
}

impl PartialEq for AccessSet {
    fn eq(&self, other: &Self) -> bool {
        self.set == other.set
    }
}

impl Eq for AccessSet {}

// === impl Namespaces ===

impl Namespaces {
    pub fn contains(&self, namespace: &str) -> bool {
        match self {
            Self::All => true,
            Self::Some(namespaces) => namespaces.contains(namespace),
        }
    }
}
