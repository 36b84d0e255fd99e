use crate::{
    metrics::AccessStoreMetrics,
    policy_rules::{PolicyRuleIndex, SharedPolicyRuleIndex},
    roles::RoleIndex,
};
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use vantage_core::{AccessSet, AccessSetLookup, Subject, SubjectKind};

/// Resolves a subject's effective grants from the user and group indexes.
///
/// When a cache is configured, results are keyed by a digest of the subject's identity and the
/// revisions of every binding and role it depends on, so that any RBAC change produces a new key.
pub struct AccessStore {
    users: SharedPolicyRuleIndex,
    groups: SharedPolicyRuleIndex,
    cache: Option<Mutex<LruCache<String, AccessSet>>>,
    metrics: AccessStoreMetrics,
}

// === impl AccessStore ===

impl AccessStore {
    pub fn new(users: SharedPolicyRuleIndex, groups: SharedPolicyRuleIndex) -> Self {
        debug_assert_eq!(users.read().kind(), SubjectKind::User);
        debug_assert_eq!(groups.read().kind(), SubjectKind::Group);
        debug_assert!(std::sync::Arc::ptr_eq(
            users.read().roles(),
            groups.read().roles()
        ));
        Self {
            users,
            groups,
            cache: None,
            metrics: AccessStoreMetrics::default(),
        }
    }

    /// Caches up to `capacity` computed access sets. A zero capacity disables caching.
    pub fn with_cache(mut self, capacity: usize) -> Self {
        self.cache = NonZeroUsize::new(capacity).map(|c| Mutex::new(LruCache::new(c)));
        self
    }

    pub fn with_metrics(mut self, metrics: AccessStoreMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Computes a key that identifies the subject and the RBAC state its grants derive from.
    pub fn cache_key(&self, subject: &Subject) -> String {
        let users = self.users.read();
        let groups = self.groups.read();
        let roles = users.roles().read();
        digest(subject, &users, &groups, &roles)
    }
}

/// Hashes the subject's identity and the revisions of every binding and role its grants derive
/// from.
fn digest(
    subject: &Subject,
    users: &PolicyRuleIndex,
    groups: &PolicyRuleIndex,
    roles: &RoleIndex,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"user\0");
    hasher.update(subject.name.as_bytes());
    hasher.update([0]);
    users.hash_revisions_at(&subject.name, roles, &mut hasher);

    let mut names = subject.groups.iter().collect::<Vec<_>>();
    names.sort();
    names.dedup();
    for group in names {
        hasher.update(b"group\0");
        hasher.update(group.as_bytes());
        hasher.update([0]);
        groups.hash_revisions_at(group, roles, &mut hasher);
    }

    hex::encode(hasher.finalize())
}

fn compute(
    subject: &Subject,
    users: &PolicyRuleIndex,
    groups: &PolicyRuleIndex,
    roles: &RoleIndex,
) -> AccessSet {
    let mut access = users.get_at(&subject.name, roles);
    for group in &subject.groups {
        access.merge(&groups.get_at(group, roles));
    }
    access
}

impl AccessSetLookup for AccessStore {
    fn access_for(&self, subject: &Subject) -> AccessSet {
        // Locked in this order everywhere. The key and the grants must describe the same state.
        let users = self.users.read();
        let groups = self.groups.read();
        let roles = users.roles().read();

        let Some(cache) = self.cache.as_ref() else {
            return compute(subject, &users, &groups, &roles);
        };

        let key = digest(subject, &users, &groups, &roles);
        if let Some(access) = cache.lock().get(&key) {
            self.metrics.hits.inc();
            return access.clone();
        }

        self.metrics.misses.inc();
        let mut access = compute(subject, &users, &groups, &roles);
        access.set_id(key.clone());
        cache.lock().put(key, access.clone());
        access
    }
}
