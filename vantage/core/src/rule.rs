use crate::{Access, AccessSet, GroupResource, WILDCARD};

/// A single RBAC rule, as expressed by a Role or ClusterRole.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PolicyRule {
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,

    /// Restricts the rule to the named objects. An empty list permits all names.
    pub resource_names: Vec<String>,

    pub verbs: Vec<String>,
}

impl AccessSet {
    /// Adds the full cross product of a rule's groups, resources, names, and verbs, scoped to
    /// `namespace`.
    pub fn add_rule(&mut self, namespace: &str, rule: &PolicyRule) {
        let wildcard = [WILDCARD.to_string()];
        let names = if rule.resource_names.is_empty() {
            &wildcard[..]
        } else {
            &rule.resource_names[..]
        };

        for group in &rule.api_groups {
            for resource in &rule.resources {
                for name in names {
                    for verb in &rule.verbs {
                        self.add(
                            verb.clone(),
                            GroupResource::new(group.clone(), resource.clone()),
                            Access::new(namespace, name.clone()),
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn expands_cross_product() {
        let rule = PolicyRule {
            api_groups: strings(&["", "apps"]),
            resources: strings(&["pods", "deployments"]),
            resource_names: strings(&["web", "db"]),
            verbs: strings(&["get", "list"]),
        };
        let mut set = AccessSet::new();
        set.add_rule("team-a", &rule);

        assert_eq!(set.iter().count(), 16);
        for verb in ["get", "list"] {
            for gr in [
                GroupResource::new("", "pods"),
                GroupResource::new("apps", "deployments"),
                GroupResource::new("apps", "pods"),
            ] {
                assert!(set.grants(verb, &gr, "team-a", "web"));
                assert!(set.grants(verb, &gr, "team-a", "db"));
                assert!(!set.grants(verb, &gr, "team-a", "cache"));
                assert!(!set.grants(verb, &gr, "team-b", "web"));
            }
        }
        assert!(!set.grants("delete", &GroupResource::new("", "pods"), "team-a", "web"));
    }

    #[test]
    fn empty_names_grant_every_name() {
        let rule = PolicyRule {
            api_groups: strings(&[""]),
            resources: strings(&["configmaps"]),
            resource_names: vec![],
            verbs: strings(&["get"]),
        };
        let mut set = AccessSet::new();
        set.add_rule(WILDCARD, &rule);
        let list = set.access_list_for("get", &GroupResource::new("", "configmaps"));
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![&Access::all()]);
    }

    #[test]
    fn rule_without_verbs_grants_nothing() {
        let rule = PolicyRule {
            api_groups: strings(&[""]),
            resources: strings(&["pods"]),
            ..Default::default()
        };
        let mut set = AccessSet::new();
        set.add_rule("ns", &rule);
        assert!(set.is_empty());
    }
}
