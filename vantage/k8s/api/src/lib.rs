#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod rbac;

pub use self::rbac::{
    cluster_role_rules, convert_rules, role_ref, role_rules, subject_keys, RoleRef, RoleRefKind,
};
pub use k8s_openapi::api::{
    self,
    core::v1::Namespace,
    rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, Subject},
};
pub use kube::{
    api::{
        Api, ApiResource, DeleteParams, DynamicObject, ListParams, ObjectList, ObjectMeta,
        PostParams, ResourceExt, VersionMatch, WatchEvent, WatchParams,
    },
    runtime::watcher,
    Client, Error, Resource,
};
