//! RBAC indexes and access resolution.
//!
//! The indexes are kept current by watches on the cluster's RBAC resources:
//!
//! - `Role` and `ClusterRole` objects are held by a [`RoleIndex`], keyed by namespace and name.
//! - `RoleBinding` and `ClusterRoleBinding` objects are indexed by subject in a
//!   [`PolicyRuleIndex`]. There is one index for users (including service accounts) and one for
//!   groups; each is locked independently.
//!
//! ```text
//! [ Subject ] -> [ PolicyRuleIndex ] -> [ Binding ] -> [ RoleIndex ] -> [ PolicyRule ]
//! ```
//!
//! An [`AccessStore`] resolves a subject by reading the user index for the subject's name and the
//! group index for each of its groups, merging the results into a single `AccessSet`. Bindings are
//! resolved against roles at lookup time, so a binding that references a missing role grants
//! nothing until that role appears.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod access_store;
pub mod metrics;
mod policy_rules;
mod roles;


pub use self::{
    access_store::AccessStore,
    metrics::AccessStoreMetrics,
    policy_rules::{PolicyRuleIndex, SharedPolicyRuleIndex},
    roles::{RoleIndex, SharedRoleIndex},
};
