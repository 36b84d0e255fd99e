#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod access;
mod rule;
mod subject;

pub use self::{
    access::{Access, AccessList, AccessSet, GroupResource, Namespaces, WILDCARD},
    rule::PolicyRule,
    subject::{Subject, SubjectKind},
};

/// Resolves the effective grants for an authenticated subject.
pub trait AccessSetLookup: Send + Sync {
    fn access_for(&self, subject: &Subject) -> AccessSet;
}

impl<T: AccessSetLookup + ?Sized> AccessSetLookup for std::sync::Arc<T> {
    fn access_for(&self, subject: &Subject) -> AccessSet {
        (**self).access_for(subject)
    }
}
