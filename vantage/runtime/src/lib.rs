#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use vantage_core as core;
pub use vantage_k8s_api as k8s;
pub use vantage_k8s_index as index;
pub use vantage_partition as partition;

mod args;
mod handle;
mod index_list;

pub use self::{args::Args, handle::Vantage};
