//! List views combining a live subscription with cursor pagination.

mod live_list;
mod registry;
mod streams;

pub use live_list::*;
pub use registry::*;
pub use streams::*;
