//! Namespaced key-value memory store (§4.7). Operations are atomic under a
//! single global mutex — simple but sufficient for the write volumes a
//! check run produces; a `memory` provider's write is synchronous with
//! respect to any dependent scheduled after it in the same scope because
//! the scheduler awaits the provider call before routing dependents.

mod backend;
mod store;

pub use backend::{Backend, FileFormat};
pub use store::{MemoryError, MemoryHandle, MemoryStore};

pub const DEFAULT_NAMESPACE: &str = "default";
