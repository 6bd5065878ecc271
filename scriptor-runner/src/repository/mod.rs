//! Repository layer
//!
//! Repositories abstract the runner's external state: the remote script
//! registry and the on-disk lockfile. They carry no business logic.
//!
//! All repositories are trait-based to enable testing and mocking.

mod lockfile;
mod registry;

// Re-export traits
pub use lockfile::LockfileStore;
pub use registry::Registry;

// Re-export implementations
pub use lockfile::{JsonLockfileStore, project_hash};
pub use registry::{DisabledRegistry, HttpRegistry};
