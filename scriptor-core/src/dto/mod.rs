//! Data Transfer Objects for the remote script registry
//!
//! DTOs are the registry's view of a script; the runner turns them into
//! domain descriptors during resolution.

pub mod registry;
