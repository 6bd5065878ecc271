//! Scriptor Core
//!
//! Core types shared by the Scriptor resolution and execution engine.
//!
//! This crate contains:
//! - Domain types: script descriptors, execution requests/results, log records
//! - DTOs: payloads exchanged with the remote script registry

pub mod domain;
pub mod dto;
