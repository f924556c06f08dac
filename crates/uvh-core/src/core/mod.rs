//! Internal implementation modules for `uvh-core`.
//!
//! Callers go through the re-exports in the crate root.

pub mod config;
pub mod doctor;
pub mod runtime;
pub mod scripts;
pub mod store;
pub mod tooling;
