//! Domain types shared by every BrainNS crate.
//!
//! Everything in here is pure: no database, container engine or GPU access.
//! The orchestrator crates build on these types so that naming, status
//! transitions and job payloads are defined exactly once.

pub mod display;
pub mod error;
pub mod gpu;
pub mod job_payload;
pub mod model_registry;
pub mod naming;
pub mod sequence;
pub mod status;
pub mod storage;
pub mod submission;
pub mod types;
