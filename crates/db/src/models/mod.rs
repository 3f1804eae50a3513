//! Row structs and insert DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` struct matching the
//! table and, where rows are inserted from Rust, a create DTO.

pub mod display_values;
pub mod job;
pub mod project;
pub mod segmentation;
pub mod sequence;
pub mod status;
