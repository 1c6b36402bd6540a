//! Domain model structs and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct matching
//! the database row, plus the DTOs used to create it.

pub mod counter;
pub mod job;
pub mod setting;
pub mod status;
