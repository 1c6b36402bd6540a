//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` as the first argument.

pub mod counter_repo;
pub mod job_repo;
pub mod setting_repo;

pub use counter_repo::CounterRepo;
pub use job_repo::JobRepo;
pub use setting_repo::SettingRepo;
