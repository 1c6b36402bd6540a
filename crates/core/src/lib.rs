//! Domain logic for the autotune job service.
//!
//! This crate has zero internal dependencies so it can be shared by the
//! ledger, pipeline and API layers alike:
//!
//! - [`profile`]: canonicalizes Nightscout-style schedules into the tuning
//!   tool's `profile.json` schema.
//! - [`results`]: parses the tool's recommendations log into numeric deltas.
//! - [`hashing`]: SHA-256 helpers and the job fingerprint used for dedup.
//! - [`scheduling`]: job status ids and the lifecycle state machine.
//! - [`retry`]: bounded, jittered retry policy for optimistic writes.

pub mod error;
pub mod hashing;
pub mod profile;
pub mod results;
pub mod retry;
pub mod scheduling;
pub mod types;
pub mod units;
