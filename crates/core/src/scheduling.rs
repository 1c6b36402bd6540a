//! Job status ids and lifecycle state machine.
//!
//! This module lives in `core` (zero internal deps) so the ledger and the API
//! layer agree on which transitions are legal.

// ---------------------------------------------------------------------------
// Status ids
// ---------------------------------------------------------------------------

pub const STATUS_QUEUED: i16 = 1;
pub const STATUS_DISPATCHED: i16 = 2;
pub const STATUS_COMPLETED: i16 = 3;
pub const STATUS_FAILED: i16 = 4;
pub const STATUS_EXPIRED: i16 = 5;

pub const ALL_STATUSES: [i16; 5] = [
    STATUS_QUEUED,
    STATUS_DISPATCHED,
    STATUS_COMPLETED,
    STATUS_FAILED,
    STATUS_EXPIRED,
];

/// Statuses that count as "in flight" for dedup and queue position.
pub const IN_FLIGHT_STATUSES: [i16; 2] = [STATUS_QUEUED, STATUS_DISPATCHED];

/// Longest history window the tuning tool is run over, in days.
pub const MAX_DAYS: i32 = 30;

/// Clamp a requested history window to `1..=MAX_DAYS`.
pub fn clamp_days(days: i32) -> i32 {
    days.clamp(1, MAX_DAYS)
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Status transitions, mirrored by the `db` crate's `JobStatus` enum.
pub mod state_machine {
    use super::*;

    /// Returns the set of valid target status IDs reachable from `from_status`.
    ///
    /// Terminal states never return to in-flight. A completion callback may
    /// still rewrite one: duplicates overwrite the previous outcome, and a late
    /// callback settles a job that had been expired.
    pub fn valid_transitions(from_status: i16) -> &'static [i16] {
        match from_status {
            // A callback can arrive before the dispatch write lands.
            STATUS_QUEUED => &[
                STATUS_DISPATCHED,
                STATUS_COMPLETED,
                STATUS_FAILED,
                STATUS_EXPIRED,
            ],
            STATUS_DISPATCHED => &[STATUS_COMPLETED, STATUS_FAILED, STATUS_EXPIRED],
            STATUS_COMPLETED | STATUS_FAILED => &[STATUS_COMPLETED, STATUS_FAILED],
            STATUS_EXPIRED => &[STATUS_EXPIRED, STATUS_COMPLETED, STATUS_FAILED],
            _ => &[],
        }
    }

    pub fn can_transition(from: i16, to: i16) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Every status from which `to` may be entered.
    pub fn valid_sources(to: i16) -> Vec<i16> {
        ALL_STATUSES
            .into_iter()
            .filter(|&from| can_transition(from, to))
            .collect()
    }

    /// Validate a state transition, returning an error message for invalid ones.
    pub fn validate_transition(from: i16, to: i16) -> Result<(), String> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(format!(
                "Invalid transition: {} ({from}) -> {} ({to})",
                status_name(from),
                status_name(to)
            ))
        }
    }

    pub fn is_terminal(status: i16) -> bool {
        matches!(status, STATUS_COMPLETED | STATUS_FAILED | STATUS_EXPIRED)
    }

    /// Human-readable name for a status ID (for error messages).
    pub fn status_name(id: i16) -> &'static str {
        match id {
            STATUS_QUEUED => "Queued",
            STATUS_DISPATCHED => "Dispatched",
            STATUS_COMPLETED => "Completed",
            STATUS_FAILED => "Failed",
            STATUS_EXPIRED => "Expired",
            _ => "Unknown",
        }
    }
}
