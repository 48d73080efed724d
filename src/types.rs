//! Core result types for the dagflow scheduler.
//!
//! Every vertex settles exactly once per run with a [`VertexResult`].
//! Dependency edges carry an expected-result bitmask; a successor only
//! proceeds down an edge when the dependency's settled result intersects
//! the mask, otherwise the successor itself settles as skipped.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bitmask matching any settled result.
pub const MASK_ALL: u8 = 0b111;
/// Bitmask matching a successful result.
pub const MASK_OK: u8 = 0b001;
/// Bitmask matching a failed result.
pub const MASK_ERR: u8 = 0b010;
/// Bitmask matching a skipped result.
pub const MASK_SKIP: u8 = 0b100;

/// Sentinel stored in a dependency slot before the dependency settles.
pub const RESULT_INVALID: u8 = 0;

/// Completion code reported when a run cannot be dispatched at all
/// (unknown cluster or graph, missing executor).
pub const CODE_DISPATCH_FAILED: i32 = -1;

/// The settled outcome of a single vertex execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum VertexResult {
    /// Processor (or sub-graph) reported success.
    Ok = MASK_OK,
    /// Processor reported a non-zero code that was not ignored.
    Err = MASK_ERR,
    /// The vertex never ran: dependency mismatch, failed gate, or deadline.
    Skip = MASK_SKIP,
}

impl VertexResult {
    /// The bit this result contributes to dependency matching.
    #[must_use]
    pub fn mask(self) -> u8 {
        self as u8
    }

    /// Map a raw execution code to a settled result.
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        if code == 0 {
            VertexResult::Ok
        } else {
            VertexResult::Err
        }
    }

    /// Decode a dependency slot value. `RESULT_INVALID` yields `None`.
    #[must_use]
    pub fn from_slot(raw: u8) -> Option<Self> {
        match raw {
            MASK_OK => Some(VertexResult::Ok),
            MASK_ERR => Some(VertexResult::Err),
            MASK_SKIP => Some(VertexResult::Skip),
            _ => None,
        }
    }
}

impl fmt::Display for VertexResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VertexResult::Ok => write!(f, "ok"),
            VertexResult::Err => write!(f, "err"),
            VertexResult::Skip => write!(f, "skip"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_partition_all() {
        assert_eq!(MASK_OK | MASK_ERR | MASK_SKIP, MASK_ALL);
        assert_eq!(MASK_OK & MASK_ERR, 0);
        assert_eq!(MASK_OK & MASK_SKIP, 0);
    }

    #[test]
    fn slot_round_trip() {
        for r in [VertexResult::Ok, VertexResult::Err, VertexResult::Skip] {
            assert_eq!(VertexResult::from_slot(r.mask()), Some(r));
        }
        assert_eq!(VertexResult::from_slot(RESULT_INVALID), None);
    }

    #[test]
    fn code_mapping() {
        assert_eq!(VertexResult::from_code(0), VertexResult::Ok);
        assert_eq!(VertexResult::from_code(7), VertexResult::Err);
        assert_eq!(VertexResult::from_code(-3), VertexResult::Err);
    }
}
