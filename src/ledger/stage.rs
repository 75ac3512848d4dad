//! Processing stages and the transition rules between them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a recording is in the pipeline.
///
/// The non-failed stages are totally ordered; `Failed` sits beside them and
/// remembers (on the session) which stage it interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Detected,
    Downloading,
    Downloaded,
    Converting,
    Converted,
    Transcribing,
    Complete,
    Failed,
}

impl Stage {
    /// Every stage, in pipeline order.
    pub const ALL: [Stage; 8] = [
        Stage::Detected,
        Stage::Downloading,
        Stage::Downloaded,
        Stage::Converting,
        Stage::Converted,
        Stage::Transcribing,
        Stage::Complete,
        Stage::Failed,
    ];

    /// Position in the forward order; `None` for `Failed`.
    pub fn rank(self) -> Option<u8> {
        match self {
            Stage::Detected => Some(0),
            Stage::Downloading => Some(1),
            Stage::Downloaded => Some(2),
            Stage::Converting => Some(3),
            Stage::Converted => Some(4),
            Stage::Transcribing => Some(5),
            Stage::Complete => Some(6),
            Stage::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Complete | Stage::Failed)
    }

    /// Stages that only exist while a unit of work is running.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            Stage::Downloading | Stage::Converting | Stage::Transcribing
        )
    }

    /// True once `self` is at or past `other` in the forward order.
    pub fn reached(self, other: Stage) -> bool {
        match (self.rank(), other.rank()) {
            (Some(a), Some(b)) => a >= b,
            _ => false,
        }
    }

    /// Whether `advance(self -> to)` is allowed.
    ///
    /// Forward moves (including skips) are allowed, a same-stage move is a
    /// no-op, `Failed` is reachable from every non-terminal stage, and a
    /// failed conversion may step back from `Converting` to `Downloaded`.
    pub fn can_advance_to(self, to: Stage) -> bool {
        if self == to {
            return !self.is_terminal();
        }
        match (self, to) {
            (Stage::Complete, _) | (Stage::Failed, _) => false,
            (_, Stage::Failed) => true,
            (Stage::Converting, Stage::Downloaded) => true,
            (from, to) => match (from.rank(), to.rank()) {
                (Some(a), Some(b)) => b > a,
                _ => false,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Detected => "detected",
            Stage::Downloading => "downloading",
            Stage::Downloaded => "downloaded",
            Stage::Converting => "converting",
            Stage::Converted => "converted",
            Stage::Transcribing => "transcribing",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_moves_are_allowed() {
        assert!(Stage::Detected.can_advance_to(Stage::Downloading));
        assert!(Stage::Downloading.can_advance_to(Stage::Downloaded));
        assert!(Stage::Converted.can_advance_to(Stage::Transcribing));
        assert!(Stage::Transcribing.can_advance_to(Stage::Complete));
        // skipping ahead, e.g. adopting an already converted asset
        assert!(Stage::Detected.can_advance_to(Stage::Converted));
    }

    #[test]
    fn backward_moves_are_rejected() {
        assert!(!Stage::Converted.can_advance_to(Stage::Downloading));
        assert!(!Stage::Transcribing.can_advance_to(Stage::Converted));
        assert!(!Stage::Downloaded.can_advance_to(Stage::Detected));
    }

    #[test]
    fn failed_conversion_may_step_back() {
        assert!(Stage::Converting.can_advance_to(Stage::Downloaded));
    }

    #[test]
    fn failed_is_reachable_from_non_terminal_only() {
        for stage in Stage::ALL {
            let expected = !stage.is_terminal();
            assert_eq!(stage.can_advance_to(Stage::Failed), expected, "{stage}");
        }
    }

    #[test]
    fn terminal_stages_do_not_move() {
        for to in Stage::ALL {
            assert!(!Stage::Complete.can_advance_to(to));
            assert!(!Stage::Failed.can_advance_to(to));
        }
    }

    #[test]
    fn same_stage_is_a_no_op_for_active_stages() {
        assert!(Stage::Downloaded.can_advance_to(Stage::Downloaded));
        assert!(Stage::Transcribing.can_advance_to(Stage::Transcribing));
    }

    #[test]
    fn reached_ignores_failed() {
        assert!(Stage::Complete.reached(Stage::Converted));
        assert!(Stage::Converted.reached(Stage::Converted));
        assert!(!Stage::Downloaded.reached(Stage::Converted));
        assert!(!Stage::Failed.reached(Stage::Detected));
    }

    #[test]
    fn serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&Stage::Transcribing).unwrap(),
            "\"transcribing\""
        );
        assert_eq!(Stage::Downloaded.to_string(), "downloaded");
    }
}
