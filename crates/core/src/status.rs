//! Segmentation lifecycle status and its transition rules.
//!
//! ```text
//! QUEUEING -> PREPROCESSING -> PREDICTING -> DONE
//!                  |               |
//!                  +----> ERROR <--+
//! ```
//!
//! Job events may arrive for a later stage than the row currently shows
//! (reused or skipped preprocessing, a dependency failing while the row is
//! still queueing). [`SegmentationStatus::can_advance_to`] accepts any target
//! that is reachable by following forward edges, so those events pass over
//! the intermediate stages instead of being dropped.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Status ID type matching the SMALLINT `status_id` column.
pub type StatusId = i16;

/// Lifecycle status of a segmentation request.
///
/// Discriminants match the seed data of the `segmentation_statuses` table.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentationStatus {
    Queueing = 1,
    Preprocessing = 2,
    Predicting = 3,
    Done = 4,
    Error = 5,
}

impl SegmentationStatus {
    pub const ALL: [SegmentationStatus; 5] = [
        SegmentationStatus::Queueing,
        SegmentationStatus::Preprocessing,
        SegmentationStatus::Predicting,
        SegmentationStatus::Done,
        SegmentationStatus::Error,
    ];

    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    pub fn from_id(id: StatusId) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.id() == id)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SegmentationStatus::Queueing => "QUEUEING",
            SegmentationStatus::Preprocessing => "PREPROCESSING",
            SegmentationStatus::Predicting => "PREDICTING",
            SegmentationStatus::Done => "DONE",
            SegmentationStatus::Error => "ERROR",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SegmentationStatus::Done | SegmentationStatus::Error)
    }

    /// Direct forward edges out of this status.
    pub fn successors(self) -> &'static [SegmentationStatus] {
        match self {
            SegmentationStatus::Queueing => &[SegmentationStatus::Preprocessing],
            SegmentationStatus::Preprocessing => {
                &[SegmentationStatus::Predicting, SegmentationStatus::Error]
            }
            SegmentationStatus::Predicting => &[SegmentationStatus::Done, SegmentationStatus::Error],
            SegmentationStatus::Done | SegmentationStatus::Error => &[],
        }
    }

    /// Whether `next` is a direct forward edge.
    pub fn can_transition_to(self, next: SegmentationStatus) -> bool {
        self.successors().contains(&next)
    }

    /// Shortest chain of direct edges from `self` to `target`, excluding
    /// `self`. `None` when `target` is not reachable; empty when equal.
    pub fn path_to(self, target: SegmentationStatus) -> Option<Vec<SegmentationStatus>> {
        if self == target {
            return Some(Vec::new());
        }

        let mut previous: Vec<Option<SegmentationStatus>> = vec![None; Self::ALL.len() + 1];
        let mut queue = VecDeque::from([self]);
        while let Some(current) = queue.pop_front() {
            for &next in current.successors() {
                if next == self || previous[next.id() as usize].is_some() {
                    continue;
                }
                previous[next.id() as usize] = Some(current);
                if next == target {
                    let mut path = vec![target];
                    let mut step = current;
                    while step != self {
                        path.push(step);
                        step = previous[step.id() as usize]?;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }

    /// Whether a job event asking for `target` may be applied.
    ///
    /// Equal statuses are rejected so a repeated event is a no-op.
    pub fn can_advance_to(self, target: SegmentationStatus) -> bool {
        self != target && self.path_to(target).is_some()
    }

    /// Every status from which `target` may be applied. Used as the guard of
    /// the conditional `UPDATE` in the Postgres store.
    pub fn predecessors_of(target: SegmentationStatus) -> Vec<SegmentationStatus> {
        Self::ALL
            .into_iter()
            .filter(|status| status.can_advance_to(target))
            .collect()
    }
}

/// Outcome of asking a store to move a segmentation to a new status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Applied {
        from: SegmentationStatus,
        to: SegmentationStatus,
    },
    /// The target is not forward-reachable from `current`.
    Ignored {
        current: SegmentationStatus,
        requested: SegmentationStatus,
    },
    /// No segmentation with that id exists (it was reaped).
    Missing,
}

impl StatusChange {
    /// Decide the change for a row currently at `current`.
    pub fn decide(current: SegmentationStatus, requested: SegmentationStatus) -> Self {
        if current.can_advance_to(requested) {
            StatusChange::Applied {
                from: current,
                to: requested,
            }
        } else {
            StatusChange::Ignored { current, requested }
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, StatusChange::Applied { .. })
    }
}

impl fmt::Display for SegmentationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<SegmentationStatus> for StatusId {
    fn from(value: SegmentationStatus) -> Self {
        value as StatusId
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SegmentationStatus::*;

    #[test]
    fn ids_round_trip() {
        for status in SegmentationStatus::ALL {
            assert_eq!(SegmentationStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(SegmentationStatus::from_id(0), None);
        assert_eq!(SegmentationStatus::from_id(6), None);
    }

    #[test]
    fn direct_edges_follow_pipeline() {
        assert!(Queueing.can_transition_to(Preprocessing));
        assert!(Preprocessing.can_transition_to(Predicting));
        assert!(Predicting.can_transition_to(Done));
        assert!(Preprocessing.can_transition_to(Error));
        assert!(Predicting.can_transition_to(Error));
        assert!(!Queueing.can_transition_to(Predicting));
        assert!(!Queueing.can_transition_to(Error));
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for target in SegmentationStatus::ALL {
            assert!(!Done.can_advance_to(target));
            assert!(!Error.can_advance_to(target));
        }
    }

    #[test]
    fn queueing_passes_over_preprocessing() {
        assert_eq!(Queueing.path_to(Predicting), Some(vec![Preprocessing, Predicting]));
        assert_eq!(Queueing.path_to(Error), Some(vec![Preprocessing, Error]));
        assert_eq!(Queueing.path_to(Done), Some(vec![Preprocessing, Predicting, Done]));
    }

    #[test]
    fn backwards_moves_are_rejected() {
        assert!(!Predicting.can_advance_to(Preprocessing));
        assert!(!Preprocessing.can_advance_to(Queueing));
        assert!(!Predicting.can_advance_to(Predicting));
        assert_eq!(Predicting.path_to(Queueing), None);
    }

    #[test]
    fn predecessors_of_error_are_non_terminal() {
        assert_eq!(
            SegmentationStatus::predecessors_of(Error),
            vec![Queueing, Preprocessing, Predicting]
        );
        assert_eq!(
            SegmentationStatus::predecessors_of(Preprocessing),
            vec![Queueing]
        );
    }

    #[test]
    fn decide_applies_only_forward_targets() {
        assert_eq!(
            StatusChange::decide(Queueing, Predicting),
            StatusChange::Applied {
                from: Queueing,
                to: Predicting
            }
        );
        assert!(!StatusChange::decide(Done, Error).is_applied());
        assert!(!StatusChange::decide(Predicting, Preprocessing).is_applied());
    }

    #[test]
    fn serializes_in_upper_case() {
        assert_eq!(serde_json::to_string(&Predicting).unwrap(), "\"PREDICTING\"");
    }
}
