//! Deterministic Round-Robin Advisor Selection
//!
//! Pure selection logic over a snapshot of active advisors. Persistence,
//! locking and retries live with the caller; everything here is a function of
//! the roster and the previously assigned advisor.

use crate::domain::advisor::AdvisorId;
use crate::errors::DomainError;

/// Active advisors ordered ascending by identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActiveRoster {
    advisors: Vec<AdvisorId>,
}

impl ActiveRoster {
    /// Wraps a snapshot read from storage, rejecting any snapshot that is not
    /// strictly ascending.
    pub fn new(advisors: Vec<AdvisorId>) -> Result<Self, DomainError> {
        if let Some(pair) = advisors.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(DomainError::InvariantViolation(format!(
                "active advisor snapshot is not strictly ascending: {} then {}",
                pair[0], pair[1]
            )));
        }

        Ok(Self { advisors })
    }

    pub fn is_empty(&self) -> bool {
        self.advisors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.advisors.len()
    }

    pub fn first(&self) -> Option<AdvisorId> {
        self.advisors.first().copied()
    }

    pub fn position(&self, advisor: AdvisorId) -> Option<usize> {
        self.advisors.binary_search(&advisor).ok()
    }

    pub fn contains(&self, advisor: AdvisorId) -> bool {
        self.position(advisor).is_some()
    }

    pub fn as_slice(&self) -> &[AdvisorId] {
        &self.advisors
    }
}

/// How a candidate was picked from the roster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationDecision {
    /// No advisor is active.
    Exhausted,
    /// No previous assignment; the cycle starts at the first advisor.
    Start { candidate: AdvisorId },
    /// The previous advisor is still active; take the one after it, wrapping.
    Advance { from_position: usize, candidate: AdvisorId },
    /// The previous advisor left the roster; restart at the first advisor.
    ResetAfterRemoval { removed: AdvisorId, candidate: AdvisorId },
}

impl RotationDecision {
    pub fn candidate(&self) -> Option<AdvisorId> {
        match self {
            Self::Exhausted => None,
            Self::Start { candidate }
            | Self::Advance { candidate, .. }
            | Self::ResetAfterRemoval { candidate, .. } => Some(*candidate),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Exhausted => "exhausted",
            Self::Start { .. } => "start",
            Self::Advance { .. } => "advance",
            Self::ResetAfterRemoval { .. } => "reset_after_removal",
        }
    }
}

/// Result of the post-selection membership re-check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed(AdvisorId),
    /// The candidate was deactivated after the snapshot; the roster's first
    /// advisor is used instead.
    FellBack { rejected: AdvisorId, replacement: AdvisorId },
}

impl Confirmation {
    pub fn advisor(&self) -> AdvisorId {
        match self {
            Self::Confirmed(advisor) => *advisor,
            Self::FellBack { replacement, .. } => *replacement,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RoundRobinPolicy;

impl RoundRobinPolicy {
    /// Picks the advisor after `last_assigned` in identity order.
    ///
    /// When `last_assigned` is no longer on the roster the rotation restarts
    /// at the first advisor rather than resuming from the removed position.
    pub fn select(
        &self,
        roster: &ActiveRoster,
        last_assigned: Option<AdvisorId>,
    ) -> RotationDecision {
        let Some(first) = roster.first() else {
            return RotationDecision::Exhausted;
        };

        let Some(last) = last_assigned else {
            return RotationDecision::Start { candidate: first };
        };

        match roster.position(last) {
            Some(position) => {
                let next = (position + 1) % roster.len();
                RotationDecision::Advance {
                    from_position: position,
                    candidate: roster.as_slice()[next],
                }
            }
            None => RotationDecision::ResetAfterRemoval { removed: last, candidate: first },
        }
    }

    /// Applies the second-phase check: `still_active` is the answer of a fresh
    /// membership query for `candidate`.
    pub fn confirm(
        &self,
        roster: &ActiveRoster,
        candidate: AdvisorId,
        still_active: bool,
    ) -> Result<Confirmation, DomainError> {
        if still_active {
            return Ok(Confirmation::Confirmed(candidate));
        }

        let replacement = roster.first().ok_or_else(|| {
            DomainError::InvariantViolation(
                "cannot confirm a candidate against an empty roster".to_string(),
            )
        })?;

        Ok(Confirmation::FellBack { rejected: candidate, replacement })
    }
}

#[cfg(test)]
mod tests {
    use super::{ActiveRoster, Confirmation, RotationDecision, RoundRobinPolicy};
    use crate::domain::advisor::AdvisorId;
    use crate::errors::DomainError;

    fn roster(ids: &[i64]) -> ActiveRoster {
        ActiveRoster::new(ids.iter().copied().map(AdvisorId).collect()).expect("valid roster")
    }

    #[test]
    fn full_cycle_visits_every_advisor_once_then_repeats() {
        let policy = RoundRobinPolicy;
        let roster = roster(&[10, 20, 30, 40]);

        let mut last = None;
        let mut sequence = Vec::new();
        for _ in 0..8 {
            let candidate = policy.select(&roster, last).candidate().expect("candidate");
            sequence.push(candidate.0);
            last = Some(candidate);
        }

        assert_eq!(sequence, vec![10, 20, 30, 40, 10, 20, 30, 40]);
    }

    #[test]
    fn empty_roster_is_exhausted() {
        let decision = RoundRobinPolicy.select(&ActiveRoster::default(), Some(AdvisorId(4)));

        assert_eq!(decision, RotationDecision::Exhausted);
        assert_eq!(decision.candidate(), None);
    }

    #[test]
    fn single_advisor_always_selected() {
        let roster = roster(&[5]);

        assert_eq!(RoundRobinPolicy.select(&roster, None).candidate(), Some(AdvisorId(5)));
        assert_eq!(
            RoundRobinPolicy.select(&roster, Some(AdvisorId(5))),
            RotationDecision::Advance { from_position: 0, candidate: AdvisorId(5) }
        );
    }

    #[test]
    fn removed_last_advisor_resets_to_first_not_successor() {
        // 2 was last; 3 would be the "resume" choice but the policy restarts at 1.
        let roster = roster(&[1, 3, 4]);

        let decision = RoundRobinPolicy.select(&roster, Some(AdvisorId(2)));

        assert_eq!(
            decision,
            RotationDecision::ResetAfterRemoval { removed: AdvisorId(2), candidate: AdvisorId(1) }
        );
        assert_eq!(decision.kind(), "reset_after_removal");
    }

    #[test]
    fn last_advisor_wraps_to_first() {
        let roster = roster(&[1, 2, 3]);

        assert_eq!(
            RoundRobinPolicy.select(&roster, Some(AdvisorId(3))),
            RotationDecision::Advance { from_position: 2, candidate: AdvisorId(1) }
        );
    }

    #[test]
    fn failed_recheck_falls_back_to_first_of_snapshot() {
        let roster = roster(&[1, 2, 3]);

        let confirmation =
            RoundRobinPolicy.confirm(&roster, AdvisorId(2), false).expect("confirmation");

        assert_eq!(
            confirmation,
            Confirmation::FellBack { rejected: AdvisorId(2), replacement: AdvisorId(1) }
        );
        assert_eq!(confirmation.advisor(), AdvisorId(1));
        assert_eq!(
            RoundRobinPolicy.confirm(&roster, AdvisorId(2), true).expect("confirmation"),
            Confirmation::Confirmed(AdvisorId(2))
        );
    }

    #[test]
    fn unordered_snapshot_is_an_invariant_violation() {
        let error = ActiveRoster::new(vec![AdvisorId(2), AdvisorId(1)]).expect_err("unordered");
        assert!(matches!(
            error,
            DomainError::InvariantViolation(ref message) if message.contains("ascending")
        ));

        let duplicate = ActiveRoster::new(vec![AdvisorId(1), AdvisorId(1)]);
        assert!(duplicate.is_err());
    }
}
