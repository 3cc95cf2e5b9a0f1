//! Grace-period arithmetic for the deletion lifecycle
//!
//! A transition into `Delete` stamps both timestamps; any transition out
//! clears them. The purge sweep in `jobs::purge` consumes `is_purge_due`.

use chrono::{DateTime, Duration, Utc};

use super::score::RetentionScore;

/// The full effect of assigning a score: the score itself plus the deletion
/// timestamps it implies. Constructed once here so every caller (single
/// actions, bulk actions, history rescue, AI threshold) stamps identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreTransition {
    pub score: RetentionScore,
    pub marked_for_deletion_at: Option<DateTime<Utc>>,
    pub delete_at: Option<DateTime<Utc>>,
}

impl ScoreTransition {
    /// Transition into `score` at `now` under the connection's grace period.
    pub fn new(score: RetentionScore, now: DateTime<Utc>, grace_days: i64) -> Self {
        match score {
            RetentionScore::Delete => Self {
                score,
                marked_for_deletion_at: Some(now),
                delete_at: Some(now + Duration::days(grace_days)),
            },
            _ => Self {
                score,
                marked_for_deletion_at: None,
                delete_at: None,
            },
        }
    }

    /// Restart the countdown for an item already in `Delete`. Returns None
    /// for any other score; resetting a grace period that isn't running is a
    /// no-op, not an error.
    pub fn reset_grace(
        current: RetentionScore,
        now: DateTime<Utc>,
        grace_days: i64,
    ) -> Option<Self> {
        match current {
            RetentionScore::Delete => Some(Self::new(RetentionScore::Delete, now, grace_days)),
            _ => None,
        }
    }
}

/// An item is eligible for the purge sweep once its deadline has passed.
pub fn is_purge_due(delete_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(delete_at, Some(deadline) if deadline <= now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_delete_stamps_both_timestamps() {
        let tr = ScoreTransition::new(RetentionScore::Delete, t0(), 30);
        assert_eq!(tr.marked_for_deletion_at, Some(t0()));
        assert_eq!(tr.delete_at, Some(t0() + Duration::days(30)));
    }

    #[test]
    fn test_leaving_delete_clears_timestamps() {
        for score in [
            RetentionScore::Keep,
            RetentionScore::Seasonal,
            RetentionScore::WatchedKeep,
            RetentionScore::NotScored,
            RetentionScore::Archived,
        ] {
            let tr = ScoreTransition::new(score, t0(), 30);
            assert_eq!(tr.marked_for_deletion_at, None);
            assert_eq!(tr.delete_at, None);
        }
    }

    #[test]
    fn test_delete_at_iff_delete_invariant() {
        for score in [
            RetentionScore::NotScored,
            RetentionScore::Keep,
            RetentionScore::Delete,
            RetentionScore::Seasonal,
            RetentionScore::WatchedKeep,
            RetentionScore::Archived,
        ] {
            let tr = ScoreTransition::new(score, t0(), 14);
            assert_eq!(
                tr.delete_at.is_some(),
                tr.score == RetentionScore::Delete,
                "invariant violated for {score}"
            );
        }
    }

    #[test]
    fn test_purge_boundary_is_inclusive() {
        let tr = ScoreTransition::new(RetentionScore::Delete, t0(), 30);
        let deadline = t0() + Duration::days(30);

        assert!(!is_purge_due(tr.delete_at, deadline - Duration::seconds(1)));
        assert!(is_purge_due(tr.delete_at, deadline));
        assert!(is_purge_due(tr.delete_at, deadline + Duration::seconds(1)));
        assert!(!is_purge_due(None, deadline));
    }

    #[test]
    fn test_reset_grace_restarts_countdown() {
        let later = t0() + Duration::days(20);
        let tr = ScoreTransition::reset_grace(RetentionScore::Delete, later, 30).unwrap();
        assert_eq!(tr.marked_for_deletion_at, Some(later));
        assert_eq!(tr.delete_at, Some(later + Duration::days(30)));

        assert!(ScoreTransition::reset_grace(RetentionScore::Keep, later, 30).is_none());
    }
}
