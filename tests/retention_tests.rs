//! Integration tests for the retention pipeline
//!
//! These tests verify the contracts the rest of the system leans on:
//! - Score transitions and their lifecycle timestamps
//! - The score <-> managed-label table and delta grouping
//! - Grace-period boundary arithmetic
//! - Schedule entry firing and the duplicate-fire guard

/// The managed label vocabulary, in canonical table order
const MANAGED_LABELS: &[&str] = &["ai-keep", "ai-delete", "ai-rolling-keep", "ai-tautulli-keep"];

/// Valid score values as stored in the database
const VALID_SCORES: &[&str] = &[
    "not_scored",
    "keep",
    "delete",
    "seasonal",
    "watched_keep",
    "archived",
];

// ============================================================================
// Score <-> label table
// ============================================================================

mod label_table {
    use super::*;

    /// The one label each score requires remotely, per the canonical table
    fn required_label(score: &str) -> Option<&'static str> {
        match score {
            "keep" => Some("ai-keep"),
            "delete" => Some("ai-delete"),
            "seasonal" => Some("ai-rolling-keep"),
            "watched_keep" => Some("ai-tautulli-keep"),
            "not_scored" | "archived" => None,
            _ => None,
        }
    }

    /// Delta computation: (to_add, to_remove) restricted to managed labels
    fn label_delta<'a>(score: &str, present: &[&'a str]) -> (Vec<&'static str>, Vec<&'a str>) {
        let required = required_label(score);
        let to_add: Vec<&'static str> = required
            .into_iter()
            .filter(|l| !present.contains(l))
            .collect();
        let to_remove: Vec<&str> = present
            .iter()
            .filter(|l| MANAGED_LABELS.contains(*l) && Some(**l) != required)
            .copied()
            .collect();
        (to_add, to_remove)
    }

    #[test]
    fn test_every_score_requires_at_most_one_label() {
        for score in VALID_SCORES {
            let required = required_label(score);
            if let Some(label) = required {
                assert!(MANAGED_LABELS.contains(&label));
            }
        }
    }

    #[test]
    fn test_consistent_state_has_empty_delta() {
        // An item whose labels already match its score needs no edits.
        for score in VALID_SCORES {
            let present: Vec<&str> = required_label(score).into_iter().collect();
            let (add, remove) = label_delta(score, &present);
            assert!(add.is_empty(), "unexpected add for {score}: {add:?}");
            assert!(remove.is_empty(), "unexpected remove for {score}: {remove:?}");
        }
    }

    #[test]
    fn test_delta_is_idempotent_over_all_label_subsets() {
        // Apply the delta, recompute: always empty on the second pass.
        for score in VALID_SCORES {
            for mask in 0..16u32 {
                let present: Vec<&str> = MANAGED_LABELS
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, l)| *l)
                    .collect();

                let (add, remove) = label_delta(score, &present);
                let mut next: Vec<&str> = present
                    .iter()
                    .filter(|l| !remove.contains(l))
                    .copied()
                    .collect();
                next.extend(add.iter().copied());

                let (add2, remove2) = label_delta(score, &next);
                assert!(
                    add2.is_empty() && remove2.is_empty(),
                    "not idempotent for {score} with labels {present:?}"
                );
            }
        }
    }

    #[test]
    fn test_unmanaged_labels_never_removed() {
        let present = vec!["favorite", "4k-remux", "ai-delete"];
        let (_, remove) = label_delta("keep", &present);
        assert_eq!(remove, vec!["ai-delete"]);
    }

    #[test]
    fn test_grouping_by_exact_delta_pair() {
        use std::collections::HashMap;

        // Items needing the identical (add, remove) pair share one bulk call;
        // different pairs never share.
        let items = [
            (1, "keep", vec![]),
            (2, "keep", vec![]),
            (3, "keep", vec!["ai-delete"]),
            (4, "delete", vec![]),
        ];

        let mut groups: HashMap<(Vec<&str>, Vec<&str>), Vec<i64>> = HashMap::new();
        for (id, score, present) in &items {
            let (add, remove) = label_delta(score, present);
            if !add.is_empty() || !remove.is_empty() {
                groups.entry((add, remove)).or_default().push(*id);
            }
        }

        assert_eq!(groups.len(), 3);
        let plain_keep = (vec!["ai-keep"], vec![]);
        assert_eq!(groups[&plain_keep], vec![1, 2]);
        let keep_over_delete = (vec!["ai-keep"], vec!["ai-delete"]);
        assert_eq!(groups[&keep_over_delete], vec![3]);
    }

    #[test]
    fn test_bootstrap_order_matches_table() {
        // First match wins in table order when a remote item carries
        // conflicting managed labels.
        fn bootstrap(present: &[&str]) -> &'static str {
            for (label, score) in [
                ("ai-keep", "keep"),
                ("ai-delete", "delete"),
                ("ai-rolling-keep", "seasonal"),
                ("ai-tautulli-keep", "watched_keep"),
            ] {
                if present.contains(&label) {
                    return score;
                }
            }
            "not_scored"
        }

        assert_eq!(bootstrap(&["ai-delete", "ai-keep"]), "keep");
        assert_eq!(bootstrap(&["ai-tautulli-keep", "ai-rolling-keep"]), "seasonal");
        assert_eq!(bootstrap(&["favorite"]), "not_scored");
        assert_eq!(bootstrap(&[]), "not_scored");
    }
}

// ============================================================================
// Deletion lifecycle
// ============================================================================

mod deletion_lifecycle {
    /// Grace arithmetic in whole seconds: delete at T with grace_days days
    /// puts the deadline at exactly T + days * 86400.
    fn delete_deadline(marked_at_secs: i64, grace_days: i64) -> i64 {
        marked_at_secs + grace_days * 86_400
    }

    fn purge_due(deadline: Option<i64>, now: i64) -> bool {
        matches!(deadline, Some(d) if d <= now)
    }

    #[test]
    fn test_grace_period_is_exact() {
        let t = 1_709_294_400; // 2024-03-01 12:00:00 UTC
        assert_eq!(delete_deadline(t, 30), t + 30 * 86_400);
        assert_eq!(delete_deadline(t, 0), t);
    }

    #[test]
    fn test_purge_boundary() {
        let t = 1_709_294_400;
        let deadline = delete_deadline(t, 30);

        // One second before the deadline the item is excluded; at the
        // deadline it is included.
        assert!(!purge_due(Some(deadline), deadline - 1));
        assert!(purge_due(Some(deadline), deadline));
        assert!(purge_due(Some(deadline), deadline + 1));
    }

    #[test]
    fn test_items_without_deadline_never_purge() {
        assert!(!purge_due(None, i64::MAX));
    }

    /// Transition stamping: only an entry into delete carries timestamps
    fn transition(score: &str, now: i64, grace_days: i64) -> (Option<i64>, Option<i64>) {
        if score == "delete" {
            (Some(now), Some(delete_deadline(now, grace_days)))
        } else {
            (None, None)
        }
    }

    #[test]
    fn test_deadline_iff_delete_score() {
        // The invariant every transition must preserve: delete_at is
        // non-null exactly when the score is delete, and the marker is set
        // exactly when the deadline is.
        let now = 1_709_294_400;
        for score in super::VALID_SCORES {
            let (marked_at, deadline) = transition(score, now, 30);
            assert_eq!(deadline.is_some(), *score == "delete", "score {score}");
            assert_eq!(marked_at.is_some(), deadline.is_some(), "score {score}");
            if let (Some(marked), Some(deadline)) = (marked_at, deadline) {
                assert_eq!(deadline - marked, 30 * 86_400);
            }
        }
    }
}

// ============================================================================
// Scoring candidate selection
// ============================================================================

mod scoring_candidates {
    /// Scores excluded from the AI scoring candidate set
    const MANAGED_SET: &[&str] = &["keep", "delete", "watched_keep", "seasonal", "archived"];

    fn is_candidate(score: &str, ai_score: Option<i32>, resume_mode: bool) -> bool {
        if MANAGED_SET.contains(&score) {
            return false;
        }
        if resume_mode && ai_score.is_some() {
            return false;
        }
        true
    }

    #[test]
    fn test_managed_scores_never_candidates() {
        for score in MANAGED_SET {
            assert!(!is_candidate(score, None, false));
            assert!(!is_candidate(score, None, true));
        }
    }

    #[test]
    fn test_not_scored_and_legacy_values_are_candidates() {
        assert!(is_candidate("not_scored", None, false));
        // Legacy numeric-only state from old databases
        assert!(is_candidate("85", None, false));
    }

    #[test]
    fn test_resume_mode_excludes_already_scored() {
        assert!(!is_candidate("not_scored", Some(42), true));
        assert!(is_candidate("not_scored", None, true));
        // Non-resume re-includes items with a prior model score.
        assert!(is_candidate("not_scored", Some(42), false));
    }
}

// ============================================================================
// Scheduler firing
// ============================================================================

mod scheduler_firing {
    /// Duplicate-fire guard: an entry fired less than 60 seconds ago is
    /// suppressed even if time and weekday still match.
    fn is_due(
        enabled: bool,
        trigger: &str,
        weekdays: &[u32],
        hhmm: &str,
        weekday: u32,
        last_run_secs_ago: Option<i64>,
    ) -> bool {
        enabled
            && trigger == hhmm
            && weekdays.contains(&weekday)
            && last_run_secs_ago.map(|s| s >= 60).unwrap_or(true)
    }

    #[test]
    fn test_fires_on_exact_minute_and_weekday() {
        assert!(is_due(true, "03:30", &[0, 2], "03:30", 0, None));
        assert!(!is_due(true, "03:30", &[0, 2], "03:29", 0, None));
        assert!(!is_due(true, "03:30", &[0, 2], "03:30", 3, None));
        assert!(!is_due(false, "03:30", &[0, 2], "03:30", 0, None));
    }

    #[test]
    fn test_two_wakeups_ten_seconds_apart_fire_once() {
        // First wake-up fires and stamps last_run.
        assert!(is_due(true, "03:30", &[0], "03:30", 0, None));
        // Second wake-up 10 seconds later sees a fresh last_run and skips.
        assert!(!is_due(true, "03:30", &[0], "03:30", 0, Some(10)));
        // The next day's firing is unaffected.
        assert!(is_due(true, "03:30", &[0], "03:30", 0, Some(86_400)));
    }
}
