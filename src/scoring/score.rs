//! Retention score state machine and managed label vocabulary
//!
//! The score ↔ label table here is the single source of truth for label
//! reconciliation. No other component may invent label combinations.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Which remote library manager an item belongs to.
///
/// Movies and shows have the same shape locally; the kind only selects the
/// remote identifier scheme and the handful of wire details that differ
/// between the two services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Show,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Show => "show",
        }
    }

    /// Service connection name for this kind.
    pub fn service(&self) -> &'static str {
        match self {
            MediaKind::Movie => "radarr",
            MediaKind::Show => "sonarr",
        }
    }

    /// Resource path segment under `/api/v3` on the remote service.
    pub fn item_resource(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Show => "series",
        }
    }

    /// Key carrying item ids in bulk editor payloads.
    pub fn id_key(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movieIds",
            MediaKind::Show => "seriesIds",
        }
    }

    /// Query parameter that suppresses the service's exclusion list on delete.
    pub fn exclusion_param(&self) -> &'static str {
        match self {
            MediaKind::Movie => "addImportListExclusion",
            MediaKind::Show => "addExclusion",
        }
    }

    /// Seasonal retention only makes sense for shows.
    pub fn supports_seasonal(&self) -> bool {
        matches!(self, MediaKind::Show)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "movie" => Some(MediaKind::Movie),
            "show" => Some(MediaKind::Show),
            _ => None,
        }
    }
}

/// The closed set of labels this service manages on the remote side.
///
/// Remote tags are free-form strings; everything outside these four names is
/// user data and must never be touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ManagedLabel {
    Keep,
    Delete,
    RollingKeep,
    TautulliKeep,
}

impl ManagedLabel {
    pub const ALL: [ManagedLabel; 4] = [
        ManagedLabel::Keep,
        ManagedLabel::Delete,
        ManagedLabel::RollingKeep,
        ManagedLabel::TautulliKeep,
    ];

    /// Canonical lowercase tag name on the remote service.
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagedLabel::Keep => "ai-keep",
            ManagedLabel::Delete => "ai-delete",
            ManagedLabel::RollingKeep => "ai-rolling-keep",
            ManagedLabel::TautulliKeep => "ai-tautulli-keep",
        }
    }

    /// Case-insensitive parse; returns None for unmanaged labels.
    pub fn parse(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "ai-keep" => Some(ManagedLabel::Keep),
            "ai-delete" => Some(ManagedLabel::Delete),
            "ai-rolling-keep" => Some(ManagedLabel::RollingKeep),
            "ai-tautulli-keep" => Some(ManagedLabel::TautulliKeep),
            _ => None,
        }
    }
}

impl std::fmt::Display for ManagedLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-item retention decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionScore {
    NotScored,
    Keep,
    Delete,
    /// Rolling retention for shows: keep the current run, drop old seasons.
    Seasonal,
    /// Rescued by recent playback reported from the watch-history service.
    WatchedKeep,
    /// Legacy terminal state from the old expiry path; never produced here.
    Archived,
}

impl RetentionScore {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionScore::NotScored => "not_scored",
            RetentionScore::Keep => "keep",
            RetentionScore::Delete => "delete",
            RetentionScore::Seasonal => "seasonal",
            RetentionScore::WatchedKeep => "watched_keep",
            RetentionScore::Archived => "archived",
        }
    }

    /// Parse a stored score. Unknown values (legacy numeric states from old
    /// databases) come back as None and are treated as unscored candidates.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_scored" => Some(RetentionScore::NotScored),
            "keep" => Some(RetentionScore::Keep),
            "delete" => Some(RetentionScore::Delete),
            "seasonal" => Some(RetentionScore::Seasonal),
            "watched_keep" => Some(RetentionScore::WatchedKeep),
            "archived" => Some(RetentionScore::Archived),
            _ => None,
        }
    }

    /// The one managed label that must be present remotely for this score.
    pub fn required_label(&self) -> Option<ManagedLabel> {
        match self {
            RetentionScore::Keep => Some(ManagedLabel::Keep),
            RetentionScore::Delete => Some(ManagedLabel::Delete),
            RetentionScore::Seasonal => Some(ManagedLabel::RollingKeep),
            RetentionScore::WatchedKeep => Some(ManagedLabel::TautulliKeep),
            RetentionScore::NotScored | RetentionScore::Archived => None,
        }
    }

    /// Managed labels that must be absent remotely for this score.
    pub fn forbidden_labels(&self) -> impl Iterator<Item = ManagedLabel> + '_ {
        let required = self.required_label();
        ManagedLabel::ALL
            .into_iter()
            .filter(move |l| Some(*l) != required)
    }

    /// Derive an initial score from the labels already present on a remote
    /// item that has no local record yet. First match wins, in the canonical
    /// table order.
    pub fn bootstrap(labels: &BTreeSet<ManagedLabel>) -> Self {
        const TABLE_ORDER: [(ManagedLabel, RetentionScore); 4] = [
            (ManagedLabel::Keep, RetentionScore::Keep),
            (ManagedLabel::Delete, RetentionScore::Delete),
            (ManagedLabel::RollingKeep, RetentionScore::Seasonal),
            (ManagedLabel::TautulliKeep, RetentionScore::WatchedKeep),
        ];

        TABLE_ORDER
            .into_iter()
            .find(|(label, _)| labels.contains(label))
            .map(|(_, score)| score)
            .unwrap_or(RetentionScore::NotScored)
    }
}

impl std::fmt::Display for RetentionScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The (add, remove) label sets needed to make a remote item match its local
/// score. Ordered sets so that equal deltas hash and compare identically,
/// which is what lets the reconciliation pass group items into bulk calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LabelDelta {
    pub add: BTreeSet<ManagedLabel>,
    pub remove: BTreeSet<ManagedLabel>,
}

impl LabelDelta {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Compute the delta between a score and the managed labels currently present
/// on the remote item. Only the four managed names participate; unrelated
/// user labels never appear in either set.
pub fn label_delta(score: RetentionScore, present: &BTreeSet<ManagedLabel>) -> LabelDelta {
    let mut delta = LabelDelta::default();

    if let Some(required) = score.required_label() {
        if !present.contains(&required) {
            delta.add.insert(required);
        }
    }
    for forbidden in score.forbidden_labels() {
        if present.contains(&forbidden) {
            delta.remove.insert(forbidden);
        }
    }

    delta
}

/// Extract the managed subset of a remote item's label names.
pub fn managed_labels<'a, I>(labels: I) -> BTreeSet<ManagedLabel>
where
    I: IntoIterator<Item = &'a str>,
{
    labels
        .into_iter()
        .filter_map(ManagedLabel::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(labels: &[ManagedLabel]) -> BTreeSet<ManagedLabel> {
        labels.iter().copied().collect()
    }

    #[test]
    fn test_label_parse_case_insensitive() {
        assert_eq!(ManagedLabel::parse("AI-Keep"), Some(ManagedLabel::Keep));
        assert_eq!(
            ManagedLabel::parse("ai-tautulli-keep"),
            Some(ManagedLabel::TautulliKeep)
        );
        assert_eq!(ManagedLabel::parse("favorite"), None);
    }

    #[test]
    fn test_canonical_table() {
        assert_eq!(
            RetentionScore::Keep.required_label(),
            Some(ManagedLabel::Keep)
        );
        assert_eq!(
            RetentionScore::Seasonal.required_label(),
            Some(ManagedLabel::RollingKeep)
        );
        assert_eq!(RetentionScore::NotScored.required_label(), None);
        assert_eq!(RetentionScore::NotScored.forbidden_labels().count(), 4);
        assert_eq!(RetentionScore::Delete.forbidden_labels().count(), 3);
    }

    #[test]
    fn test_bootstrap_first_match_wins() {
        // Conflicting labels: table order decides.
        let labels = set(&[ManagedLabel::Delete, ManagedLabel::Keep]);
        assert_eq!(RetentionScore::bootstrap(&labels), RetentionScore::Keep);

        let labels = set(&[ManagedLabel::TautulliKeep, ManagedLabel::RollingKeep]);
        assert_eq!(RetentionScore::bootstrap(&labels), RetentionScore::Seasonal);

        assert_eq!(
            RetentionScore::bootstrap(&BTreeSet::new()),
            RetentionScore::NotScored
        );
    }

    #[test]
    fn test_delta_adds_missing_required() {
        let delta = label_delta(RetentionScore::Keep, &BTreeSet::new());
        assert_eq!(delta.add, set(&[ManagedLabel::Keep]));
        assert!(delta.remove.is_empty());
    }

    #[test]
    fn test_delta_removes_forbidden() {
        let present = set(&[ManagedLabel::Keep, ManagedLabel::Delete]);
        let delta = label_delta(RetentionScore::Keep, &present);
        assert!(delta.add.is_empty());
        assert_eq!(delta.remove, set(&[ManagedLabel::Delete]));
    }

    #[test]
    fn test_delta_not_scored_strips_all() {
        let present = set(&[ManagedLabel::RollingKeep, ManagedLabel::TautulliKeep]);
        let delta = label_delta(RetentionScore::NotScored, &present);
        assert!(delta.add.is_empty());
        assert_eq!(
            delta.remove,
            set(&[ManagedLabel::RollingKeep, ManagedLabel::TautulliKeep])
        );
    }

    #[test]
    fn test_delta_idempotent() {
        // Apply the delta, recompute: the second delta must be empty.
        for score in [
            RetentionScore::NotScored,
            RetentionScore::Keep,
            RetentionScore::Delete,
            RetentionScore::Seasonal,
            RetentionScore::WatchedKeep,
        ] {
            let mut present = set(&[ManagedLabel::Delete, ManagedLabel::RollingKeep]);
            let delta = label_delta(score, &present);
            for l in &delta.add {
                present.insert(*l);
            }
            for l in &delta.remove {
                present.remove(l);
            }
            assert!(
                label_delta(score, &present).is_empty(),
                "second delta not empty for {score}"
            );
        }
    }

    #[test]
    fn test_equal_deltas_group_together() {
        use std::collections::HashMap;

        let a = label_delta(RetentionScore::Keep, &BTreeSet::new());
        let b = label_delta(RetentionScore::Keep, &set(&[]));
        let c = label_delta(RetentionScore::Delete, &BTreeSet::new());

        let mut groups: HashMap<LabelDelta, Vec<i64>> = HashMap::new();
        groups.entry(a).or_default().push(1);
        groups.entry(b).or_default().push(2);
        groups.entry(c).or_default().push(3);

        assert_eq!(groups.len(), 2);
        let keep_group = label_delta(RetentionScore::Keep, &BTreeSet::new());
        assert_eq!(groups[&keep_group], vec![1, 2]);
    }

    #[test]
    fn test_unmanaged_labels_ignored() {
        let labels = managed_labels(["favorite", "AI-DELETE", "4k"]);
        assert_eq!(labels, set(&[ManagedLabel::Delete]));
    }
}
