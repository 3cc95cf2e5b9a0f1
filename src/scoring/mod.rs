//! Retention scoring: the per-item score, its legal transitions, and the
//! canonical mapping between scores and managed remote labels.
//!
//! Everything in this module is pure logic; I/O lives in `services` and `jobs`.

pub mod lifecycle;
pub mod proposals;
pub mod score;

pub use lifecycle::{is_purge_due, ScoreTransition};
pub use proposals::{ProposalAction, ProposalDocument, ProposalList};
pub use score::{label_delta, managed_labels, LabelDelta, ManagedLabel, MediaKind, RetentionScore};
