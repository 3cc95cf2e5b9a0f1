//! Rule proposal documents produced by the learning pass
//!
//! A proposal document is transient JSON stored on the service connection. It
//! is created whole by the learning job, whittled down entry by entry as the
//! user confirms or declines, and cleared once both lists are empty. Rule
//! text is only ever changed through `apply` — never by the learning pass.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A proposed edit to an existing rule line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Refinement {
    #[serde(default)]
    pub id: String,
    pub original: String,
    pub proposed: String,
    #[serde(default)]
    pub reason: String,
}

/// A proposed brand-new rule line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewRule {
    #[serde(default)]
    pub id: String,
    pub rule: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalList {
    Refinement,
    NewRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalAction {
    Confirm,
    Decline,
}

/// Outcome of applying one proposal entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    /// New rule corpus, if the action changed it.
    pub rules: Option<String>,
    /// True once both lists are empty and the pending document should be
    /// cleared from the connection.
    pub document_cleared: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProposalDocument {
    #[serde(default)]
    pub refinements: Vec<Refinement>,
    #[serde(default)]
    pub new_rules: Vec<NewRule>,
}

impl ProposalDocument {
    /// Parse a model response into a proposal document.
    ///
    /// Structured responses are JSON with `refinements` and `new_rules`
    /// arrays. Anything that fails to parse is treated as plain text and
    /// every non-blank line becomes a new-rule entry, so a chatty model
    /// never loses proposals.
    pub fn from_response(text: &str) -> Self {
        let mut doc = match serde_json::from_str::<ProposalDocument>(text) {
            Ok(doc) => doc,
            Err(_) => Self::from_plain_text(text),
        };
        doc.assign_ids();
        doc
    }

    fn from_plain_text(text: &str) -> Self {
        ProposalDocument {
            refinements: Vec::new(),
            new_rules: text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| NewRule {
                    id: String::new(),
                    rule: l.to_string(),
                    reason: "Generated from plain text output".to_string(),
                })
                .collect(),
        }
    }

    /// Give every entry a fresh identifier, replacing whatever the model put
    /// there.
    pub fn assign_ids(&mut self) {
        for r in &mut self.refinements {
            r.id = Uuid::new_v4().to_string();
        }
        for n in &mut self.new_rules {
            n.id = Uuid::new_v4().to_string();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.refinements.is_empty() && self.new_rules.is_empty()
    }

    /// Confirm or decline one entry.
    ///
    /// Confirming a refinement replaces the first verbatim occurrence of the
    /// original text in `rules`; if the original is no longer present the
    /// proposed text is appended instead — a confirmed refinement is never
    /// silently dropped. Confirming a new rule appends it. Either action
    /// removes the entry from its list.
    pub fn apply(
        &mut self,
        id: &str,
        list: ProposalList,
        action: ProposalAction,
        rules: &str,
    ) -> Result<ApplyOutcome> {
        let mut updated_rules = None;

        match list {
            ProposalList::Refinement => {
                let idx = self
                    .refinements
                    .iter()
                    .position(|r| r.id == id)
                    .ok_or_else(|| anyhow::anyhow!("unknown refinement proposal: {id}"))?;
                let entry = self.refinements.remove(idx);

                if action == ProposalAction::Confirm {
                    if rules.contains(&entry.original) {
                        updated_rules = Some(rules.replacen(&entry.original, &entry.proposed, 1));
                    } else {
                        updated_rules = Some(append_line(rules, &entry.proposed));
                    }
                }
            }
            ProposalList::NewRule => {
                let idx = self
                    .new_rules
                    .iter()
                    .position(|n| n.id == id)
                    .ok_or_else(|| anyhow::anyhow!("unknown new-rule proposal: {id}"))?;
                let entry = self.new_rules.remove(idx);

                if action == ProposalAction::Confirm {
                    updated_rules = Some(append_line(rules, &entry.rule));
                }
            }
        }

        Ok(ApplyOutcome {
            rules: updated_rules,
            document_cleared: self.is_empty(),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let doc: ProposalDocument = serde_json::from_str(json)?;
        if doc.refinements.iter().any(|r| r.id.is_empty())
            || doc.new_rules.iter().any(|n| n.id.is_empty())
        {
            bail!("stored proposal document has entries without identifiers");
        }
        Ok(doc)
    }
}

fn append_line(rules: &str, line: &str) -> String {
    if rules.is_empty() {
        line.to_string()
    } else {
        format!("{}\n{}", rules.trim_end_matches('\n'), line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with(refinements: Vec<(&str, &str)>, new_rules: Vec<&str>) -> ProposalDocument {
        let mut doc = ProposalDocument {
            refinements: refinements
                .into_iter()
                .map(|(orig, prop)| Refinement {
                    id: String::new(),
                    original: orig.to_string(),
                    proposed: prop.to_string(),
                    reason: "test".to_string(),
                })
                .collect(),
            new_rules: new_rules
                .into_iter()
                .map(|r| NewRule {
                    id: String::new(),
                    rule: r.to_string(),
                    reason: "test".to_string(),
                })
                .collect(),
        };
        doc.assign_ids();
        doc
    }

    #[test]
    fn test_structured_response_parses() {
        let doc = ProposalDocument::from_response(
            r#"{"refinements":[{"original":"Keep 90s action","proposed":"Keep 80s-90s action","reason":"range"}],"new_rules":[{"rule":"Delete reality TV","reason":"pattern"}]}"#,
        );
        assert_eq!(doc.refinements.len(), 1);
        assert_eq!(doc.new_rules.len(), 1);
        assert!(!doc.refinements[0].id.is_empty());
        assert!(!doc.new_rules[0].id.is_empty());
    }

    #[test]
    fn test_plain_text_fallback_wraps_lines() {
        let doc = ProposalDocument::from_response("Keep everything by Nolan\n\nDelete low-rated sequels\n");
        assert!(doc.refinements.is_empty());
        assert_eq!(doc.new_rules.len(), 2);
        assert_eq!(doc.new_rules[0].rule, "Keep everything by Nolan");
        assert_eq!(doc.new_rules[1].reason, "Generated from plain text output");
    }

    #[test]
    fn test_confirm_refinement_replaces_only_that_substring() {
        let mut doc = doc_with(vec![("Keep action", "Keep classic action")], vec![]);
        let id = doc.refinements[0].id.clone();
        let rules = "Keep action\nDelete horror\nKeep action figures rule";

        let outcome = doc
            .apply(&id, ProposalList::Refinement, ProposalAction::Confirm, rules)
            .unwrap();

        assert_eq!(
            outcome.rules.as_deref(),
            Some("Keep classic action\nDelete horror\nKeep action figures rule")
        );
        assert!(doc.refinements.is_empty());
    }

    #[test]
    fn test_confirm_refinement_appends_when_original_missing() {
        let mut doc = doc_with(vec![("Keep westerns", "Keep spaghetti westerns")], vec![]);
        let id = doc.refinements[0].id.clone();

        let outcome = doc
            .apply(
                &id,
                ProposalList::Refinement,
                ProposalAction::Confirm,
                "Delete horror",
            )
            .unwrap();

        assert_eq!(
            outcome.rules.as_deref(),
            Some("Delete horror\nKeep spaghetti westerns")
        );
    }

    #[test]
    fn test_confirm_new_rule_appends() {
        let mut doc = doc_with(vec![], vec!["Delete reality TV"]);
        let id = doc.new_rules[0].id.clone();

        let outcome = doc
            .apply(&id, ProposalList::NewRule, ProposalAction::Confirm, "")
            .unwrap();

        assert_eq!(outcome.rules.as_deref(), Some("Delete reality TV"));
        assert!(outcome.document_cleared);
    }

    #[test]
    fn test_decline_removes_without_touching_rules() {
        let mut doc = doc_with(vec![("a", "b")], vec!["c"]);
        let rid = doc.refinements[0].id.clone();

        let outcome = doc
            .apply(&rid, ProposalList::Refinement, ProposalAction::Decline, "a")
            .unwrap();

        assert_eq!(outcome.rules, None);
        assert!(!outcome.document_cleared, "new_rules list still has entries");
        assert!(doc.refinements.is_empty());
    }

    #[test]
    fn test_document_cleared_only_when_both_lists_empty() {
        let mut doc = doc_with(vec![("a", "b")], vec!["c"]);
        let rid = doc.refinements[0].id.clone();
        let nid = doc.new_rules[0].id.clone();

        let first = doc
            .apply(&rid, ProposalList::Refinement, ProposalAction::Decline, "")
            .unwrap();
        assert!(!first.document_cleared);

        let second = doc
            .apply(&nid, ProposalList::NewRule, ProposalAction::Decline, "")
            .unwrap();
        assert!(second.document_cleared);
    }

    #[test]
    fn test_unknown_id_is_an_error() {
        let mut doc = doc_with(vec![], vec!["x"]);
        assert!(doc
            .apply("nope", ProposalList::NewRule, ProposalAction::Confirm, "")
            .is_err());
    }
}
