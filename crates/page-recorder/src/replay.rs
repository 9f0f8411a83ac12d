use serde::{Deserialize, Serialize};

use crate::error::{RecorderError, Result};
use crate::record::ChangeRecord;
use crate::source::DocumentAccess;

/// Direction of a replay walk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavigationDirection {
    Forward,
    Backward,
}

/// What a call to `move_to` did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayOutcome {
    pub from: isize,
    pub to: isize,
    pub direction: NavigationDirection,
    /// Records stepped over, reversible or not
    pub walked: usize,
    /// Attribute writes the document accepted
    pub applied: usize,
    /// Attribute writes the document refused, e.g. detached nodes
    pub skipped: usize,
}

/// Applies or reverses recorded attribute changes on the live document.
///
/// An attribute change carries its old value, which is a complete inverse.
/// Child-list changes and interactions are walked over without effect.
pub struct ReplayEngine<'a> {
    records: &'a [ChangeRecord],
    document: &'a dyn DocumentAccess,
}

impl<'a> ReplayEngine<'a> {
    pub fn new(records: &'a [ChangeRecord], document: &'a dyn DocumentAccess) -> Self {
        Self { records, document }
    }

    /// Check that `target` is a valid position in a non-empty log
    pub fn validate_target(&self, target: isize) -> Result<()> {
        if self.records.is_empty() {
            return Err(RecorderError::NotReplayable {
                reason: "the change log is empty".to_string(),
            });
        }
        if target < 0 || target as usize >= self.records.len() {
            return Err(RecorderError::OutOfRange {
                index: target,
                len: self.records.len(),
            });
        }
        Ok(())
    }

    /// Move the document from `current` to `target`.
    ///
    /// `current` is the index whose effects are currently applied, -1 meaning
    /// none. Moving to `current` walks nothing.
    pub fn move_to(&self, current: isize, target: isize) -> Result<ReplayOutcome> {
        self.validate_target(target)?;
        if current < -1 || current >= self.records.len() as isize {
            return Err(RecorderError::OutOfRange {
                index: current,
                len: self.records.len(),
            });
        }

        let direction = if target < current {
            NavigationDirection::Backward
        } else {
            NavigationDirection::Forward
        };

        let mut outcome = ReplayOutcome {
            from: current,
            to: target,
            direction,
            walked: 0,
            applied: 0,
            skipped: 0,
        };

        match direction {
            NavigationDirection::Forward => {
                for index in (current + 1)..=target {
                    self.apply(index as usize, direction, &mut outcome);
                }
            }
            NavigationDirection::Backward => {
                for index in ((target + 1)..=current).rev() {
                    self.apply(index as usize, direction, &mut outcome);
                }
            }
        }

        tracing::debug!(
            from = current,
            to = target,
            walked = outcome.walked,
            applied = outcome.applied,
            skipped = outcome.skipped,
            "replay walk finished"
        );

        Ok(outcome)
    }

    fn apply(&self, index: usize, direction: NavigationDirection, outcome: &mut ReplayOutcome) {
        outcome.walked += 1;

        let Some((target, name, old_value, new_value)) = self.records[index].attribute_change()
        else {
            return;
        };

        let value = match direction {
            NavigationDirection::Forward => new_value,
            NavigationDirection::Backward => old_value,
        };

        match self.document.set_attribute(target, name, value) {
            Ok(()) => outcome.applied += 1,
            Err(err) => {
                outcome.skipped += 1;
                tracing::debug!(
                    index,
                    node = %target,
                    attribute = name,
                    error = %err,
                    "attribute write refused during replay"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::ChangeLog;
    use crate::mock::MockDocument;
    use crate::record::{InteractionPayload, MutationPayload, ObjectRef, RecordPayload};

    fn attribute(name: &str, old: &str, new: &str) -> RecordPayload {
        RecordPayload::Mutation(MutationPayload::AttributeChange {
            attribute_name: name.to_string(),
            old_value: Some(old.to_string()),
            new_value: Some(new.to_string()),
        })
    }

    fn scenario() -> (MockDocument, ObjectRef, ChangeLog) {
        let document = MockDocument::new();
        let node = document.create_node("div");
        document.set_attribute(node, "data-x", Some("3")).unwrap();

        let mut log = ChangeLog::new();
        log.append(attribute("data-x", "1", "2"), Some(node), 0.0)
            .unwrap();
        log.append(attribute("data-x", "2", "3"), Some(node), 1.0)
            .unwrap();
        log.freeze();

        (document, node, log)
    }

    #[test]
    fn test_backward_then_out_of_range() {
        let (document, node, log) = scenario();
        let engine = ReplayEngine::new(log.records(), &document);

        let outcome = engine.move_to(1, 0).unwrap();
        assert_eq!(outcome.direction, NavigationDirection::Backward);
        assert_eq!(outcome.walked, 1);
        assert_eq!(document.attribute(node, "data-x"), Some("2".to_string()));

        let err = engine.move_to(0, -1).unwrap_err();
        assert_eq!(err, RecorderError::OutOfRange { index: -1, len: 2 });
        assert_eq!(document.attribute(node, "data-x"), Some("2".to_string()));
    }

    #[test]
    fn test_forward_reapplies_new_values() {
        let (document, node, log) = scenario();
        let engine = ReplayEngine::new(log.records(), &document);

        engine.move_to(1, 0).unwrap();
        let outcome = engine.move_to(0, 1).unwrap();
        assert_eq!(outcome.direction, NavigationDirection::Forward);
        assert_eq!(document.attribute(node, "data-x"), Some("3".to_string()));
    }

    #[test]
    fn test_move_to_current_is_noop() {
        let (document, _, log) = scenario();
        let engine = ReplayEngine::new(log.records(), &document);

        let outcome = engine.move_to(1, 1).unwrap();
        assert_eq!(outcome.walked, 0);
        assert_eq!(outcome.applied, 0);
    }

    #[test]
    fn test_empty_log_not_replayable() {
        let document = MockDocument::new();
        let engine = ReplayEngine::new(&[], &document);
        assert!(matches!(
            engine.move_to(-1, 0),
            Err(RecorderError::NotReplayable { .. })
        ));
    }

    #[test]
    fn test_non_attribute_records_are_walked_without_effect() {
        let document = MockDocument::new();
        let node = document.create_node("ul");
        document.set_attribute(node, "class", Some("b")).unwrap();

        let mut log = ChangeLog::new();
        log.append(attribute("class", "a", "b"), Some(node), 0.0)
            .unwrap();
        log.append(
            RecordPayload::Mutation(MutationPayload::ChildListChange {
                added_count: 1,
                removed_count: 0,
            }),
            Some(node),
            1.0,
        )
        .unwrap();
        log.append(
            RecordPayload::Interaction(InteractionPayload {
                event_type: "click".to_string(),
                handler_descriptor: None,
            }),
            Some(node),
            2.0,
        )
        .unwrap();

        let engine = ReplayEngine::new(log.records(), &document);
        let outcome = engine.move_to(2, 0).unwrap();
        assert_eq!(outcome.walked, 2);
        assert_eq!(outcome.applied, 0);
        assert_eq!(document.attribute(node, "class"), Some("b".to_string()));

        // Index 0 itself stays applied; only later records are reversed.
        let outcome = engine.move_to(0, 2).unwrap();
        assert_eq!(outcome.walked, 2);
        assert_eq!(outcome.applied, 0);
    }

    #[test]
    fn test_missing_values_remove_attribute() {
        let document = MockDocument::new();
        let node = document.create_node("input");
        document.set_attribute(node, "value", Some("x")).unwrap();
        document.set_attribute(node, "disabled", Some("")).unwrap();

        let mut log = ChangeLog::new();
        log.append(attribute("value", "", "x"), Some(node), 0.0)
            .unwrap();
        log.append(
            RecordPayload::Mutation(MutationPayload::AttributeChange {
                attribute_name: "disabled".to_string(),
                old_value: None,
                new_value: Some(String::new()),
            }),
            Some(node),
            1.0,
        )
        .unwrap();

        let engine = ReplayEngine::new(log.records(), &document);
        engine.move_to(1, 0).unwrap();
        assert_eq!(document.attribute(node, "disabled"), None);
        assert_eq!(document.attribute(node, "value"), Some("x".to_string()));

        engine.move_to(0, 1).unwrap();
        assert_eq!(document.attribute(node, "disabled"), Some(String::new()));
    }

    #[test]
    fn test_detached_nodes_are_skipped() {
        let (document, node, log) = scenario();
        document.detach(node);

        let engine = ReplayEngine::new(log.records(), &document);
        let outcome = engine.move_to(1, 0).unwrap();
        assert_eq!(outcome.walked, 1);
        assert_eq!(outcome.skipped, 1);
    }

    #[test]
    fn test_invalid_current_rejected() {
        let (document, _, log) = scenario();
        let engine = ReplayEngine::new(log.records(), &document);
        assert!(matches!(
            engine.move_to(5, 0),
            Err(RecorderError::OutOfRange { index: 5, .. })
        ));
    }
}
