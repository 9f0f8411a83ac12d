use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle to a node in the observed document.
///
/// The recorder never dereferences it. Only the collaborator that owns the
/// document knows which node a handle stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectRef(u64);

impl ObjectRef {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Coarse classification of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordKind {
    Mutation,
    Interaction,
    Snapshot,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::Mutation => "mutation",
            RecordKind::Interaction => "interaction",
            RecordKind::Snapshot => "snapshot",
        };
        f.write_str(name)
    }
}

/// Structural change to the observed document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mutationType", content = "reason", rename_all = "camelCase")]
pub enum MutationPayload {
    #[serde(rename_all = "camelCase")]
    AttributeChange {
        attribute_name: String,
        old_value: Option<String>,
        new_value: Option<String>,
    },
    /// Only counts are kept; added and removed node handles would go stale.
    #[serde(rename_all = "camelCase")]
    ChildListChange {
        added_count: usize,
        removed_count: usize,
    },
}

/// Event delivered to one of the instrumented observation listeners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionPayload {
    pub event_type: String,
    /// Best-effort identity of the author handler(s) the event was bound for
    pub handler_descriptor: Option<String>,
}

/// Encoded point-in-time image of the viewport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedImage {
    pub mime_type: String,
    pub data_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPayload {
    pub image: EncodedImage,
    pub width: u32,
    pub height: u32,
}

/// Payload of a record, tagged by its kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum RecordPayload {
    Mutation(MutationPayload),
    Interaction(InteractionPayload),
    Snapshot(SnapshotPayload),
}

impl RecordPayload {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordPayload::Mutation(_) => RecordKind::Mutation,
            RecordPayload::Interaction(_) => RecordKind::Interaction,
            RecordPayload::Snapshot(_) => RecordKind::Snapshot,
        }
    }
}

/// One logged occurrence in a recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub sequence_id: u64,
    /// Milliseconds since the session started
    pub timestamp: f64,
    #[serde(flatten)]
    pub payload: RecordPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ObjectRef>,
}

impl ChangeRecord {
    pub fn kind(&self) -> RecordKind {
        self.payload.kind()
    }

    pub fn is_snapshot(&self) -> bool {
        matches!(self.payload, RecordPayload::Snapshot(_))
    }

    /// Attribute change carried by this record, if it is one.
    ///
    /// These are the only records the replay engine acts on.
    pub fn attribute_change(&self) -> Option<(ObjectRef, &str, Option<&str>, Option<&str>)> {
        match (&self.payload, self.target) {
            (
                RecordPayload::Mutation(MutationPayload::AttributeChange {
                    attribute_name,
                    old_value,
                    new_value,
                }),
                Some(target),
            ) => Some((
                target,
                attribute_name.as_str(),
                old_value.as_deref(),
                new_value.as_deref(),
            )),
            _ => None,
        }
    }
}

fn describe_target(target: Option<ObjectRef>) -> String {
    target
        .map(|t| t.to_string())
        .unwrap_or_else(|| "<unknown>".to_string())
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = describe_target(self.target);
        match &self.payload {
            RecordPayload::Mutation(MutationPayload::AttributeChange {
                attribute_name,
                old_value,
                new_value,
            }) => write!(
                f,
                "Attributes change on node {}. {} changed from {} to {}",
                node,
                attribute_name,
                old_value.as_deref().unwrap_or("null"),
                new_value.as_deref().unwrap_or("null"),
            ),
            RecordPayload::Mutation(MutationPayload::ChildListChange {
                added_count,
                removed_count,
            }) => write!(
                f,
                "Child list change on node {}: {} added, {} removed",
                node, added_count, removed_count
            ),
            RecordPayload::Interaction(interaction) => {
                write!(f, "Event type {} on node {}", interaction.event_type, node)
            }
            RecordPayload::Snapshot(snapshot) => {
                write!(f, "Snapshot {}x{}", snapshot.width, snapshot.height)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attribute_record() -> ChangeRecord {
        ChangeRecord {
            sequence_id: 4,
            timestamp: 12.5,
            payload: RecordPayload::Mutation(MutationPayload::AttributeChange {
                attribute_name: "data-x".to_string(),
                old_value: Some("1".to_string()),
                new_value: Some("2".to_string()),
            }),
            target: Some(ObjectRef::new(3)),
        }
    }

    #[test]
    fn test_kind_follows_payload() {
        let record = attribute_record();
        assert_eq!(record.kind(), RecordKind::Mutation);
        assert!(!record.is_snapshot());

        let snapshot = ChangeRecord {
            sequence_id: 0,
            timestamp: 0.0,
            payload: RecordPayload::Snapshot(SnapshotPayload {
                image: EncodedImage {
                    mime_type: "image/png".to_string(),
                    data_url: "data:image/png;base64,AA==".to_string(),
                },
                width: 800,
                height: 600,
            }),
            target: None,
        };
        assert_eq!(snapshot.kind(), RecordKind::Snapshot);
        assert!(snapshot.is_snapshot());
        assert_eq!(snapshot.to_string(), "Snapshot 800x600");
    }

    #[test]
    fn test_attribute_change_accessor() {
        let record = attribute_record();
        let (target, name, old, new) = record.attribute_change().unwrap();
        assert_eq!(target, ObjectRef::new(3));
        assert_eq!(name, "data-x");
        assert_eq!(old, Some("1"));
        assert_eq!(new, Some("2"));

        let child_list = ChangeRecord {
            payload: RecordPayload::Mutation(MutationPayload::ChildListChange {
                added_count: 1,
                removed_count: 0,
            }),
            ..attribute_record()
        };
        assert!(child_list.attribute_change().is_none());
    }

    #[test]
    fn test_wire_shape() {
        let value = serde_json::to_value(attribute_record()).unwrap();
        assert_eq!(
            value,
            json!({
                "sequenceId": 4,
                "timestamp": 12.5,
                "kind": "mutation",
                "payload": {
                    "mutationType": "attributeChange",
                    "reason": {
                        "attributeName": "data-x",
                        "oldValue": "1",
                        "newValue": "2"
                    }
                },
                "target": 3
            })
        );
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(
            attribute_record().to_string(),
            "Attributes change on node #3. data-x changed from 1 to 2"
        );

        let interaction = ChangeRecord {
            sequence_id: 1,
            timestamp: 3.0,
            payload: RecordPayload::Interaction(InteractionPayload {
                event_type: "click".to_string(),
                handler_descriptor: Some("onSubmit".to_string()),
            }),
            target: Some(ObjectRef::new(7)),
        };
        assert_eq!(interaction.to_string(), "Event type click on node #7");
    }
}
