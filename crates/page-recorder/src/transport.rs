use serde::{Deserialize, Serialize};

use crate::error::{RecorderError, Result};
use crate::record::{ChangeRecord, EncodedImage, ObjectRef, RecordKind, RecordPayload};

/// A change record without its node handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlainRecord {
    pub sequence_id: u64,
    pub timestamp: f64,
    #[serde(flatten)]
    pub payload: RecordPayload,
}

impl PlainRecord {
    pub fn kind(&self) -> RecordKind {
        self.payload.kind()
    }
}

/// Node handle travelling next to a plain record; empty for snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeRefSlot(Option<ObjectRef>);

impl NodeRefSlot {
    pub const fn absent() -> Self {
        Self(None)
    }

    pub const fn present(node: ObjectRef) -> Self {
        Self(Some(node))
    }

    pub fn get(self) -> Option<ObjectRef> {
        self.0
    }

    pub fn is_absent(self) -> bool {
        self.0.is_none()
    }
}

impl From<Option<ObjectRef>> for NodeRefSlot {
    fn from(node: Option<ObjectRef>) -> Self {
        Self(node)
    }
}

/// Split one record into its plain part and its node slot
pub fn split_record(record: &ChangeRecord) -> (PlainRecord, NodeRefSlot) {
    (
        PlainRecord {
            sequence_id: record.sequence_id,
            timestamp: record.timestamp,
            payload: record.payload.clone(),
        },
        NodeRefSlot::from(record.target),
    )
}

/// Split records into parallel plain and node-slot lists.
///
/// `plain[i]` and `refs[i]` always describe `records[i]`.
pub fn serialize(records: &[ChangeRecord]) -> (Vec<PlainRecord>, Vec<NodeRefSlot>) {
    records.iter().map(split_record).unzip()
}

/// Zip plain records back together with their node slots
pub fn deserialize(plain: Vec<PlainRecord>, refs: Vec<NodeRefSlot>) -> Result<Vec<ChangeRecord>> {
    if plain.len() != refs.len() {
        return Err(RecorderError::TransportMismatch {
            records: plain.len(),
            refs: refs.len(),
        });
    }

    Ok(plain
        .into_iter()
        .zip(refs)
        .map(|(record, slot)| ChangeRecord {
            sequence_id: record.sequence_id,
            timestamp: record.timestamp,
            payload: record.payload,
            target: slot.get(),
        })
        .collect())
}

/// Requests sent by the host to the recording context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostMessage {
    Start,
    Stop,
    MoveTo { index: isize },
    GetScreenshot { id: u64 },
}

/// Messages sent by the recording context to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentMessage {
    OnChange {
        record: PlainRecord,
        node: NodeRefSlot,
    },
    OnStop {
        records: Vec<PlainRecord>,
        nodes: Vec<NodeRefSlot>,
    },
    OnScreenshot {
        id: u64,
        image: Option<EncodedImage>,
    },
    Error {
        message: String,
    },
}

impl ContentMessage {
    pub fn on_change(record: &ChangeRecord) -> Self {
        let (record, node) = split_record(record);
        ContentMessage::OnChange { record, node }
    }

    pub fn on_stop(records: &[ChangeRecord]) -> Self {
        let (records, nodes) = serialize(records);
        ContentMessage::OnStop { records, nodes }
    }

    pub fn error(err: &RecorderError) -> Self {
        ContentMessage::Error {
            message: err.to_string(),
        }
    }
}

impl HostMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl ContentMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
