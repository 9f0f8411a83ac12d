use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{RecorderError, Result};
use crate::record::{ChangeRecord, ObjectRef, RecordKind, RecordPayload};

/// Summary counters over a change log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogStatistics {
    pub total_records: usize,
    pub mutations: usize,
    pub attribute_changes: usize,
    pub interactions: usize,
    pub snapshots: usize,
    pub distinct_targets: usize,
    pub duration_ms: f64,
    pub event_type_counts: HashMap<String, usize>,
}

/// Ordered, append-only log of change records.
///
/// Sequence ids are assigned here so they always start at 0 and grow by
/// exactly one. Once frozen the log rejects further appends.
#[derive(Debug, Clone, Default)]
pub struct ChangeLog {
    records: Vec<ChangeRecord>,
    next_sequence_id: u64,
    frozen: bool,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a frozen log from records captured elsewhere.
    ///
    /// The records must already satisfy the log invariants.
    pub fn frozen(records: Vec<ChangeRecord>) -> Result<Self> {
        validate_records(&records)?;
        Ok(Self {
            next_sequence_id: records.len() as u64,
            records,
            frozen: true,
        })
    }

    /// Append a record, returning the stored copy
    pub fn append(
        &mut self,
        payload: RecordPayload,
        target: Option<ObjectRef>,
        timestamp: f64,
    ) -> Result<&ChangeRecord> {
        if self.frozen {
            return Err(RecorderError::invalid_state("append", "frozen"));
        }
        // Snapshots describe the viewport; everything else names a node.
        let is_snapshot = matches!(payload, RecordPayload::Snapshot(_));
        if is_snapshot == target.is_some() {
            return Err(RecorderError::invalid_state(
                "append",
                if is_snapshot {
                    "given a target for a snapshot"
                } else {
                    "missing a target for a node record"
                },
            ));
        }

        // Clocks may jitter backwards; the log never does.
        let floor = self.records.last().map(|r| r.timestamp).unwrap_or(0.0);
        let timestamp = if timestamp < floor { floor } else { timestamp };

        let record = ChangeRecord {
            sequence_id: self.next_sequence_id,
            timestamp,
            payload,
            target,
        };
        self.next_sequence_id += 1;
        self.records.push(record);

        let index = self.records.len() - 1;
        Ok(&self.records[index])
    }

    /// Drop every record and reset the sequence counter
    pub fn clear(&mut self) {
        self.records.clear();
        self.next_sequence_id = 0;
        self.frozen = false;
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ChangeRecord> {
        self.records.get(index)
    }

    pub fn last(&self) -> Option<&ChangeRecord> {
        self.records.last()
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.records.iter()
    }

    /// Get records of one kind, in log order
    pub fn records_by_kind(&self, kind: RecordKind) -> Vec<&ChangeRecord> {
        self.records.iter().filter(|r| r.kind() == kind).collect()
    }

    /// Get records whose timestamp falls within the given bounds (inclusive)
    pub fn records_in_range(&self, start_ms: Option<f64>, end_ms: Option<f64>) -> Vec<&ChangeRecord> {
        self.records
            .iter()
            .filter(|record| {
                if let Some(start) = start_ms {
                    if record.timestamp < start {
                        return false;
                    }
                }
                if let Some(end) = end_ms {
                    if record.timestamp > end {
                        return false;
                    }
                }
                true
            })
            .collect()
    }

    /// Find the record with the given sequence id
    pub fn find(&self, sequence_id: u64) -> Option<&ChangeRecord> {
        // Ids are dense from 0, so the id is also the index.
        self.records
            .get(sequence_id as usize)
            .filter(|r| r.sequence_id == sequence_id)
    }

    pub fn statistics(&self) -> LogStatistics {
        let mut stats = LogStatistics {
            total_records: self.records.len(),
            duration_ms: self.records.last().map(|r| r.timestamp).unwrap_or(0.0),
            ..Default::default()
        };

        let mut targets = std::collections::HashSet::new();
        for record in &self.records {
            if let Some(target) = record.target {
                targets.insert(target);
            }
            match &record.payload {
                RecordPayload::Mutation(_) => {
                    stats.mutations += 1;
                    if record.attribute_change().is_some() {
                        stats.attribute_changes += 1;
                    }
                }
                RecordPayload::Interaction(interaction) => {
                    stats.interactions += 1;
                    *stats
                        .event_type_counts
                        .entry(interaction.event_type.clone())
                        .or_insert(0) += 1;
                }
                RecordPayload::Snapshot(_) => stats.snapshots += 1,
            }
        }
        stats.distinct_targets = targets.len();

        stats
    }

    /// Export the log to JSON
    pub fn export_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.records).map_err(|e| e.into())
    }
}

fn validate_records(records: &[ChangeRecord]) -> Result<()> {
    let mut previous_timestamp = 0.0;
    for (index, record) in records.iter().enumerate() {
        if record.sequence_id != index as u64 {
            return Err(RecorderError::NotReplayable {
                reason: format!(
                    "record at index {} has sequence id {}",
                    index, record.sequence_id
                ),
            });
        }
        if record.timestamp < previous_timestamp {
            return Err(RecorderError::NotReplayable {
                reason: format!("timestamp goes backwards at index {}", index),
            });
        }
        if record.is_snapshot() == record.target.is_some() {
            return Err(RecorderError::NotReplayable {
                reason: format!("record at index {} has an unexpected target", index),
            });
        }
        previous_timestamp = record.timestamp;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{EncodedImage, InteractionPayload, MutationPayload, SnapshotPayload};

    fn attribute(name: &str, old: &str, new: &str) -> RecordPayload {
        RecordPayload::Mutation(MutationPayload::AttributeChange {
            attribute_name: name.to_string(),
            old_value: Some(old.to_string()),
            new_value: Some(new.to_string()),
        })
    }

    fn click() -> RecordPayload {
        RecordPayload::Interaction(InteractionPayload {
            event_type: "click".to_string(),
            handler_descriptor: None,
        })
    }

    #[test]
    fn test_append_assigns_dense_sequence_ids() {
        let mut log = ChangeLog::new();
        let node = Some(ObjectRef::new(1));

        for i in 0..5 {
            let record = log.append(attribute("data-i", "a", "b"), node, i as f64).unwrap();
            assert_eq!(record.sequence_id, i);
        }

        assert_eq!(log.len(), 5);
        assert_eq!(log.find(3).unwrap().sequence_id, 3);
        assert!(log.find(5).is_none());
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let mut log = ChangeLog::new();
        let node = Some(ObjectRef::new(1));

        log.append(click(), node, 10.0).unwrap();
        let record = log.append(click(), node, 4.0).unwrap();
        assert_eq!(record.timestamp, 10.0);
    }

    #[test]
    fn test_frozen_log_rejects_appends() {
        let mut log = ChangeLog::new();
        log.append(click(), Some(ObjectRef::new(1)), 0.0).unwrap();
        log.freeze();

        let result = log.append(click(), Some(ObjectRef::new(1)), 1.0);
        assert!(matches!(result, Err(RecorderError::InvalidState { .. })));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_clear_resets_counter() {
        let mut log = ChangeLog::new();
        log.append(click(), Some(ObjectRef::new(1)), 0.0).unwrap();
        log.freeze();
        log.clear();

        assert!(log.is_empty());
        assert!(!log.is_frozen());
        let record = log.append(click(), Some(ObjectRef::new(1)), 0.0).unwrap();
        assert_eq!(record.sequence_id, 0);
    }

    #[test]
    fn test_filters_and_statistics() {
        let mut log = ChangeLog::new();
        log.append(attribute("class", "a", "b"), Some(ObjectRef::new(1)), 1.0)
            .unwrap();
        log.append(click(), Some(ObjectRef::new(2)), 2.0).unwrap();
        log.append(click(), Some(ObjectRef::new(2)), 5.0).unwrap();

        assert_eq!(log.records_by_kind(RecordKind::Interaction).len(), 2);
        assert_eq!(log.records_in_range(Some(2.0), Some(4.0)).len(), 1);
        assert_eq!(log.records_in_range(None, None).len(), 3);

        let stats = log.statistics();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.attribute_changes, 1);
        assert_eq!(stats.interactions, 2);
        assert_eq!(stats.distinct_targets, 2);
        assert_eq!(stats.duration_ms, 5.0);
        assert_eq!(stats.event_type_counts.get("click"), Some(&2));
    }

    #[test]
    fn test_frozen_constructor_validates() {
        let mut log = ChangeLog::new();
        log.append(click(), Some(ObjectRef::new(1)), 0.0).unwrap();
        log.append(click(), Some(ObjectRef::new(1)), 1.0).unwrap();

        let rebuilt = ChangeLog::frozen(log.records().to_vec()).unwrap();
        assert!(rebuilt.is_frozen());
        assert_eq!(rebuilt.len(), 2);

        let mut shuffled = log.records().to_vec();
        shuffled.swap(0, 1);
        assert!(matches!(
            ChangeLog::frozen(shuffled),
            Err(RecorderError::NotReplayable { .. })
        ));
    }

    #[test]
    fn test_append_checks_target_against_kind() {
        let mut log = ChangeLog::new();
        let snapshot = RecordPayload::Snapshot(SnapshotPayload {
            image: EncodedImage {
                mime_type: "image/png".to_string(),
                data_url: "data:image/png;base64,".to_string(),
            },
            width: 8,
            height: 8,
        });

        assert!(matches!(
            log.append(snapshot.clone(), Some(ObjectRef::new(5)), 0.0),
            Err(RecorderError::InvalidState { .. })
        ));
        assert!(matches!(
            log.append(click(), None, 0.0),
            Err(RecorderError::InvalidState { .. })
        ));
        assert!(log.is_empty());

        log.append(snapshot, None, 0.0).unwrap();
        log.append(click(), Some(ObjectRef::new(5)), 1.0).unwrap();
        assert_eq!(log.len(), 2);
        assert!(ChangeLog::frozen(log.records().to_vec()).is_ok());
    }

    #[test]
    fn test_export_json() {
        let mut log = ChangeLog::new();
        log.append(attribute("data-x", "1", "2"), Some(ObjectRef::new(9)), 0.0)
            .unwrap();

        let json = log.export_json().unwrap();
        let parsed: Vec<ChangeRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, log.records());
    }
}
