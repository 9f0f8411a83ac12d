use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::RecorderConfig;
use crate::error::{RecorderError, Result};
use crate::event_log::{ChangeLog, LogStatistics};
use crate::instrumentation::{ListenerInstrumentation, ListenerRegistry};
use crate::record::{
    ChangeRecord, EncodedImage, InteractionPayload, ObjectRef, RecordPayload,
};
use crate::replay::{NavigationDirection, ReplayEngine, ReplayOutcome};
use crate::snapshot::{SnapshotProvider, ViewportCapture};
use crate::source::{expand_batch, DocumentAccess, MutationSource, RawMutation};
use crate::timer::{Clock, TimerId, TimerScheduler};

/// Collaborators a session records from and replays into
#[derive(Clone)]
pub struct PageEnvironment {
    /// Root of the observed subtree
    pub root: ObjectRef,
    pub mutations: Arc<dyn MutationSource>,
    pub listeners: Arc<dyn ListenerRegistry>,
    pub capture: Arc<dyn ViewportCapture>,
    pub document: Arc<dyn DocumentAccess>,
    pub clock: Arc<dyn Clock>,
    pub timers: Arc<dyn TimerScheduler>,
}

impl PageEnvironment {
    /// Use one page object for every document-facing seam
    pub fn from_page<P>(
        root: ObjectRef,
        page: P,
        clock: Arc<dyn Clock>,
        timers: Arc<dyn TimerScheduler>,
    ) -> Self
    where
        P: MutationSource + ListenerRegistry + ViewportCapture + DocumentAccess + Clone + 'static,
    {
        Self {
            root,
            mutations: Arc::new(page.clone()),
            listeners: Arc::new(page.clone()),
            capture: Arc::new(page.clone()),
            document: Arc::new(page),
            clock,
            timers,
        }
    }
}

/// Lifecycle state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Active,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("Idle"),
            SessionState::Active => f.write_str("Active"),
        }
    }
}

/// Metadata about a recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Statistics about a recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub session_id: Uuid,
    pub state: SessionState,
    pub log: LogStatistics,
    pub current_index: isize,
    pub instrumented_nodes: usize,
    pub installed_observers: usize,
    pub teardown_mismatches: usize,
}

/// One recording of a page: capture while active, replay once stopped.
///
/// All inbound signals arrive through `&mut self` methods on one queue, so
/// appends are serialized by construction.
pub struct RecordingSession {
    metadata: SessionMetadata,
    config: RecorderConfig,
    env: PageEnvironment,
    state: SessionState,
    log: ChangeLog,
    start_time: f64,
    current_index: isize,
    instrumentation: Option<ListenerInstrumentation>,
    snapshots: SnapshotProvider,
    subtree_valid: bool,
    teardown_mismatches: usize,
    notifier: Option<mpsc::UnboundedSender<ChangeRecord>>,
}

impl RecordingSession {
    pub fn new(config: RecorderConfig, env: PageEnvironment) -> Self {
        let snapshots = SnapshotProvider::new(config.snapshot.clone(), Arc::clone(&env.capture));
        Self {
            metadata: SessionMetadata {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                started_at: None,
                stopped_at: None,
            },
            config,
            env,
            state: SessionState::Idle,
            log: ChangeLog::new(),
            start_time: 0.0,
            current_index: -1,
            instrumentation: None,
            snapshots,
            subtree_valid: true,
            teardown_mismatches: 0,
            notifier: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.metadata.id
    }

    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn log(&self) -> &ChangeLog {
        &self.log
    }

    pub fn records(&self) -> &[ChangeRecord] {
        self.log.records()
    }

    pub fn current_index(&self) -> isize {
        self.current_index
    }

    pub fn instrumentation(&self) -> Option<&ListenerInstrumentation> {
        self.instrumentation.as_ref()
    }

    pub fn pending_snapshot_timer(&self) -> Option<TimerId> {
        self.snapshots.pending_timer()
    }

    /// Receive every appended record, in log order.
    ///
    /// A session has a single subscriber; subscribing again replaces it.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ChangeRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.attach(tx);
        rx
    }

    /// Deliver appended records to an existing channel
    pub fn attach(&mut self, notifier: mpsc::UnboundedSender<ChangeRecord>) {
        self.notifier = Some(notifier);
    }

    /// Begin recording
    pub fn start(&mut self) -> Result<()> {
        if self.is_active() {
            return Err(RecorderError::Busy);
        }

        self.log.clear();
        self.current_index = -1;
        self.subtree_valid = true;
        self.teardown_mismatches = 0;
        self.start_time = self.env.clock.now_ms();

        self.env
            .mutations
            .subscribe(self.env.root, &self.config.observe)?;

        let instrumentation =
            match ListenerInstrumentation::install(self.env.listeners.as_ref(), self.env.root) {
                Ok(instrumentation) => instrumentation,
                Err(err) => {
                    self.env.mutations.unsubscribe();
                    return Err(err);
                }
            };

        tracing::info!(
            session = %self.metadata.id,
            root = %self.env.root,
            observers = instrumentation.observer_count(),
            "recording started"
        );

        self.instrumentation = Some(instrumentation);
        self.state = SessionState::Active;
        self.metadata.started_at = Some(Utc::now());
        self.metadata.stopped_at = None;

        self.request_snapshot();
        Ok(())
    }

    /// Stop recording and freeze the log. A no-op when idle.
    pub fn stop(&mut self) -> &[ChangeRecord] {
        if !self.is_active() {
            return self.log.records();
        }

        self.request_snapshot();
        self.release();

        self.log.freeze();
        self.current_index = self.log.len() as isize - 1;
        self.metadata.stopped_at = Some(Utc::now());

        tracing::info!(
            session = %self.metadata.id,
            records = self.log.len(),
            "recording stopped"
        );

        self.log.records()
    }

    /// Mutation notifications from the change source, in arrival order
    pub fn on_mutations(&mut self, batch: Vec<RawMutation>) -> usize {
        if !self.is_active() || !self.subtree_valid {
            tracing::debug!(count = batch.len(), "mutation batch dropped");
            return 0;
        }

        let document = Arc::clone(&self.env.document);
        let mut appended = 0;
        for (target, payload) in expand_batch(batch, document.as_ref()) {
            if self
                .append(RecordPayload::Mutation(payload), Some(target))
                .is_some()
            {
                appended += 1;
            }
        }
        appended
    }

    /// The observed subtree went away; later mutation batches are dropped
    pub fn on_subtree_invalidated(&mut self) {
        if self.subtree_valid {
            tracing::debug!(session = %self.metadata.id, "observed subtree invalidated");
        }
        self.subtree_valid = false;
    }

    /// An event reached one of the installed observers
    pub fn on_interaction(&mut self, node: ObjectRef, event_type: &str) -> Option<u64> {
        if !self.is_active() {
            return None;
        }

        let observer = self
            .instrumentation
            .as_ref()
            .and_then(|i| i.lookup(node, event_type));
        let handler_descriptor = match observer {
            Some(observer) => observer.handler_descriptor.clone(),
            None => {
                tracing::debug!(node = %node, event_type, "event on uninstrumented node dropped");
                return None;
            }
        };

        self.append(
            RecordPayload::Interaction(InteractionPayload {
                event_type: event_type.to_string(),
                handler_descriptor,
            }),
            Some(node),
        )
    }

    /// Paint completed; capture once the page has been quiet for a while
    pub fn on_paint(&mut self) {
        if self.is_active() {
            self.snapshots.on_paint(self.env.timers.as_ref());
        }
    }

    pub fn on_timer_fired(&mut self, id: TimerId) -> Option<u64> {
        if self.snapshots.on_timer_fired(id) {
            self.request_snapshot()
        } else {
            None
        }
    }

    /// Capture a snapshot record now.
    ///
    /// Does nothing when the session is idle, when the last record already is
    /// a snapshot, or when capture is unavailable.
    pub fn request_snapshot(&mut self) -> Option<u64> {
        if !self.is_active() {
            return None;
        }
        if self.log.last().map(|r| r.is_snapshot()).unwrap_or(false) {
            tracing::debug!("last record is a snapshot; capture skipped");
            return None;
        }

        let payload = self.snapshots.capture()?;
        let sequence_id = self.append(RecordPayload::Snapshot(payload), None)?;
        tracing::debug!(sequence_id, "snapshot captured");
        Some(sequence_id)
    }

    /// Image showing the page as of the given record.
    ///
    /// That is the first snapshot at or after the record, or the latest one
    /// before it when no later capture exists.
    pub fn snapshot_for(&self, correlation_id: u64) -> Option<&EncodedImage> {
        let records = self.log.records();
        let index = usize::try_from(correlation_id).ok()?;
        if index >= records.len() {
            return None;
        }

        records[index..]
            .iter()
            .find_map(snapshot_image)
            .or_else(|| records[..index].iter().rev().find_map(snapshot_image))
    }

    /// Scrub the document to the state right after record `index`
    pub fn move_to(&mut self, index: isize) -> Result<ReplayOutcome> {
        if self.is_active() {
            return Err(RecorderError::invalid_state("move_to", self.state));
        }
        if self.teardown_mismatches > 0 {
            return Err(RecorderError::NotReplayable {
                reason: format!(
                    "{} observers were missing at teardown",
                    self.teardown_mismatches
                ),
            });
        }

        let engine = ReplayEngine::new(self.log.records(), self.env.document.as_ref());
        let outcome = engine.move_to(self.current_index, index)?;
        self.current_index = index;
        Ok(outcome)
    }

    /// Move one record in the given direction
    pub fn step(&mut self, direction: NavigationDirection) -> Result<ReplayOutcome> {
        let target = match direction {
            NavigationDirection::Forward => self.current_index + 1,
            NavigationDirection::Backward => self.current_index - 1,
        };
        self.move_to(target)
    }

    pub fn statistics(&self) -> SessionStatistics {
        SessionStatistics {
            session_id: self.metadata.id,
            state: self.state,
            log: self.log.statistics(),
            current_index: self.current_index,
            instrumented_nodes: self
                .instrumentation
                .as_ref()
                .map(|i| i.instrumented_nodes().count())
                .unwrap_or(0),
            installed_observers: self
                .instrumentation
                .as_ref()
                .map(|i| i.observer_count())
                .unwrap_or(0),
            teardown_mismatches: self.teardown_mismatches,
        }
    }

    // Private helper methods

    fn append(&mut self, payload: RecordPayload, target: Option<ObjectRef>) -> Option<u64> {
        if !self.is_active() {
            return None;
        }

        let timestamp = self.env.clock.now_ms() - self.start_time;
        let record = match self.log.append(payload, target, timestamp) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(error = %err, "append rejected");
                return None;
            }
        };
        let sequence_id = record.sequence_id;

        let delivered = match &self.notifier {
            Some(notifier) => notifier.send(record.clone()).is_ok(),
            None => true,
        };
        if !delivered {
            tracing::debug!("append subscriber dropped");
            self.notifier = None;
        }

        Some(sequence_id)
    }

    /// Undo everything `start` put in place
    fn release(&mut self) {
        self.snapshots.cancel_pending(self.env.timers.as_ref());

        if let Some(mut instrumentation) = self.instrumentation.take() {
            let report = instrumentation.teardown(self.env.listeners.as_ref());
            if !report.is_clean() {
                tracing::error!(
                    session = %self.metadata.id,
                    missing = report.missing,
                    "listener teardown mismatch"
                );
                self.teardown_mismatches += report.missing;
            }
        }

        self.env.mutations.unsubscribe();
        self.state = SessionState::Idle;
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if self.is_active() {
            self.release();
        }
    }
}

fn snapshot_image(record: &ChangeRecord) -> Option<&EncodedImage> {
    match &record.payload {
        RecordPayload::Snapshot(snapshot) => Some(&snapshot.image),
        RecordPayload::Mutation(_) | RecordPayload::Interaction(_) => None,
    }
}
