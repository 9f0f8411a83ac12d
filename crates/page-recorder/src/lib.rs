//! # Stratoswarm Page Recorder
//!
//! Records what happens to a live document while a session is active and
//! lets a host scrub back and forth through the recording afterwards.
//!
//! ## Core Concepts
//!
//! - **Change Records**: Every attribute or child-list mutation, every event
//!   reaching an instrumented listener, and every viewport snapshot becomes
//!   one record in an append-only log with dense sequence ids.
//! - **Listener Instrumentation**: One observation listener per distinct
//!   (node, event type) pair that already has author handlers, installed at
//!   start and removed exactly at stop.
//! - **Debounced Snapshots**: Paint signals restart a quiescence window; a
//!   burst of paints yields at most one capture.
//! - **Attribute Replay**: Once stopped, `move_to` re-applies or reverses
//!   recorded attribute changes on the live document.
//! - **Transport Split**: Logs cross the host boundary as plain records plus
//!   a parallel list of node references.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use stratoswarm_page_recorder::*;
//! use stratoswarm_page_recorder::mock::MockDocument;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let page = MockDocument::new();
//!     let (driver, mut outbound) = PageRecorder::builder()
//!         .with_debounce_ms(50)
//!         .spawn(page.root(), page.clone())?;
//!
//!     driver.host(HostMessage::Start)?;
//!     // ... the page changes, platform signals are sent to the driver ...
//!     driver.host(HostMessage::Stop)?;
//!
//!     while let Some(message) = outbound.recv().await {
//!         if let ContentMessage::OnStop { records, nodes } = message {
//!             let log = transport::deserialize(records, nodes)?;
//!             println!("recorded {} changes", log.len());
//!             break;
//!         }
//!     }
//!
//!     driver.shutdown().await
//! }
//! ```

use std::sync::Arc;
use tokio::sync::mpsc;

pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod event_log;
pub mod instrumentation;
pub mod mock;
pub mod record;
pub mod replay;
pub mod session;
pub mod snapshot;
pub mod source;
pub mod telemetry;
pub mod timer;
pub mod transport;

// Re-export key types for convenience
pub use error::{RecorderError, Result};

pub use config::{LogConfig, RecorderConfig};

pub use record::{
    ChangeRecord, EncodedImage, InteractionPayload, MutationPayload, ObjectRef, RecordKind,
    RecordPayload, SnapshotPayload,
};

pub use event_log::{ChangeLog, LogStatistics};

pub use source::{DocumentAccess, MutationSource, ObserveOptions, RawMutation};

pub use instrumentation::{ListenerInfo, ListenerInstrumentation, ListenerRegistry};

pub use snapshot::{CaptureRegion, SnapshotConfig, SnapshotProvider, Viewport, ViewportCapture};

pub use timer::{Clock, SystemClock, TimerId, TimerScheduler, TokioTimerScheduler};

pub use replay::{NavigationDirection, ReplayEngine, ReplayOutcome};

pub use session::{
    PageEnvironment, RecordingSession, SessionMetadata, SessionState, SessionStatistics,
};

pub use transport::{ContentMessage, HostMessage, NodeRefSlot, PlainRecord};

pub use controller::RecorderController;

pub use driver::{DriverInput, RecorderDriver};

pub use telemetry::init_tracing;

/// Builder for wiring a page into a recorder
pub struct PageRecorderBuilder {
    config: RecorderConfig,
    clock: Option<Arc<dyn Clock>>,
    timers: Option<Arc<dyn TimerScheduler>>,
}

impl Default for PageRecorderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PageRecorderBuilder {
    pub fn new() -> Self {
        Self {
            config: RecorderConfig::default(),
            clock: None,
            timers: None,
        }
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: RecorderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_observe_options(mut self, options: ObserveOptions) -> Self {
        self.config.observe = options;
        self
    }

    pub fn with_snapshot_config(mut self, config: SnapshotConfig) -> Self {
        self.config.snapshot = config;
        self
    }

    /// Quiescence window between the last paint and a snapshot
    pub fn with_debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.config.snapshot.debounce_ms = debounce_ms;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Needed by [`build`](Self::build); [`spawn`](Self::spawn) brings its own
    pub fn with_timer_scheduler(mut self, timers: Arc<dyn TimerScheduler>) -> Self {
        self.timers = Some(timers);
        self
    }

    /// Build a controller driven directly by the caller
    pub fn build<P>(self, root: ObjectRef, page: P) -> Result<RecorderController>
    where
        P: MutationSource + ListenerRegistry + ViewportCapture + DocumentAccess + Clone + 'static,
    {
        self.config.validate()?;
        let timers = self.timers.ok_or_else(|| RecorderError::ConfigError {
            message: "a timer scheduler is required when not running a driver".to_string(),
        })?;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));

        let env = PageEnvironment::from_page(root, page, clock, timers);
        Ok(RecorderController::new(self.config, env))
    }

    /// Spawn a driver task on the current tokio runtime
    pub fn spawn<P>(
        self,
        root: ObjectRef,
        page: P,
    ) -> Result<(RecorderDriver, mpsc::UnboundedReceiver<ContentMessage>)>
    where
        P: MutationSource + ListenerRegistry + ViewportCapture + DocumentAccess + Clone + 'static,
    {
        self.config.validate()?;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));
        // Placeholder; the driver installs its own tokio-backed scheduler.
        let timers: Arc<dyn TimerScheduler> = Arc::new(timer::ManualScheduler::new());

        let env = PageEnvironment::from_page(root, page, clock, timers);
        Ok(RecorderDriver::spawn(self.config, env))
    }
}

/// Entry point for building recorders
pub struct PageRecorder;

impl PageRecorder {
    pub fn builder() -> PageRecorderBuilder {
        PageRecorderBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDocument;
    use crate::timer::{ManualClock, ManualScheduler};

    #[test]
    fn test_build_requires_timer_scheduler() {
        let page = MockDocument::new();
        let result = PageRecorder::builder().build(page.root(), page.clone());
        assert!(matches!(result, Err(RecorderError::ConfigError { .. })));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let page = MockDocument::new();
        let result = PageRecorder::builder()
            .with_debounce_ms(0)
            .with_timer_scheduler(Arc::new(ManualScheduler::new()))
            .build(page.root(), page.clone());
        assert!(matches!(result, Err(RecorderError::ConfigError { .. })));
    }

    #[test]
    fn test_builder_controller() {
        let page = MockDocument::new();
        let root = page.root();
        let clock = ManualClock::new();
        let mut controller = PageRecorder::builder()
            .with_debounce_ms(25)
            .with_clock(Arc::new(clock.clone()))
            .with_timer_scheduler(Arc::new(ManualScheduler::new()))
            .build(root, page.clone())
            .unwrap();

        assert_eq!(controller.config().snapshot.debounce_ms, 25);
        controller.start().unwrap();
        clock.advance(12.0);
        page.set_attribute(root, "lang", Some("en")).unwrap();
        controller.on_mutations(page.take_mutations());

        let records = controller.stop().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].timestamp, 12.0);
        assert_eq!(
            records[1].to_string(),
            format!("Attributes change on node {}. lang changed from null to en", root)
        );
    }

    #[tokio::test]
    async fn test_builder_spawn() {
        let page = MockDocument::new();
        let (driver, mut outbound) = PageRecorder::builder()
            .spawn(page.root(), page.clone())
            .unwrap();

        driver.host(HostMessage::Start).unwrap();
        driver.host(HostMessage::Stop).unwrap();

        let mut stopped = None;
        while let Some(message) = outbound.recv().await {
            if let ContentMessage::OnStop { records, nodes } = message {
                stopped = Some(transport::deserialize(records, nodes).unwrap());
                break;
            }
        }
        assert_eq!(stopped.map(|log| log.len()), Some(1));
        driver.shutdown().await.unwrap();
    }
}
