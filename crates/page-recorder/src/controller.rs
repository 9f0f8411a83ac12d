use tokio::sync::mpsc;

use crate::config::RecorderConfig;
use crate::error::{RecorderError, Result};
use crate::record::{ChangeRecord, EncodedImage, ObjectRef};
use crate::replay::ReplayOutcome;
use crate::session::{PageEnvironment, RecordingSession, SessionState};
use crate::source::RawMutation;
use crate::timer::TimerId;
use crate::transport::{ContentMessage, HostMessage};

/// Owns at most one recording session per page.
///
/// A finished session stays around for replay and screenshot lookups until
/// the next `start` replaces it or `destroy` drops it.
pub struct RecorderController {
    config: RecorderConfig,
    env: PageEnvironment,
    session: Option<RecordingSession>,
    changes: Option<mpsc::UnboundedSender<ChangeRecord>>,
}

impl RecorderController {
    pub fn new(config: RecorderConfig, env: PageEnvironment) -> Self {
        Self {
            config,
            env,
            session: None,
            changes: None,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    pub fn is_recording(&self) -> bool {
        self.session
            .as_ref()
            .map(RecordingSession::is_active)
            .unwrap_or(false)
    }

    /// Forward every record appended by sessions started from now on
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ChangeRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.changes = Some(tx);
        rx
    }

    /// Start a fresh session, replacing a finished one
    pub fn start(&mut self) -> Result<()> {
        if self.is_recording() {
            return Err(RecorderError::Busy);
        }

        self.destroy();

        let mut session = RecordingSession::new(self.config.clone(), self.env.clone());
        if let Some(changes) = &self.changes {
            session.attach(changes.clone());
        }
        session.start()?;
        self.session = Some(session);
        Ok(())
    }

    /// Stop recording and return the frozen log.
    ///
    /// Without a session there is nothing to stop and the log is empty.
    pub fn stop(&mut self) -> Result<Vec<ChangeRecord>> {
        match self.session.as_mut() {
            Some(session) => Ok(session.stop().to_vec()),
            None => {
                tracing::debug!("stop without a session");
                Ok(Vec::new())
            }
        }
    }

    pub fn move_to(&mut self, index: isize) -> Result<ReplayOutcome> {
        match self.session.as_mut() {
            Some(session) => session.move_to(index),
            None => Err(RecorderError::NotReplayable {
                reason: "no recording has been made".to_string(),
            }),
        }
    }

    /// Image for the record with the given sequence id
    pub fn request_snapshot(&self, correlation_id: u64) -> Option<EncodedImage> {
        self.session
            .as_ref()
            .and_then(|s| s.snapshot_for(correlation_id))
            .cloned()
    }

    /// Drop the session, stopping it first if it is still recording
    pub fn destroy(&mut self) {
        if let Some(mut session) = self.session.take() {
            if session.state() == SessionState::Active {
                session.stop();
            }
            tracing::debug!(session = %session.id(), "session destroyed");
        }
    }

    /// Answer one host request
    pub fn handle(&mut self, message: HostMessage) -> Vec<ContentMessage> {
        match message {
            HostMessage::Start => match self.start() {
                Ok(()) => Vec::new(),
                Err(err) => vec![ContentMessage::error(&err)],
            },
            HostMessage::Stop => match self.stop() {
                Ok(records) => vec![ContentMessage::on_stop(&records)],
                Err(err) => vec![ContentMessage::error(&err)],
            },
            HostMessage::MoveTo { index } => match self.move_to(index) {
                Ok(_) => Vec::new(),
                Err(err) => vec![ContentMessage::error(&err)],
            },
            HostMessage::GetScreenshot { id } => vec![ContentMessage::OnScreenshot {
                id,
                image: self.request_snapshot(id),
            }],
        }
    }

    pub fn on_mutations(&mut self, batch: Vec<RawMutation>) -> usize {
        self.session
            .as_mut()
            .map(|s| s.on_mutations(batch))
            .unwrap_or(0)
    }

    pub fn on_interaction(&mut self, node: ObjectRef, event_type: &str) -> Option<u64> {
        self.session.as_mut()?.on_interaction(node, event_type)
    }

    pub fn on_paint(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.on_paint();
        }
    }

    pub fn on_timer_fired(&mut self, id: TimerId) -> Option<u64> {
        self.session.as_mut()?.on_timer_fired(id)
    }

    pub fn on_subtree_invalidated(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.on_subtree_invalidated();
        }
    }
}

impl Drop for RecorderController {
    fn drop(&mut self) {
        self.destroy();
    }
}
