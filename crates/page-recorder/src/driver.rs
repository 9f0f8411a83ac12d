use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::RecorderConfig;
use crate::controller::RecorderController;
use crate::error::{RecorderError, Result};
use crate::record::{ChangeRecord, ObjectRef};
use crate::session::PageEnvironment;
use crate::source::RawMutation;
use crate::timer::{TimerId, TokioTimerScheduler};
use crate::transport::{ContentMessage, HostMessage};

/// One item on the driver's input queue
#[derive(Debug, Clone, PartialEq)]
pub enum DriverInput {
    Host(HostMessage),
    Mutations(Vec<RawMutation>),
    Interaction { node: ObjectRef, event_type: String },
    Paint,
    TimerFired(TimerId),
    SubtreeInvalidated,
    Shutdown,
}

/// Handle to a running recorder task.
///
/// Host requests, platform signals and debounce timer fires share one input
/// queue and are handled strictly in arrival order. Everything the host
/// needs to see comes back on a single outbound channel.
pub struct RecorderDriver {
    inputs: mpsc::UnboundedSender<DriverInput>,
    task: Option<JoinHandle<()>>,
}

impl RecorderDriver {
    /// Spawn the recorder task on the current runtime.
    ///
    /// The environment's timer scheduler is replaced with one whose fires
    /// land on the driver's own queue.
    pub fn spawn(
        config: RecorderConfig,
        mut env: PageEnvironment,
    ) -> (Self, mpsc::UnboundedReceiver<ContentMessage>) {
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        env.timers = Arc::new(TokioTimerScheduler::mapped(
            inputs_tx.clone(),
            DriverInput::TimerFired,
        ));
        let mut controller = RecorderController::new(config, env);
        let changes = controller.subscribe();

        let task = tokio::spawn(
            DriverLoop {
                controller,
                changes,
                outbound: outbound_tx,
            }
            .run(inputs_rx),
        );

        (
            Self {
                inputs: inputs_tx,
                task: Some(task),
            },
            outbound_rx,
        )
    }

    /// Queue one input for the recorder task
    pub fn send(&self, input: DriverInput) -> Result<()> {
        self.inputs
            .send(input)
            .map_err(|_| RecorderError::invalid_state("send", "shut down"))
    }

    pub fn host(&self, message: HostMessage) -> Result<()> {
        self.send(DriverInput::Host(message))
    }

    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Stop the task after it has drained everything queued before this call
    pub async fn shutdown(mut self) -> Result<()> {
        // The task may already be gone; joining tells us either way.
        let _ = self.inputs.send(DriverInput::Shutdown);
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| RecorderError::CollaboratorFailed {
                reason: format!("recorder task failed: {}", e),
            })?;
        }
        Ok(())
    }
}

impl Drop for RecorderDriver {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct DriverLoop {
    controller: RecorderController,
    changes: mpsc::UnboundedReceiver<ChangeRecord>,
    outbound: mpsc::UnboundedSender<ContentMessage>,
}

impl DriverLoop {
    async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<DriverInput>) {
        tracing::debug!("recorder driver started");

        while let Some(input) = inputs.recv().await {
            if matches!(input, DriverInput::Shutdown) {
                break;
            }

            let replies = self.dispatch(input);
            self.flush_changes();
            for reply in replies {
                self.emit(reply);
            }
        }

        self.controller.destroy();
        self.flush_changes();
        tracing::debug!("recorder driver stopped");
    }

    fn dispatch(&mut self, input: DriverInput) -> Vec<ContentMessage> {
        match input {
            DriverInput::Host(message) => return self.controller.handle(message),
            DriverInput::Mutations(batch) => {
                self.controller.on_mutations(batch);
            }
            DriverInput::Interaction { node, event_type } => {
                self.controller.on_interaction(node, &event_type);
            }
            DriverInput::Paint => self.controller.on_paint(),
            DriverInput::TimerFired(id) => {
                self.controller.on_timer_fired(id);
            }
            DriverInput::SubtreeInvalidated => self.controller.on_subtree_invalidated(),
            DriverInput::Shutdown => {}
        }
        Vec::new()
    }

    /// Announce every record appended since the last flush, in log order
    fn flush_changes(&mut self) {
        while let Ok(record) = self.changes.try_recv() {
            self.emit(ContentMessage::on_change(&record));
        }
    }

    fn emit(&self, message: ContentMessage) {
        if self.outbound.send(message).is_err() {
            tracing::debug!("host receiver dropped; message discarded");
        }
    }
}
