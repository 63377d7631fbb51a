//! EMM Task - serializes identification events for every UE
//!
//! Inbound entry points from the S1AP/NAS adapters and timer expiries share
//! one channel, so events for the same UE are handled one at a time.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use nextgsim_common::logging::{log_emm_primitive, Direction};

use super::identification::{IdentificationCompletion, IdentificationController};
use crate::tasks::{EmmMessage, EventBus, Task, TaskMessage};
use crate::timer::TimerService;

/// EMM task driving the identification controller.
pub struct EmmTask<T: TimerService, B: EventBus> {
    controller: IdentificationController<T, B>,
    handled: u64,
}

impl<T, B> EmmTask<T, B>
where
    T: TimerService + 'static,
    B: EventBus + 'static,
{
    /// Creates the task around a controller.
    pub fn new(controller: IdentificationController<T, B>) -> Self {
        Self {
            controller,
            handled: 0,
        }
    }

    /// Spawns the task on the current runtime.
    pub fn spawn(mut self, rx: mpsc::Receiver<TaskMessage<EmmMessage>>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(rx).await })
    }

    async fn handle_message(&mut self, msg: EmmMessage) {
        self.handled += 1;
        log_emm_primitive(Direction::Rx, msg.primitive(), msg.ue_id());

        match msg {
            EmmMessage::StartIdentification {
                ue_id,
                identity_type,
                parent,
            } => {
                if let Err(e) = self.controller.start(ue_id, identity_type, parent).await {
                    error!(ue_id = %ue_id, "failed to start identification: {}", e);
                }
            }
            EmmMessage::IdentificationComplete { ue_id, identity } => {
                match self.controller.complete(ue_id, identity).await {
                    Ok(IdentificationCompletion::Ignored) => {
                        debug!(ue_id = %ue_id, "Identity Response ignored")
                    }
                    Ok(IdentificationCompletion::Confirmed) => {}
                    Ok(IdentificationCompletion::CollisionDeferred { old_ue_id }) => {
                        info!(ue_id = %ue_id, old_ue_id = %old_ue_id, "identity deferred until old context is removed")
                    }
                    Err(e) => error!(ue_id = %ue_id, "identification failed: {}", e),
                }
            }
            EmmMessage::TimerExpired(event) => self.controller.on_timer_expired(event).await,
            EmmMessage::LowerLayerFailure { ue_id } => {
                self.controller.on_lower_layer_failure(ue_id).await
            }
            EmmMessage::NonDeliveredHo { ue_id } => {
                self.controller.on_non_delivered_ho(ue_id).await
            }
            EmmMessage::Abort { ue_id } => {
                if !self.controller.abort(ue_id) {
                    debug!(ue_id = %ue_id, "abort without identification procedure");
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl<T, B> Task for EmmTask<T, B>
where
    T: TimerService + 'static,
    B: EventBus + 'static,
{
    type Message = EmmMessage;

    async fn run(&mut self, mut rx: mpsc::Receiver<TaskMessage<Self::Message>>) {
        info!("EMM task started");
        loop {
            match rx.recv().await {
                Some(TaskMessage::Message(msg)) => self.handle_message(msg).await,
                Some(TaskMessage::Shutdown) => break,
                None => {
                    warn!("EMM task channel closed");
                    break;
                }
            }
        }
        info!("EMM task stopped, {} messages handled", self.handled);
    }
}
