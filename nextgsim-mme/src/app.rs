//! MME_APP Task - consumer of EMM-SAP notifications
//!
//! Stands in for the MME_APP/ESM side of the EMM-SAP: it applies teardown
//! requests to the context store and the registry, and registers confirmed
//! IMSIs. Downlink NAS transport is outside this crate, so Identity Requests
//! are only logged.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use nextgsim_common::MmeUeS1apId;

use crate::context::{EmmContextStore, MmeAppRegistry, RemoveOutcome};
use crate::tasks::{EmmNotification, Task, TaskMessage};
use crate::timer::TimerService;

/// MME_APP task.
pub struct MmeAppTask<T: TimerService> {
    store: Arc<EmmContextStore>,
    registry: Arc<MmeAppRegistry>,
    timers: Arc<T>,
    /// Identity Requests handed to the (external) NAS transport
    identity_requests: u64,
}

impl<T: TimerService + 'static> MmeAppTask<T> {
    /// Creates the task.
    pub fn new(store: Arc<EmmContextStore>, registry: Arc<MmeAppRegistry>, timers: Arc<T>) -> Self {
        Self {
            store,
            registry,
            timers,
            identity_requests: 0,
        }
    }

    /// Spawns the task on the current runtime.
    pub fn spawn(mut self, rx: mpsc::Receiver<TaskMessage<EmmNotification>>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(rx).await })
    }

    fn handle_notification(&mut self, notification: EmmNotification) {
        match notification {
            EmmNotification::SendIdentityRequest {
                ue_id,
                identity_type,
                security,
            } => {
                self.identity_requests += 1;
                debug!(
                    ue_id = %ue_id,
                    identity_type = %identity_type,
                    ksi = security.ksi,
                    "Identity Request handed to NAS transport"
                );
            }
            EmmNotification::ProcedureStarted { ue_id } => {
                debug!(ue_id = %ue_id, "common procedure pending")
            }
            EmmNotification::ProcedureConfirmed { ue_id, notify, .. } => {
                if notify {
                    self.register_imsi(ue_id);
                }
            }
            EmmNotification::ProcedureAborted { ue_id, cause, .. } => {
                info!(ue_id = %ue_id, cause = %cause, "common procedure aborted")
            }
            EmmNotification::TeardownSession { ue_id, cause } => {
                info!(ue_id = %ue_id, cause = %cause, "implicit detach");
                self.remove_ue(ue_id);
            }
            EmmNotification::ApplicationTeardown { ue_id } => {
                if self.registry.remove_ue(ue_id) {
                    info!(ue_id = %ue_id, "MME_APP context released");
                }
            }
            EmmNotification::SpecificProcedureRetry {
                ue_id,
                procedure,
                old_ue_id,
            } => {
                if let Some(old) = old_ue_id.filter(|old| self.store.contains(*old)) {
                    warn!(ue_id = %ue_id, old_ue_id = %old, "old context still present at retry");
                }
                info!(ue_id = %ue_id, procedure = %procedure, "specific procedure may resume");
            }
        }
    }

    fn register_imsi(&self, ue_id: MmeUeS1apId) {
        if let Some(imsi) = self.store.with_context(ue_id, |ctx| ctx.imsi.clone()).flatten() {
            self.registry.register(imsi, ue_id);
        }
    }

    fn remove_ue(&self, ue_id: MmeUeS1apId) {
        match self.store.remove(ue_id) {
            RemoveOutcome::Removed(mut ctx) => {
                for timer_id in ctx.procedures.delete_all() {
                    self.timers.stop(timer_id);
                }
            }
            RemoveOutcome::AlreadyAbsent => debug!(ue_id = %ue_id, "EMM context already removed"),
        }
        self.registry.remove_ue(ue_id);
    }
}

#[async_trait::async_trait]
impl<T: TimerService + 'static> Task for MmeAppTask<T> {
    type Message = EmmNotification;

    async fn run(&mut self, mut rx: mpsc::Receiver<TaskMessage<Self::Message>>) {
        info!("MME_APP task started");
        while let Some(TaskMessage::Message(notification)) = rx.recv().await {
            self.handle_notification(notification);
        }
        info!(
            "MME_APP task stopped, {} Identity Requests sent",
            self.identity_requests
        );
    }
}
