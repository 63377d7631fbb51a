//! EMM task harness
//!
//! Spawns an [`EmmTask`] with the tokio [`NasTimerService`] and keeps the
//! notification receiver on the test side, so tests observe exactly what the
//! EMM layer publishes to MME_APP.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use nextgsim_common::config::NasConfig;
use nextgsim_common::MmeUeS1apId;
use nextgsim_mme::{
    EmmContextStore, EmmMessage, EmmNotification, EmmTask, IdentificationController,
    IdentificationProcedure, IdentityType, MmeAppRegistry, NasTimerService, ProcedureId,
    SpecificProcedureKind, TaskHandle, TaskMessage,
};

use crate::test_fixtures::TestUe;
use crate::test_utils::settle;

/// Notification channel capacity used by the harness
const HARNESS_CHANNEL_CAPACITY: usize = 64;

/// Running EMM task plus the state it shares with the test.
pub struct MmeHarness {
    /// EMM context store shared with the controller
    pub store: Arc<EmmContextStore>,
    /// MME_APP registry shared with the controller
    pub registry: Arc<MmeAppRegistry>,
    /// Timer service posting expiries to the EMM task
    pub timers: Arc<NasTimerService>,
    /// Handle to the EMM task
    pub emm: TaskHandle<EmmMessage>,
    notifications: mpsc::Receiver<TaskMessage<EmmNotification>>,
    join: JoinHandle<()>,
}

impl MmeHarness {
    /// Spawns the EMM task on the current runtime.
    pub fn new(nas: NasConfig) -> Self {
        let (emm_tx, emm_rx) = mpsc::channel(HARNESS_CHANNEL_CAPACITY);
        let (bus_tx, notifications) = mpsc::channel(HARNESS_CHANNEL_CAPACITY);
        let emm = TaskHandle::new(emm_tx);

        let store = Arc::new(EmmContextStore::new());
        let registry = Arc::new(MmeAppRegistry::new());
        let timers = Arc::new(NasTimerService::new(emm.clone()));
        let controller = IdentificationController::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&timers),
            TaskHandle::new(bus_tx),
            nas,
        );
        let join = EmmTask::new(controller).spawn(emm_rx);

        Self {
            store,
            registry,
            timers,
            emm,
            notifications,
            join,
        }
    }

    /// Inserts the UE's EMM context.
    pub fn add_ue(&self, ue: &TestUe) {
        self.store.insert(ue.context());
    }

    /// Inserts the UE's EMM context with a running attach procedure.
    ///
    /// # Panics
    /// Panics if the context cannot be found right after insertion.
    pub fn add_attaching_ue(&self, ue: &TestUe) -> ProcedureId {
        self.add_ue(ue);
        self.store
            .begin_specific_procedure(ue.ue_id, SpecificProcedureKind::Attach)
            .expect("context inserted")
    }

    /// Sends a message to the EMM task and lets it be processed.
    ///
    /// # Panics
    /// Panics if the EMM task has stopped.
    pub async fn send(&self, msg: EmmMessage) {
        self.emm.send(msg).await.expect("EMM task running");
        settle().await;
    }

    /// Requests an IMSI for the UE.
    pub async fn start_imsi(&self, ue_id: MmeUeS1apId, parent: Option<ProcedureId>) {
        self.send(EmmMessage::StartIdentification {
            ue_id,
            identity_type: IdentityType::Imsi,
            parent,
        })
        .await;
    }

    /// Moves paused time forward and lets expiries be processed.
    pub async fn advance(&self, duration: std::time::Duration) {
        tokio::time::advance(duration).await;
        settle().await;
    }

    /// Returns every notification published so far.
    pub fn drain(&mut self) -> Vec<EmmNotification> {
        let mut out = Vec::new();
        while let Ok(msg) = self.notifications.try_recv() {
            if let Some(notification) = msg.into_message() {
                out.push(notification);
            }
        }
        out
    }

    /// Returns a copy of the UE's identification record.
    pub fn identification(&self, ue_id: MmeUeS1apId) -> Option<IdentificationProcedure> {
        self.store
            .with_context(ue_id, |ctx| ctx.procedures.identification.clone())
            .flatten()
    }

    /// Stops the EMM task and its timers.
    ///
    /// # Panics
    /// Panics if the EMM task panicked.
    pub async fn shutdown(self) {
        self.timers.stop_all();
        let _ = self.emm.shutdown().await;
        self.join.await.expect("EMM task exits cleanly");
    }
}

/// Counts the Identity Requests in a notification list.
pub fn identity_requests(notifications: &[EmmNotification]) -> usize {
    notifications
        .iter()
        .filter(|n| matches!(n, EmmNotification::SendIdentityRequest { .. }))
        .count()
}
