//! IMSI collision handling for the identification procedure
//!
//! A UE that re-attaches under a new MME UE S1AP id can reveal an IMSI that
//! is still owned by its old context. The old context is invalidated and
//! scheduled for removal before the new one may claim the IMSI, so two live
//! contexts never share it. The new context's attach/TAU is parked on its
//! retry timer and resumes once the old context is gone.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use nextgsim_common::{Imsi, MmeUeS1apId};

use super::identification::IdentificationError;
use super::procedure::{PendingReconciliation, ProcedureId};
use crate::context::{EmmCause, EmmContextStore, MmeAppRegistry};
use crate::tasks::{EmmNotification, EventBus};
use crate::timer::{TimerKind, TimerService};

/// Outcome of resolving an IMSI received in an Identity Response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImsiResolution {
    /// No other context owns the IMSI; it is now set on the UE.
    Claimed,
    /// Another EMM context owned the IMSI and is being implicitly detached.
    DisplacedEmmContext {
        /// UE id of the displaced context
        old_ue_id: MmeUeS1apId,
    },
    /// The MME_APP layer still held the IMSI under another UE id.
    DisplacedAppContext {
        /// UE id of the displaced MME_APP context
        old_ue_id: MmeUeS1apId,
    },
}

impl ImsiResolution {
    /// Returns the displaced UE id, if any.
    pub fn old_ue_id(&self) -> Option<MmeUeS1apId> {
        match self {
            ImsiResolution::Claimed => None,
            ImsiResolution::DisplacedEmmContext { old_ue_id }
            | ImsiResolution::DisplacedAppContext { old_ue_id } => Some(*old_ue_id),
        }
    }
}

/// Resolves IMSI ownership between the identified UE and older contexts.
pub struct CollisionResolver<'a, T: TimerService, B: EventBus> {
    store: &'a EmmContextStore,
    registry: &'a MmeAppRegistry,
    timers: &'a T,
    bus: &'a B,
    retry_interval: Duration,
}

impl<'a, T: TimerService, B: EventBus> CollisionResolver<'a, T, B> {
    /// Creates a resolver over the given store, registry and collaborators.
    pub fn new(
        store: &'a EmmContextStore,
        registry: &'a MmeAppRegistry,
        timers: &'a T,
        bus: &'a B,
        retry_interval: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            timers,
            bus,
            retry_interval,
        }
    }

    /// Resolves `imsi` for `ue_id`.
    ///
    /// On a collision the IMSI is not written onto `ue_id`; the owner learns
    /// about it through the parent's retry timer once the old context is gone.
    /// The teardown is published before any state changes, so a failed publish
    /// leaves both contexts untouched.
    pub async fn resolve(
        &self,
        ue_id: MmeUeS1apId,
        imsi: &Imsi,
        parent: Option<ProcedureId>,
    ) -> Result<ImsiResolution, IdentificationError> {
        if let Some(old_ue_id) = self.store.find_by_imsi(imsi).filter(|owner| *owner != ue_id) {
            if self.store.contains(old_ue_id) {
                info!(
                    ue_id = %ue_id,
                    old_ue_id = %old_ue_id,
                    imsi = %imsi,
                    "IMSI already owned by another EMM context, implicitly detaching it"
                );
                self.bus
                    .publish(EmmNotification::TeardownSession {
                        ue_id: old_ue_id,
                        cause: EmmCause::IllegalUe,
                    })
                    .await?;
                self.store
                    .with_context(old_ue_id, |old| old.emm_cause = Some(EmmCause::IllegalUe));
                self.schedule_parent_retry(ue_id, parent, old_ue_id);
                return Ok(ImsiResolution::DisplacedEmmContext { old_ue_id });
            }
            debug!(old_ue_id = %old_ue_id, imsi = %imsi, "IMSI index points at a removed context");
        }

        if let Some(old_ue_id) = self.registry.find_by_imsi(imsi).filter(|owner| *owner != ue_id) {
            error!(
                ue_id = %ue_id,
                old_ue_id = %old_ue_id,
                imsi = %imsi,
                "IMSI already owned by another MME_APP context, removing it"
            );
            self.bus
                .publish(EmmNotification::ApplicationTeardown { ue_id: old_ue_id })
                .await?;
            self.schedule_parent_retry(ue_id, parent, old_ue_id);
            return Ok(ImsiResolution::DisplacedAppContext { old_ue_id });
        }

        self.store
            .with_context(ue_id, |ctx| ctx.imsi = Some(imsi.clone()))
            .ok_or(IdentificationError::ContextNotFound(ue_id))?;
        self.store.upsert_imsi(imsi.clone(), ue_id);
        Ok(ImsiResolution::Claimed)
    }

    /// Restarts the parent's retry timer and records the old UE id on it.
    fn schedule_parent_retry(
        &self,
        ue_id: MmeUeS1apId,
        parent: Option<ProcedureId>,
        old_ue_id: MmeUeS1apId,
    ) {
        let Some(parent) = parent else {
            warn!(ue_id = %ue_id, "identification has no parent procedure, nothing to retry");
            return;
        };
        let interval = self.retry_interval;
        let rearmed = self
            .store
            .with_context(ue_id, |ctx| {
                let specific = ctx.procedures.specific_mut(parent)?;
                if let Some(previous) = specific.retry_timer.take() {
                    self.timers.stop(previous);
                }
                let timer_id = self.timers.start(ue_id, TimerKind::SpecificRetry, interval);
                specific.retry_timer = Some(timer_id);
                specific.reconciliation = Some(PendingReconciliation {
                    old_ue_id,
                    deadline: Instant::now() + interval,
                });
                Some(timer_id)
            })
            .flatten();

        match rearmed {
            Some(timer_id) => debug!(
                ue_id = %ue_id,
                procedure = %parent,
                timer_id = %timer_id,
                old_ue_id = %old_ue_id,
                retry_in = ?interval,
                "specific procedure retry timer restarted"
            ),
            None => warn!(ue_id = %ue_id, procedure = %parent, "parent procedure not found"),
        }
    }
}
