//! Identification Procedure
//!
//! This module implements the network side of the identification procedure
//! as defined in 3GPP TS 24.301 Section 5.4.4.
//!
//! # Procedure
//!
//! - The MME sends an Identity Request and starts T3470.
//! - The Identity Response stops T3470. An IMSI goes through the
//!   [`CollisionResolver`]; IMEI and IMEISV are stored directly.
//! - On T3470 expiry the request is retransmitted. Once the expiry count
//!   reaches `identification_max_retransmissions` (five by default) the
//!   procedure is aborted and the UE is implicitly detached.
//! - A lower layer failure aborts the procedure; a non-delivery during
//!   handover resends the request without counting it as an expiry.
//!
//! Every entry point looks the context and the procedure record up afresh,
//! so events racing with a completed or aborted procedure are harmless.
//!
//! # Reference
//!
//! 3GPP TS 24.301 Section 5.4.4.2 (initiation), 5.4.4.4 (completion),
//! 5.4.4.6 (abnormal cases on the network side).

use std::sync::Arc;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use nextgsim_common::config::NasConfig;
use nextgsim_common::MmeUeS1apId;

use super::collision::{CollisionResolver, ImsiResolution};
use super::procedure::{IdentificationProcedure, ProcedureId};
use crate::context::{EmmCause, EmmContextStore, EmmState, MmeAppRegistry};
use crate::nas::identity::{IdentityType, MobileIdentity};
use crate::tasks::{AbortCause, BusError, EmmNotification, EventBus};
use crate::timer::{TimerExpiryEvent, TimerId, TimerKind, TimerService};

// ============================================================================
// Identification Error
// ============================================================================

/// Error type for the identification procedure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentificationError {
    /// No EMM context for the UE
    #[error("no EMM context for ue_id {0}")]
    ContextNotFound(MmeUeS1apId),
    /// No identification procedure running for the UE
    #[error("no identification procedure for ue_id {0}")]
    ProcedureNotFound(MmeUeS1apId),
    /// The UE is in a state that does not allow identification
    #[error("ue_id {ue_id} cannot be identified in state {state}")]
    InvalidState {
        /// UE id
        ue_id: MmeUeS1apId,
        /// Current EMM state
        state: EmmState,
    },
    /// The identity type is never requested by the network
    #[error("identity type {0} cannot be requested")]
    UnsupportedIdentityType(IdentityType),
    /// A primitive could not be handed to the owner
    #[error("failed to dispatch EMM primitive: {0}")]
    Dispatch(#[from] BusError),
    /// The UE answered with a TMSI
    #[error("ue_id {0} answered the Identity Request with a TMSI")]
    ProtocolViolation(MmeUeS1apId),
}

/// Result of handling an Identity Response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentificationCompletion {
    /// No context or no procedure: stale or duplicate response
    Ignored,
    /// Identity stored, owner notified to continue
    Confirmed,
    /// The IMSI belongs to another context which is being removed first
    CollisionDeferred {
        /// UE id of the displaced context
        old_ue_id: MmeUeS1apId,
    },
}

// ============================================================================
// Identification Controller
// ============================================================================

/// Drives identification procedures for every UE of the MME.
///
/// Calls for one UE must be serialized by the caller (the EMM task does
/// this); calls for different UEs may run concurrently.
pub struct IdentificationController<T: TimerService, B: EventBus> {
    store: Arc<EmmContextStore>,
    registry: Arc<MmeAppRegistry>,
    timers: Arc<T>,
    bus: B,
    config: NasConfig,
}

impl<T: TimerService, B: EventBus> IdentificationController<T, B> {
    /// Creates a controller over the given collaborators.
    pub fn new(
        store: Arc<EmmContextStore>,
        registry: Arc<MmeAppRegistry>,
        timers: Arc<T>,
        bus: B,
        config: NasConfig,
    ) -> Self {
        Self {
            store,
            registry,
            timers,
            bus,
            config,
        }
    }

    /// Returns the context store.
    pub fn store(&self) -> &Arc<EmmContextStore> {
        &self.store
    }

    /// Starts identification, or restarts the one already pending.
    ///
    /// A pending record is reused: its identity type and parent are replaced,
    /// the retransmission counter is reset and T3470 is re-armed.
    pub async fn start(
        &self,
        ue_id: MmeUeS1apId,
        identity_type: IdentityType,
        parent: Option<ProcedureId>,
    ) -> Result<(), IdentificationError> {
        if !identity_type.is_requestable() {
            return Err(IdentificationError::UnsupportedIdentityType(identity_type));
        }

        self.store
            .with_context(ue_id, |ctx| {
                if !ctx.state.admits_identification() {
                    return Err(IdentificationError::InvalidState {
                        ue_id,
                        state: ctx.state,
                    });
                }
                match ctx.procedures.identification.as_mut() {
                    Some(ident) => {
                        debug!(ue_id = %ue_id, procedure = %ident.id, "reusing identification procedure");
                        ident.identity_type = identity_type;
                        ident.parent = parent;
                        ident.retransmission_count = 0;
                    }
                    None => {
                        ctx.procedures.identification = Some(IdentificationProcedure::new(
                            self.store.next_procedure_id(),
                            ue_id,
                            identity_type,
                            parent,
                            ctx.state,
                        ));
                    }
                }
                Ok(())
            })
            .ok_or(IdentificationError::ContextNotFound(ue_id))??;

        info!(ue_id = %ue_id, identity_type = %identity_type, "initiating identification procedure");
        self.send_request(ue_id).await?;
        self.bus
            .publish(EmmNotification::ProcedureStarted { ue_id })
            .await?;
        Ok(())
    }

    /// Sends the Identity Request of the pending procedure and re-arms T3470.
    ///
    /// T3470 is only armed once the request has been handed to the owner.
    async fn send_request(&self, ue_id: MmeUeS1apId) -> Result<(), IdentificationError> {
        let pending = self.store.with_context(ue_id, |ctx| {
            let ident = ctx.procedures.identification.as_ref()?;
            Some((ident.identity_type, ctx.security.params()))
        });
        let (identity_type, security) = match pending {
            Some(Some(pending)) => pending,
            Some(None) => return Err(IdentificationError::ProcedureNotFound(ue_id)),
            None => {
                error!(ue_id = %ue_id, "no EMM context, Identity Request not sent");
                return Err(IdentificationError::ContextNotFound(ue_id));
            }
        };

        self.bus
            .publish(EmmNotification::SendIdentityRequest {
                ue_id,
                identity_type,
                security,
            })
            .await?;

        let interval = self.config.t3470_interval();
        let armed = self
            .store
            .with_context(ue_id, |ctx| {
                let ident = ctx.procedures.identification.as_mut()?;
                if let Some(previous) = ident.t3470.take() {
                    self.timers.stop(previous);
                }
                let timer_id = self.timers.start(ue_id, TimerKind::T3470, interval);
                ident.t3470 = Some(timer_id);
                Some((timer_id, ident.retransmission_count))
            })
            .flatten();

        match armed {
            Some((timer_id, count)) => debug!(
                ue_id = %ue_id,
                timer_id = %timer_id,
                count,
                "Identity Request sent, T3470 started"
            ),
            None => debug!(ue_id = %ue_id, "identification released while sending, T3470 not started"),
        }
        Ok(())
    }

    /// Handles an Identity Response.
    ///
    /// If the IMSI cannot be resolved the record is released and
    /// `ProcedureAborted` is published before the error is returned.
    pub async fn complete(
        &self,
        ue_id: MmeUeS1apId,
        identity: MobileIdentity,
    ) -> Result<IdentificationCompletion, IdentificationError> {
        info!(ue_id = %ue_id, identity = %identity, "identification complete");

        let pending = self.store.with_context(ue_id, |ctx| {
            let ident = ctx.procedures.identification.as_mut()?;
            if let Some(t3470) = ident.t3470.take() {
                self.timers.stop(t3470);
            }
            let snapshot = ident.clone();
            match &identity {
                MobileIdentity::Imei(imei) => ctx.imei = Some(imei.clone()),
                MobileIdentity::ImeiSv(imeisv) => ctx.imeisv = Some(imeisv.clone()),
                MobileIdentity::Imsi(_) | MobileIdentity::Tmsi(_) => {}
            }
            Some(snapshot)
        });

        let Some(ident) = pending.flatten() else {
            debug!(ue_id = %ue_id, "no identification pending, ignoring Identity Response");
            return Ok(IdentificationCompletion::Ignored);
        };

        let resolution = match &identity {
            MobileIdentity::Imsi(imsi) => {
                match self.resolver().resolve(ue_id, imsi, ident.parent).await {
                    Ok(resolution) => resolution,
                    Err(e) => {
                        error!(ue_id = %ue_id, imsi = %imsi, "IMSI not resolved, aborting identification: {}", e);
                        self.free(ue_id);
                        self.publish(EmmNotification::ProcedureAborted {
                            ue_id,
                            notify: false,
                            free: true,
                            previous_state: ident.previous_state,
                            cause: AbortCause::ResolutionFailed,
                        })
                        .await;
                        return Err(e);
                    }
                }
            }
            MobileIdentity::Imei(_) | MobileIdentity::ImeiSv(_) => ImsiResolution::Claimed,
            MobileIdentity::Tmsi(_) => {
                error!(ue_id = %ue_id, "Identity Response carries a TMSI, aborting identification");
                self.free(ue_id);
                self.bus
                    .publish(EmmNotification::ProcedureAborted {
                        ue_id,
                        notify: false,
                        free: true,
                        previous_state: ident.previous_state,
                        cause: AbortCause::ProtocolViolation,
                    })
                    .await?;
                return Err(IdentificationError::ProtocolViolation(ue_id));
            }
        };

        self.free(ue_id);
        let completion = match resolution.old_ue_id() {
            None => IdentificationCompletion::Confirmed,
            Some(old_ue_id) => IdentificationCompletion::CollisionDeferred { old_ue_id },
        };
        self.bus
            .publish(EmmNotification::ProcedureConfirmed {
                ue_id,
                notify: completion == IdentificationCompletion::Confirmed,
                free: true,
                previous_state: ident.previous_state,
            })
            .await?;
        Ok(completion)
    }

    /// Dispatches a timer expiry to the handler of its kind.
    pub async fn on_timer_expired(&self, event: TimerExpiryEvent) {
        match event.kind {
            TimerKind::T3470 => self.on_t3470_expired(event.ue_id, event.timer_id).await,
            TimerKind::SpecificRetry => {
                self.on_specific_retry_expired(event.ue_id, event.timer_id)
                    .await
            }
        }
    }

    /// T3470 expiry (3GPP TS 24.301 Section 5.4.4.6 b).
    async fn on_t3470_expired(&self, ue_id: MmeUeS1apId, timer_id: TimerId) {
        let expired = self.store.with_context(ue_id, |ctx| {
            let ident = ctx.procedures.identification.as_mut()?;
            if ident.t3470 != Some(timer_id) {
                return None;
            }
            ident.t3470 = None;
            ident.retransmission_count += 1;
            Some((ident.retransmission_count, ident.previous_state))
        });

        let (count, previous_state) = match expired {
            None => {
                warn!(ue_id = %ue_id, timer_id = %timer_id, "T3470 expired, no EMM context");
                return;
            }
            Some(None) => {
                debug!(ue_id = %ue_id, timer_id = %timer_id, "stale T3470 expiry ignored");
                return;
            }
            Some(Some(expired)) => expired,
        };

        warn!(ue_id = %ue_id, timer_id = %timer_id, count, "T3470 expired");
        if count < self.config.identification_max_retransmissions {
            if let Err(e) = self.send_request(ue_id).await {
                error!(ue_id = %ue_id, "Identity Request retransmission failed: {}", e);
            }
            return;
        }

        warn!(ue_id = %ue_id, count, "T3470 retransmission limit reached, aborting identification");
        self.publish(EmmNotification::ProcedureAborted {
            ue_id,
            notify: false,
            free: true,
            previous_state,
            cause: AbortCause::RetransmissionExceeded,
        })
        .await;
        self.delete_all_procedures(ue_id);

        // MME_APP may have released the context since the expiry was taken.
        if self.store.contains(ue_id) {
            warn!(ue_id = %ue_id, "removing EMM context after failed identification");
            self.publish(EmmNotification::TeardownSession {
                ue_id,
                cause: EmmCause::ImplicitlyDetached,
            })
            .await;
        } else {
            warn!(ue_id = %ue_id, "EMM context already gone, releasing MME_APP context");
            self.publish(EmmNotification::ApplicationTeardown { ue_id })
                .await;
        }
    }

    /// Retry timer of a specific procedure parked by a collision.
    async fn on_specific_retry_expired(&self, ue_id: MmeUeS1apId, timer_id: TimerId) {
        let fired = self
            .store
            .with_context(ue_id, |ctx| {
                let specific = ctx.procedures.specific.as_mut()?;
                if specific.retry_timer != Some(timer_id) {
                    return None;
                }
                specific.retry_timer = None;
                Some((specific.id, specific.reconciliation.take()))
            })
            .flatten();

        let Some((procedure, reconciliation)) = fired else {
            debug!(ue_id = %ue_id, timer_id = %timer_id, "stale retry timer expiry ignored");
            return;
        };

        let late = reconciliation.map(|r| Instant::now().saturating_duration_since(r.deadline));
        info!(ue_id = %ue_id, procedure = %procedure, late = ?late, "specific procedure retry timer expired");
        self.publish(EmmNotification::SpecificProcedureRetry {
            ue_id,
            procedure,
            old_ue_id: reconciliation.map(|r| r.old_ue_id),
        })
        .await;
    }

    /// Lower layers failed to deliver the Identity Request
    /// (3GPP TS 24.301 Section 5.4.4.6 a).
    pub async fn on_lower_layer_failure(&self, ue_id: MmeUeS1apId) {
        let previous_state = self
            .store
            .with_context(ue_id, |ctx| {
                ctx.procedures
                    .identification
                    .as_ref()
                    .map(|ident| ident.previous_state)
            })
            .flatten();
        let Some(previous_state) = previous_state else {
            debug!(ue_id = %ue_id, "lower layer failure without identification procedure");
            return;
        };

        warn!(ue_id = %ue_id, "lower layer failure, aborting identification");
        self.publish(EmmNotification::ProcedureAborted {
            ue_id,
            notify: false,
            free: true,
            previous_state,
            cause: AbortCause::LowerLayerFailure,
        })
        .await;
        self.delete_all_procedures(ue_id);
    }

    /// Identity Request not delivered because of a handover: resend it.
    ///
    /// Does not count as a T3470 expiry.
    pub async fn on_non_delivered_ho(&self, ue_id: MmeUeS1apId) {
        match self.send_request(ue_id).await {
            Ok(()) => info!(ue_id = %ue_id, "Identity Request resent after handover non-delivery"),
            Err(IdentificationError::ProcedureNotFound(_)) => {
                debug!(ue_id = %ue_id, "non-delivery without identification procedure")
            }
            Err(e) => error!(ue_id = %ue_id, "Identity Request resend failed: {}", e),
        }
    }

    /// Cancels the procedure on behalf of its owner. No notification is sent.
    ///
    /// Returns false if no procedure was running.
    pub fn abort(&self, ue_id: MmeUeS1apId) -> bool {
        let aborted = self.free(ue_id);
        if aborted {
            info!(ue_id = %ue_id, "identification procedure aborted");
        }
        aborted
    }

    /// Removes the identification record and stops its T3470.
    fn free(&self, ue_id: MmeUeS1apId) -> bool {
        self.store
            .with_context(ue_id, |ctx| {
                let ident = ctx.procedures.identification.take()?;
                if let Some(t3470) = ident.t3470 {
                    self.timers.stop(t3470);
                }
                Some(())
            })
            .flatten()
            .is_some()
    }

    fn delete_all_procedures(&self, ue_id: MmeUeS1apId) {
        let armed = self
            .store
            .with_context(ue_id, |ctx| ctx.procedures.delete_all())
            .unwrap_or_default();
        for timer_id in armed {
            self.timers.stop(timer_id);
        }
    }

    fn resolver(&self) -> CollisionResolver<'_, T, B> {
        CollisionResolver::new(
            &self.store,
            &self.registry,
            self.timers.as_ref(),
            &self.bus,
            self.config.specific_retry_interval(),
        )
    }

    /// Publishes a notification from a path with no caller to report to.
    async fn publish(&self, notification: EmmNotification) {
        let primitive = notification.primitive();
        let ue_id = notification.ue_id();
        if let Err(e) = self.bus.publish(notification).await {
            error!(ue_id = %ue_id, "failed to send {}: {}", primitive, e);
        }
    }
}
