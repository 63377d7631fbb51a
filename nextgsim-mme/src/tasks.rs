//! MME Task Framework
//!
//! This module implements the actor-based task model with message passing for
//! the MME. Each task runs as an independent async task and communicates via
//! typed message channels.
//!
//! # Architecture
//!
//! The identification procedure involves two channels:
//! - **EMM Task** (`EmmMessage`): inbound entry points from S1AP/NAS adapters
//!   and timer expiries, all serialized through one receiver.
//! - **EMM-SAP notifications** (`EmmNotification`): everything the EMM layer
//!   asks of its owner (send an Identity Request, confirm or abort a common
//!   procedure, tear a UE down). The sending half is the [`EventBus`].

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use nextgsim_common::config::MmeConfig;
use nextgsim_common::logging::{log_emm_primitive, Direction};
use nextgsim_common::MmeUeS1apId;

use crate::context::{EmmCause, EmmState, SecurityParams};
use crate::nas::emm::ProcedureId;
use crate::nas::identity::{IdentityType, MobileIdentity};
use crate::timer::TimerExpiryEvent;

// ============================================================================
// Task Message Envelope
// ============================================================================

/// Task message envelope wrapping typed messages with control signals.
///
/// This enum provides a uniform way to send messages to tasks while also
/// supporting graceful shutdown signaling.
#[derive(Debug)]
pub enum TaskMessage<T> {
    /// Regular message payload
    Message(T),
    /// Shutdown signal - task should terminate gracefully
    Shutdown,
}

impl<T> TaskMessage<T> {
    /// Creates a new message envelope containing the given payload.
    pub fn message(msg: T) -> Self {
        TaskMessage::Message(msg)
    }

    /// Creates a shutdown signal.
    pub fn shutdown() -> Self {
        TaskMessage::Shutdown
    }

    /// Returns true if this is a shutdown signal.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, TaskMessage::Shutdown)
    }

    /// Returns the message payload if present, or None for shutdown.
    pub fn into_message(self) -> Option<T> {
        match self {
            TaskMessage::Message(msg) => Some(msg),
            TaskMessage::Shutdown => None,
        }
    }
}

// ============================================================================
// Task Trait
// ============================================================================

/// Base trait for all MME tasks.
///
/// Tasks are async actors that process messages from their receive channel.
#[async_trait::async_trait]
pub trait Task: Send + 'static {
    /// The message type this task processes.
    type Message: Send;

    /// Runs the task's main loop, processing messages until shutdown.
    ///
    /// The task should exit gracefully when receiving `TaskMessage::Shutdown`
    /// or when every sender has been dropped.
    async fn run(&mut self, rx: mpsc::Receiver<TaskMessage<Self::Message>>);
}

/// Error type for task operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Task channel closed before the message could be delivered
    #[error("task {0} channel closed")]
    ChannelClosed(&'static str),
    /// Task panicked or was cancelled
    #[error("task {task} failed: {message}")]
    Failed {
        /// Task name
        task: &'static str,
        /// Failure description
        message: String,
    },
}

// ============================================================================
// EMM Task Messages
// ============================================================================

/// Messages for the EMM task.
#[derive(Debug)]
pub enum EmmMessage {
    /// Start (or restart) identification for a UE
    StartIdentification {
        /// UE to identify
        ue_id: MmeUeS1apId,
        /// Identity to request
        identity_type: IdentityType,
        /// Attach/TAU procedure that triggered identification, if any
        parent: Option<ProcedureId>,
    },
    /// Identity Response received from the UE
    IdentificationComplete {
        /// UE that answered
        ue_id: MmeUeS1apId,
        /// Identity carried by the response
        identity: MobileIdentity,
    },
    /// A timer armed through the timer service expired
    TimerExpired(TimerExpiryEvent),
    /// Lower layers failed to deliver the Identity Request
    LowerLayerFailure {
        /// Affected UE
        ue_id: MmeUeS1apId,
    },
    /// Identity Request was not delivered because of an ongoing handover
    NonDeliveredHo {
        /// Affected UE
        ue_id: MmeUeS1apId,
    },
    /// The owning procedure cancels identification
    Abort {
        /// Affected UE
        ue_id: MmeUeS1apId,
    },
}

impl EmmMessage {
    /// Returns the UE the message refers to.
    pub fn ue_id(&self) -> MmeUeS1apId {
        match self {
            EmmMessage::StartIdentification { ue_id, .. }
            | EmmMessage::IdentificationComplete { ue_id, .. }
            | EmmMessage::LowerLayerFailure { ue_id }
            | EmmMessage::NonDeliveredHo { ue_id }
            | EmmMessage::Abort { ue_id } => *ue_id,
            EmmMessage::TimerExpired(event) => event.ue_id,
        }
    }

    /// Returns the EMM-SAP primitive name used in logs.
    pub fn primitive(&self) -> &'static str {
        match self {
            EmmMessage::StartIdentification { .. } => "EMMREG_IDENT_START",
            EmmMessage::IdentificationComplete { .. } => "EMMAS_IDENTITY_RESPONSE",
            EmmMessage::TimerExpired(_) => "EMM_TIMER_EXPIRY",
            EmmMessage::LowerLayerFailure { .. } => "EMMREG_LOWERLAYER_FAILURE",
            EmmMessage::NonDeliveredHo { .. } => "EMMREG_LOWERLAYER_NON_DELIVERY",
            EmmMessage::Abort { .. } => "EMMREG_PROC_ABORT",
        }
    }
}

// ============================================================================
// EMM-SAP Notifications
// ============================================================================

/// Reason a common procedure was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortCause {
    /// T3470 expired the maximum number of times
    RetransmissionExceeded,
    /// Lower layers reported a delivery failure
    LowerLayerFailure,
    /// The UE answered with an identity the network never requests
    ProtocolViolation,
    /// The received IMSI could not be reconciled with existing contexts
    ResolutionFailed,
}

impl std::fmt::Display for AbortCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortCause::RetransmissionExceeded => write!(f, "retransmission-exceeded"),
            AbortCause::LowerLayerFailure => write!(f, "lower-layer-failure"),
            AbortCause::ProtocolViolation => write!(f, "protocol-violation"),
            AbortCause::ResolutionFailed => write!(f, "resolution-failed"),
        }
    }
}

/// Notifications emitted by the EMM layer to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmmNotification {
    /// A common procedure is now pending for the UE (EMMREG_COMMON_PROC_REQ)
    ProcedureStarted {
        /// UE id
        ue_id: MmeUeS1apId,
    },
    /// The common procedure completed (EMMREG_COMMON_PROC_CNF)
    ProcedureConfirmed {
        /// UE id
        ue_id: MmeUeS1apId,
        /// Whether the owner may continue its own procedure
        notify: bool,
        /// Whether the procedure record has been released
        free: bool,
        /// EMM state when the procedure started
        previous_state: EmmState,
    },
    /// The common procedure was aborted (EMMREG_COMMON_PROC_ABORT)
    ProcedureAborted {
        /// UE id
        ue_id: MmeUeS1apId,
        /// Whether the owner may continue its own procedure
        notify: bool,
        /// Whether the procedure record has been released
        free: bool,
        /// EMM state when the procedure started
        previous_state: EmmState,
        /// Abort reason
        cause: AbortCause,
    },
    /// Send an Identity Request over the NAS transport (EMMAS_SECURITY_REQ)
    SendIdentityRequest {
        /// UE id
        ue_id: MmeUeS1apId,
        /// Requested identity
        identity_type: IdentityType,
        /// Security parameters to protect the message with
        security: SecurityParams,
    },
    /// Implicitly detach a UE without signalling it (EMMCN_IMPLICIT_DETACH_UE)
    TeardownSession {
        /// UE id
        ue_id: MmeUeS1apId,
        /// EMM cause recorded for the detach
        cause: EmmCause,
    },
    /// Release MME_APP/ESM state keyed by the UE id (ESM detach indication)
    ApplicationTeardown {
        /// UE id
        ue_id: MmeUeS1apId,
    },
    /// The attach/TAU retry timer fired after an identity collision
    SpecificProcedureRetry {
        /// UE whose specific procedure should resume
        ue_id: MmeUeS1apId,
        /// Specific procedure to resume
        procedure: ProcedureId,
        /// UE id of the displaced context still being torn down
        old_ue_id: Option<MmeUeS1apId>,
    },
}

impl EmmNotification {
    /// Returns the UE the notification refers to.
    pub fn ue_id(&self) -> MmeUeS1apId {
        match self {
            EmmNotification::ProcedureStarted { ue_id }
            | EmmNotification::ProcedureConfirmed { ue_id, .. }
            | EmmNotification::ProcedureAborted { ue_id, .. }
            | EmmNotification::SendIdentityRequest { ue_id, .. }
            | EmmNotification::TeardownSession { ue_id, .. }
            | EmmNotification::ApplicationTeardown { ue_id }
            | EmmNotification::SpecificProcedureRetry { ue_id, .. } => *ue_id,
        }
    }

    /// Returns the EMM-SAP primitive name used in logs.
    pub fn primitive(&self) -> &'static str {
        match self {
            EmmNotification::ProcedureStarted { .. } => "EMMREG_COMMON_PROC_REQ",
            EmmNotification::ProcedureConfirmed { .. } => "EMMREG_COMMON_PROC_CNF",
            EmmNotification::ProcedureAborted { .. } => "EMMREG_COMMON_PROC_ABORT",
            EmmNotification::SendIdentityRequest { .. } => "EMMAS_SECURITY_REQ",
            EmmNotification::TeardownSession { .. } => "EMMCN_IMPLICIT_DETACH_UE",
            EmmNotification::ApplicationTeardown { .. } => "ESM_DETACH_IND",
            EmmNotification::SpecificProcedureRetry { .. } => "EMMREG_SPECIFIC_PROC_RETRY",
        }
    }

    /// Returns true for the notifications that end a common procedure.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EmmNotification::ProcedureConfirmed { .. } | EmmNotification::ProcedureAborted { .. }
        )
    }
}

/// Error raised when a notification cannot be handed to the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    /// The receiving task is gone
    #[error("notification channel closed")]
    Closed,
}

/// Outbound channel of the EMM layer.
#[async_trait::async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes a notification, waiting for room if the owner is behind.
    ///
    /// Fails only once the owner can no longer receive anything.
    async fn publish(&self, notification: EmmNotification) -> Result<(), BusError>;
}

#[async_trait::async_trait]
impl EventBus for TaskHandle<EmmNotification> {
    async fn publish(&self, notification: EmmNotification) -> Result<(), BusError> {
        let ue_id = notification.ue_id();
        let primitive = notification.primitive();
        self.send(notification)
            .await
            .map_err(|_| BusError::Closed)?;
        log_emm_primitive(Direction::Tx, primitive, ue_id);
        Ok(())
    }
}

// ============================================================================
// Task Handle
// ============================================================================

/// Handle for sending messages to a task.
pub struct TaskHandle<T> {
    tx: mpsc::Sender<TaskMessage<T>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> TaskHandle<T> {
    /// Creates a new task handle from a sender.
    pub fn new(tx: mpsc::Sender<TaskMessage<T>>) -> Self {
        Self { tx }
    }

    /// Sends a message to the task.
    ///
    /// Returns an error if the task has been dropped.
    pub async fn send(&self, msg: T) -> Result<(), mpsc::error::SendError<TaskMessage<T>>> {
        self.tx.send(TaskMessage::Message(msg)).await
    }

    /// Sends a message to the task without waiting.
    ///
    /// Returns an error if the channel is full or the task has been dropped.
    pub fn try_send(&self, msg: T) -> Result<(), mpsc::error::TrySendError<TaskMessage<T>>> {
        self.tx.try_send(TaskMessage::Message(msg))
    }

    /// Sends a shutdown signal to the task.
    pub async fn shutdown(&self) -> Result<(), mpsc::error::SendError<TaskMessage<T>>> {
        self.tx.send(TaskMessage::Shutdown).await
    }

    /// Returns true if the task channel is closed.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ============================================================================
// MME Task Base
// ============================================================================

/// Base structure containing the task handles of the MME.
#[derive(Clone)]
pub struct MmeTaskBase {
    /// MME configuration
    pub config: Arc<MmeConfig>,
    /// Handle to the EMM task
    pub emm_tx: TaskHandle<EmmMessage>,
    /// Handle to the owner of EMM-SAP notifications
    pub app_tx: TaskHandle<EmmNotification>,
}

impl MmeTaskBase {
    /// Creates a new MmeTaskBase, sizing both channels from the configuration.
    ///
    /// Returns the task base along with the receivers for each task.
    pub fn new(
        config: MmeConfig,
    ) -> (
        Self,
        mpsc::Receiver<TaskMessage<EmmMessage>>,
        mpsc::Receiver<TaskMessage<EmmNotification>>,
    ) {
        let (emm_tx, emm_rx) = mpsc::channel(config.channel_capacity);
        let (app_tx, app_rx) = mpsc::channel(config.channel_capacity);

        let base = Self {
            config: Arc::new(config),
            emm_tx: TaskHandle::new(emm_tx),
            app_tx: TaskHandle::new(app_tx),
        };

        (base, emm_rx, app_rx)
    }

    /// Sends shutdown signals to all tasks.
    pub async fn shutdown_all(&self) {
        // Ignore errors - tasks may already be shut down
        let _ = self.emm_tx.shutdown().await;
        let _ = self.app_tx.shutdown().await;
    }
}

// ============================================================================
// Tests
// ============================================================================
