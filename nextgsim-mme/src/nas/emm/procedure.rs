//! EMM procedure records
//!
//! Per-UE procedure table. A UE runs at most one specific procedure
//! (attach or TAU) and at most one identification procedure at a time.
//! The identification record refers to its parent by [`ProcedureId`] only.

use std::fmt;

use tokio::time::Instant;

use nextgsim_common::MmeUeS1apId;

use crate::context::EmmState;
use crate::nas::identity::IdentityType;
use crate::timer::TimerId;

/// Identifier of an EMM procedure instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcedureId(pub u64);

impl fmt::Display for ProcedureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc-{}", self.0)
    }
}

// ============================================================================
// Identification
// ============================================================================

/// Identification procedure state, derived from the T3470 handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentificationState {
    /// No Identity Request outstanding
    Idle,
    /// Identity Request sent, T3470 running
    AwaitingResponse,
}

/// Network-initiated identification procedure (3GPP TS 24.301 Section 5.4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentificationProcedure {
    /// Procedure id
    pub id: ProcedureId,
    /// UE being identified
    pub ue_id: MmeUeS1apId,
    /// Requested identity
    pub identity_type: IdentityType,
    /// Number of T3470 expiries so far
    pub retransmission_count: u32,
    /// Armed T3470 instance
    pub t3470: Option<TimerId>,
    /// Specific procedure that triggered identification
    pub parent: Option<ProcedureId>,
    /// EMM state before the procedure started
    pub previous_state: EmmState,
}

impl IdentificationProcedure {
    /// Creates an idle identification record.
    pub fn new(
        id: ProcedureId,
        ue_id: MmeUeS1apId,
        identity_type: IdentityType,
        parent: Option<ProcedureId>,
        previous_state: EmmState,
    ) -> Self {
        Self {
            id,
            ue_id,
            identity_type,
            retransmission_count: 0,
            t3470: None,
            parent,
            previous_state,
        }
    }

    /// Returns the procedure state.
    pub fn state(&self) -> IdentificationState {
        if self.t3470.is_some() {
            IdentificationState::AwaitingResponse
        } else {
            IdentificationState::Idle
        }
    }
}

// ============================================================================
// Specific procedures
// ============================================================================

/// Kind of EMM specific procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecificProcedureKind {
    /// Attach
    Attach,
    /// Tracking area update
    TrackingAreaUpdate,
}

impl fmt::Display for SpecificProcedureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecificProcedureKind::Attach => write!(f, "ATTACH"),
            SpecificProcedureKind::TrackingAreaUpdate => write!(f, "TAU"),
        }
    }
}

/// Bookkeeping left on a specific procedure when its identification found
/// the IMSI still owned by another UE context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReconciliation {
    /// UE id of the context being torn down
    pub old_ue_id: MmeUeS1apId,
    /// When the retry timer is due
    pub deadline: Instant,
}

/// Attach or TAU procedure owning an identification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecificProcedure {
    /// Procedure id
    pub id: ProcedureId,
    /// Procedure kind
    pub kind: SpecificProcedureKind,
    /// Armed retry timer
    pub retry_timer: Option<TimerId>,
    /// Old context to reconcile before the procedure resumes
    pub reconciliation: Option<PendingReconciliation>,
}

impl SpecificProcedure {
    /// Creates a specific procedure record with no timer armed.
    pub fn new(id: ProcedureId, kind: SpecificProcedureKind) -> Self {
        Self {
            id,
            kind,
            retry_timer: None,
            reconciliation: None,
        }
    }
}

// ============================================================================
// Procedure table
// ============================================================================

/// EMM procedures running for one UE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmmProcedures {
    /// Attach or TAU
    pub specific: Option<SpecificProcedure>,
    /// Identification
    pub identification: Option<IdentificationProcedure>,
}

impl EmmProcedures {
    /// Returns true if no procedure is running.
    pub fn is_empty(&self) -> bool {
        self.specific.is_none() && self.identification.is_none()
    }

    /// Returns the specific procedure if its id matches.
    pub fn specific_mut(&mut self, id: ProcedureId) -> Option<&mut SpecificProcedure> {
        self.specific.as_mut().filter(|proc| proc.id == id)
    }

    /// Removes every procedure and returns the timers the caller must stop.
    pub fn delete_all(&mut self) -> Vec<TimerId> {
        let mut armed = Vec::new();
        if let Some(ident) = self.identification.take() {
            armed.extend(ident.t3470);
        }
        if let Some(specific) = self.specific.take() {
            armed.extend(specific.retry_timer);
        }
        armed
    }
}
