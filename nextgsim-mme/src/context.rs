//! EMM context storage
//!
//! The [`EmmContextStore`] owns every EMM context of the MME, keyed by MME UE
//! S1AP id and indexed by IMSI. Each context sits behind its own mutex so
//! operations on different UEs run in parallel while operations on one UE are
//! serialized.
//!
//! Callers must never hold two context locks at the same time.
//!
//! The [`MmeAppRegistry`] mirrors the MME_APP UE context table, which can
//! still hold an IMSI after the EMM context that claimed it is gone.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing::debug;

use nextgsim_common::{Imei, ImeiSv, Imsi, MmeUeS1apId};

use crate::nas::emm::{EmmProcedures, ProcedureId, SpecificProcedure, SpecificProcedureKind};

// ============================================================================
// EMM State and Cause
// ============================================================================

/// EMM state of a UE on the network side (3GPP TS 24.301 Section 5.1.3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EmmState {
    /// Context exists but no state has been entered yet
    #[default]
    Invalid,
    /// EMM-DEREGISTERED
    Deregistered,
    /// EMM-REGISTERED
    Registered,
    /// EMM-DEREGISTERED-INITIATED
    DeregisteredInitiated,
    /// EMM-COMMON-PROCEDURE-INITIATED
    CommonProcedureInitiated,
}

impl EmmState {
    /// Returns true if an identification procedure may be started in this state.
    ///
    /// EMM-COMMON-PROCEDURE-INITIATED is accepted so that a pending
    /// identification can be restarted in place.
    pub fn admits_identification(self) -> bool {
        matches!(
            self,
            EmmState::Deregistered | EmmState::Registered | EmmState::CommonProcedureInitiated
        )
    }
}

impl fmt::Display for EmmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmmState::Invalid => write!(f, "EMM-INVALID"),
            EmmState::Deregistered => write!(f, "EMM-DEREGISTERED"),
            EmmState::Registered => write!(f, "EMM-REGISTERED"),
            EmmState::DeregisteredInitiated => write!(f, "EMM-DEREGISTERED-INITIATED"),
            EmmState::CommonProcedureInitiated => write!(f, "EMM-COMMON-PROCEDURE-INITIATED"),
        }
    }
}

/// EMM cause (3GPP TS 24.301 Section 9.9.3.9), subset used by the MME.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum EmmCause {
    /// #2 IMSI unknown in HSS
    ImsiUnknownInHss = 2,
    /// #3 Illegal UE
    IllegalUe = 3,
    /// #6 Illegal ME
    IllegalMe = 6,
    /// #10 Implicitly detached
    ImplicitlyDetached = 10,
    /// #111 Protocol error, unspecified
    ProtocolErrorUnspecified = 111,
}

impl fmt::Display for EmmCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EmmCause::ImsiUnknownInHss => "IMSI unknown in HSS",
            EmmCause::IllegalUe => "illegal UE",
            EmmCause::IllegalMe => "illegal ME",
            EmmCause::ImplicitlyDetached => "implicitly detached",
            EmmCause::ProtocolErrorUnspecified => "protocol error, unspecified",
        };
        write!(f, "#{} ({})", u8::from(*self), name)
    }
}

// ============================================================================
// Security
// ============================================================================

/// NAS key set identifier value meaning "no key is available".
pub const KSI_NO_KEY_AVAILABLE: u8 = 0b111;

/// Current EPS security context of a UE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityContext {
    /// NAS key set identifier
    pub ksi: u8,
    /// Uplink NAS COUNT
    pub ul_count: u32,
    /// Downlink NAS COUNT
    pub dl_count: u32,
    /// Selected EPS encryption algorithm
    pub selected_eea: u8,
    /// Selected EPS integrity algorithm
    pub selected_eia: u8,
    /// True once a security mode control procedure completed
    pub activated: bool,
}

impl Default for SecurityContext {
    fn default() -> Self {
        Self {
            ksi: KSI_NO_KEY_AVAILABLE,
            ul_count: 0,
            dl_count: 0,
            selected_eea: 0,
            selected_eia: 0,
            activated: false,
        }
    }
}

impl SecurityContext {
    /// Snapshot of the parameters needed to protect one downlink message.
    pub fn params(&self) -> SecurityParams {
        SecurityParams {
            ksi: self.ksi,
            dl_count: self.dl_count,
            eea: self.selected_eea,
            eia: self.selected_eia,
            protected: self.activated,
        }
    }
}

/// Security parameters attached to a downlink NAS message request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityParams {
    /// NAS key set identifier
    pub ksi: u8,
    /// Downlink NAS COUNT to use
    pub dl_count: u32,
    /// Encryption algorithm
    pub eea: u8,
    /// Integrity algorithm
    pub eia: u8,
    /// Whether the message is integrity protected and ciphered
    pub protected: bool,
}

// ============================================================================
// EMM Context
// ============================================================================

/// EMM context of one UE.
#[derive(Debug)]
pub struct EmmContext {
    /// MME UE S1AP id
    pub ue_id: MmeUeS1apId,
    /// Current EMM state
    pub state: EmmState,
    /// Confirmed IMSI
    pub imsi: Option<Imsi>,
    /// IMEI
    pub imei: Option<Imei>,
    /// IMEISV
    pub imeisv: Option<ImeiSv>,
    /// EPS security context
    pub security: SecurityContext,
    /// Cause recorded when the context is being removed by the network
    pub emm_cause: Option<EmmCause>,
    /// Running EMM procedures
    pub procedures: EmmProcedures,
}

impl EmmContext {
    /// Creates a context with no identities and no running procedure.
    pub fn new(ue_id: MmeUeS1apId, state: EmmState) -> Self {
        Self {
            ue_id,
            state,
            imsi: None,
            imei: None,
            imeisv: None,
            security: SecurityContext::default(),
            emm_cause: None,
            procedures: EmmProcedures::default(),
        }
    }
}

// ============================================================================
// EMM Context Store
// ============================================================================

/// Result of [`EmmContextStore::remove`].
#[derive(Debug)]
pub enum RemoveOutcome {
    /// The context was present and has been removed
    Removed(EmmContext),
    /// No context was stored under the id
    AlreadyAbsent,
}

impl RemoveOutcome {
    /// Returns true if a context was removed by this call.
    pub fn was_removed(&self) -> bool {
        matches!(self, RemoveOutcome::Removed(_))
    }
}

type SharedContext = Arc<Mutex<EmmContext>>;

fn lock_context(ctx: &Mutex<EmmContext>) -> MutexGuard<'_, EmmContext> {
    ctx.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Store of all EMM contexts.
#[derive(Debug)]
pub struct EmmContextStore {
    contexts: RwLock<HashMap<MmeUeS1apId, SharedContext>>,
    imsi_index: RwLock<HashMap<Imsi, MmeUeS1apId>>,
    next_procedure_id: AtomicU64,
}

impl Default for EmmContextStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EmmContextStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            imsi_index: RwLock::new(HashMap::new()),
            next_procedure_id: AtomicU64::new(1),
        }
    }

    /// Inserts a context, replacing any context with the same UE id.
    ///
    /// A context that already carries an IMSI is indexed by it.
    pub fn insert(&self, ctx: EmmContext) {
        let ue_id = ctx.ue_id;
        if let Some(imsi) = &ctx.imsi {
            self.upsert_imsi(imsi.clone(), ue_id);
        }
        write(&self.contexts).insert(ue_id, Arc::new(Mutex::new(ctx)));
        debug!(ue_id = %ue_id, "EMM context stored");
    }

    /// Returns true if a context exists for the UE.
    pub fn contains(&self, ue_id: MmeUeS1apId) -> bool {
        read(&self.contexts).contains_key(&ue_id)
    }

    /// Returns the number of stored contexts.
    pub fn len(&self) -> usize {
        read(&self.contexts).len()
    }

    /// Returns true if no context is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` with exclusive access to the UE's context.
    ///
    /// Returns `None` if the context does not exist.
    pub fn with_context<R>(
        &self,
        ue_id: MmeUeS1apId,
        f: impl FnOnce(&mut EmmContext) -> R,
    ) -> Option<R> {
        let ctx = read(&self.contexts).get(&ue_id).cloned()?;
        let mut guard = lock_context(&ctx);
        Some(f(&mut guard))
    }

    /// Returns the UE id indexed under the IMSI.
    pub fn find_by_imsi(&self, imsi: &Imsi) -> Option<MmeUeS1apId> {
        read(&self.imsi_index).get(imsi).copied()
    }

    /// Indexes the UE under the IMSI, replacing a previous owner.
    pub fn upsert_imsi(&self, imsi: Imsi, ue_id: MmeUeS1apId) {
        if let Some(previous) = write(&self.imsi_index).insert(imsi, ue_id) {
            if previous != ue_id {
                debug!(ue_id = %ue_id, previous = %previous, "IMSI index entry moved");
            }
        }
    }

    /// Removes a context and every IMSI index entry pointing at it.
    pub fn remove(&self, ue_id: MmeUeS1apId) -> RemoveOutcome {
        let Some(ctx) = write(&self.contexts).remove(&ue_id) else {
            return RemoveOutcome::AlreadyAbsent;
        };
        write(&self.imsi_index).retain(|_, owner| *owner != ue_id);

        // Callers may still hold a clone from a concurrent with_context.
        let ctx = match Arc::try_unwrap(ctx) {
            Ok(mutex) => mutex.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()),
            Err(shared) => {
                let mut guard = lock_context(&shared);
                let mut taken = EmmContext::new(ue_id, guard.state);
                std::mem::swap(&mut *guard, &mut taken);
                taken
            }
        };
        debug!(ue_id = %ue_id, "EMM context removed");
        RemoveOutcome::Removed(ctx)
    }

    /// Allocates a procedure id, unique within the store.
    pub fn next_procedure_id(&self) -> ProcedureId {
        ProcedureId(self.next_procedure_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates the attach/TAU procedure record of a UE.
    ///
    /// Replaces any specific procedure already recorded. Returns `None` if the
    /// context does not exist.
    pub fn begin_specific_procedure(
        &self,
        ue_id: MmeUeS1apId,
        kind: SpecificProcedureKind,
    ) -> Option<ProcedureId> {
        let id = self.next_procedure_id();
        self.with_context(ue_id, |ctx| {
            ctx.procedures.specific = Some(SpecificProcedure::new(id, kind));
            id
        })
    }
}

// ============================================================================
// MME_APP UE Registry
// ============================================================================

/// IMSI to UE id table of the MME_APP layer.
#[derive(Debug, Default)]
pub struct MmeAppRegistry {
    by_imsi: RwLock<HashMap<Imsi, MmeUeS1apId>>,
}

impl MmeAppRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the UE under the IMSI.
    pub fn register(&self, imsi: Imsi, ue_id: MmeUeS1apId) {
        write(&self.by_imsi).insert(imsi, ue_id);
    }

    /// Returns the UE id registered under the IMSI.
    pub fn find_by_imsi(&self, imsi: &Imsi) -> Option<MmeUeS1apId> {
        read(&self.by_imsi).get(imsi).copied()
    }

    /// Removes every entry of the UE. Returns true if any entry existed.
    pub fn remove_ue(&self, ue_id: MmeUeS1apId) -> bool {
        let mut by_imsi = write(&self.by_imsi);
        let before = by_imsi.len();
        by_imsi.retain(|_, owner| *owner != ue_id);
        by_imsi.len() != before
    }

    /// Returns the number of registered UEs.
    pub fn len(&self) -> usize {
        read(&self.by_imsi).len()
    }

    /// Returns true if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
