//! EPS Mobility Management
//!
//! Procedures implemented here:
//! - Identification (3GPP TS 24.301 Section 5.4.4), including T3470
//!   retransmission and IMSI collision handling.
//!
//! Attach and TAU are only modelled as the parent procedures that own an
//! identification.

mod collision;
mod identification;
mod procedure;
mod task;

pub use collision::{CollisionResolver, ImsiResolution};
pub use identification::{
    IdentificationCompletion, IdentificationController, IdentificationError,
};
pub use procedure::{
    EmmProcedures, IdentificationProcedure, IdentificationState, PendingReconciliation,
    ProcedureId, SpecificProcedure, SpecificProcedureKind,
};
pub use task::EmmTask;
