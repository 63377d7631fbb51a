//! nextgsim MME (Mobility Management Entity) Library
//!
//! This crate provides the network-side EMM identification procedure for the
//! nextgsim MME. It includes:
//!
//! - Timer service for NAS timers (T3470, specific procedure retry)
//! - Task framework for async message passing and the EMM notification bus
//! - EMM context store and the MME_APP UE registry
//! - Identification procedure, retransmission policy and IMSI collision handling
//! - MME_APP task consuming EMM-SAP notifications

pub mod app;
pub mod context;
pub mod nas;
pub mod tasks;
pub mod timer;


pub use app::MmeAppTask;
pub use context::{
    EmmCause, EmmContext, EmmContextStore, EmmState, MmeAppRegistry, RemoveOutcome,
    SecurityContext, SecurityParams,
};
pub use nas::emm::{
    EmmProcedures, EmmTask, IdentificationCompletion, IdentificationController,
    IdentificationError, IdentificationProcedure, IdentificationState, ProcedureId,
    SpecificProcedure, SpecificProcedureKind,
};
pub use nas::identity::{IdentityType, MobileIdentity};
pub use tasks::{
    AbortCause, BusError, EmmMessage, EmmNotification, EventBus, MmeTaskBase, Task, TaskError,
    TaskHandle, TaskMessage,
};
pub use timer::{NasTimerService, TimerExpiryEvent, TimerId, TimerKind, TimerService};
