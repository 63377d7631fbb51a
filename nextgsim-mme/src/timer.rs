//! MME NAS Timer Management
//!
//! This module implements the timer service used by EMM procedures on the
//! network side.
//!
//! # NAS Timer Definitions (3GPP TS 24.301 Table 10.2.2)
//!
//! - T3470: Identity Request retransmission timer, started when an Identity
//!   Request is sent and stopped when the Identity Response arrives.
//!
//! The attach/TAU retry timer (`TimerKind::SpecificRetry`) is an MME
//! implementation timer rather than a TS 24.301 timer; it is re-armed when an
//! IMSI collision forces the specific procedure to wait for the old context.
//!
//! Timers are single-shot. Every armed timer gets a fresh [`TimerId`]; an
//! expiry is delivered to the EMM task as [`EmmMessage::TimerExpired`] and the
//! receiver must compare the id against the one recorded on the procedure.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use nextgsim_common::MmeUeS1apId;

use crate::tasks::{EmmMessage, TaskHandle};

// ============================================================================
// NAS Timer Codes (3GPP TS 24.301)
// ============================================================================

/// Timer code for T3470 (Identification procedure)
pub const TIMER_T3470: u16 = 3470;

// ============================================================================
// Timer Types
// ============================================================================

/// Identifier of one armed timer instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl fmt::Debug for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimerId({})", self.0)
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Kind of EMM timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// T3470, identification procedure
    T3470,
    /// Retry timer of the attach/TAU procedure that owns an identification
    SpecificRetry,
}

impl TimerKind {
    /// Returns the TS 24.301 timer code, if the timer has one.
    pub fn code(self) -> Option<u16> {
        match self {
            TimerKind::T3470 => Some(TIMER_T3470),
            TimerKind::SpecificRetry => None,
        }
    }
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerKind::T3470 => write!(f, "T3470"),
            TimerKind::SpecificRetry => write!(f, "T-RETRY-SPECIFIC"),
        }
    }
}

/// Timer expiry event delivered to the EMM task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerExpiryEvent {
    /// Id the timer was armed with
    pub timer_id: TimerId,
    /// UE the timer belongs to
    pub ue_id: MmeUeS1apId,
    /// Timer kind
    pub kind: TimerKind,
}

// ============================================================================
// Timer Service
// ============================================================================

/// Arms and cancels single-shot EMM timers.
pub trait TimerService: Send + Sync {
    /// Arms a timer and returns its id. Ids are never reused.
    fn start(&self, ue_id: MmeUeS1apId, kind: TimerKind, interval: Duration) -> TimerId;

    /// Cancels an armed timer. Returns false if it already fired or was stopped.
    fn stop(&self, timer_id: TimerId) -> bool;
}

/// Tokio-backed timer service.
///
/// Each armed timer is a spawned task that sleeps for the interval and then
/// posts a [`TimerExpiryEvent`] to the EMM task. Must be used from within a
/// tokio runtime.
pub struct NasTimerService {
    next_id: AtomicU64,
    active: Arc<Mutex<HashMap<TimerId, JoinHandle<()>>>>,
    target: TaskHandle<EmmMessage>,
}

fn lock_timers(
    active: &Mutex<HashMap<TimerId, JoinHandle<()>>>,
) -> MutexGuard<'_, HashMap<TimerId, JoinHandle<()>>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl NasTimerService {
    /// Creates a timer service posting expiries to the given EMM task.
    pub fn new(target: TaskHandle<EmmMessage>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            active: Arc::new(Mutex::new(HashMap::new())),
            target,
        }
    }

    /// Returns the number of armed timers.
    pub fn active_count(&self) -> usize {
        lock_timers(&self.active).len()
    }

    /// Returns true if the timer is still armed.
    pub fn is_active(&self, timer_id: TimerId) -> bool {
        lock_timers(&self.active).contains_key(&timer_id)
    }

    /// Cancels every armed timer.
    pub fn stop_all(&self) {
        for (_, handle) in lock_timers(&self.active).drain() {
            handle.abort();
        }
    }
}

impl TimerService for NasTimerService {
    fn start(&self, ue_id: MmeUeS1apId, kind: TimerKind, interval: Duration) -> TimerId {
        let timer_id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let event = TimerExpiryEvent {
            timer_id,
            ue_id,
            kind,
        };
        let active = Arc::clone(&self.active);
        let target = self.target.clone();

        // Held across the spawn so the task cannot deregister before it is registered.
        let mut timers = lock_timers(&self.active);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            lock_timers(&active).remove(&timer_id);
            if target.send(EmmMessage::TimerExpired(event)).await.is_err() {
                debug!(timer_id = %timer_id, ue_id = %ue_id, "EMM task gone, dropping {} expiry", kind);
            }
        });
        timers.insert(timer_id, handle);
        trace!(timer_id = %timer_id, ue_id = %ue_id, interval = ?interval, "{} started", kind);
        timer_id
    }

    fn stop(&self, timer_id: TimerId) -> bool {
        match lock_timers(&self.active).remove(&timer_id) {
            Some(handle) => {
                handle.abort();
                trace!(timer_id = %timer_id, "timer stopped");
                true
            }
            None => false,
        }
    }
}

impl Drop for NasTimerService {
    fn drop(&mut self) {
        self.stop_all();
    }
}
