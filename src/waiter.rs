//! Per-acquirer waiter state.
//!
//! A `Waiter` is created when a session receives a `Lock` frame and lives
//! until it is removed from its [`crate::lock_entry::LockEntry`] by a clean
//! release, a timeout, or a disconnect. Its mutable fields
//! (`is_held`/`is_promoted`/`discard`/`deadline`) are written both by the
//! waiter's own session task and, during promotion, by the *predecessor's*
//! session task running inside `LockEntry::release` — so they live behind
//! a small internal mutex rather than being plain fields.

use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};

use crate::protocol::{Event, Frame};

struct WaiterState {
    online: bool,
    is_held: bool,
    is_promoted: bool,
    discard: bool,
    deadline: Instant,
}

/// Waiter record for a single acquirer participating in one lock.
pub struct Waiter {
    /// The peer's transport address string; identity for membership checks.
    pub acquirer_id: String,
    /// The namespaced lock key this waiter is enqueued on.
    pub lock_key: Vec<u8>,
    /// Single-slot notification the acquirer awaits to leave its wait loop.
    pub signal: Notify,
    frame_tx: UnboundedSender<Vec<u8>>,
    state: Mutex<WaiterState>,
}

impl Waiter {
    /// Create a new waiter with its acquisition deadline armed.
    pub fn new(
        acquirer_id: String,
        lock_key: Vec<u8>,
        frame_tx: UnboundedSender<Vec<u8>>,
        acq_timeout: Duration,
    ) -> Self {
        Self {
            acquirer_id,
            lock_key,
            signal: Notify::new(),
            frame_tx,
            state: Mutex::new(WaiterState {
                online: true,
                is_held: false,
                is_promoted: false,
                discard: false,
                deadline: Instant::now() + acq_timeout,
            }),
        }
    }

    /// Send an outbound event to this acquirer's connection, unless it has
    /// gone offline (in which case writes are suppressed).
    pub fn write_event(&self, event: Event) {
        let online = self.state.lock().expect("waiter state poisoned").online;
        if !online {
            return;
        }
        if let Ok(bytes) = Frame::bare(event).encode() {
            let _ = self.frame_tx.send(bytes);
        }
    }

    /// Mark this acquirer's connection offline; further `write_event` calls
    /// become no-ops.
    pub fn mark_offline(&self) {
        self.state.lock().expect("waiter state poisoned").online = false;
    }

    /// Mark this waiter for involuntary teardown (timeout or disconnect).
    pub fn set_discard(&self) {
        self.state.lock().expect("waiter state poisoned").discard = true;
    }

    pub fn is_discard(&self) -> bool {
        self.state.lock().expect("waiter state poisoned").discard
    }

    /// Mark this waiter as holder for the immediate `create_and_seat` path,
    /// where the acquirer becomes holder without going through mid-flight
    /// promotion. Per spec.md §4.4's Setup paragraph, `deadline` stays the
    /// acquisition deadline already armed in [`Waiter::new`] — there is no
    /// promotion event to swap it for the hold deadline, so an immediate
    /// holder is bound by `AcqTimeout` until its own release exits the
    /// acquire protocol's wait loop.
    pub fn mark_initial_holder(&self) {
        self.state.lock().expect("waiter state poisoned").is_held = true;
    }

    pub fn is_held(&self) -> bool {
        self.state.lock().expect("waiter state poisoned").is_held
    }

    /// Promote this waiter to holder: set `is_held`/`is_promoted` and
    /// install the hold deadline. Called by the predecessor's release path.
    pub fn promote(&self, hold_timeout: Duration) {
        let mut state = self.state.lock().expect("waiter state poisoned");
        state.is_held = true;
        state.is_promoted = true;
        state.deadline = Instant::now() + hold_timeout;
    }

    /// Consume the one-shot promotion flag, returning its prior value.
    pub fn take_promoted(&self) -> bool {
        let mut state = self.state.lock().expect("waiter state poisoned");
        std::mem::replace(&mut state.is_promoted, false)
    }

    pub fn deadline(&self) -> Instant {
        self.state.lock().expect("waiter state poisoned").deadline
    }
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("acquirer_id", &self.acquirer_id)
            .finish_non_exhaustive()
    }
}
