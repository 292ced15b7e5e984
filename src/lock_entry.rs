//! Per-lock state: holder, member set, and waiter FIFO.
//!
//! Entry operations run under a single per-entry mutex; the registry lock
//! is never held while an entry operation runs (see [`crate::registry`]).
//! None of `acquire`/`release` ever awaits, so a plain `std::sync::Mutex`
//! is enough — there's no risk of holding it across a suspension point.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, Weak};
use std::sync::Arc;
use tokio::time::Duration;

use crate::protocol::Event;
use crate::registry::LockRegistry;
use crate::waiter::Waiter;

struct LockEntryState {
    holder: Option<String>,
    members: HashSet<String>,
    queue: VecDeque<Arc<Waiter>>,
}

/// The per-lock-name record: holder, members, and FIFO waiter queue.
pub struct LockEntry {
    name: Vec<u8>,
    registry: Weak<LockRegistry>,
    hold_timeout: Duration,
    state: Mutex<LockEntryState>,
}

impl LockEntry {
    /// Build a fresh entry with `waiter` already seated as sole member and
    /// holder. Unpublished until the registry inserts it into its map —
    /// this constructor does no registry I/O itself.
    pub(crate) fn new_seated(
        name: Vec<u8>,
        registry: Weak<LockRegistry>,
        hold_timeout: Duration,
        waiter: Arc<Waiter>,
    ) -> Self {
        waiter.mark_initial_holder();
        let mut members = HashSet::new();
        members.insert(waiter.acquirer_id.clone());
        let mut queue = VecDeque::new();
        let holder = waiter.acquirer_id.clone();
        queue.push_back(waiter);
        Self {
            name,
            registry,
            hold_timeout,
            state: Mutex::new(LockEntryState {
                holder: Some(holder),
                members,
                queue,
            }),
        }
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn is_member(&self, acquirer_id: &str) -> bool {
        self.state
            .lock()
            .expect("lock entry state poisoned")
            .members
            .contains(acquirer_id)
    }

    /// Enqueue `waiter` on this entry, or reply `AlreadyLocked` if it's
    /// already a member.
    pub fn acquire(&self, waiter: Arc<Waiter>) {
        let mut state = self.state.lock().expect("lock entry state poisoned");
        if state.members.contains(&waiter.acquirer_id) {
            waiter.write_event(Event::AlreadyLocked);
            return;
        }
        state.members.insert(waiter.acquirer_id.clone());
        state.queue.push_back(waiter);
    }

    /// Release `waiter` from this entry. Dispatches to the normal-release,
    /// discard-non-holder, or spurious-release path per spec §4.3 based on
    /// whether `waiter` is the current holder and its discard flag.
    pub fn release(&self, waiter: &Arc<Waiter>) {
        let mut state = self.state.lock().expect("lock entry state poisoned");

        let is_holder = state.holder.as_deref() == Some(waiter.acquirer_id.as_str());
        if !is_holder {
            if waiter.is_discard() {
                remove_from_queue(&mut state, &waiter.acquirer_id);
            }
            return;
        }

        state.holder = None;
        let outgoing = match state.queue.pop_front() {
            Some(w) => w,
            None => return,
        };
        state.members.remove(&outgoing.acquirer_id);

        outgoing.write_event(Event::UnLockOK);
        if !outgoing.is_discard() {
            outgoing.signal.notify_one();
        }

        if state.queue.is_empty() {
            drop(state);
            if let Some(registry) = self.registry.upgrade() {
                registry.remove(&self.name);
            }
            return;
        }

        let next = state.queue.front().expect("checked non-empty above").clone();
        state.holder = Some(next.acquirer_id.clone());
        next.promote(self.hold_timeout);
        next.write_event(Event::LockOK);
    }

    /// Remove a non-holder waiter from the queue (timeout or disconnect
    /// before promotion).
    pub fn discard_non_holder(&self, waiter: &Arc<Waiter>) {
        let mut state = self.state.lock().expect("lock entry state poisoned");
        remove_from_queue(&mut state, &waiter.acquirer_id);
    }
}

fn remove_from_queue(state: &mut LockEntryState, acquirer_id: &str) {
    if let Some(pos) = state.queue.iter().position(|w| w.acquirer_id == acquirer_id) {
        state.queue.remove(pos);
        state.members.remove(acquirer_id);
    }
}

impl std::fmt::Debug for LockEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("lock entry state poisoned");
        f.debug_struct("LockEntry")
            .field("name", &String::from_utf8_lossy(&self.name))
            .field("holder", &state.holder)
            .field("queue_len", &state.queue.len())
            .finish()
    }
}
