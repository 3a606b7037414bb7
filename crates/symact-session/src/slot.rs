use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Lifecycle of one session slot.
///
/// A slot starts idle, accepts a peer, serves the session, and is disposed
/// when the session ends. An accepted slot hands its place to a fresh idle
/// slot so that the number of slots waiting for peers stays constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Accepting,
    Active,
    Disposed,
}

/// Snapshot of slot counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotCounts {
    pub idle: usize,
    pub accepting: usize,
    pub active: usize,
    /// Sessions that have ended since the server started.
    pub disposed_total: u64,
}

impl SlotCounts {
    /// Slots not yet bound to a peer.
    pub fn waiting(&self) -> usize {
        self.idle + self.accepting
    }

    fn count_mut(&mut self, state: SlotState) -> Option<&mut usize> {
        match state {
            SlotState::Idle => Some(&mut self.idle),
            SlotState::Accepting => Some(&mut self.accepting),
            SlotState::Active => Some(&mut self.active),
            SlotState::Disposed => None,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    counts: SlotCounts,
    sessions: BTreeSet<u32>,
}

/// Server state mirrored for callers outside the event loop thread.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedState {
    inner: Arc<Mutex<Inner>>,
}

impl SharedState {
    fn with<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner)
    }

    pub(crate) fn counts(&self) -> SlotCounts {
        self.with(|inner| inner.counts)
    }

    pub(crate) fn session_ids(&self) -> Vec<u32> {
        self.with(|inner| inner.sessions.iter().copied().collect())
    }

    pub(crate) fn add_session(&self, id: u32) {
        self.with(|inner| inner.sessions.insert(id));
    }

    pub(crate) fn remove_session(&self, id: u32) {
        self.with(|inner| inner.sessions.remove(&id));
    }

    fn transition(&self, from: Option<SlotState>, to: SlotState) {
        self.with(|inner| {
            if let Some(count) = from.and_then(|state| inner.counts.count_mut(state)) {
                *count = count.saturating_sub(1);
            }
            match inner.counts.count_mut(to) {
                Some(count) => *count += 1,
                None => inner.counts.disposed_total += 1,
            }
        });
    }
}

/// One slot's place in the counters. Leaves them balanced when dropped.
#[derive(Debug)]
pub(crate) struct Slot {
    state: SlotState,
    shared: SharedState,
}

impl Slot {
    pub(crate) fn new(shared: SharedState) -> Self {
        shared.transition(None, SlotState::Idle);
        Self {
            state: SlotState::Idle,
            shared,
        }
    }

    pub(crate) fn state(&self) -> SlotState {
        self.state
    }

    pub(crate) fn enter(&mut self, next: SlotState) {
        if self.state == next || self.state == SlotState::Disposed {
            return;
        }
        self.shared.transition(Some(self.state), next);
        self.state = next;
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        // A slot abandoned mid-accept (server shutdown) frees its count
        // without counting as a disposed session.
        if self.state != SlotState::Disposed {
            let state = self.state;
            self.shared.with(|inner| {
                if let Some(count) = inner.counts.count_mut(state) {
                    *count = count.saturating_sub(1);
                }
            });
        }
    }
}
