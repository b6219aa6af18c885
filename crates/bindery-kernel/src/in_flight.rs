//! Cross-thread construction tracking
//!
//! A caching policy blocks every other requester while one thread runs the
//! first production of a slot. Deferred handles let that production reach
//! back into slots other threads are filling, so two threads can end up
//! waiting on each other. The tracker records which thread owns each slot
//! and which slot each thread waits on, and refuses a wait that closes a
//! loop.

use bindery_core::{Key, ScopeContext};
use dashmap::DashMap;
use std::collections::HashSet;
use std::thread::{self, ThreadId};

/// Cached instance slot: a key, plus its context for context-lived policies
pub(crate) type Slot = (Key, Option<ScopeContext>);

#[derive(Debug, Default)]
pub(crate) struct InFlight {
    owners: DashMap<Slot, ThreadId>,
    waiting: DashMap<ThreadId, Slot>,
}

/// Clears the registration it was created for when dropped
#[derive(Debug)]
pub(crate) struct Registration<'a> {
    tracker: &'a InFlight,
    kind: Entry,
}

#[derive(Debug)]
enum Entry {
    Owner(Slot),
    Waiter(ThreadId),
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        match &self.kind {
            Entry::Owner(slot) => {
                self.tracker.owners.remove(slot);
            }
            Entry::Waiter(thread) => {
                self.tracker.waiting.remove(thread);
            }
        }
    }
}

impl InFlight {
    /// Announce that this thread is about to request `slot`
    ///
    /// Returns `None` when waiting for `slot` could never finish because its
    /// owner is, directly or through other threads, waiting on this thread.
    pub(crate) fn wait_for(&self, slot: &Slot) -> Option<Registration<'_>> {
        let me = thread::current().id();
        // register before looking, so of two threads closing a loop at least one sees it
        self.waiting.insert(me, slot.clone());
        let registration = Registration {
            tracker: self,
            kind: Entry::Waiter(me),
        };
        if self.closes_loop(me, slot) {
            return None;
        }
        Some(registration)
    }

    /// Mark this thread as the producer of `slot`
    pub(crate) fn own(&self, slot: &Slot) -> Registration<'_> {
        let me = thread::current().id();
        // the producer itself waits on nothing
        self.waiting.remove(&me);
        self.owners.insert(slot.clone(), me);
        Registration {
            tracker: self,
            kind: Entry::Owner(slot.clone()),
        }
    }

    fn closes_loop(&self, me: ThreadId, slot: &Slot) -> bool {
        let mut current = slot.clone();
        let mut seen = HashSet::new();
        loop {
            let Some(owner) = self.owners.get(&current).map(|o| *o.value()) else {
                return false;
            };
            if owner == me {
                return true;
            }
            if !seen.insert(owner) {
                return false;
            }
            let Some(next) = self.waiting.get(&owner).map(|s| s.value().clone()) else {
                return false;
            };
            current = next;
        }
    }

    /// Number of slots currently being produced
    #[cfg(test)]
    pub(crate) fn owned(&self) -> usize {
        self.owners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn slot<T: 'static>() -> Slot {
        (Key::of::<T>(), None)
    }

    #[test]
    fn registrations_clear_on_drop() {
        let tracker = InFlight::default();
        {
            let _owner = tracker.own(&slot::<u8>());
            assert_eq!(tracker.owned(), 1);
        }
        assert_eq!(tracker.owned(), 0);
        let waiter = tracker.wait_for(&slot::<u8>());
        assert!(waiter.is_some());
        drop(waiter);
        assert!(tracker.waiting.is_empty());
    }

    #[test]
    fn waiting_on_a_free_slot_is_allowed() {
        let tracker = InFlight::default();
        let _owner = tracker.own(&slot::<u8>());
        assert!(tracker.wait_for(&slot::<u16>()).is_some());
    }

    #[test]
    fn loop_through_another_thread_is_refused() {
        let tracker = InFlight::default();
        let _mine = tracker.own(&slot::<u8>());
        let (ready, parked) = mpsc::channel();
        let (release, hold) = mpsc::channel::<()>();

        let tracker = &tracker;
        thread::scope(|s| {
            s.spawn(move || {
                let _theirs = tracker.own(&slot::<u16>());
                let _waiting = tracker.wait_for(&slot::<u8>());
                ready.send(()).unwrap();
                hold.recv().unwrap();
            });
            parked.recv().unwrap();
            assert!(tracker.wait_for(&slot::<u16>()).is_none());
            release.send(()).unwrap();
        });
    }
}
