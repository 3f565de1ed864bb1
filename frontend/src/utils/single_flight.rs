//! At most one pending operation; everyone who asks while it runs awaits the
//! same result.

use std::{
    cell::{Cell, RefCell},
    future::Future,
    rc::Rc,
};

use futures::future::{FutureExt, LocalBoxFuture, Shared};

type Flight<T> = Shared<LocalBoxFuture<'static, T>>;
type Slot<T, K> = Rc<RefCell<Option<Entry<T, K>>>>;

struct Entry<T: Clone + 'static, K> {
    id: u64,
    key: K,
    waiters: usize,
    flight: Flight<T>,
}

/// `K` identifies what the pending flight is doing. Callers only ever join a
/// flight started under an equal key.
pub struct SingleFlight<T: Clone + 'static, K = ()> {
    slot: Slot<T, K>,
    next_id: Cell<u64>,
}

impl<T: Clone + 'static, K> Default for SingleFlight<T, K> {
    fn default() -> Self {
        Self {
            slot: Rc::new(RefCell::new(None)),
            next_id: Cell::new(0),
        }
    }
}

impl<T: Clone + 'static, K: PartialEq + 'static> SingleFlight<T, K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// True while a flight started under a different key is pending.
    pub fn conflicts_with(&self, key: &K) -> bool {
        self.slot
            .borrow()
            .as_ref()
            .is_some_and(|entry| entry.key != *key)
    }

    /// Joins the pending flight, or starts one with `start` when idle.
    /// `start` is only called in the second case. A pending flight is joined
    /// regardless of `key`; check [`Self::conflicts_with`] first when that
    /// matters.
    ///
    /// The flight empties the slot itself as it completes, so a caller
    /// arriving afterwards starts a fresh operation and never receives a
    /// stale result. When every awaiter is dropped before completion the
    /// flight is dropped with them.
    pub async fn run_keyed<F, Fut>(&self, key: K, start: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + 'static,
    {
        let (flight, waiter) = {
            let mut slot = self.slot.borrow_mut();
            let entry = slot.get_or_insert_with(|| {
                let id = self.next_id.get();
                self.next_id.set(id + 1);
                let release = Rc::clone(&self.slot);
                let work = start();
                let flight = async move {
                    let output = work.await;
                    let finished = take_if_current(&release, id);
                    drop(finished);
                    output
                }
                .boxed_local()
                .shared();
                Entry {
                    id,
                    key,
                    waiters: 0,
                    flight,
                }
            });
            entry.waiters += 1;
            let waiter = Waiter {
                slot: Rc::clone(&self.slot),
                id: entry.id,
            };
            (entry.flight.clone(), waiter)
        };
        let output = flight.await;
        drop(waiter);
        output
    }
}

impl<T: Clone + 'static> SingleFlight<T> {
    pub async fn run<F, Fut>(&self, start: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + 'static,
    {
        self.run_keyed((), start).await
    }
}

fn take_if_current<T: Clone + 'static, K>(slot: &Slot<T, K>, id: u64) -> Option<Entry<T, K>> {
    let mut slot = slot.borrow_mut();
    if slot.as_ref().is_some_and(|entry| entry.id == id) {
        slot.take()
    } else {
        None
    }
}

/// One awaiter of a flight. The last one to leave an unfinished flight
/// empties the slot, which drops the flight.
struct Waiter<T: Clone + 'static, K> {
    slot: Slot<T, K>,
    id: u64,
}

impl<T: Clone + 'static, K> Drop for Waiter<T, K> {
    fn drop(&mut self) {
        let abandoned = {
            let mut slot = self.slot.borrow_mut();
            match slot.as_mut() {
                Some(entry) if entry.id == self.id => {
                    entry.waiters -= 1;
                    if entry.waiters == 0 {
                        slot.take()
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        // Dropped outside the borrow: the flight's own drop may run cleanup
        // that reads this slot.
        drop(abandoned);
    }
}
