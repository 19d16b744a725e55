//! Debuggee state token. A unique identifier of the state of the debuggee at
//! a point in time: minted on every resume-then-pause cycle, compared by
//! identity, and invalidated exactly once. Threads, stack frames and values
//! hold non-owning references to the token valid at their creation and check
//! it before any state-dependent operation.

use crate::debugger::error::Error;
use log::debug;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use uuid::Uuid;

type Subscriber = Box<dyn Fn(&DebuggeeState)>;

pub struct DebuggeeState {
    id: Uuid,
    expired: Cell<bool>,
    subscribers: RefCell<Vec<Subscriber>>,
}

impl DebuggeeState {
    pub(crate) fn mint() -> Rc<Self> {
        let state = Rc::new(Self {
            id: Uuid::new_v4(),
            expired: Cell::new(false),
            subscribers: RefCell::default(),
        });
        debug!(target: "debugger", "mint new debuggee state {}", state.id);
        state
    }

    /// Token identity. Two snapshots are the same state iff their ids are equal.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn has_expired(&self) -> bool {
        self.expired.get()
    }

    /// Register a callback fired on invalidation. Subscribing to an already
    /// expired token fires the callback immediately.
    pub fn subscribe(&self, f: impl Fn(&DebuggeeState) + 'static) {
        if self.has_expired() {
            f(self);
            return;
        }
        self.subscribers.borrow_mut().push(Box::new(f));
    }

    /// Mark the token expired and notify subscribers. Idempotent: a second
    /// call is a no-op and produces no notifications.
    pub fn invalidate(&self) {
        if self.expired.replace(true) {
            return;
        }
        debug!(target: "debugger", "debuggee state {} expired", self.id);
        let subscribers = self.subscribers.take();
        for subscriber in &subscribers {
            subscriber(self);
        }
    }

    pub fn assert_valid(&self) -> Result<(), Error> {
        if self.has_expired() {
            return Err(Error::StateExpired);
        }
        Ok(())
    }
}
