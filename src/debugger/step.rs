//! Stepper bookkeeping. A stepper tracks one in-progress single-step
//! operation; it is owned by the thread it steps and retired when the channel
//! reports the step complete.

use crate::debugger::channel::{StepHandle, StepKind, ThreadId};
use std::cell::Cell;

#[derive(Debug)]
pub struct Stepper {
    handle: StepHandle,
    kind: StepKind,
    thread: ThreadId,
    active: Cell<bool>,
}

impl Stepper {
    pub(crate) fn new(handle: StepHandle, kind: StepKind, thread: ThreadId) -> Self {
        Self {
            handle,
            kind,
            thread,
            active: Cell::new(true),
        }
    }

    pub fn kind(&self) -> StepKind {
        self.kind
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub(crate) fn handle(&self) -> StepHandle {
        self.handle
    }

    pub(crate) fn matches(&self, handle: StepHandle) -> bool {
        self.handle == handle
    }

    pub(crate) fn retire(&self) {
        self.active.set(false)
    }
}
