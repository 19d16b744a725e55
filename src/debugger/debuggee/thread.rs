//! Thread proxies and the thread registry.
//!
//! A thread proxy caches its last known suspended flag, priority and name:
//! native memory cannot be read while the process is running, so getters fall
//! back to the cache in that state and refresh it only while paused. Writes
//! always go live.

use crate::debugger::channel::{NativeThread, Primitive, StepHandle, ThreadId, CANNOT_INTERCEPT};
use crate::debugger::debuggee::frame::{CallstackWalk, StackFrame};
use crate::debugger::debuggee::Debuggee;
use crate::debugger::error::Error;
use crate::debugger::step::Stepper;
use crate::debugger::variable::{Expr, Value};
use crate::debugger::Debugger;
use fallible_iterator::FallibleIterator;
use indexmap::IndexMap;
use log::{debug, info};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Scheduling priority of a managed thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display)]
pub enum ThreadPriority {
    Lowest,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    Highest,
}

impl ThreadPriority {
    fn from_raw(raw: i64) -> Self {
        match raw {
            0 => ThreadPriority::Lowest,
            1 => ThreadPriority::BelowNormal,
            3 => ThreadPriority::AboveNormal,
            4 => ThreadPriority::Highest,
            _ => ThreadPriority::Normal,
        }
    }
}

/// Proxy of one managed thread in the debuggee.
pub struct Thread {
    id: ThreadId,
    last_suspended: Cell<bool>,
    last_priority: Cell<ThreadPriority>,
    last_name: RefCell<String>,
    has_been_loaded: Cell<bool>,
    has_expired: Cell<bool>,
    native_thread_exited: Cell<bool>,
    steppers: RefCell<Vec<Stepper>>,
    selected_frame: RefCell<Option<Rc<StackFrame>>>,
}

impl Thread {
    pub(crate) fn new(id: ThreadId) -> Self {
        Self {
            id,
            last_suspended: Cell::new(false),
            last_priority: Cell::default(),
            last_name: RefCell::default(),
            has_been_loaded: Cell::new(false),
            has_expired: Cell::new(false),
            native_thread_exited: Cell::new(false),
            steppers: RefCell::default(),
            selected_frame: RefCell::default(),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn has_expired(&self) -> bool {
        self.has_expired.get()
    }

    pub fn has_been_loaded(&self) -> bool {
        self.has_been_loaded.get()
    }

    pub fn native_thread_exited(&self) -> bool {
        self.native_thread_exited.get()
    }

    /// Fail unless the thread still has a live native counterpart.
    pub(crate) fn assert_live(&self) -> Result<(), Error> {
        if self.native_thread_exited.get() {
            return Err(Error::NativeThreadExited(self.id));
        }
        if self.has_expired.get() {
            return Err(Error::ThreadExpired(self.id));
        }
        Ok(())
    }

    /// Last known suspend flag. While the process is running (or after the
    /// thread expired) the cached value is returned without a native call;
    /// while paused the live state is queried and the cache refreshed.
    pub fn suspended(&self, debuggee: &Debuggee) -> Result<bool, Error> {
        if debuggee.is_running() || self.has_expired() {
            return Ok(self.last_suspended.get());
        }
        let live = debuggee.channel().thread_suspended(self.id)?;
        self.last_suspended.set(live);
        Ok(live)
    }

    /// Issue a live suspend/resume request regardless of run state. Unlike
    /// the getter this must take effect immediately.
    pub fn set_suspended(&self, debuggee: &Debuggee, suspend: bool) -> Result<(), Error> {
        self.assert_live()?;
        debuggee.channel().set_thread_suspended(self.id, suspend)?;
        self.last_suspended.set(suspend);
        Ok(())
    }

    /// Cached priority, valid until the next live refresh through
    /// [`Debugger::thread_priority`].
    pub fn last_priority(&self) -> ThreadPriority {
        self.last_priority.get()
    }

    /// Cached name, valid until the next live refresh through
    /// [`Debugger::thread_name`].
    pub fn last_name(&self) -> String {
        self.last_name.borrow().clone()
    }

    /// Materialize the thread's call stack, most recently called frame first.
    pub fn callstack(&self, debuggee: &Debuggee) -> Result<Vec<Rc<StackFrame>>, Error> {
        self.callstack_limited(debuggee, None)
    }

    /// Materialize at most `max_frames` frames of the call stack.
    pub fn callstack_limited(
        &self,
        debuggee: &Debuggee,
        max_frames: Option<usize>,
    ) -> Result<Vec<Rc<StackFrame>>, Error> {
        self.assert_live()?;
        let mut walk = CallstackWalk::new(debuggee, self.id)?;
        let mut frames = vec![];
        while let Some(frame) = walk.next()? {
            frames.push(frame);
            if Some(frames.len()) == max_frames {
                break;
            }
        }
        Ok(frames)
    }

    /// The frame that is currently executing, `None` for an empty callstack.
    pub fn most_recent_frame(&self, debuggee: &Debuggee) -> Result<Option<Rc<StackFrame>>, Error> {
        self.assert_live()?;
        CallstackWalk::new(debuggee, self.id)?.next()
    }

    /// The most recent frame that carries symbol information.
    pub fn most_recent_frame_with_symbols(
        &self,
        debuggee: &Debuggee,
    ) -> Result<Option<Rc<StackFrame>>, Error> {
        self.assert_live()?;
        let mut walk = CallstackWalk::new(debuggee, self.id)?;
        while let Some(frame) = walk.next()? {
            if frame.has_symbols() {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    /// The first frame that was called on the thread.
    pub fn oldest_frame(&self, debuggee: &Debuggee) -> Result<Option<Rc<StackFrame>>, Error> {
        self.assert_live()?;
        let mut walk = CallstackWalk::new(debuggee, self.id)?;
        let mut last = None;
        while let Some(frame) = walk.next()? {
            last = Some(frame);
        }
        Ok(last)
    }

    /// Selected frame of the thread. An expired frame is never returned.
    pub fn selected_frame(&self) -> Option<Rc<StackFrame>> {
        let selected = self.selected_frame.borrow();
        match selected.as_ref() {
            Some(frame) if frame.has_expired() => None,
            other => other.cloned(),
        }
    }

    /// Select a frame of this thread. Only a symbol-bearing frame may be selected.
    pub fn select_frame(&self, frame: Option<Rc<StackFrame>>) -> Result<(), Error> {
        if let Some(frame) = &frame {
            if !frame.has_symbols() {
                return Err(Error::access("selected frame must have symbols"));
            }
        }
        *self.selected_frame.borrow_mut() = frame;
        Ok(())
    }

    pub(crate) fn mark_loaded(&self) -> bool {
        !self.has_been_loaded.replace(true)
    }

    pub(crate) fn expire(&self) {
        debug_assert!(!self.has_expired.get());
        info!(target: "debugger", "thread {} expired", self.id);
        self.has_expired.set(true);
        self.steppers.borrow_mut().clear();
    }

    pub(crate) fn notify_native_exited(&self) -> bool {
        let newly_expired = if !self.has_expired.get() {
            self.expire();
            true
        } else {
            false
        };
        self.native_thread_exited.set(true);
        newly_expired
    }

    pub(crate) fn add_stepper(&self, stepper: Stepper) {
        self.steppers.borrow_mut().push(stepper);
    }

    pub fn active_steppers(&self) -> usize {
        self.steppers.borrow().iter().filter(|s| s.is_active()).count()
    }

    /// Remove all steppers of the thread, for cancellation on an unrelated pause.
    pub(crate) fn drain_steppers(&self) -> Vec<Stepper> {
        self.steppers.take()
    }

    /// Retire and remove the stepper matching a completed native step request.
    pub(crate) fn take_stepper(&self, handle: StepHandle) -> Result<Stepper, Error> {
        let mut steppers = self.steppers.borrow_mut();
        let idx = steppers
            .iter()
            .position(|s| s.matches(handle))
            .ok_or(Error::StepperNotFound(self.id))?;
        let stepper = steppers.remove(idx);
        stepper.retire();
        Ok(stepper)
    }
}

/// Result of re-syncing the registry against a native thread enumeration.
#[derive(Default)]
pub(crate) struct SyncOutcome {
    pub created: Vec<Rc<Thread>>,
    pub expired: Vec<Rc<Thread>>,
    pub loaded: Vec<Rc<Thread>>,
}

/// Registry of thread proxies, keyed by native id in enumeration order.
/// Expired threads stay registered: their identity remains valid for display.
pub(crate) struct ThreadCtl {
    threads: IndexMap<ThreadId, Rc<Thread>>,
    selected: Option<ThreadId>,
}

impl ThreadCtl {
    pub(crate) fn new() -> Self {
        Self {
            threads: IndexMap::new(),
            selected: None,
        }
    }

    pub(crate) fn register(&mut self, id: ThreadId) -> Rc<Thread> {
        debug!(target: "debugger", "register new thread proxy, thread: {id}");
        let thread = Rc::new(Thread::new(id));
        self.threads.insert(id, thread.clone());
        thread
    }

    pub(crate) fn get(&self, id: ThreadId) -> Option<Rc<Thread>> {
        self.threads.get(&id).cloned()
    }

    pub(crate) fn ensure(&self, id: ThreadId) -> Result<Rc<Thread>, Error> {
        self.get(id).ok_or(Error::ThreadNotFound(id))
    }

    pub(crate) fn select(&mut self, id: ThreadId) {
        self.selected = Some(id);
    }

    pub(crate) fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub(crate) fn selected(&self) -> Option<Rc<Thread>> {
        self.selected.and_then(|id| self.get(id))
    }

    pub(crate) fn snapshot(&self) -> Vec<Rc<Thread>> {
        self.threads.values().cloned().collect()
    }

    /// Diff the registry against a fresh native enumeration: register new
    /// threads, flip `has_been_loaded` where reported, expire the vanished.
    /// Clears the selection if the selected thread expired.
    pub(crate) fn sync(&mut self, reported: &[NativeThread]) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();

        for native in reported {
            match self.get(native.id) {
                Some(thread) => {
                    if native.has_managed_code && thread.mark_loaded() {
                        outcome.loaded.push(thread);
                    }
                }
                None => {
                    let thread = self.register(native.id);
                    if native.has_managed_code {
                        thread.mark_loaded();
                    }
                    outcome.created.push(thread);
                }
            }
        }

        let vanished: Vec<Rc<Thread>> = self
            .threads
            .values()
            .filter(|t| !t.has_expired() && !reported.iter().any(|n| n.id == t.id()))
            .cloned()
            .collect();
        for thread in vanished {
            thread.expire();
            if self.selected == Some(thread.id()) {
                self.clear_selection();
            }
            outcome.expired.push(thread);
        }

        outcome
    }
}

/// Point-in-time dump of one registered thread, for host-side listings.
/// Built from cached values only, no native calls.
#[derive(Debug, Clone)]
pub struct ThreadSnapshot {
    pub id: ThreadId,
    pub name: String,
    pub priority: ThreadPriority,
    pub suspended: bool,
    pub has_been_loaded: bool,
    pub expired: bool,
    /// True for the currently selected thread.
    pub in_focus: bool,
}

impl Debugger {
    /// Ordered dump of every registered thread, expired ones included.
    pub fn thread_snapshot(&self) -> Vec<ThreadSnapshot> {
        let selected = self.debuggee.threads.selected().map(|t| t.id());
        self.debuggee
            .threads
            .snapshot()
            .iter()
            .map(|t| ThreadSnapshot {
                id: t.id(),
                name: t.last_name(),
                priority: t.last_priority(),
                suspended: t.last_suspended.get(),
                has_been_loaded: t.has_been_loaded(),
                expired: t.has_expired(),
                in_focus: Some(t.id()) == selected,
            })
            .collect()
    }

    /// Last known suspend flag of a thread, see [`Thread::suspended`].
    pub fn thread_suspended(&self, tid: ThreadId) -> Result<bool, Error> {
        self.debuggee.threads.ensure(tid)?.suspended(&self.debuggee)
    }

    /// Suspend or resume a single thread, effective immediately.
    pub fn set_thread_suspended(&self, tid: ThreadId, suspend: bool) -> Result<(), Error> {
        self.debuggee.threads.ensure(tid)?.set_suspended(&self.debuggee, suspend)
    }

    /// The runtime's own object for a thread, the entry point for member
    /// reads like priority and name. Requires a loaded thread and a paused
    /// debuggee.
    pub fn runtime_value(&self, tid: ThreadId) -> Result<Value, Error> {
        let thread = self.debuggee.threads.ensure(tid)?;
        thread.assert_live()?;
        if !thread.has_been_loaded() {
            return Err(Error::ThreadNotStarted(tid));
        }
        self.debuggee.assert_paused()?;

        let raw = self.channel().thread_object(tid)?;
        Ok(Value::new(Expr::Empty, raw, self.debuggee.state().clone()))
    }

    /// Priority of a thread. Returns the cached value while the process is
    /// running or before the thread has executed managed code.
    pub fn thread_priority(&self, tid: ThreadId) -> Result<ThreadPriority, Error> {
        let thread = self.debuggee.threads.ensure(tid)?;
        if !thread.has_been_loaded() || self.debuggee.is_running() || thread.has_expired() {
            return Ok(thread.last_priority.get());
        }

        let runtime = self.runtime_value(tid)?;
        if runtime.is_null() {
            return Ok(ThreadPriority::Normal);
        }
        let priority = self
            .member_value(&Rc::new(runtime), "m_Priority")?
            .ok_or_else(|| Error::MemberNotFound("m_Priority".to_string()))?;
        let priority = match priority.primitive() {
            Some(Primitive::Int(raw)) => ThreadPriority::from_raw(*raw),
            Some(Primitive::UInt(raw)) => ThreadPriority::from_raw(*raw as i64),
            _ => ThreadPriority::Normal,
        };
        thread.last_priority.set(priority);
        Ok(priority)
    }

    /// Name of a thread, with the same caching policy as priority.
    pub fn thread_name(&self, tid: ThreadId) -> Result<String, Error> {
        let thread = self.debuggee.threads.ensure(tid)?;
        if !thread.has_been_loaded() || self.debuggee.is_running() || thread.has_expired() {
            return Ok(thread.last_name.borrow().clone());
        }

        let runtime = self.runtime_value(tid)?;
        if runtime.is_null() {
            return Ok(thread.last_name.borrow().clone());
        }
        let name = self
            .member_value(&Rc::new(runtime), "m_Name")?
            .ok_or_else(|| Error::MemberNotFound("m_Name".to_string()))?;
        if name.is_null() {
            return Ok(String::new());
        }
        let name = match name.primitive() {
            Some(Primitive::String(s)) => s.clone(),
            _ => String::new(),
        };
        *thread.last_name.borrow_mut() = name.clone();
        Ok(name)
    }

    /// Retarget the current exception of a thread to its most recent
    /// symbol-bearing frame.
    ///
    /// Returns `false`, not an error, when no frame is available (the stack
    /// overflow case) or the runtime refuses the interception.
    pub fn intercept_current_exception(&self, tid: ThreadId) -> Result<bool, Error> {
        let thread = self.debuggee.threads.ensure(tid)?;
        thread.assert_live()?;

        let Some(frame) = thread.most_recent_frame_with_symbols(&self.debuggee)? else {
            return Ok(false);
        };

        match self.channel().intercept_exception(tid, frame.handle()) {
            Ok(()) => Ok(true),
            Err(Error::Protocol { code, .. }) if code == CANNOT_INTERCEPT => Ok(false),
            Err(e) => Err(e),
        }
    }
}
