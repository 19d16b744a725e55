//! Debugging engine for managed runtimes.
//!
//! The [`Debugger`] object owns the attached process model and is driven from
//! a single controller thread: resume, wait, inspect, evaluate. Hosts observe
//! lifecycle events through an [`EventHook`] implementation and inspect the
//! paused target through thread, frame and value proxies, all of which expire
//! together with the pause that produced them.

pub mod channel;
pub mod debuggee;
pub mod error;
pub mod eval;
pub mod state;
pub mod step;
pub mod types;
pub mod variable;

pub use error::Error;

use crate::config::EngineConfig;
use crate::debugger::channel::{
    AttachTarget, ControlChannel, PauseReason, RawValue, StepKind, ThreadId,
};
use crate::debugger::debuggee::frame::StackFrame;
use crate::debugger::debuggee::thread::Thread;
use crate::debugger::debuggee::Debuggee;
use crate::debugger::step::Stepper;
use crate::debugger::types::{Member, TypeCache};
use crate::debugger::variable::{Expr, Value};
use crate::muted_error;
use bytes::Bytes;
use log::debug;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use uuid::Uuid;

/// Lifecycle notifications of a debugging session.
///
/// Methods are called from the controller thread, between state transitions.
/// Default implementations do nothing, a host overrides what it cares about.
#[allow(unused_variables)]
pub trait EventHook {
    /// The debuggee paused. An error returned from here aborts the wait with
    /// [`Error::Hook`].
    fn on_paused(&self, reason: PauseReason) -> anyhow::Result<()> {
        Ok(())
    }

    /// The debuggee process exited with code.
    fn on_exit(&self, code: i32) {}

    /// A new thread proxy was registered.
    fn on_thread_created(&self, tid: ThreadId) {}

    /// A thread executed managed code for the first time.
    fn on_thread_loaded(&self, tid: ThreadId) {}

    /// A thread expired. Fires at most once per thread.
    fn on_thread_expired(&self, tid: ThreadId) {}

    /// The native OS thread behind a proxy ended.
    fn on_native_thread_exited(&self, tid: ThreadId) {}

    /// A debuggee state token expired (the debuggee resumed or exited).
    fn on_state_expired(&self, state_id: Uuid) {}
}

/// Hook that does nothing, for hosts driving the engine by return values alone.
pub struct NopHook {}

impl EventHook for NopHook {}

/// Builder of a debugging session.
pub struct DebuggerBuilder {
    config: EngineConfig,
    hooks: Box<dyn EventHook>,
}

impl Default for DebuggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DebuggerBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            hooks: Box::new(NopHook {}),
        }
    }

    pub fn with_config(self, config: EngineConfig) -> Self {
        Self { config, ..self }
    }

    pub fn with_hooks(self, hooks: impl EventHook + 'static) -> Self {
        Self {
            hooks: Box::new(hooks),
            ..self
        }
    }

    /// Attach to a target through the given channel. On success the debuggee
    /// is paused, its initial threads registered and the first one selected.
    pub fn attach(
        self,
        channel: Box<dyn ControlChannel>,
        target: &AttachTarget,
    ) -> Result<Debugger, Error> {
        let info = channel.attach(target)?;
        debug!(target: "debugger", "attached to process {}", info.process_id);

        let mut debugger = Debugger {
            debuggee: Debuggee::attached(channel, info),
            hooks: self.hooks,
            type_cache: TypeCache::default(),
            active_evals: RefCell::default(),
            config: self.config,
        };
        debugger.sync_threads()?;
        let first = debugger.debuggee.threads.snapshot().first().map(|t| t.id());
        if let Some(tid) = first {
            debugger.debuggee.threads.select(tid);
        }
        Ok(debugger)
    }
}

/// Root of a debugging session.
pub struct Debugger {
    pub(crate) debuggee: Debuggee,
    hooks: Box<dyn EventHook>,
    pub(crate) type_cache: TypeCache,
    /// Threads with an in-flight evaluation; nested evaluations are rejected.
    pub(crate) active_evals: RefCell<HashSet<ThreadId>>,
    pub(crate) config: EngineConfig,
}

impl Debugger {
    pub(crate) fn channel(&self) -> &dyn ControlChannel {
        self.debuggee.channel()
    }

    pub fn process_id(&self) -> u32 {
        self.debuggee.process_id()
    }

    /// Resume the whole debuggee and block until the next reportable pause.
    ///
    /// Thread lifecycle events observed while running are folded into the
    /// registry and the wait continues; only user-visible pauses (breakpoint,
    /// step completion, exception, break request) and process exit return.
    pub fn continue_debugee(&mut self) -> Result<PauseReason, Error> {
        self.debuggee.assert_paused()?;
        let expired = self.debuggee.begin_resume();
        self.hooks.on_state_expired(expired);
        self.wait_for_pause()
    }

    /// Suspend a running debuggee. A fresh debuggee state is available when
    /// this returns.
    pub fn break_debugee(&mut self) -> Result<(), Error> {
        if !self.debuggee.is_running() {
            return Err(Error::ProcessNotRunning);
        }
        self.channel().break_all()?;
        self.debuggee.complete_pause();
        self.sync_threads()?;
        self.hooks.on_paused(PauseReason::Pause).map_err(Error::Hook)
    }

    /// Execute a single step of the given kind on a thread and wait for the
    /// next pause (usually, but not necessarily, the step completion).
    pub fn step(&mut self, tid: ThreadId, kind: StepKind) -> Result<PauseReason, Error> {
        self.debuggee.assert_paused()?;
        let thread = self.debuggee.threads.ensure(tid)?;
        thread.assert_live()?;

        let handle = self.channel().begin_step(tid, kind)?;
        thread.add_stepper(Stepper::new(handle, kind, tid));
        debug!(target: "debugger", "begin {kind} step on thread {tid}");
        self.continue_debugee()
    }

    fn wait_for_pause(&mut self) -> Result<PauseReason, Error> {
        loop {
            let reason = self.debuggee.channel().resume_and_wait()?;
            match reason {
                PauseReason::ThreadCreated(tid) => {
                    if self.debuggee.threads.get(tid).is_none() {
                        self.debuggee.threads.register(tid);
                        self.hooks.on_thread_created(tid);
                    }
                }
                PauseReason::ThreadExited(tid) => {
                    if let Some(thread) = self.debuggee.threads.get(tid) {
                        if thread.notify_native_exited() {
                            self.hooks.on_thread_expired(tid);
                        }
                        self.hooks.on_native_thread_exited(tid);
                        let selected = self.debuggee.threads.selected().map(|t| t.id());
                        if selected == Some(tid) {
                            self.debuggee.threads.clear_selection();
                        }
                    }
                }
                PauseReason::Exited(code) => {
                    self.debuggee.mark_exited(code);
                    for thread in self.debuggee.threads.snapshot() {
                        if !thread.has_expired() {
                            thread.expire();
                            self.hooks.on_thread_expired(thread.id());
                        }
                    }
                    self.debuggee.threads.clear_selection();
                    self.hooks.on_exit(code);
                    return Ok(reason);
                }
                terminal => {
                    self.debuggee.complete_pause();
                    self.sync_threads()?;
                    self.retire_steppers(terminal);
                    if let PauseReason::Breakpoint(tid)
                    | PauseReason::StepComplete(tid, _)
                    | PauseReason::Exception(tid) = terminal
                    {
                        if self.debuggee.threads.get(tid).is_some() {
                            self.debuggee.threads.select(tid);
                        }
                    }
                    self.hooks.on_paused(terminal).map_err(Error::Hook)?;
                    return Ok(terminal);
                }
            }
        }
    }

    /// A completed step retires its stepper; every other stepper is stale at
    /// the new pause and its native request is cancelled.
    fn retire_steppers(&self, reason: PauseReason) {
        if let PauseReason::StepComplete(tid, handle) = reason {
            if let Some(thread) = self.debuggee.threads.get(tid) {
                muted_error!(thread.take_stepper(handle));
            }
        }
        for thread in self.debuggee.threads.snapshot() {
            for stepper in thread.drain_steppers() {
                stepper.retire();
                muted_error!(self.channel().cancel_step(stepper.handle()));
            }
        }
    }

    fn sync_threads(&mut self) -> Result<(), Error> {
        let reported = self.debuggee.channel().enumerate_threads()?;
        let outcome = self.debuggee.threads.sync(&reported);
        for thread in &outcome.created {
            self.hooks.on_thread_created(thread.id());
        }
        for thread in &outcome.loaded {
            self.hooks.on_thread_loaded(thread.id());
        }
        for thread in &outcome.expired {
            self.hooks.on_thread_expired(thread.id());
        }
        Ok(())
    }

    pub fn threads(&self) -> Vec<Rc<Thread>> {
        self.debuggee.threads.snapshot()
    }

    pub fn thread(&self, tid: ThreadId) -> Result<Rc<Thread>, Error> {
        self.debuggee.threads.ensure(tid)
    }

    pub fn selected_thread(&self) -> Option<Rc<Thread>> {
        self.debuggee.threads.selected()
    }

    /// Select the thread subsequent frame and evaluation operations target.
    pub fn select_thread(&mut self, tid: ThreadId) -> Result<(), Error> {
        let thread = self.debuggee.threads.ensure(tid)?;
        thread.assert_live()?;
        self.debuggee.threads.select(tid);
        Ok(())
    }

    /// Materialize a thread's call stack, most recent frame first. Without an
    /// explicit limit the configured default applies.
    pub fn get_callstack(
        &self,
        tid: ThreadId,
        max_frames: Option<usize>,
    ) -> Result<Vec<Rc<StackFrame>>, Error> {
        self.debuggee.assert_paused()?;
        let thread = self.debuggee.threads.ensure(tid)?;
        thread.callstack_limited(&self.debuggee, max_frames.or(self.config.default_frame_limit))
    }

    /// Select the frame used as variable and static-resolution context for a
    /// thread, or clear the selection with `None`.
    pub fn select_frame(
        &self,
        tid: ThreadId,
        frame: Option<Rc<StackFrame>>,
    ) -> Result<(), Error> {
        self.debuggee.threads.ensure(tid)?.select_frame(frame)
    }

    /// Locals and arguments of a frame, in declaration order.
    pub fn frame_variables(&self, frame: &StackFrame) -> Result<Vec<Value>, Error> {
        frame.assert_valid()?;
        let locals = self.channel().frame_locals(frame.handle())?;
        Ok(locals
            .into_iter()
            .map(|(name, raw)| Value::new(Expr::variable(name), raw, self.debuggee.state().clone()))
            .collect())
    }

    /// Evaluate a symbolic expression against the current pause: a local of
    /// the context frame, followed by member reads and method calls.
    pub fn read_value(&self, expr: &Expr) -> Result<Value, Error> {
        self.debuggee.assert_paused()?;
        self.evaluate_expr(expr)
    }

    /// Assign to the location a symbolic expression names. Only a field or a
    /// settable property tail is assignable.
    pub fn write_value(&self, expr: &Expr, new_value: RawValue) -> Result<(), Error> {
        self.debuggee.assert_paused()?;
        let (base, name) = match expr {
            Expr::Field(base, name) | Expr::Property(base, name) => (base, name),
            _ => return Err(Error::access("expression is not assignable")),
        };
        let target = Rc::new(self.evaluate_expr(base)?);
        let runtime = target
            .raw()
            .type_id()
            .ok_or_else(|| Error::access("Target object is not class or value type"))?;
        match self.find_member(runtime, name)? {
            Some(Member::Field(field)) => self.set_field_value(Some(&target), &field, &new_value),
            Some(Member::Property(property)) => {
                let value = Value::new(expr.clone(), new_value, self.debuggee.state().clone());
                self.set_property_value(Some(&target), &property, &[], value)
            }
            None => Err(Error::MemberNotFound(name.clone())),
        }
    }

    fn evaluate_expr(&self, expr: &Expr) -> Result<Value, Error> {
        match expr {
            Expr::Empty => Err(Error::access("No target object specified")),
            Expr::Variable(name) => self.local_variable(name),
            Expr::Field(base, name) | Expr::Property(base, name) => {
                let target = Rc::new(self.evaluate_expr(base)?);
                self.member_value(&target, name)?
                    .ok_or_else(|| Error::MemberNotFound(name.clone()))
            }
            Expr::Call(base, name, args) => {
                let target = Rc::new(self.evaluate_expr(base)?);
                let runtime = target
                    .raw()
                    .type_id()
                    .ok_or_else(|| Error::access("Target object is not class or value type"))?;
                let method = self
                    .find_method(runtime, name)?
                    .ok_or_else(|| Error::MemberNotFound(name.clone()))?;
                let args = args
                    .iter()
                    .map(|a| self.evaluate_expr(a))
                    .collect::<Result<Vec<_>, _>>()?;
                self.invoke_method(Some(&target), &method, &args)
            }
        }
    }

    /// A local of the selected thread's context frame (the selected frame, or
    /// the most recent symbol-bearing frame).
    fn local_variable(&self, name: &str) -> Result<Value, Error> {
        let thread = self
            .debuggee
            .threads
            .selected()
            .ok_or(Error::NoThreadSelected)?;
        let frame = match thread.selected_frame() {
            Some(frame) => frame,
            None => thread
                .most_recent_frame_with_symbols(&self.debuggee)?
                .ok_or_else(|| Error::VariableNotFound(name.to_string()))?,
        };
        let locals = self.channel().frame_locals(frame.handle())?;
        let (name, raw) = locals
            .into_iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| Error::VariableNotFound(name.to_string()))?;
        Ok(Value::new(
            Expr::variable(name),
            raw,
            self.debuggee.state().clone(),
        ))
    }

    /// Raw memory view of the target process.
    pub fn read_memory(&self, addr: usize, len: usize) -> Result<Bytes, Error> {
        self.debuggee.assert_paused()?;
        self.channel().read_memory(addr, len)
    }

    /// Detach from the target, leaving it running. Consumes the session.
    pub fn detach(self) -> Result<(), Error> {
        debug!(target: "debugger", "detach from process {}", self.debuggee.process_id());
        self.channel().detach()
    }

    /// Kill the target process. Consumes the session.
    pub fn terminate(self) -> Result<(), Error> {
        debug!(target: "debugger", "terminate process {}", self.debuggee.process_id());
        self.channel().terminate()
    }
}
