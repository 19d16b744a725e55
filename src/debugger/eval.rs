//! In-process method invocation.
//!
//! An evaluation borrows a paused thread and runs a method inside the
//! debuggee, driven by repeated polls of the control channel. All other live
//! threads are held suspended for the duration and released when the
//! evaluation completes or is cancelled.
//!
//! Servicing an evaluation does not expire the debuggee state token: an
//! evaluation is a detour inside the current pause, and every frame or value
//! produced before it stays valid once the call returns. Only a real resume
//! (continue or step) expires state.

use crate::debugger::channel::{
    join_errors, EvalHandle, EvalOutcome, MethodToken, RawValue, ThreadId, EVAL_NOT_ACTIVE,
};
use crate::debugger::error::Error;
use crate::debugger::types::{MethodInfo, PropertyInfo};
use crate::debugger::variable::{Expr, Value};
use crate::debugger::Debugger;
use crate::{muted_error, weak_error};
use log::{debug, warn};
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Progress of an asynchronous evaluation, as seen through [`Debugger::poll_invoke`].
#[derive(Debug)]
pub enum EvalState {
    /// Target code is still executing, poll again.
    InProgress,
    /// The call finished; further polls return the same value.
    Completed(Value),
    /// The call was aborted with [`Debugger::cancel_invoke`].
    Cancelled,
}

/// One in-flight in-process method invocation.
pub struct Eval {
    handle: EvalHandle,
    thread: ThreadId,
    expr: Expr,
    /// Threads suspended by this evaluation, to be resumed exactly once.
    held: RefCell<SmallVec<[ThreadId; 8]>>,
    result: RefCell<Option<RawValue>>,
    cancelled: Cell<bool>,
}

impl Eval {
    /// The thread the call executes on.
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Symbolic expression of the call, for display and re-evaluation.
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn is_finished(&self) -> bool {
        self.cancelled.get() || self.result.borrow().is_some()
    }
}

impl Debugger {
    /// Call a method inside the debuggee and wait for the result.
    ///
    /// Runs on the selected thread. Blocks the controller up to the configured
    /// evaluation timeout, aborting the call on expiry.
    pub fn invoke_method(
        &self,
        target: Option<&Rc<Value>>,
        method: &MethodInfo,
        args: &[Value],
    ) -> Result<Value, Error> {
        let eval = self.begin_invoke(target, method, args)?;
        self.run_to_completion(eval)
    }

    /// Set up a method call without waiting for it. Drive it with
    /// [`Debugger::poll_invoke`] or abort it with [`Debugger::cancel_invoke`].
    pub fn begin_invoke(
        &self,
        target: Option<&Rc<Value>>,
        method: &MethodInfo,
        args: &[Value],
    ) -> Result<Eval, Error> {
        self.check_object(target, method.is_static, method.declaring_type)?;

        // virtual calls dispatch on the runtime type of the target
        let token = if method.is_virtual && !method.is_static {
            let runtime = target
                .and_then(|t| t.raw().type_id())
                .expect("checked instance target carries a type");
            self.resolve_virtual(runtime, method)?.token
        } else {
            method.token
        };

        let mut raw_args = Vec::with_capacity(1 + args.len());
        if !method.is_static {
            raw_args.push(target.expect("checked instance target").raw().clone());
        }
        raw_args.extend(args.iter().map(|a| a.raw().clone()));

        let base = target.map(|t| t.expr().clone()).unwrap_or(Expr::Empty);
        let expr = base.call(
            &method.name,
            args.iter().map(|a| a.expr().clone()).collect(),
        );
        self.begin_eval_raw(token, &raw_args, expr)
    }

    /// Invoke a property accessor. For the set accessor `args` already starts
    /// with the new value, followed by any index arguments.
    pub(crate) fn invoke_accessor(
        &self,
        target: Option<&Rc<Value>>,
        property: &PropertyInfo,
        accessor: MethodToken,
        args: &[Value],
    ) -> Result<RawValue, Error> {
        let mut raw_args = Vec::with_capacity(1 + args.len());
        if !property.is_static {
            raw_args.push(target.expect("checked instance target").raw().clone());
        }
        raw_args.extend(args.iter().map(|a| a.raw().clone()));

        let base = target.map(|t| t.expr().clone()).unwrap_or(Expr::Empty);
        let eval = self.begin_eval_raw(accessor, &raw_args, base.property(&property.name))?;
        let value = self.run_to_completion(eval)?;
        Ok(value.raw().clone())
    }

    /// Give the evaluation a time slice.
    ///
    /// A nested pause inside the invoked code (breakpoint, exception) is
    /// logged and tolerated; the channel resumes the call on the next poll.
    pub fn poll_invoke(&self, eval: &Eval) -> Result<EvalState, Error> {
        if eval.cancelled.get() {
            return Ok(EvalState::Cancelled);
        }
        if let Some(raw) = eval.result.borrow().clone() {
            return Ok(EvalState::Completed(self.eval_value(eval, raw)));
        }

        match self.channel().poll_eval(eval.handle)? {
            EvalOutcome::Pending => Ok(EvalState::InProgress),
            EvalOutcome::Interrupted(reason) => {
                debug!(
                    target: "debugger",
                    "eval `{}` interrupted by {reason:?}, continuing", eval.expr,
                );
                Ok(EvalState::InProgress)
            }
            EvalOutcome::Completed(raw) => {
                debug!(target: "debugger", "eval `{}` completed", eval.expr);
                *eval.result.borrow_mut() = Some(raw.clone());
                self.finish_eval(eval);
                Ok(EvalState::Completed(self.eval_value(eval, raw)))
            }
        }
    }

    /// Abort an in-flight evaluation and release the held threads.
    /// Aborting a finished or already cancelled evaluation is a no-op.
    pub fn cancel_invoke(&self, eval: &Eval) -> Result<(), Error> {
        if eval.is_finished() {
            return Ok(());
        }
        match self.channel().cancel_eval(eval.handle) {
            Ok(()) => {}
            Err(Error::Protocol { code, .. }) if code == EVAL_NOT_ACTIVE => {}
            Err(e) => {
                // still release held threads, the eval is unusable either way
                eval.cancelled.set(true);
                self.finish_eval(eval);
                return Err(e);
            }
        }
        debug!(target: "debugger", "eval `{}` cancelled", eval.expr);
        eval.cancelled.set(true);
        self.finish_eval(eval);
        Ok(())
    }

    pub(crate) fn begin_eval_raw(
        &self,
        token: MethodToken,
        args: &[RawValue],
        expr: Expr,
    ) -> Result<Eval, Error> {
        self.debuggee.assert_paused()?;
        let thread = self
            .debuggee
            .threads
            .selected()
            .ok_or(Error::NoThreadSelected)?;
        thread.assert_live()?;
        let tid = thread.id();

        if !self.active_evals.borrow_mut().insert(tid) {
            return Err(Error::EvalInProgress(tid));
        }

        // hold every other live thread that is not already suspended, so only
        // the borrowed thread makes progress while the call runs
        let mut held = SmallVec::new();
        for other in self.debuggee.threads.snapshot() {
            if other.id() == tid || other.has_expired() {
                continue;
            }
            let already = weak_error!(other.suspended(&self.debuggee)).unwrap_or(true);
            if already {
                continue;
            }
            if weak_error!(other.set_suspended(&self.debuggee, true)).is_some() {
                held.push(other.id());
            }
        }

        let handle = match self.channel().begin_eval(tid, token, args) {
            Ok(handle) => handle,
            Err(e) => {
                self.release_threads(&held);
                self.active_evals.borrow_mut().remove(&tid);
                return Err(e);
            }
        };
        debug!(
            target: "debugger",
            "begin eval `{expr}` on thread {tid}, {} thread(s) held", held.len(),
        );

        Ok(Eval {
            handle,
            thread: tid,
            expr,
            held: RefCell::new(held),
            result: RefCell::new(None),
            cancelled: Cell::new(false),
        })
    }

    fn run_to_completion(&self, eval: Eval) -> Result<Value, Error> {
        let interval = Duration::from_millis(self.config.eval_poll_interval_ms);
        let deadline = Instant::now() + Duration::from_millis(self.config.eval_timeout_ms);
        loop {
            match self.poll_invoke(&eval)? {
                EvalState::Completed(value) => return Ok(value),
                EvalState::Cancelled => return Err(Error::access("evaluation was cancelled")),
                EvalState::InProgress => {}
            }
            if Instant::now() >= deadline {
                warn!(target: "debugger", "eval `{}` timed out, aborting", eval.expr);
                muted_error!(self.cancel_invoke(&eval));
                return Err(Error::EvalTimeout);
            }
            std::thread::sleep(interval);
        }
    }

    fn eval_value(&self, eval: &Eval, raw: RawValue) -> Value {
        Value::new(eval.expr.clone(), raw, self.debuggee.state().clone())
    }

    /// Release bookkeeping, runs exactly once per evaluation.
    fn finish_eval(&self, eval: &Eval) {
        let held = eval.held.take();
        self.release_threads(&held);
        self.active_evals.borrow_mut().remove(&eval.thread);
    }

    /// Resume threads held by an evaluation. A release failure on one thread
    /// must not leave the rest suspended.
    fn release_threads(&self, held: &[ThreadId]) {
        let mut failures = vec![];
        for &tid in held {
            let Some(thread) = self.debuggee.threads.get(tid) else {
                continue;
            };
            if thread.has_expired() {
                continue;
            }
            if let Err(e) = thread.set_suspended(&self.debuggee, false) {
                failures.push((tid, e));
            }
        }
        if !failures.is_empty() {
            warn!(
                target: "debugger",
                "failed to release thread(s) after eval: {}", join_errors(failures),
            );
        }
    }
}
