#![allow(dead_code)]

//! Scripted control channel and recording hooks shared by the integration tests.

use bytes::Bytes;
use fallible_iterator::convert;
use mdbg::debugger::channel::{
    AttachInfo, AttachTarget, ChainCursor, ControlChannel, EvalHandle, EvalOutcome, FieldToken,
    FrameCursor, FrameHandle, MethodToken, NativeChain, NativeFrame, NativeThread, ObjectHandle,
    PauseReason, ProtocolCode, RawValue, StepHandle, StepKind, SymbolInfo, ThreadId, TypeId,
    CANNOT_INTERCEPT, EVAL_NOT_ACTIVE, FRAME_UNAVAILABLE,
};
use mdbg::debugger::types::TypeDescription;
use mdbg::debugger::{Error, EventHook};
use mdbg::{Debugger, DebuggerBuilder, EngineConfig};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use uuid::Uuid;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// What a scripted evaluation does when polled.
pub enum EvalBehavior {
    /// Complete immediately with a fixed value.
    Return(RawValue),
    /// Read a backing field of the target object (args\[0\]).
    GetBacking(FieldToken),
    /// Write args\[1\] into a backing field of the target object (args\[0\]).
    SetBacking(FieldToken),
    /// Replay a fixed sequence of outcomes, one per poll.
    Script(VecDeque<EvalOutcome>),
}

#[derive(Clone)]
pub struct ActiveEval {
    pub token: MethodToken,
    pub args: Vec<RawValue>,
}

/// Mutable world state behind a [`ScriptedChannel`]. Tests prepare it before
/// attach and mutate it between pauses.
#[derive(Default)]
pub struct World {
    pub process_id: u32,
    pub threads: Vec<NativeThread>,
    pub chains: HashMap<ThreadId, Vec<(NativeChain, Vec<NativeFrame>)>>,
    pub symbols: HashMap<FrameHandle, SymbolInfo>,
    pub broken_frames: HashSet<FrameHandle>,
    pub locals: HashMap<FrameHandle, Vec<(String, RawValue)>>,
    pub suspended: HashMap<ThreadId, bool>,
    pub suspend_queries: usize,
    pub suspend_requests: Vec<(ThreadId, bool)>,
    pub thread_objects: HashMap<ThreadId, RawValue>,
    pub types: HashMap<TypeId, TypeDescription>,
    pub fields: HashMap<(ObjectKey, FieldToken), RawValue>,
    pub statics: HashMap<(TypeId, FieldToken), RawValue>,
    pub last_static_frame_ctx: Option<FrameHandle>,
    pub failing_fields: HashSet<FieldToken>,
    pub eval_behaviors: HashMap<MethodToken, EvalBehavior>,
    pub evals: HashMap<EvalHandle, ActiveEval>,
    pub cancelled_evals: usize,
    pub steps_started: Vec<(ThreadId, StepKind)>,
    pub cancelled_steps: usize,
    pub intercept_refused: HashSet<ThreadId>,
    pub intercepted: Vec<(ThreadId, FrameHandle)>,
    pub pauses: VecDeque<PauseReason>,
    pub memory: Vec<u8>,
    pub detached: bool,
    pub terminated: bool,
    next_handle: u64,
    next_step: u64,
}

pub type ObjectKey = u64;

impl World {
    pub fn alloc_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    pub fn add_thread(&mut self, id: u32, has_managed_code: bool) -> ThreadId {
        let tid = ThreadId(id);
        self.threads.push(NativeThread {
            id: tid,
            has_managed_code,
        });
        tid
    }

    pub fn set_managed(&mut self, id: ThreadId, has_managed_code: bool) {
        let thread = self
            .threads
            .iter_mut()
            .find(|t| t.id == id)
            .expect("scripted thread");
        thread.has_managed_code = has_managed_code;
    }

    fn remove_thread(&mut self, id: ThreadId) {
        self.threads.retain(|t| t.id != id);
    }
}

pub struct ScriptedChannel {
    world: Rc<RefCell<World>>,
}

impl ScriptedChannel {
    pub fn new(world: Rc<RefCell<World>>) -> Self {
        Self { world }
    }
}

fn protocol(op: &'static str, code: ProtocolCode) -> Error {
    Error::Protocol { op, code }
}

impl ControlChannel for ScriptedChannel {
    fn attach(&self, _target: &AttachTarget) -> Result<AttachInfo, Error> {
        Ok(AttachInfo {
            process_id: self.world.borrow().process_id,
        })
    }

    fn detach(&self) -> Result<(), Error> {
        self.world.borrow_mut().detached = true;
        Ok(())
    }

    fn terminate(&self) -> Result<(), Error> {
        self.world.borrow_mut().terminated = true;
        Ok(())
    }

    fn resume_and_wait(&self) -> Result<PauseReason, Error> {
        let mut w = self.world.borrow_mut();
        let reason = w.pauses.pop_front().expect("scripted pause reason");
        if let PauseReason::ThreadExited(tid) = reason {
            w.remove_thread(tid);
        }
        Ok(reason)
    }

    fn break_all(&self) -> Result<(), Error> {
        Ok(())
    }

    fn enumerate_threads(&self) -> Result<Vec<NativeThread>, Error> {
        Ok(self.world.borrow().threads.clone())
    }

    fn enumerate_chains(&self, tid: ThreadId) -> Result<ChainCursor, Error> {
        let chains: Vec<NativeChain> = self
            .world
            .borrow()
            .chains
            .get(&tid)
            .map(|v| v.iter().map(|(c, _)| *c).collect())
            .unwrap_or_default();
        Ok(Box::new(convert(chains.into_iter().map(Ok))))
    }

    fn enumerate_frames(&self, chain: &NativeChain) -> Result<FrameCursor, Error> {
        let frames: Vec<NativeFrame> = self
            .world
            .borrow()
            .chains
            .values()
            .flatten()
            .find(|(c, _)| c.handle == chain.handle)
            .map(|(_, frames)| frames.clone())
            .unwrap_or_default();
        Ok(Box::new(convert(frames.into_iter().map(Ok))))
    }

    fn frame_symbols(&self, frame: FrameHandle) -> Result<Option<SymbolInfo>, Error> {
        let w = self.world.borrow();
        if w.broken_frames.contains(&frame) {
            return Err(protocol("frame_symbols", FRAME_UNAVAILABLE));
        }
        Ok(w.symbols.get(&frame).cloned())
    }

    fn frame_locals(&self, frame: FrameHandle) -> Result<Vec<(String, RawValue)>, Error> {
        Ok(self
            .world
            .borrow()
            .locals
            .get(&frame)
            .cloned()
            .unwrap_or_default())
    }

    fn thread_suspended(&self, tid: ThreadId) -> Result<bool, Error> {
        let mut w = self.world.borrow_mut();
        w.suspend_queries += 1;
        Ok(*w.suspended.get(&tid).unwrap_or(&false))
    }

    fn set_thread_suspended(&self, tid: ThreadId, suspend: bool) -> Result<(), Error> {
        let mut w = self.world.borrow_mut();
        w.suspend_requests.push((tid, suspend));
        w.suspended.insert(tid, suspend);
        Ok(())
    }

    fn thread_object(&self, tid: ThreadId) -> Result<RawValue, Error> {
        Ok(self
            .world
            .borrow()
            .thread_objects
            .get(&tid)
            .cloned()
            .unwrap_or(RawValue::Null))
    }

    fn describe_type(&self, ty: TypeId) -> Result<TypeDescription, Error> {
        self.world
            .borrow()
            .types
            .get(&ty)
            .cloned()
            .ok_or(protocol("describe_type", ProtocolCode(0x8013_1130)))
    }

    fn read_field(&self, obj: ObjectHandle, field: FieldToken) -> Result<RawValue, Error> {
        let w = self.world.borrow();
        if w.failing_fields.contains(&field) {
            return Err(protocol("read_field", ProtocolCode(0x8013_1301)));
        }
        Ok(w.fields.get(&(obj.0, field)).cloned().unwrap_or(RawValue::Null))
    }

    fn read_static_field(
        &self,
        ty: TypeId,
        field: FieldToken,
        frame: Option<FrameHandle>,
    ) -> Result<RawValue, Error> {
        let mut w = self.world.borrow_mut();
        w.last_static_frame_ctx = frame;
        if w.failing_fields.contains(&field) {
            return Err(protocol("read_static_field", ProtocolCode(0x8013_1301)));
        }
        Ok(w.statics.get(&(ty, field)).cloned().unwrap_or(RawValue::Null))
    }

    fn write_field(
        &self,
        obj: ObjectHandle,
        field: FieldToken,
        value: &RawValue,
    ) -> Result<(), Error> {
        self.world
            .borrow_mut()
            .fields
            .insert((obj.0, field), value.clone());
        Ok(())
    }

    fn write_static_field(
        &self,
        ty: TypeId,
        field: FieldToken,
        value: &RawValue,
    ) -> Result<(), Error> {
        self.world
            .borrow_mut()
            .statics
            .insert((ty, field), value.clone());
        Ok(())
    }

    fn begin_eval(
        &self,
        _tid: ThreadId,
        method: MethodToken,
        args: &[RawValue],
    ) -> Result<EvalHandle, Error> {
        let mut w = self.world.borrow_mut();
        let handle = EvalHandle(w.alloc_handle());
        w.evals.insert(
            handle,
            ActiveEval {
                token: method,
                args: args.to_vec(),
            },
        );
        Ok(handle)
    }

    fn poll_eval(&self, eval: EvalHandle) -> Result<EvalOutcome, Error> {
        enum Act {
            Done(RawValue),
            Get(FieldToken),
            Set(FieldToken),
            Next(Option<EvalOutcome>),
        }

        let mut w = self.world.borrow_mut();
        let active = w
            .evals
            .get(&eval)
            .cloned()
            .ok_or(protocol("poll_eval", EVAL_NOT_ACTIVE))?;

        let act = match w.eval_behaviors.get_mut(&active.token) {
            None => Act::Done(RawValue::Null),
            Some(EvalBehavior::Return(value)) => Act::Done(value.clone()),
            Some(EvalBehavior::GetBacking(field)) => Act::Get(*field),
            Some(EvalBehavior::SetBacking(field)) => Act::Set(*field),
            Some(EvalBehavior::Script(outcomes)) => Act::Next(outcomes.pop_front()),
        };

        let outcome = match act {
            Act::Done(value) => EvalOutcome::Completed(value),
            Act::Get(field) => {
                let obj = active.args[0].object_handle().expect("object target");
                EvalOutcome::Completed(
                    w.fields.get(&(obj.0, field)).cloned().unwrap_or(RawValue::Null),
                )
            }
            Act::Set(field) => {
                let obj = active.args[0].object_handle().expect("object target");
                w.fields.insert((obj.0, field), active.args[1].clone());
                EvalOutcome::Completed(RawValue::Null)
            }
            Act::Next(Some(outcome)) => outcome,
            Act::Next(None) => return Err(protocol("poll_eval", EVAL_NOT_ACTIVE)),
        };
        if matches!(outcome, EvalOutcome::Completed(_)) {
            w.evals.remove(&eval);
        }
        Ok(outcome)
    }

    fn cancel_eval(&self, eval: EvalHandle) -> Result<(), Error> {
        let mut w = self.world.borrow_mut();
        if w.evals.remove(&eval).is_none() {
            return Err(protocol("cancel_eval", EVAL_NOT_ACTIVE));
        }
        w.cancelled_evals += 1;
        Ok(())
    }

    fn begin_step(&self, tid: ThreadId, kind: StepKind) -> Result<StepHandle, Error> {
        let mut w = self.world.borrow_mut();
        w.steps_started.push((tid, kind));
        w.next_step += 1;
        Ok(StepHandle(500 + w.next_step))
    }

    fn cancel_step(&self, _step: StepHandle) -> Result<(), Error> {
        self.world.borrow_mut().cancelled_steps += 1;
        Ok(())
    }

    fn intercept_exception(&self, tid: ThreadId, frame: FrameHandle) -> Result<(), Error> {
        let mut w = self.world.borrow_mut();
        if w.intercept_refused.contains(&tid) {
            return Err(protocol("intercept_exception", CANNOT_INTERCEPT));
        }
        w.intercepted.push((tid, frame));
        Ok(())
    }

    fn read_memory(&self, addr: usize, len: usize) -> Result<Bytes, Error> {
        let w = self.world.borrow();
        let slice = w.memory.get(addr..addr + len).unwrap_or(&[]);
        Ok(Bytes::copy_from_slice(slice))
    }
}

/// Shared recordings of every hook invocation, cloneable into a [`TestHooks`].
#[derive(Default, Clone)]
pub struct EventLog {
    pub paused: Rc<RefCell<Vec<PauseReason>>>,
    pub exit_code: Rc<Cell<Option<i32>>>,
    pub created: Rc<RefCell<Vec<ThreadId>>>,
    pub loaded: Rc<RefCell<Vec<ThreadId>>>,
    pub expired: Rc<RefCell<Vec<ThreadId>>>,
    pub native_exited: Rc<RefCell<Vec<ThreadId>>>,
    pub states_expired: Rc<RefCell<Vec<Uuid>>>,
}

#[derive(Default)]
pub struct TestHooks {
    pub log: EventLog,
}

impl TestHooks {
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }
}

impl EventHook for TestHooks {
    fn on_paused(&self, reason: PauseReason) -> anyhow::Result<()> {
        self.log.paused.borrow_mut().push(reason);
        Ok(())
    }

    fn on_exit(&self, code: i32) {
        self.log.exit_code.set(Some(code));
    }

    fn on_thread_created(&self, tid: ThreadId) {
        self.log.created.borrow_mut().push(tid);
    }

    fn on_thread_loaded(&self, tid: ThreadId) {
        self.log.loaded.borrow_mut().push(tid);
    }

    fn on_thread_expired(&self, tid: ThreadId) {
        self.log.expired.borrow_mut().push(tid);
    }

    fn on_native_thread_exited(&self, tid: ThreadId) {
        self.log.native_exited.borrow_mut().push(tid);
    }

    fn on_state_expired(&self, state_id: Uuid) {
        self.log.states_expired.borrow_mut().push(state_id);
    }
}

pub fn new_world() -> Rc<RefCell<World>> {
    init_logger();
    Rc::new(RefCell::new(World {
        process_id: 7,
        ..Default::default()
    }))
}

pub fn attach(world: &Rc<RefCell<World>>) -> (Debugger, EventLog) {
    attach_with_config(world, EngineConfig::default())
}

pub fn attach_with_config(
    world: &Rc<RefCell<World>>,
    config: EngineConfig,
) -> (Debugger, EventLog) {
    let log = EventLog::default();
    let debugger = DebuggerBuilder::new()
        .with_config(config)
        .with_hooks(TestHooks::new(log.clone()))
        .attach(
            Box::new(ScriptedChannel::new(world.clone())),
            &AttachTarget::Pid(7),
        )
        .expect("attach");
    (debugger, log)
}

/// An empty type description, members are pushed by the test.
pub fn simple_type(id: TypeId, name: &str, base: Option<TypeId>) -> TypeDescription {
    TypeDescription {
        id,
        name: name.to_string(),
        base,
        fields: vec![],
        properties: vec![],
        methods: vec![],
    }
}
