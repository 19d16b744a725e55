//! Native control channel - a thin polymorphic wrapper over the protocol used
//! to control and inspect the target process. Everything above this module
//! works with opaque handle newtypes, raw native handles never escape a
//! channel implementation.

use crate::debugger::error::Error;
use crate::debugger::types::TypeDescription;
use bytes::Bytes;
use fallible_iterator::FallibleIterator;
use itertools::Itertools;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

/// Stable native thread id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct ThreadId(pub u32);

impl Display for ThreadId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of an object or struct datum in the target process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObjectHandle(pub u64);

/// Handle of a single native call frame.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FrameHandle(pub u64);

/// Handle of a native call chain (a segment of a thread's stack).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ChainHandle(pub u64);

/// Handle of an in-flight in-process method invocation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct EvalHandle(pub u64);

/// Handle of an in-progress single-step operation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct StepHandle(pub u64);

/// Runtime type identifier, resolvable to a [`TypeDescription`] through the channel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TypeId(pub u32);

/// Metadata token of a field.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FieldToken(pub u32);

/// Metadata token of a method.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MethodToken(pub u32);

/// Raw error code of the native protocol.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ProtocolCode(pub u32);

impl Display for ProtocolCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010X}", self.0)
    }
}

/// The runtime refuses to intercept the current exception.
pub const CANNOT_INTERCEPT: ProtocolCode = ProtocolCode(0x8013_1C02);
/// Transient per-frame condition, frame is skipped during a stack walk.
pub const FRAME_UNAVAILABLE: ProtocolCode = ProtocolCode(0x8013_1304);
/// Poll or cancel of an evaluation that is no longer active.
pub const EVAL_NOT_ACTIVE: ProtocolCode = ProtocolCode(0x8013_1C26);

/// Codes that are an expected part of normal operation. Callers translate them
/// into benign results (a `false`, a skipped frame) instead of surfacing an error.
static EXPECTED_CODES: Lazy<HashMap<ProtocolCode, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (CANNOT_INTERCEPT, "exception interception not supported"),
        (FRAME_UNAVAILABLE, "frame temporarily unavailable"),
        (EVAL_NOT_ACTIVE, "evaluation not active"),
    ])
});

impl ProtocolCode {
    pub fn is_expected(&self) -> bool {
        EXPECTED_CODES.contains_key(self)
    }
}

/// Attach target: an already running process or a launch request.
#[derive(Debug, Clone)]
pub enum AttachTarget {
    Pid(u32),
    Launch { path: String, args: Vec<String> },
}

/// Result of a successful attach. The debuggee is paused at this point.
#[derive(Debug, Clone, Copy)]
pub struct AttachInfo {
    pub process_id: u32,
}

/// Native view of a thread as reported by thread enumeration.
#[derive(Debug, Clone, Copy)]
pub struct NativeThread {
    pub id: ThreadId,
    /// True once the thread has executed managed code.
    pub has_managed_code: bool,
}

/// Native view of a call chain.
#[derive(Debug, Clone, Copy)]
pub struct NativeChain {
    pub handle: ChainHandle,
    pub managed: bool,
}

/// Native view of a single call frame.
#[derive(Debug, Clone, Copy)]
pub struct NativeFrame {
    pub handle: FrameHandle,
    /// True if the frame is representable as a managed IL frame.
    pub il: bool,
}

/// Code location information attached to a frame when symbols are available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    pub function: String,
    pub file: String,
    pub line: u32,
}

/// Why the debuggee paused after a resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// Stopped at a breakpoint.
    Breakpoint(ThreadId),
    /// An in-progress step completed.
    StepComplete(ThreadId, StepHandle),
    /// Stopped on an exception.
    Exception(ThreadId),
    /// An explicit break request completed.
    Pause,
    /// A new managed thread appeared (debuggee stays paused at the event).
    ThreadCreated(ThreadId),
    /// A native OS thread ended (debuggee stays paused at the event).
    ThreadExited(ThreadId),
    /// The whole debuggee process exited with code.
    Exited(i32),
}

/// Kind of a single-step request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum StepKind {
    Into,
    Over,
    Out,
}

/// Channel-level datum: the raw contents of a memory location or computed result.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Primitive(Primitive),
    Object { handle: ObjectHandle, type_id: TypeId },
    Struct { handle: ObjectHandle, type_id: TypeId },
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    /// Runtime type of the datum, if it carries one.
    pub fn type_id(&self) -> Option<TypeId> {
        match self {
            RawValue::Object { type_id, .. } | RawValue::Struct { type_id, .. } => Some(*type_id),
            _ => None,
        }
    }

    pub fn object_handle(&self) -> Option<ObjectHandle> {
        match self {
            RawValue::Object { handle, .. } | RawValue::Struct { handle, .. } => Some(*handle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Char(char),
    String(String),
}

impl Display for Primitive {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Primitive::Bool(b) => write!(f, "{b}"),
            Primitive::Int(i) => write!(f, "{i}"),
            Primitive::UInt(u) => write!(f, "{u}"),
            Primitive::Float(fl) => write!(f, "{fl}"),
            Primitive::Char(c) => write!(f, "'{c}'"),
            Primitive::String(s) => write!(f, "\"{s}\""),
        }
    }
}

/// Outcome of polling an in-flight evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutcome {
    /// Target still executing the call.
    Pending,
    /// Call finished with a result.
    Completed(RawValue),
    /// A nested pause happened while servicing the call (breakpoint or
    /// exception inside the invoked code). The channel resumes the call on
    /// the next poll; the engine only observes and tolerates the event.
    Interrupted(PauseReason),
}

/// Lazy, finite, non-restartable sequence of native call chains.
///
/// Native enumeration handles are stateful and expensive: an implementation
/// must release the underlying handle when the cursor is dropped, silently.
pub type ChainCursor = Box<dyn FallibleIterator<Item = NativeChain, Error = Error>>;

/// Lazy, finite, non-restartable sequence of native frames of one chain.
/// Same handle-release contract as [`ChainCursor`].
pub type FrameCursor = Box<dyn FallibleIterator<Item = NativeFrame, Error = Error>>;

/// The target-process control protocol.
///
/// Implementations wrap a concrete runtime debugging interface; the engine
/// issues all requests from a single logical controller thread, so `&self`
/// methods with interior mutability are expected. Per-process locking, if any,
/// belongs to the implementation.
pub trait ControlChannel {
    fn attach(&self, target: &AttachTarget) -> Result<AttachInfo, Error>;
    fn detach(&self) -> Result<(), Error>;
    fn terminate(&self) -> Result<(), Error>;

    /// Resume the whole debuggee and block until the next pause event.
    fn resume_and_wait(&self) -> Result<PauseReason, Error>;

    /// Suspend the whole debuggee. The debuggee is paused when this returns.
    fn break_all(&self) -> Result<(), Error>;

    /// Snapshot of currently known native threads.
    fn enumerate_threads(&self) -> Result<Vec<NativeThread>, Error>;

    fn enumerate_chains(&self, tid: ThreadId) -> Result<ChainCursor, Error>;
    fn enumerate_frames(&self, chain: &NativeChain) -> Result<FrameCursor, Error>;

    /// Symbol information for a frame, `None` when no symbols are loaded.
    /// May fail with [`FRAME_UNAVAILABLE`] for a transiently broken frame.
    fn frame_symbols(&self, frame: FrameHandle) -> Result<Option<SymbolInfo>, Error>;

    /// Locals and arguments visible in a frame, in declaration order.
    fn frame_locals(&self, frame: FrameHandle) -> Result<Vec<(String, RawValue)>, Error>;

    /// Live suspend flag of a thread. Requires a paused debuggee.
    fn thread_suspended(&self, tid: ThreadId) -> Result<bool, Error>;

    /// Issue a suspend/resume request for one thread, effective immediately.
    fn set_thread_suspended(&self, tid: ThreadId, suspend: bool) -> Result<(), Error>;

    /// The runtime's own object representing a thread (for member reads like
    /// priority and name). `RawValue::Null` if the runtime has not built one yet.
    fn thread_object(&self, tid: ThreadId) -> Result<RawValue, Error>;

    fn describe_type(&self, ty: TypeId) -> Result<TypeDescription, Error>;

    fn read_field(&self, obj: ObjectHandle, field: FieldToken) -> Result<RawValue, Error>;

    /// Read a static field. `frame` carries the current-frame context used to
    /// resolve context-specific statics (thread-local style).
    fn read_static_field(
        &self,
        ty: TypeId,
        field: FieldToken,
        frame: Option<FrameHandle>,
    ) -> Result<RawValue, Error>;

    fn write_field(&self, obj: ObjectHandle, field: FieldToken, value: &RawValue)
        -> Result<(), Error>;
    fn write_static_field(
        &self,
        ty: TypeId,
        field: FieldToken,
        value: &RawValue,
    ) -> Result<(), Error>;

    /// Set up an in-process method invocation on the given thread. The call
    /// starts executing on the next poll.
    fn begin_eval(
        &self,
        tid: ThreadId,
        method: MethodToken,
        args: &[RawValue],
    ) -> Result<EvalHandle, Error>;

    /// Give the evaluation a time slice and report its progress.
    fn poll_eval(&self, eval: EvalHandle) -> Result<EvalOutcome, Error>;

    /// Abort an in-flight evaluation. Aborting a finished one is a no-op
    /// ([`EVAL_NOT_ACTIVE`] is an expected code here).
    fn cancel_eval(&self, eval: EvalHandle) -> Result<(), Error>;

    fn begin_step(&self, tid: ThreadId, kind: StepKind) -> Result<StepHandle, Error>;
    fn cancel_step(&self, step: StepHandle) -> Result<(), Error>;

    /// Request the runtime to retarget the current exception to the given
    /// frame. Fails with [`CANNOT_INTERCEPT`] when the runtime refuses.
    fn intercept_exception(&self, tid: ThreadId, frame: FrameHandle) -> Result<(), Error>;

    /// Read a raw memory view of the target.
    fn read_memory(&self, addr: usize, len: usize) -> Result<Bytes, Error>;
}

/// Join multiple per-thread failures into one report string.
pub(crate) fn join_errors(errors: Vec<(ThreadId, Error)>) -> String {
    errors
        .into_iter()
        .map(|(tid, e)| format!("thread {tid}: {e}"))
        .join("; ")
}
