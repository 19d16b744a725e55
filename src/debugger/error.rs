use crate::debugger::channel::{ProtocolCode, ThreadId};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- run-state errors ------------------------------------------
    #[error("debugger is not attached to a process")]
    NotAttached,
    #[error("operation requires a paused debuggee, process is running")]
    ProcessRunning,
    #[error("operation requires a running debuggee, process is paused")]
    ProcessNotRunning,
    #[error("debuggee process exit with code {0}")]
    ProcessExit(i32),
    #[error("thread {0} has not executed managed code yet")]
    ThreadNotStarted(ThreadId),
    #[error("an evaluation is already in progress on thread {0}")]
    EvalInProgress(ThreadId),
    #[error("evaluation timed out")]
    EvalTimeout,

    // --------------------------------- expiration errors -----------------------------------------
    #[error("debuggee state snapshot has expired")]
    StateExpired,
    #[error("thread {0} has expired")]
    ThreadExpired(ThreadId),
    #[error("native thread {0} has exited")]
    NativeThreadExited(ThreadId),
    #[error("stack frame belongs to an expired debuggee state")]
    FrameExpired,

    // --------------------------------- debugger entity not found ---------------------------------
    #[error("thread {0} not found")]
    ThreadNotFound(ThreadId),
    #[error("variable `{0}` not found in current frame")]
    VariableNotFound(String),
    #[error("member `{0}` not found")]
    MemberNotFound(String),
    #[error("stepper is not in thread {0} collection")]
    StepperNotFound(ThreadId),
    #[error("no thread selected")]
    NoThreadSelected,

    // --------------------------------- value access errors ---------------------------------------
    #[error("{0}")]
    Access(String),

    // --------------------------------- protocol errors -------------------------------------------
    #[error("unexpected native error code {code} from control channel during {op}")]
    Protocol { op: &'static str, code: ProtocolCode },
    #[error("attach to target process: {0}")]
    Attach(ProtocolCode),
    #[error("process pid {0} not found")]
    AttachedProcessNotFound(u32),

    // --------------------------------- third party errors ----------------------------------------
    #[error("hook: {0}")]
    Hook(anyhow::Error),
}

impl Error {
    /// Shortcut for a value-access failure with a human-readable reason.
    pub fn access(reason: impl Into<String>) -> Self {
        Error::Access(reason.into())
    }

    /// Return a hint to a host - continue debugging after error or stop whole session.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::NotAttached => false,
            Error::ProcessRunning => false,
            Error::ProcessNotRunning => false,
            Error::ProcessExit(_) => false,
            Error::ThreadNotStarted(_) => false,
            Error::EvalInProgress(_) => false,
            Error::EvalTimeout => false,
            Error::StateExpired => false,
            Error::ThreadExpired(_) => false,
            Error::NativeThreadExited(_) => false,
            Error::FrameExpired => false,
            Error::ThreadNotFound(_) => false,
            Error::VariableNotFound(_) => false,
            Error::MemberNotFound(_) => false,
            Error::StepperNotFound(_) => false,
            Error::NoThreadSelected => false,
            Error::Access(_) => false,
            Error::Hook(_) => false,

            // currently fatal errors
            Error::Protocol { .. } => true,
            Error::Attach(_) => true,
            Error::AttachedProcessNotFound(_) => true,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "debugger", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "debugger", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
