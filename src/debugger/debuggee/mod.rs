use crate::debugger::channel::{AttachInfo, ControlChannel};
use crate::debugger::debuggee::thread::ThreadCtl;
use crate::debugger::error::Error;
use crate::debugger::state::DebuggeeState;
use log::debug;
use std::rc::Rc;
use uuid::Uuid;

pub mod frame;
pub mod thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Unattached,
    Paused,
    Running,
    Exited,
}

/// Debuggee - the runtime side of an attached process: its run status, the
/// control channel, the thread registry and the current state token.
pub struct Debuggee {
    pub execution_status: ExecutionStatus,
    channel: Box<dyn ControlChannel>,
    pub(crate) threads: ThreadCtl,
    state: Rc<DebuggeeState>,
    process_id: u32,
    exit_code: Option<i32>,
}

impl Debuggee {
    /// Build the debuggee model around a channel that just attached.
    /// The target is paused at this point.
    pub(crate) fn attached(channel: Box<dyn ControlChannel>, info: AttachInfo) -> Self {
        Self {
            execution_status: ExecutionStatus::Paused,
            channel,
            threads: ThreadCtl::new(),
            state: DebuggeeState::mint(),
            process_id: info.process_id,
            exit_code: None,
        }
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub(crate) fn channel(&self) -> &dyn ControlChannel {
        self.channel.as_ref()
    }

    /// The state token stamped at the current pause. Every state-dependent
    /// entity created now holds a reference to this token.
    pub fn state(&self) -> &Rc<DebuggeeState> {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.execution_status == ExecutionStatus::Running
    }

    pub fn is_paused(&self) -> bool {
        self.execution_status == ExecutionStatus::Paused
    }

    /// Fail fast (never block) unless the debuggee is paused.
    pub fn assert_paused(&self) -> Result<(), Error> {
        match self.execution_status {
            ExecutionStatus::Paused => Ok(()),
            ExecutionStatus::Running => Err(Error::ProcessRunning),
            ExecutionStatus::Unattached => Err(Error::NotAttached),
            ExecutionStatus::Exited => Err(Error::ProcessExit(self.exit_code.unwrap_or(0))),
        }
    }

    /// Transition to the running state: the current state token expires,
    /// which cascades to every stack frame and still-attached value produced
    /// under it. Returns the expired token id.
    pub(crate) fn begin_resume(&mut self) -> Uuid {
        let old = self.state.id();
        debug!(target: "debugger", "resume debuggee, expire state {old}");
        self.state.invalidate();
        self.execution_status = ExecutionStatus::Running;
        old
    }

    /// Transition back to paused: a fresh state token is minted.
    pub(crate) fn complete_pause(&mut self) {
        self.state = DebuggeeState::mint();
        self.execution_status = ExecutionStatus::Paused;
    }

    pub(crate) fn mark_exited(&mut self, code: i32) {
        debug!(target: "debugger", "debuggee exited with code {code}");
        self.state.invalidate();
        self.execution_status = ExecutionStatus::Exited;
        self.exit_code = Some(code);
    }
}
