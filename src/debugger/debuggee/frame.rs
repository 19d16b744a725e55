//! Stack frame proxies. Frames are produced lazily while walking native call
//! chains and stay valid only as long as the debuggee state they were minted
//! under.

use crate::debugger::channel::{
    ChainCursor, ControlChannel, FrameCursor, FrameHandle, SymbolInfo, ThreadId, FRAME_UNAVAILABLE,
};
use crate::debugger::debuggee::Debuggee;
use crate::debugger::error::Error;
use crate::debugger::state::DebuggeeState;
use fallible_iterator::FallibleIterator;
use log::debug;
use std::rc::Rc;

/// A single managed frame of a thread's call stack at a point in time.
pub struct StackFrame {
    thread: ThreadId,
    /// Depth index counting kept (managed, IL-representable) frames only,
    /// zero is the most recently called frame.
    depth: u32,
    handle: FrameHandle,
    symbols: Option<SymbolInfo>,
    state: Rc<DebuggeeState>,
}

impl StackFrame {
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub(crate) fn handle(&self) -> FrameHandle {
        self.handle
    }

    /// The frame expires together with the debuggee state it was produced under.
    pub fn has_expired(&self) -> bool {
        self.state.has_expired()
    }

    pub fn has_symbols(&self) -> bool {
        self.symbols.is_some()
    }

    pub fn symbols(&self) -> Option<&SymbolInfo> {
        self.symbols.as_ref()
    }

    pub(crate) fn assert_valid(&self) -> Result<(), Error> {
        if self.has_expired() {
            return Err(Error::FrameExpired);
        }
        Ok(())
    }
}

/// Lazy walk over a thread's call stack.
///
/// Finite and non-restartable: native enumeration handles are stateful, a
/// fresh walk must be created for every pass. The pause precondition is
/// asserted once, at construction.
pub struct CallstackWalk<'a> {
    channel: &'a dyn ControlChannel,
    state: Rc<DebuggeeState>,
    thread: ThreadId,
    chains: ChainCursor,
    frames: Option<FrameCursor>,
    depth: u32,
}

impl<'a> CallstackWalk<'a> {
    pub(crate) fn new(debuggee: &'a Debuggee, thread: ThreadId) -> Result<Self, Error> {
        debuggee.assert_paused()?;
        Ok(Self {
            channel: debuggee.channel(),
            state: debuggee.state().clone(),
            thread,
            chains: debuggee.channel().enumerate_chains(thread)?,
            frames: None,
            depth: 0,
        })
    }
}

impl FallibleIterator for CallstackWalk<'_> {
    type Item = Rc<StackFrame>;
    type Error = Error;

    fn next(&mut self) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(frames) = self.frames.as_mut() else {
                // move to the next managed chain, most recent first
                match self.chains.next()? {
                    None => return Ok(None),
                    Some(chain) if !chain.managed => continue,
                    Some(chain) => {
                        self.frames = Some(self.channel.enumerate_frames(&chain)?);
                        continue;
                    }
                }
            };

            match frames.next()? {
                None => {
                    self.frames = None;
                    continue;
                }
                Some(frame) if !frame.il => continue,
                Some(frame) => {
                    // a transiently broken frame is skipped, one bad frame
                    // must not abort the whole walk
                    let symbols = match self.channel.frame_symbols(frame.handle) {
                        Ok(symbols) => symbols,
                        Err(Error::Protocol { code, .. }) if code == FRAME_UNAVAILABLE => {
                            debug!(
                                target: "debugger",
                                "skip unavailable frame on thread {}", self.thread
                            );
                            continue;
                        }
                        Err(e) => return Err(e),
                    };

                    let stack_frame = Rc::new(StackFrame {
                        thread: self.thread,
                        depth: self.depth,
                        handle: frame.handle,
                        symbols,
                        state: self.state.clone(),
                    });
                    self.depth += 1;
                    return Ok(Some(stack_frame));
                }
            }
        }
    }
}
