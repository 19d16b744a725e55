//! Debugging engine for managed runtimes.
//!
//! The engine models one attached process: its threads, call stacks and
//! values, all observed through a pluggable native control channel. Hosts
//! (IDE frontends, CLI tools) build a [`Debugger`] with [`DebuggerBuilder`],
//! drive it from a single controller thread and receive lifecycle events
//! through an [`EventHook`].
//!
//! Everything inspected at a pause - frames, values - expires together with
//! the pause that produced it; symbolic expressions are the durable handle a
//! host re-evaluates after each stop.

pub mod config;
pub mod debugger;

pub use config::EngineConfig;
pub use debugger::{Debugger, DebuggerBuilder, Error, EventHook, NopHook};
