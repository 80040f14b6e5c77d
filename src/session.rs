//! The mutable context of one debugging run.

use std::collections::HashSet;

use nix::unistd::Pid;

use crate::addr::Addr;
use crate::arch::FrameRegisters;
use crate::breakpoint::Breakpoint;
use crate::dbginfo::FunctionRef;
use crate::debuggee::TraceEvent;

/// Everything the control loop remembers between two stops
///
/// There is exactly one [`Session`] per run. It is owned by the
/// [`Debugger`](crate::debugger::Debugger) and handed to the breakpoint functions explicitly.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// file that line numbers of breakpoint requests refer to
    pub target_file: String,
    /// line of the most recent breakpoint request
    pub target_line: u64,
    /// the one armed breakpoint, if any
    pub breakpoint: Option<Breakpoint>,
    /// address of the breakpoint removed last, other threads may still report hitting it
    pub last_breakpoint: Option<Addr>,
    /// threads resumed with a single step whose trap has not arrived yet
    pub stepping: HashSet<Pid>,
    /// function the last stop or unwind ended in
    pub current_function: Option<FunctionRef>,
    pub registers: Option<FrameRegisters>,
    pub last_event: Option<TraceEvent>,
}

impl Session {
    pub fn new(target_file: impl Into<String>, target_line: u64) -> Self {
        Self {
            target_file: target_file.into(),
            target_line,
            ..Default::default()
        }
    }

    #[inline]
    pub fn breakpoint_active(&self) -> bool {
        self.breakpoint.is_some()
    }
}
