use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::feedback::Feedback;

pub mod cli;
pub mod json;

/// What the operator wants to happen next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Continue,
    Step,
    /// arm a breakpoint at this line of the target file, then continue
    SetBreakpoint(u64),
    Quit,
}

/// The source of verdicts
///
/// The debugger calls [`DebuggerUI::process`] whenever the debuggee is stopped and waits for the
/// answer. If a verdict fails in a recoverable way, it calls again with the error as feedback,
/// without resuming the debuggee in between.
pub trait DebuggerUI {
    /// # Errors
    ///
    /// Fails if the operator can not be asked, e.g. because the input was closed.
    fn process(&mut self, feedback: Feedback, target_file: &str) -> Result<Verdict>;
}
