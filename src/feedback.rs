use std::fmt::Display;

use serde::Serialize;

use crate::addr::Addr;
use crate::dbginfo::SourceLocation;
use crate::errors::DebuggerError;
use crate::unwind::Backtrace;

/// What the debugger reports to the [`DebuggerUI`](crate::ui::DebuggerUI) before it asks for the
/// next [`Verdict`](crate::ui::Verdict)
#[derive(Debug)]
pub enum Feedback {
    Text(String),
    Stopped(StopReport),
    Error(DebuggerError),
}

/// Everything known about a trap
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopReport {
    pub pid: i32,
    /// the address the tracee stopped at, after stepping back over a breakpoint
    pub addr: Addr,
    pub location: Option<SourceLocation>,
    /// the instruction at [`StopReport::addr`]
    pub instruction: Option<String>,
    pub backtrace: Backtrace,
    /// the breakpoint at this address was hit and removed
    pub breakpoint_hit: bool,
}

impl Display for StopReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(loc) => {
                let fname = loc
                    .function
                    .as_ref()
                    .map(|f| f.name.as_str())
                    .unwrap_or("??");
                writeln!(f, "Stopped at {} at {} in {}", fname, loc.line, loc.file)?;
            }
            None => writeln!(f, "Stopped at {} (no line information)", self.addr)?,
        }
        if let Some(ins) = &self.instruction {
            writeln!(f, "  => {}  {ins}", self.addr)?;
        }
        for a in &self.backtrace.anomalies {
            writeln!(f, "Strange frame size: SP: {:X} | BP : {:X}", a.sp, a.fp)?;
        }
        write!(f, "{}", self.backtrace)
    }
}

impl Display for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feedback::Text(t) => write!(f, "{t}")?,
            Feedback::Stopped(report) => write!(f, "{report}")?,
            Feedback::Error(e) => write!(f, "Error: {e}")?,
        }

        Ok(())
    }
}

impl From<DebuggerError> for Feedback {
    fn from(value: DebuggerError) -> Self {
        Feedback::Error(value)
    }
}
