//! Software breakpoints.
//!
//! A breakpoint replaces the first bytes of an instruction with [`TRAP_INSTRUCTION`] and keeps
//! the bytes it overwrote. Only one breakpoint is armed at a time, it lives in
//! [`Session::breakpoint`] and is disarmed on the next stop, whatever caused it.

use nix::unistd::Pid;
use serde::Serialize;
use tracing::{debug, info, trace};

use crate::addr::Addr;
use crate::arch::TRAP_INSTRUCTION;
use crate::dbginfo::SymbolResolver;
use crate::errors::{DebuggerError, Result};
use crate::memory::Memory;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Breakpoint {
    addr: Addr,
    saved_data: Vec<u8>,
}

impl Breakpoint {
    /// Saves the original bytes at `addr` and writes the trap instruction over them
    ///
    /// # Errors
    ///
    /// Fails if the tracee memory can not be read or written.
    pub fn install<M: Memory>(memory: &mut M, pid: Pid, addr: Addr) -> Result<Self> {
        let saved_data = memory.peek(pid, addr, TRAP_INSTRUCTION.len())?;
        if saved_data.len() != TRAP_INSTRUCTION.len() {
            return Err(DebuggerError::ShortRead {
                addr,
                expected: TRAP_INSTRUCTION.len(),
                got: saved_data.len(),
            });
        }
        trace!("original bytes at {addr}: {saved_data:02x?}");
        memory.poke(pid, addr, &TRAP_INSTRUCTION)?;
        Ok(Self { addr, saved_data })
    }

    /// Writes the saved bytes back, consuming the breakpoint
    ///
    /// # Errors
    ///
    /// Fails if the tracee memory can not be written.
    pub fn restore<M: Memory>(self, memory: &mut M, pid: Pid) -> Result<()> {
        trace!("restoring {:02x?} at {}", self.saved_data, self.addr);
        memory.poke(pid, self.addr, &self.saved_data)
    }

    pub fn addr(&self) -> Addr {
        self.addr
    }

    pub fn saved_data(&self) -> &[u8] {
        &self.saved_data
    }

    /// Where the instruction pointer is after the trap at this breakpoint executed
    pub fn trapped_ip(&self) -> Addr {
        self.addr + TRAP_INSTRUCTION.len()
    }
}

/// Arms a breakpoint at the session's target line
///
/// A breakpoint that is still armed gets restored first, so there never are two traps in the
/// tracee.
///
/// # Errors
///
/// Returns the recoverable [`DebuggerError::LineNotFound`] without touching memory if the line
/// has no code. Memory errors are fatal.
pub fn set_breakpoint<M: Memory, R: SymbolResolver>(
    session: &mut Session,
    memory: &mut M,
    resolver: &R,
    pid: Pid,
) -> Result<Addr> {
    let Some((addr, function)) = resolver.line_to_address(&session.target_file, session.target_line)
    else {
        return Err(DebuggerError::LineNotFound {
            file: session.target_file.clone(),
            line: session.target_line,
        });
    };

    if let Some(old) = session.breakpoint.take() {
        debug!("replacing the breakpoint at {}", old.addr());
        session.last_breakpoint = Some(old.addr());
        old.restore(memory, pid)?;
    }

    let bp = Breakpoint::install(memory, pid, addr)?;
    info!(
        "breakpoint at {addr} ({}:{} in {})",
        session.target_file,
        session.target_line,
        function.map(|f| f.name).unwrap_or_else(|| "?".to_string())
    );
    session.breakpoint = Some(bp);
    Ok(addr)
}

/// Disarms the breakpoint of the session, returns false if none was armed
///
/// # Errors
///
/// Fails if the tracee memory can not be written.
pub fn restore_breakpoint<M: Memory>(session: &mut Session, memory: &mut M, pid: Pid) -> Result<bool> {
    match session.breakpoint.take() {
        Some(bp) => {
            session.last_breakpoint = Some(bp.addr());
            bp.restore(memory, pid)?;
            Ok(true)
        }
        None => Ok(false),
    }
}
