//! # Debuggee Module
//!
//! Process control of the debugged program.
//!
//! The control loop talks to the debuggee through the [`Target`] trait: wait for the next
//! [`TraceEvent`], read registers, move the instruction pointer, continue and single step. Memory
//! access comes from the [`Memory`] supertrait. [`Debuggee`] implements both on top of the
//! [ptrace](nix::sys::ptrace) API.
//!
//! The debuggee is started with `PTRACE_TRACEME`, so the first stop is the trap right after
//! `execv`. With `PTRACE_O_TRACECLONE` every thread it creates is traced too, and waiting happens
//! on the whole process group, so events of all threads arrive in one stream.

use std::ffi::CString;
use std::path::Path;

use nix::sys::personality::Persona;
use nix::sys::ptrace::{self, Event, Options};
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::sys::personality;
use nix::unistd::{execv, getpgid, Pid};
use serde::Serialize;
use tracing::{debug, error, info, trace};

use crate::addr::Addr;
use crate::arch::{self, FrameRegisters};
use crate::errors::{DebuggerError, Result};
use crate::memory::{mem_read_word, mem_write_word, peek_words, poke_words, Memory};

/// One result of waiting for the tracees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraceEvent {
    #[serde(serialize_with = "serialize_pid")]
    pub pid: Pid,
    /// the tracee exited or was killed
    pub exited: bool,
    /// the signal that stopped the tracee
    #[serde(serialize_with = "serialize_signal")]
    pub signal: Option<Signal>,
    /// the stop reports a new thread, it is not a breakpoint or step
    pub thread_created: bool,
}

/// What the control loop does with a [`TraceEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    /// the main process is gone
    MainExited,
    /// some other thread is gone
    ThreadExited,
    /// a breakpoint or single step trapped
    Trap,
    /// anything else, resume the tracee and deliver the signal, if any
    Resume(Option<Signal>),
}

impl TraceEvent {
    pub fn exit(pid: Pid) -> Self {
        Self {
            pid,
            exited: true,
            signal: None,
            thread_created: false,
        }
    }

    pub fn stop(pid: Pid, signal: Signal) -> Self {
        Self {
            pid,
            exited: false,
            signal: Some(signal),
            thread_created: false,
        }
    }

    pub fn thread_created(pid: Pid) -> Self {
        Self {
            pid,
            exited: false,
            signal: Some(Signal::SIGTRAP),
            thread_created: true,
        }
    }

    pub fn classify(&self, main: Pid) -> EventClass {
        if self.exited {
            return if self.pid == main {
                EventClass::MainExited
            } else {
                EventClass::ThreadExited
            };
        }
        match self.signal {
            Some(Signal::SIGTRAP) if !self.thread_created => EventClass::Trap,
            Some(Signal::SIGTRAP) | Some(Signal::SIGSTOP) | None => EventClass::Resume(None),
            Some(other) => EventClass::Resume(Some(other)),
        }
    }

    /// Translates a wait status, [`None`] if it carries no event
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        Some(match status {
            WaitStatus::Exited(pid, _) | WaitStatus::Signaled(pid, _, _) => Self::exit(pid),
            WaitStatus::Stopped(pid, sig) => Self::stop(pid, sig),
            WaitStatus::PtraceEvent(pid, sig, event) => Self {
                pid,
                exited: false,
                signal: Some(sig),
                thread_created: event == Event::PTRACE_EVENT_CLONE as i32,
            },
            WaitStatus::PtraceSyscall(pid) | WaitStatus::Continued(pid) => Self {
                pid,
                exited: false,
                signal: None,
                thread_created: false,
            },
            WaitStatus::StillAlive => return None,
        })
    }
}

fn serialize_pid<S: serde::Serializer>(pid: &Pid, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_i32(pid.as_raw())
}

fn serialize_signal<S: serde::Serializer>(
    sig: &Option<Signal>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    match sig {
        Some(sig) => s.serialize_some(sig.as_str()),
        None => s.serialize_none(),
    }
}

/// Process control used by the [`Debugger`](crate::debugger::Debugger)
///
/// Every method except [`Target::wait_any`] requires that the tracee `pid` is stopped.
pub trait Target: Memory {
    /// The process that was launched, its exit ends the session
    fn main_pid(&self) -> Pid;

    /// Blocks until any tracee of the process group reports an event
    ///
    /// # Errors
    ///
    /// Fails if there is nothing left to wait for.
    fn wait_any(&mut self) -> Result<TraceEvent>;

    /// # Errors
    ///
    /// Fails if the registers of `pid` can not be read.
    fn registers(&self, pid: Pid) -> Result<FrameRegisters>;

    /// # Errors
    ///
    /// Fails if the registers of `pid` can not be read or written.
    fn set_instruction_pointer(&mut self, pid: Pid, addr: Addr) -> Result<()>;

    /// Resumes `pid`, delivering `sig` if given
    ///
    /// # Errors
    ///
    /// Fails if `pid` can not be resumed.
    fn cont(&mut self, pid: Pid, sig: Option<Signal>) -> Result<()>;

    /// Executes exactly one instruction of `pid`, delivering `sig` first if given
    ///
    /// # Errors
    ///
    /// Fails if `pid` can not be resumed.
    fn step(&mut self, pid: Pid, sig: Option<Signal>) -> Result<()>;
}

/// A process launched and traced by us
#[derive(Debug)]
pub struct Debuggee {
    pid: Pid,
    pgid: Pid,
}

impl Debuggee {
    /// Starts `path` as a traced child and waits until it stopped after `execv`
    ///
    /// The child inherits stdin, stdout and stderr. Address space randomization is disabled for
    /// it, so addresses stay the same between runs.
    ///
    /// # Errors
    ///
    /// Fails if the executable does not exist, can not be started, or does not stop as expected.
    pub fn launch(path: impl AsRef<Path>, args: &[CString]) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let err = DebuggerError::ExecutableDoesNotExist(path.to_string_lossy().to_string());
            error!("{err}");
            return Err(err);
        }
        if !path.is_file() {
            let err = DebuggerError::ExecutableIsNotAFile(path.to_string_lossy().to_string());
            error!("{err}");
            return Err(err);
        }
        let cpath = CString::new(path.to_string_lossy().to_string().as_str())?;
        let mut argv = vec![cpath.clone()];
        argv.extend_from_slice(args);

        // SAFETY: the child only calls personality, ptrace and execv before it is replaced
        let fork_res = unsafe { nix::unistd::fork() };
        match fork_res {
            Err(e) => {
                error!("could not start executable: {e}");
                Err(e.into())
            }
            Ok(nix::unistd::ForkResult::Child) => {
                let _ = personality::set(Persona::ADDR_NO_RANDOMIZE);
                if ptrace::traceme().is_err() {
                    std::process::exit(127);
                }
                let _ = execv(&cpath, &argv);
                std::process::exit(127)
            }
            Ok(nix::unistd::ForkResult::Parent { child: pid }) => Self::attach_child(pid),
        }
    }

    fn attach_child(pid: Pid) -> Result<Self> {
        match waitpid(pid, None)? {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => (),
            other => {
                let err = DebuggerError::UnexpectedWaitStatus(format!("{other:?}"));
                error!("debuggee did not stop after exec: {err}");
                return Err(err);
            }
        }
        ptrace::setoptions(pid, Options::PTRACE_O_TRACECLONE)?;
        let pgid = getpgid(Some(pid))?;
        info!("debuggee {pid} started in process group {pgid}");
        Ok(Self { pid, pgid })
    }
}

impl Memory for Debuggee {
    fn peek(&self, pid: Pid, addr: Addr, len: usize) -> Result<Vec<u8>> {
        peek_words(addr, len, |a| mem_read_word(pid, a))
    }

    fn poke(&mut self, pid: Pid, addr: Addr, data: &[u8]) -> Result<()> {
        poke_words(
            addr,
            data,
            |a| mem_read_word(pid, a),
            |a, w| mem_write_word(pid, a, w),
        )
    }
}

impl Target for Debuggee {
    fn main_pid(&self) -> Pid {
        self.pid
    }

    fn wait_any(&mut self) -> Result<TraceEvent> {
        let group = Pid::from_raw(-self.pgid.as_raw());
        loop {
            let status = match waitpid(group, Some(WaitPidFlag::__WALL)) {
                Err(nix::Error::ECHILD) => return Err(DebuggerError::NoMoreEvents),
                Err(e) => return Err(e.into()),
                Ok(s) => s,
            };
            trace!("wait status: {status:?}");
            if let Some(event) = TraceEvent::from_wait_status(status) {
                debug!("trace event: {event:?}");
                return Ok(event);
            }
        }
    }

    fn registers(&self, pid: Pid) -> Result<FrameRegisters> {
        let regs = ptrace::getregs(pid)?;
        Ok(FrameRegisters::from(&regs))
    }

    fn set_instruction_pointer(&mut self, pid: Pid, addr: Addr) -> Result<()> {
        let mut regs = ptrace::getregs(pid)?;
        arch::set_instruction_pointer(&mut regs, addr);
        ptrace::setregs(pid, regs)?;
        Ok(())
    }

    fn cont(&mut self, pid: Pid, sig: Option<Signal>) -> Result<()> {
        ptrace::cont(pid, sig)?;
        Ok(())
    }

    fn step(&mut self, pid: Pid, sig: Option<Signal>) -> Result<()> {
        ptrace::step(pid, sig)?;
        Ok(())
    }
}
