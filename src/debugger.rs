//! # Debugger Module
//!
//! The control loop.
//!
//! [`Debugger`] owns the [`Target`], the [`SymbolResolver`], the [`DebuggerUI`] and the
//! [`Session`]. [`Debugger::run_debugger`] drives the debuggee from its first stop until the main
//! process exits or the operator quits:
//!
//! 1. wait for the next event of any tracee in the process group
//! 2. exits of threads and stops that are not traps are passed through without asking anyone
//! 3. on a trap, report where the thread stopped and who called it, remove the breakpoint and
//!    ask the [`DebuggerUI`] for a [`Verdict`]
//! 4. apply the verdict to the thread that trapped
//!
//! Breakpoints are single-shot: whatever the cause of a trap, the armed breakpoint is removed
//! before the operator is asked what to do next.
//!
//! A thread that executed the trap instruction reports an instruction pointer one trap length
//! behind the breakpoint address and is moved back onto it, even if another thread already
//! caused the breakpoint to be removed. Arming a breakpoint at the address a thread stands on
//! single steps that thread off it first, so the breakpoint catches the next pass.

use std::collections::VecDeque;

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tracing::{debug, error, info, trace, warn};

use crate::addr::Addr;
use crate::arch::TRAP_INSTRUCTION;
use crate::breakpoint::{restore_breakpoint, set_breakpoint};
use crate::dbginfo::SymbolResolver;
use crate::debuggee::{EventClass, Target, TraceEvent};
use crate::disassemble::instruction_at;
use crate::errors::{DebuggerError, Result};
use crate::feedback::{Feedback, StopReport};
use crate::session::Session;
use crate::ui::{DebuggerUI, Verdict};
use crate::unwind::{UnwindConfig, Unwinder};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// the main process of the debuggee exited
    Exited,
    /// the operator asked to quit, the caller is expected to terminate
    Quit,
}

enum Flow {
    Resumed,
    Quit,
}

pub struct Debugger<T: Target, R: SymbolResolver, UI: DebuggerUI> {
    target: T,
    resolver: R,
    ui: UI,
    unwinder: Unwinder,
    session: Session,
    /// events that arrived while single stepping another thread
    pending: VecDeque<TraceEvent>,
}

impl<T: Target, R: SymbolResolver, UI: DebuggerUI> Debugger<T, R, UI> {
    /// Sets up a session for an already launched and stopped `target`
    ///
    /// Breakpoint lines refer to the file of the first root function in `config` that can be
    /// found, usually `main`.
    ///
    /// # Errors
    ///
    /// Fails if none of the root functions exist in the debug information or the resolver can
    /// not attach to the process.
    pub fn build(target: T, mut resolver: R, ui: UI, config: UnwindConfig) -> Result<Self> {
        resolver.attach(target.main_pid())?;

        let Some(entry) = config
            .root_functions
            .iter()
            .find_map(|name| resolver.function_by_name(name))
        else {
            let err = DebuggerError::FunctionNotFound(config.root_functions.join(", "));
            error!("{err}");
            return Err(err);
        };
        let (file, line) = match resolver.address_to_line(entry.entry) {
            Some(loc) => (loc.file, loc.line),
            None => (entry.file.clone(), 0),
        };
        info!("entry function {} in {file}:{line}", entry.name);

        let mut session = Session::new(file, line);
        session.current_function = Some(entry);

        Ok(Self {
            target,
            resolver,
            ui,
            unwinder: Unwinder::new(config),
            session,
            pending: VecDeque::new(),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn ui(&self) -> &UI {
        &self.ui
    }

    /// Runs the debuggee until its main process exits or the operator quits
    ///
    /// # Errors
    ///
    /// Any failure of the trace channel (waiting, registers, memory, resuming) or of the
    /// [`DebuggerUI`] aborts the run.
    pub fn run_debugger(&mut self) -> Result<RunOutcome> {
        let main = self.target.main_pid();
        let greeting = Feedback::Text(format!(
            "Debuggee {main} stopped before start, breakpoints refer to {}",
            self.session.target_file
        ));
        if let Flow::Quit = self.decide(main, greeting)? {
            return Ok(RunOutcome::Quit);
        }

        loop {
            let event = match self.pending.pop_front() {
                Some(event) => event,
                None => self.target.wait_any()?,
            };
            self.session.last_event = Some(event);
            match event.classify(main) {
                EventClass::MainExited => {
                    info!("debuggee {main} exited");
                    return Ok(RunOutcome::Exited);
                }
                EventClass::ThreadExited => {
                    debug!("thread {} exited", event.pid);
                    self.session.stepping.remove(&event.pid);
                }
                EventClass::Trap => {
                    if let Flow::Quit = self.handle_trap(event.pid)? {
                        return Ok(RunOutcome::Quit);
                    }
                }
                EventClass::Resume(sig) => {
                    debug!("passing through {event:?}");
                    self.target.cont(event.pid, sig)?;
                }
            }
        }
    }

    fn handle_trap(&mut self, pid: Pid) -> Result<Flow> {
        let mut regs = self.target.registers(pid)?;

        let stepped = self.session.stepping.remove(&pid);
        let mut breakpoint_hit = false;
        if !stepped {
            if let Some(addr) = self.breakpoint_behind(pid, regs.ip)? {
                debug!("{pid} hit breakpoint at {addr}");
                self.target.set_instruction_pointer(pid, addr)?;
                regs.ip = addr;
                breakpoint_hit = true;
            }
        }
        self.session.registers = Some(regs);

        let location = self.resolver.address_to_line(regs.ip);
        if let Some(f) = location.as_ref().and_then(|l| l.function.clone()) {
            self.session.current_function = Some(f);
        }
        let backtrace = self.unwinder.unwind(&self.target, &self.resolver, pid, regs)?;
        if backtrace.last_function.is_some() {
            self.session.current_function = backtrace.last_function.clone();
        }

        if restore_breakpoint(&mut self.session, &mut self.target, pid)? && !breakpoint_hit {
            debug!("breakpoint removed before it was reached");
        }

        let instruction = instruction_at(&self.target, pid, regs.ip)?;

        let report = StopReport {
            pid: pid.as_raw(),
            addr: regs.ip,
            location,
            instruction,
            backtrace,
            breakpoint_hit,
        };
        self.decide(pid, Feedback::Stopped(report))
    }

    /// The breakpoint whose trap instruction ends right before `ip`
    ///
    /// Besides the armed breakpoint this is the one removed last, if its trap byte is no longer
    /// in memory. Then `pid` executed the trap before another thread's stop removed it.
    fn breakpoint_behind(&self, pid: Pid, ip: Addr) -> Result<Option<Addr>> {
        if let Some(bp) = &self.session.breakpoint {
            if ip == bp.trapped_ip() {
                return Ok(Some(bp.addr()));
            }
        }
        let Some(addr) = self.session.last_breakpoint else {
            return Ok(None);
        };
        if ip != addr + TRAP_INSTRUCTION.len() {
            return Ok(None);
        }
        let current = self.target.peek(pid, addr, TRAP_INSTRUCTION.len())?;
        Ok((current != TRAP_INSTRUCTION).then_some(addr))
    }

    /// Executes the instruction `pid` stands on and waits until it stopped again
    ///
    /// Events of other tracees arriving meanwhile are queued for the main loop. Returns false if
    /// `pid` exited instead of stopping.
    fn step_over(&mut self, pid: Pid) -> Result<bool> {
        let main = self.target.main_pid();
        let mut sig: Option<Signal> = None;
        loop {
            self.target.step(pid, sig)?;
            sig = loop {
                let event = self.target.wait_any()?;
                if event.pid != pid {
                    trace!("queued {event:?} while stepping {pid}");
                    self.pending.push_back(event);
                    continue;
                }
                match event.classify(main) {
                    EventClass::Trap => return Ok(true),
                    EventClass::Resume(sig) => break sig,
                    EventClass::MainExited | EventClass::ThreadExited => {
                        self.pending.push_back(event);
                        return Ok(false);
                    }
                }
            };
        }
    }

    /// Asks for verdicts until one of them resumes `pid` or quits
    fn decide(&mut self, pid: Pid, mut feedback: Feedback) -> Result<Flow> {
        loop {
            let verdict = self.ui.process(feedback, &self.session.target_file)?;
            debug!("verdict: {verdict:?}");
            match verdict {
                Verdict::Continue => {
                    self.target.cont(pid, None)?;
                    return Ok(Flow::Resumed);
                }
                Verdict::Step => {
                    self.session.stepping.insert(pid);
                    self.target.step(pid, None)?;
                    return Ok(Flow::Resumed);
                }
                Verdict::Quit => return Ok(Flow::Quit),
                Verdict::SetBreakpoint(line) => {
                    self.session.target_line = line;
                    let wanted = self
                        .resolver
                        .line_to_address(&self.session.target_file, line)
                        .map(|(addr, _)| addr);
                    if wanted.is_some() && wanted == Some(self.target.registers(pid)?.ip) {
                        debug!("{pid} stands on the breakpoint address, stepping off it first");
                        if !self.step_over(pid)? {
                            return Ok(Flow::Resumed);
                        }
                    }
                    match set_breakpoint(&mut self.session, &mut self.target, &self.resolver, pid)
                    {
                        Ok(_) => {
                            self.target.cont(pid, None)?;
                            return Ok(Flow::Resumed);
                        }
                        Err(e) if e.is_recoverable() => {
                            warn!("{e}");
                            feedback = Feedback::Error(e);
                        }
                        Err(e) => {
                            error!("could not set breakpoint: {e}");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}
