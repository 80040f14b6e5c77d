//! Fakes for exercising the debugger without a live process.

use std::collections::{BTreeMap, HashMap, VecDeque};

use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::addr::Addr;
use crate::arch::FrameRegisters;
use crate::dbginfo::{FunctionRef, SymbolTable};
use crate::debuggee::{Target, TraceEvent};
use crate::errors::{DebuggerError, Result};
use crate::feedback::Feedback;
use crate::memory::Memory;
use crate::ui::{DebuggerUI, Verdict};
use crate::WORD_BYTES;

pub(crate) const PID: Pid = Pid::from_raw(4242);

/// Sparse byte addressed memory, unknown bytes are unmapped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FakeMemory {
    bytes: BTreeMap<usize, u8>,
}

impl FakeMemory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fill(&mut self, addr: Addr, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            self.bytes.insert(addr.usize() + i, *b);
        }
    }

    pub(crate) fn write_word(&mut self, addr: Addr, value: u64) {
        self.fill(addr, &value.to_ne_bytes());
    }

    pub(crate) fn count_byte(&self, byte: u8) -> usize {
        self.bytes.values().filter(|b| **b == byte).count()
    }
}

impl Memory for FakeMemory {
    fn peek(&self, _pid: Pid, addr: Addr, len: usize) -> Result<Vec<u8>> {
        (0..len)
            .map(|i| {
                self.bytes
                    .get(&(addr.usize() + i))
                    .copied()
                    .ok_or(DebuggerError::Os(nix::Error::EIO))
            })
            .collect()
    }

    fn poke(&mut self, _pid: Pid, addr: Addr, data: &[u8]) -> Result<()> {
        for i in 0..data.len() {
            if !self.bytes.contains_key(&(addr.usize() + i)) {
                return Err(DebuggerError::Os(nix::Error::EIO));
            }
        }
        self.fill(addr, data);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    Cont(Pid, Option<Signal>),
    Step(Pid, Option<Signal>),
    SetIp(Pid, Addr),
}

/// A scripted tracee
///
/// Every call to [`Target::wait_any`] pops the next event and, if given, the registers the
/// thread has at that event. Every resume records the memory at that moment.
#[derive(Debug, Default)]
pub(crate) struct FakeTarget {
    pub(crate) memory: FakeMemory,
    pub(crate) events: VecDeque<(TraceEvent, Option<FrameRegisters>)>,
    pub(crate) registers: HashMap<Pid, FrameRegisters>,
    pub(crate) actions: Vec<Action>,
    pub(crate) memory_at_resume: Vec<FakeMemory>,
}

impl FakeTarget {
    pub(crate) fn new(memory: FakeMemory, start: FrameRegisters) -> Self {
        let mut registers = HashMap::new();
        registers.insert(PID, start);
        Self {
            memory,
            registers,
            ..Default::default()
        }
    }

    pub(crate) fn then(mut self, event: TraceEvent, regs: Option<FrameRegisters>) -> Self {
        self.events.push_back((event, regs));
        self
    }

    fn resumed(&mut self, action: Action) {
        self.memory_at_resume.push(self.memory.clone());
        self.actions.push(action);
    }
}

impl Memory for FakeTarget {
    fn peek(&self, pid: Pid, addr: Addr, len: usize) -> Result<Vec<u8>> {
        self.memory.peek(pid, addr, len)
    }

    fn poke(&mut self, pid: Pid, addr: Addr, data: &[u8]) -> Result<()> {
        self.memory.poke(pid, addr, data)
    }
}

impl Target for FakeTarget {
    fn main_pid(&self) -> Pid {
        PID
    }

    fn wait_any(&mut self) -> Result<TraceEvent> {
        let (event, regs) = self.events.pop_front().ok_or(DebuggerError::NoMoreEvents)?;
        if let Some(regs) = regs {
            self.registers.insert(event.pid, regs);
        }
        Ok(event)
    }

    fn registers(&self, pid: Pid) -> Result<FrameRegisters> {
        self.registers
            .get(&pid)
            .copied()
            .ok_or(DebuggerError::Os(nix::Error::ESRCH))
    }

    fn set_instruction_pointer(&mut self, pid: Pid, addr: Addr) -> Result<()> {
        let regs = self
            .registers
            .get_mut(&pid)
            .ok_or(DebuggerError::Os(nix::Error::ESRCH))?;
        regs.ip = addr;
        self.actions.push(Action::SetIp(pid, addr));
        Ok(())
    }

    fn cont(&mut self, pid: Pid, sig: Option<Signal>) -> Result<()> {
        self.resumed(Action::Cont(pid, sig));
        Ok(())
    }

    fn step(&mut self, pid: Pid, sig: Option<Signal>) -> Result<()> {
        self.resumed(Action::Step(pid, sig));
        Ok(())
    }
}

/// Answers with prepared verdicts and remembers what it was told
#[derive(Debug, Default)]
pub(crate) struct ScriptedUI {
    pub(crate) verdicts: VecDeque<Verdict>,
    pub(crate) seen: Vec<String>,
    pub(crate) stops: Vec<crate::feedback::StopReport>,
    pub(crate) errors: Vec<String>,
}

impl ScriptedUI {
    pub(crate) fn new(verdicts: &[Verdict]) -> Self {
        Self {
            verdicts: verdicts.iter().copied().collect(),
            ..Default::default()
        }
    }
}

impl DebuggerUI for ScriptedUI {
    fn process(&mut self, feedback: Feedback, _target_file: &str) -> Result<Verdict> {
        self.seen.push(feedback.to_string());
        match feedback {
            Feedback::Stopped(report) => self.stops.push(report),
            Feedback::Error(e) => self.errors.push(e.to_string()),
            _ => (),
        }
        self.verdicts
            .pop_front()
            .ok_or(DebuggerError::Io(std::io::ErrorKind::UnexpectedEof.into()))
    }
}

pub(crate) fn function(name: &str, entry: usize, end: usize) -> FunctionRef {
    FunctionRef {
        name: name.to_string(),
        short_name: name.to_string(),
        entry: Addr::from(entry),
        end: Addr::from(end),
        file: "/src/prog.c".to_string(),
    }
}

/// `compute` on lines 10 to 12 at 0x1100, `main` on lines 20 to 22 at 0x1200, line 9 is a
/// comment
pub(crate) fn sample_table() -> SymbolTable {
    let mut table = SymbolTable::new();
    table.add_function(function("compute", 0x1100, 0x1180));
    table.add_function(function("main", 0x1200, 0x1280));
    for (addr, line) in [(0x1100, 10), (0x1108, 11), (0x1110, 12)] {
        table.add_row(Addr::from(addr as usize), "/src/prog.c", line, true);
    }
    table.add_end_sequence(Addr::from(0x1180usize));
    for (addr, line) in [(0x1200, 20), (0x1210, 21), (0x1220, 22)] {
        table.add_row(Addr::from(addr as usize), "/src/prog.c", line, true);
    }
    table.add_end_sequence(Addr::from(0x1280usize));
    table.finish();
    table
}

/// A `leaf` at 0x1000 called through `depth - 1` callers from `main`
///
/// Caller `k` lives at `0x1000 * (k + 1)` and covers lines `100 * k` and `100 * k + 1`, `main`
/// comes last. Returns the table and the return addresses, innermost first.
pub(crate) fn chain_table(depth: usize) -> (SymbolTable, Vec<u64>) {
    let mut table = SymbolTable::new();
    table.add_function(function("leaf", 0x1000, 0x1100));
    table.add_row(Addr::from(0x1000usize), "/src/prog.c", 1, true);
    table.add_end_sequence(Addr::from(0x1100usize));

    let mut callers = Vec::new();
    for k in 1..=depth {
        let name = if k == depth {
            "main".to_string()
        } else {
            format!("caller{k}")
        };
        let entry = 0x1000 * (k + 1);
        table.add_function(function(&name, entry, entry + 0x100));
        table.add_row(Addr::from(entry), "/src/prog.c", 100 * k as u64, true);
        table.add_row(Addr::from(entry + 0x20), "/src/prog.c", 100 * k as u64 + 1, true);
        table.add_end_sequence(Addr::from(entry + 0x100));
        callers.push((entry + 0x20) as u64);
    }
    table.finish();
    (table, callers)
}

/// Lays out a frame pointer chain returning through `callers`, innermost first
///
/// The innermost frame starts at 0x7000 with its base pointer two words up. Every further frame
/// is 0x30 bytes, with the saved base pointer at its frame pointer and the return address right
/// above it.
pub(crate) fn synthetic_stack(callers: &[u64]) -> (FakeMemory, FrameRegisters) {
    let sp = 0x7000usize;
    let fp0 = sp + 2 * WORD_BYTES;
    let fp = |k: usize| fp0 + k * 0x30;

    let mut mem = FakeMemory::new();
    mem.fill(Addr::from(sp), &vec![0u8; fp(callers.len()) + 2 * WORD_BYTES - sp]);
    for (k, ret) in callers.iter().enumerate() {
        mem.write_word(Addr::from(fp(k)), fp(k + 1) as u64);
        mem.write_word(Addr::from(fp(k) + WORD_BYTES), *ret);
    }

    let regs = FrameRegisters {
        ip: Addr::from(0x1010usize),
        sp: Addr::from(sp),
        fp: Addr::from(fp0),
    };
    (mem, regs)
}
