//! # Unwind Module
//!
//! Frame pointer based stack unwinding.
//!
//! Starting from the registers of a stopped thread, [`Unwinder::unwind`] walks the chain of saved
//! base pointers and resolves every return address it finds to a function and line. The walk
//! ends at one of the configured root functions (usually `main`), which keeps the process
//! startup frames below it out of the output.
//!
//! The stack is read while other threads of the debuggee may still be running, and the stopped
//! thread itself may be halfway through a prologue. When a frame looks implausible (a null frame
//! pointer, a frame pointer below the stack pointer, or a frame larger than
//! [`UnwindConfig::max_frame_size`]), the walk logs the anomaly and continues with a frame of
//! [`UnwindConfig::fallback_frame_size`] bytes. That fallback is an approximation: the frames
//! printed after it may be wrong, but the walk always makes progress and terminates, at the
//! latest after [`UnwindConfig::max_frames`] iterations.

use std::fmt::Display;

use nix::unistd::Pid;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::addr::Addr;
use crate::arch::FrameRegisters;
use crate::dbginfo::{FunctionRef, SymbolResolver};
use crate::errors::{DebuggerError, Result};
use crate::memory::Memory;
use crate::{Word, WORD_BYTES};

pub const DEFAULT_ROOT_FUNCTIONS: &[&str] = &["main", "__libc_start_main"];
pub const DEFAULT_MAX_FRAMES: usize = 256;
pub const MAX_FRAME_SIZE: usize = 1000;
pub const FALLBACK_FRAME_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnwindConfig {
    /// the walk stops once it reached one of these functions
    pub root_functions: Vec<String>,
    pub max_frames: usize,
    pub max_frame_size: usize,
    pub fallback_frame_size: usize,
}

impl Default for UnwindConfig {
    fn default() -> Self {
        Self {
            root_functions: DEFAULT_ROOT_FUNCTIONS.iter().map(|s| s.to_string()).collect(),
            max_frames: DEFAULT_MAX_FRAMES,
            max_frame_size: MAX_FRAME_SIZE,
            fallback_frame_size: FALLBACK_FRAME_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BacktraceFrame {
    /// the return address found on the stack
    pub addr: Addr,
    pub function: FunctionRef,
    pub line: u64,
}

/// A frame that did not look like a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameAnomaly {
    pub sp: Addr,
    pub fp: Addr,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Backtrace {
    /// callers, innermost first
    pub frames: Vec<BacktraceFrame>,
    pub anomalies: Vec<FrameAnomaly>,
    /// the function the walk ended in
    pub last_function: Option<FunctionRef>,
}

impl Display for Backtrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for frame in &self.frames {
            writeln!(f, "  called by {} line {}", frame.function.name, frame.line)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Unwinder {
    config: UnwindConfig,
}

impl Unwinder {
    /// The fallback frame always covers at least the saved base pointer
    pub fn new(mut config: UnwindConfig) -> Self {
        config.fallback_frame_size = config.fallback_frame_size.max(WORD_BYTES);
        Self { config }
    }

    pub fn config(&self) -> &UnwindConfig {
        &self.config
    }

    fn is_root(&self, function: Option<&FunctionRef>) -> bool {
        function.is_some_and(|f| self.config.root_functions.iter().any(|r| f.is_named(r)))
    }

    /// Walks the frame pointer chain of the thread `pid`
    ///
    /// # Errors
    ///
    /// Fails if the stack memory can not be read, which means the tracee is gone.
    pub fn unwind<M, R>(
        &self,
        memory: &M,
        resolver: &R,
        pid: Pid,
        regs: FrameRegisters,
    ) -> Result<Backtrace>
    where
        M: Memory,
        R: SymbolResolver,
    {
        let mut bt = Backtrace {
            last_function: resolver.address_to_line(regs.ip).and_then(|l| l.function),
            ..Default::default()
        };
        let mut sp = regs.sp;
        let mut fp = regs.fp;

        for _ in 0..self.config.max_frames {
            let mut frame_size = fp
                .distance_from(sp)
                .map(|d| d + WORD_BYTES)
                .unwrap_or(usize::MAX);
            if frame_size > self.config.max_frame_size || fp.is_null() {
                warn!("Strange frame size: SP: {sp:X} | BP : {fp:X}");
                bt.anomalies.push(FrameAnomaly { sp, fp });
                frame_size = self.config.fallback_frame_size;
                fp = sp + (frame_size - WORD_BYTES);
            }

            let raw = memory.peek(pid, sp, frame_size)?;
            if raw.len() < frame_size {
                let err = DebuggerError::ShortRead {
                    addr: sp,
                    expected: frame_size,
                    got: raw.len(),
                };
                return Err(err);
            }
            let return_addr = Addr::from(word_at(&raw, 0));
            trace!("frame at {sp}: return address {return_addr}");
            if let Some(loc) = resolver.address_to_line(return_addr) {
                if let Some(function) = loc.function {
                    bt.frames.push(BacktraceFrame {
                        addr: return_addr,
                        function: function.clone(),
                        line: loc.line,
                    });
                    bt.last_function = Some(function);
                }
            }

            // the frame spans [sp, fp], the saved base pointer is its last word
            let next_fp = Addr::from(word_at(&raw, frame_size - WORD_BYTES));

            if self.is_root(bt.last_function.as_ref()) {
                debug!("reached root function after {} frames", bt.frames.len());
                return Ok(bt);
            }

            sp += frame_size;
            fp = next_fp;
        }

        warn!(
            "stopped unwinding after {} iterations without reaching a root function",
            self.config.max_frames
        );
        Ok(bt)
    }
}

fn word_at(raw: &[u8], offset: usize) -> Word {
    let mut buf = [0u8; WORD_BYTES];
    buf.copy_from_slice(&raw[offset..offset + WORD_BYTES]);
    Word::from_ne_bytes(buf)
}
