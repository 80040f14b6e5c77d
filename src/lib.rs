//! # framehound
//!
//! A small source line aware debugger for x86_64 Linux.
//!
//! A debuggee is launched under ptrace and stopped before its first instruction. The operator
//! then sets breakpoints by line number, steps single instructions and continues. Whenever the
//! debuggee traps, the debugger prints the function and line it stopped in, the instruction at
//! the stop, and the chain of callers up to `main`, found by walking the frame pointers.
//!
//! The core ([`debugger::Debugger`]) only depends on a few traits, so the same loop drives a real
//! process ([`debuggee::Debuggee`]) with DWARF symbols ([`dbginfo::SymbolTable`]) from a terminal
//! ([`ui::cli::CliUi`]) or from another program ([`ui::json::JsonUI`]).

pub mod addr;
pub mod arch;
pub mod breakpoint;
pub mod dbginfo;
pub mod debuggee;
pub mod debugger;
pub mod disassemble;
pub mod dwarf_parse;
pub mod errors;
pub mod feedback;
pub mod memory;
pub mod session;
pub mod ui;
pub mod unwind;

#[cfg(test)]
mod testing;

pub use errors::Result;

/// Unit of `PTRACE_PEEKDATA` and `PTRACE_POKEDATA`
pub type Word = i64;
pub const WORD_BYTES: usize = std::mem::size_of::<Word>();
