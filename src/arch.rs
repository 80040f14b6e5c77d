//! Architecture specific bits: the software trap and which registers span a frame.
//!
//! Only x86-64 is supported, which keeps a conventional `rbp` chain when the debuggee is built
//! with frame pointers.

use nix::libc::user_regs_struct;
use serde::Serialize;

use crate::addr::Addr;

/// `int3`
pub const TRAP_INSTRUCTION: [u8; 1] = [0xcc];

/// Longest possible x86-64 instruction
pub const MAX_INSTRUCTION_BYTES: usize = 15;

pub const PAGE_BYTES: usize = 4096;

/// The registers the unwinder needs to start walking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameRegisters {
    /// instruction pointer (`rip`)
    pub ip: Addr,
    /// stack pointer (`rsp`)
    pub sp: Addr,
    /// frame pointer (`rbp`)
    pub fp: Addr,
}

impl From<&user_regs_struct> for FrameRegisters {
    fn from(regs: &user_regs_struct) -> Self {
        Self {
            ip: regs.rip.into(),
            sp: regs.rsp.into(),
            fp: regs.rbp.into(),
        }
    }
}

pub(crate) fn set_instruction_pointer(regs: &mut user_regs_struct, addr: Addr) {
    regs.rip = addr.u64();
}
