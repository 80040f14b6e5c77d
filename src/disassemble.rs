//! # Disassembly Module
//!
//! Decodes the instruction a tracee is stopped at, using iced-x86.

use iced_x86::{Decoder, DecoderOptions, Formatter, Instruction, NasmFormatter};
use nix::unistd::Pid;
use tracing::trace;

use crate::addr::Addr;
use crate::arch::{MAX_INSTRUCTION_BYTES, PAGE_BYTES};
use crate::errors::Result;
use crate::memory::Memory;

const CODE_BITNESS: u32 = 64;

/// Formats the first instruction in `code`, which is located at `addr`
///
/// Returns [`None`] if `code` does not start with a valid instruction.
pub fn format_instruction(code: &[u8], addr: Addr) -> Option<String> {
    let mut decoder = Decoder::with_ip(CODE_BITNESS, code, addr.u64(), DecoderOptions::NONE);
    if !decoder.can_decode() {
        return None;
    }
    let mut instruction = Instruction::default();
    decoder.decode_out(&mut instruction);
    if instruction.is_invalid() {
        return None;
    }

    let mut formatter = NasmFormatter::new();
    formatter.options_mut().set_first_operand_char_index(8);
    let mut out = String::new();
    formatter.format(&instruction, &mut out);
    Some(out)
}

/// Reads and formats the instruction at `addr` of the stopped tracee `pid`
///
/// Only the page containing `addr` is read, since the page after it might not be mapped.
///
/// # Errors
///
/// Fails if the memory at `addr` can not be read.
pub fn instruction_at<M: Memory>(memory: &M, pid: Pid, addr: Addr) -> Result<Option<String>> {
    let len = (PAGE_BYTES - addr.usize() % PAGE_BYTES).min(MAX_INSTRUCTION_BYTES);
    let code = memory.peek(pid, addr, len)?;
    trace!("code at {addr}: {code:02x?}");
    Ok(format_instruction(&code, addr))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{FakeMemory, PID};

    #[test]
    fn test_format_known_instructions() {
        assert_eq!(
            format_instruction(&[0x55], Addr::from(0x1000usize)).as_deref(),
            Some("push    rbp")
        );
        assert_eq!(
            format_instruction(&[0x48, 0x89, 0xe5], Addr::from(0x1000usize)).as_deref(),
            Some("mov     rbp,rsp")
        );
    }

    #[test]
    fn test_truncated_instruction_is_none() {
        assert_eq!(format_instruction(&[0x48], Addr::from(0x1000usize)), None);
        assert_eq!(format_instruction(&[], Addr::from(0x1000usize)), None);
    }

    #[test]
    fn test_read_stays_within_the_page() {
        let mut mem = FakeMemory::new();
        mem.fill(Addr::from(0x1ffcusize), &[0x90, 0x90, 0x90, 0xc3]);
        let ins = instruction_at(&mem, PID, Addr::from(0x1fffusize)).unwrap();
        assert_eq!(ins.as_deref(), Some("ret"));
    }
}
