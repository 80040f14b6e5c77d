//! # Memory Module
//!
//! Reading and patching the address space of a stopped tracee.
//!
//! [`Memory`] is the only seam through which the rest of the debugger touches tracee memory, so
//! breakpoints and the unwinder work on plain byte vectors and [`Addr`] values. The ptrace
//! implementation moves data one [`Word`] at a time with `PTRACE_PEEKDATA` and
//! `PTRACE_POKEDATA`; [`peek_words`] and [`poke_words`] do the splitting so that unaligned
//! ranges only ever touch the bytes that were asked for.
//!
//! All operations require the tracee to be stopped. Any failure means the trace channel is
//! broken and is reported as a fatal error.

use nix::sys::ptrace;
use nix::unistd::Pid;
use tracing::trace;

use crate::addr::Addr;
use crate::errors::Result;
use crate::{Word, WORD_BYTES};

/// Byte level access to a tracee's address space
pub trait Memory {
    /// Reads `len` bytes starting at `addr`
    ///
    /// # Errors
    ///
    /// Fails if the memory is not mapped or the tracee can not be accessed.
    fn peek(&self, pid: Pid, addr: Addr, len: usize) -> Result<Vec<u8>>;

    /// Writes `data` starting at `addr`
    ///
    /// # Errors
    ///
    /// Fails if the memory is not mapped or the tracee can not be accessed.
    fn poke(&mut self, pid: Pid, addr: Addr, data: &[u8]) -> Result<()>;

    /// Reads one native endian word
    ///
    /// # Errors
    ///
    /// See [`Memory::peek`].
    fn peek_word(&self, pid: Pid, addr: Addr) -> Result<Word> {
        let raw = self.peek(pid, addr, WORD_BYTES)?;
        let mut buf = [0u8; WORD_BYTES];
        buf.copy_from_slice(&raw);
        Ok(Word::from_ne_bytes(buf))
    }
}

pub(crate) fn mem_read_word(pid: Pid, addr: Addr) -> Result<Word> {
    Ok(ptrace::read(pid, addr.into())?)
}

pub(crate) fn mem_write_word(pid: Pid, addr: Addr, value: Word) -> Result<()> {
    Ok(ptrace::write(pid, addr.into(), value)?)
}

/// Reads `len` bytes at `addr` with a word sized reader
pub(crate) fn peek_words<F>(addr: Addr, len: usize, mut read_word: F) -> Result<Vec<u8>>
where
    F: FnMut(Addr) -> Result<Word>,
{
    let mut out = Vec::with_capacity(len);
    let mut skip = addr.usize() % WORD_BYTES;
    let mut cursor = addr.align_down(WORD_BYTES);

    while out.len() < len {
        let bytes = read_word(cursor)?.to_ne_bytes();
        let take = (WORD_BYTES - skip).min(len - out.len());
        out.extend_from_slice(&bytes[skip..skip + take]);
        skip = 0;
        cursor += WORD_BYTES;
    }

    Ok(out)
}

/// Writes `data` at `addr` with a word sized reader and writer
///
/// Words that are only partially covered by `data` are read first, so their other bytes stay as
/// they are.
pub(crate) fn poke_words<R, W>(
    addr: Addr,
    data: &[u8],
    mut read_word: R,
    mut write_word: W,
) -> Result<()>
where
    R: FnMut(Addr) -> Result<Word>,
    W: FnMut(Addr, Word) -> Result<()>,
{
    let mut written = 0;
    let mut skip = addr.usize() % WORD_BYTES;
    let mut cursor = addr.align_down(WORD_BYTES);

    while written < data.len() {
        let take = (WORD_BYTES - skip).min(data.len() - written);
        let mut bytes = if take == WORD_BYTES {
            [0u8; WORD_BYTES]
        } else {
            read_word(cursor)?.to_ne_bytes()
        };
        trace!("word at {cursor} before: {:02x?}", bytes);
        bytes[skip..skip + take].copy_from_slice(&data[written..written + take]);
        trace!("word at {cursor} after:  {:02x?}", bytes);
        write_word(cursor, Word::from_ne_bytes(bytes))?;
        written += take;
        skip = 0;
        cursor += WORD_BYTES;
    }

    Ok(())
}
