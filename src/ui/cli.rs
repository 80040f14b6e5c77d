use std::io::{BufRead, BufReader, Stdin, Stdout, Write};

use tracing::trace;

use super::{DebuggerUI, Verdict};
use crate::errors::{DebuggerError, Result};
use crate::feedback::Feedback;

const PROMPT: &str = "\n(C)ontinue, (S)tep, set (B)reakpoint or (Q)uit? > ";

/// Line based terminal interface
///
/// Commands are single letters, case does not matter. After `B` the next line is the line
/// number of the breakpoint.
pub struct CliUi<I: BufRead, O: Write> {
    input: I,
    output: O,
}

impl CliUi<BufReader<Stdin>, Stdout> {
    pub fn build() -> Result<Self> {
        Ok(Self::new(BufReader::new(std::io::stdin()), std::io::stdout()))
    }
}

impl<I: BufRead, O: Write> CliUi<I, O> {
    pub fn new(input: I, output: O) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> O {
        self.output
    }

    fn get_line(&mut self) -> Result<String> {
        self.output.flush()?;
        let mut buf = String::new();
        if self.input.read_line(&mut buf)? == 0 {
            return Err(DebuggerError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        trace!("input: {buf:?}");
        Ok(buf.trim().to_string())
    }

    fn ask_line_number(&mut self, target_file: &str) -> Result<u64> {
        loop {
            write!(self.output, "  Enter line number in {target_file}: > ")?;
            let input = self.get_line()?;
            match input.parse::<u64>() {
                Ok(n) => return Ok(n),
                Err(_) => writeln!(self.output, "Unexpected input {input}")?,
            }
        }
    }
}

impl<I: BufRead, O: Write> DebuggerUI for CliUi<I, O> {
    fn process(&mut self, feedback: Feedback, target_file: &str) -> Result<Verdict> {
        writeln!(self.output, "{feedback}")?;

        write!(self.output, "{PROMPT}")?;
        loop {
            let input = self.get_line()?;
            match input.to_uppercase().as_str() {
                "C" => return Ok(Verdict::Continue),
                "S" => return Ok(Verdict::Step),
                "Q" => return Ok(Verdict::Quit),
                "B" => return Ok(Verdict::SetBreakpoint(self.ask_line_number(target_file)?)),
                _ => {
                    writeln!(self.output, "Unexpected input {input}")?;
                    write!(self.output, "{PROMPT}")?;
                }
            }
        }
    }
}
