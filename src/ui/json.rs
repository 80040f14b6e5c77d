//! JSON lines interface for driving the debugger from another program.
//!
//! Every stop produces one object `{"feedback": ...}` on the output, then one object
//! `{"verdict": ...}` is read from the input, for example `{"verdict":"Step"}` or
//! `{"verdict":{"SetBreakpoint":12}}`.

use std::io::{BufRead, BufReader, Stdin, Stdout, Write};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use super::{DebuggerUI, Verdict};
use crate::errors::{DebuggerError, Result};
use crate::feedback::Feedback;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub verdict: Verdict,
}

pub struct JsonUI<I: BufRead, O: Write> {
    input: I,
    output: O,
}

impl JsonUI<BufReader<Stdin>, Stdout> {
    pub fn build() -> Result<Self> {
        Ok(Self::new(BufReader::new(std::io::stdin()), std::io::stdout()))
    }
}

impl<I: BufRead, O: Write> JsonUI<I, O> {
    pub fn new(input: I, output: O) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> O {
        self.output
    }

    pub fn format_feedback(feedback: &Feedback, target_file: &str) -> Result<Value> {
        let inner = match feedback {
            Feedback::Text(t) => json!({ "Text": t }),
            Feedback::Stopped(report) => json!({ "Stopped": serde_json::to_value(report)? }),
            Feedback::Error(e) => json!({ "Error": e.to_string() }),
        };
        Ok(json!({ "feedback": inner, "target_file": target_file }))
    }

    fn emit(&mut self, value: &Value) -> Result<()> {
        writeln!(self.output, "{value}")?;
        self.output.flush()?;
        Ok(())
    }
}

impl<I: BufRead, O: Write> DebuggerUI for JsonUI<I, O> {
    fn process(&mut self, feedback: Feedback, target_file: &str) -> Result<Verdict> {
        let value = Self::format_feedback(&feedback, target_file)?;
        self.emit(&value)?;

        loop {
            let mut buf = String::new();
            if self.input.read_line(&mut buf)? == 0 {
                return Err(DebuggerError::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
            if buf.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Input>(&buf) {
                Ok(input) => return Ok(input.verdict),
                Err(e) => {
                    warn!("could not parse input: {e}");
                    let err: DebuggerError = e.into();
                    let value = Self::format_feedback(&Feedback::Error(err), target_file)?;
                    self.emit(&value)?;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;

    fn ui(input: &str) -> JsonUI<Cursor<Vec<u8>>, Vec<u8>> {
        JsonUI::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn test_parses_verdicts() {
        let mut ui = ui("{\"verdict\":\"Continue\"}\n\n{\"verdict\":{\"SetBreakpoint\":12}}\n");
        assert_eq!(ui.process(Feedback::Text("ready".to_string()), "a.c").unwrap(), Verdict::Continue);
        assert_eq!(
            ui.process(Feedback::Text("ready".to_string()), "a.c").unwrap(),
            Verdict::SetBreakpoint(12)
        );
    }

    #[test]
    fn test_bad_input_reports_error_and_reads_again() {
        let mut ui = ui("{\"verdict\":\"Fly\"}\n{\"verdict\":\"Quit\"}\n");
        assert_eq!(ui.process(Feedback::Text("ready".to_string()), "a.c").unwrap(), Verdict::Quit);
        let out = String::from_utf8(ui.into_output()).unwrap();
        let lines: Vec<Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["feedback"]["Text"], "ready");
        assert!(lines[1]["feedback"]["Error"].is_string());
    }

    #[test]
    fn test_error_feedback_format() {
        let fb = Feedback::Error(DebuggerError::LineNotFound {
            file: "a.c".to_string(),
            line: 3,
        });
        let v = JsonUI::<Cursor<Vec<u8>>, Vec<u8>>::format_feedback(&fb, "a.c").unwrap();
        assert_eq!(v["feedback"]["Error"], "Can't find breakpoint for a.c, 3");
        assert_eq!(v["target_file"], "a.c");
    }
}
