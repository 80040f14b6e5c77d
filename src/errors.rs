use thiserror::Error;

use crate::addr::Addr;

pub type Result<T> = std::result::Result<T, DebuggerError>;

#[derive(Error, Debug)]
pub enum DebuggerError {
    #[error("Os error: {0}")]
    Os(#[from] nix::Error),
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not parse the executable: {0}")]
    Object(#[from] object::Error),
    #[error("Could not parse the debug information: {0}")]
    Dwarf(#[from] gimli::Error),
    #[error("Could not (de)serialize json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Could not find the executable: {0}")]
    Which(#[from] which::Error),
    #[error("Could not convert to CString: {0}")]
    CStringConv(#[from] std::ffi::NulError),
    #[error("Executable does not exist: {0}")]
    ExecutableDoesNotExist(String),
    #[error("Executable is not a file: {0}")]
    ExecutableIsNotAFile(String),
    #[error("Executable has no line information: {0}")]
    NoDebugInfo(String),
    #[error("Can't find function {0}")]
    FunctionNotFound(String),
    #[error("Can't find breakpoint for {file}, {line}")]
    LineNotFound { file: String, line: u64 },
    #[error("Read only {got} of {expected} bytes at {addr}")]
    ShortRead {
        addr: Addr,
        expected: usize,
        got: usize,
    },
    #[error("Unexpected wait status: {0}")]
    UnexpectedWaitStatus(String),
    #[error("No tracee left to wait for")]
    NoMoreEvents,
}

impl DebuggerError {
    /// Resolution failures only abort the request that caused them, everything else means the
    /// trace channel is broken.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DebuggerError::LineNotFound { .. } | DebuggerError::FunctionNotFound(_)
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_only_resolution_errors_are_recoverable() {
        assert!(DebuggerError::LineNotFound {
            file: "main.c".to_string(),
            line: 3
        }
        .is_recoverable());
        assert!(DebuggerError::FunctionNotFound("main".to_string()).is_recoverable());
        assert!(!DebuggerError::Os(nix::Error::ESRCH).is_recoverable());
        assert!(!DebuggerError::NoMoreEvents.is_recoverable());
    }

    #[test]
    fn test_line_not_found_message() {
        let e = DebuggerError::LineNotFound {
            file: "/src/main.c".to_string(),
            line: 12,
        };
        assert_eq!(e.to_string(), "Can't find breakpoint for /src/main.c, 12");
    }
}
