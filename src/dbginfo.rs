//! # Debug Information Module
//!
//! Maps between instruction addresses, source lines and functions.
//!
//! The debugger core only talks to the [`SymbolResolver`] trait. [`SymbolTable`] is the
//! implementation used by the binaries: a sorted line table and a list of functions, usually
//! loaded from the DWARF sections of the executable (see [`crate::dwarf_parse`]).
//!
//! Addresses stored in a [`SymbolTable`] are the ones written in the executable. For position
//! independent executables they are shifted by the load bias, which is only known once the
//! process is running, see [`SymbolResolver::attach`].

use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;

use nix::unistd::Pid;
use serde::Serialize;
use tracing::{debug, info};

use crate::addr::Addr;
use crate::errors::Result;

/// A resolved function
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionRef {
    /// demangled, fully qualified name
    pub name: String,
    /// the plain name, without any path
    pub short_name: String,
    /// address of the first instruction
    pub entry: Addr,
    /// first address behind the function
    pub end: Addr,
    /// source file the function is defined in
    pub file: String,
}

impl FunctionRef {
    pub fn contains(&self, addr: Addr) -> bool {
        self.entry <= addr && addr < self.end
    }

    /// True if `name` is either the qualified or the plain name of this function
    pub fn is_named(&self, name: &str) -> bool {
        self.name == name || self.short_name == name
    }
}

impl Display for FunctionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Where an address belongs to in the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u64,
    pub function: Option<FunctionRef>,
}

/// Address, line and function lookups
pub trait SymbolResolver {
    /// Resolves an instruction address to the line and function it belongs to
    fn address_to_line(&self, pc: Addr) -> Option<SourceLocation>;

    /// Resolves a source line to the lowest address generated for it
    fn line_to_address(&self, file: &str, line: u64) -> Option<(Addr, Option<FunctionRef>)>;

    /// Finds a function by qualified or plain name
    fn function_by_name(&self, name: &str) -> Option<FunctionRef>;

    /// Called once the debuggee process exists, before any lookup
    ///
    /// # Errors
    ///
    /// Fails if the resolver needs information about the process that can not be read.
    fn attach(&mut self, _pid: Pid) -> Result<()> {
        Ok(())
    }
}

/// One row of the line table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRow {
    pub addr: Addr,
    /// index into [`SymbolTable::files`]
    pub file: usize,
    pub line: u64,
    pub is_stmt: bool,
    /// marks the first address after a sequence, carries no line
    pub end_sequence: bool,
}

/// Line table and functions of one executable
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    files: Vec<String>,
    file_indices: HashMap<String, usize>,
    rows: Vec<LineRow>,
    functions: Vec<FunctionRef>,
    bias: usize,
    position_independent: bool,
    executable: Option<String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a file name and returns its index
    pub fn add_file(&mut self, file: impl Into<String>) -> usize {
        let file = file.into();
        if let Some(idx) = self.file_indices.get(&file) {
            return *idx;
        }
        self.files.push(file.clone());
        self.file_indices.insert(file, self.files.len() - 1);
        self.files.len() - 1
    }

    pub fn add_row(&mut self, addr: Addr, file: &str, line: u64, is_stmt: bool) {
        let file = self.add_file(file);
        self.rows.push(LineRow {
            addr,
            file,
            line,
            is_stmt,
            end_sequence: false,
        });
    }

    pub fn add_end_sequence(&mut self, addr: Addr) {
        self.rows.push(LineRow {
            addr,
            file: 0,
            line: 0,
            is_stmt: false,
            end_sequence: true,
        });
    }

    pub fn add_function(&mut self, function: FunctionRef) {
        self.functions.push(function);
    }

    pub(crate) fn set_position_independent(&mut self, executable: Option<String>) {
        self.position_independent = true;
        self.executable = executable;
    }

    /// Sorts rows and functions, must be called after all rows were added
    ///
    /// At the same address an end of sequence sorts before a regular row, so that a sequence
    /// starting where another one ended wins the lookup.
    pub fn finish(&mut self) {
        self.rows
            .sort_by_key(|r| (r.addr, if r.end_sequence { 0 } else { 1 }));
        self.functions.sort_by_key(|f| f.entry);

        let files: Vec<Option<String>> = self
            .functions
            .iter()
            .map(|f| {
                if f.file.is_empty() {
                    self.static_row_at(f.entry).map(|r| self.files[r.file].clone())
                } else {
                    None
                }
            })
            .collect();
        for (f, file) in self.functions.iter_mut().zip(files) {
            if let Some(file) = file {
                f.file = file;
            }
        }

        debug!(
            "symbol table: {} rows, {} functions, {} files",
            self.rows.len(),
            self.functions.len(),
            self.files.len()
        );
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn functions(&self) -> &[FunctionRef] {
        &self.functions
    }

    pub fn bias(&self) -> usize {
        self.bias
    }

    pub fn set_bias(&mut self, bias: usize) {
        self.bias = bias;
    }

    fn to_static(&self, addr: Addr) -> Addr {
        addr - self.bias
    }

    fn to_runtime(&self, addr: Addr) -> Addr {
        addr + self.bias
    }

    fn relocate(&self, function: &FunctionRef) -> FunctionRef {
        let mut f = function.clone();
        f.entry = self.to_runtime(f.entry);
        f.end = self.to_runtime(f.end);
        f
    }

    fn file_matches(&self, idx: usize, wanted: &str) -> bool {
        let Some(have) = self.files.get(idx) else {
            return false;
        };
        have == wanted || Path::new(have).ends_with(wanted)
    }

    fn static_row_at(&self, addr: Addr) -> Option<&LineRow> {
        let idx = self.rows.partition_point(|r| r.addr <= addr);
        self.rows[..idx].last().filter(|r| !r.end_sequence)
    }

    fn static_function_at(&self, addr: Addr) -> Option<&FunctionRef> {
        let idx = self.functions.partition_point(|f| f.entry <= addr);
        self.functions[..idx]
            .iter()
            .rev()
            .find(|f| f.contains(addr))
    }
}

impl SymbolResolver for SymbolTable {
    fn address_to_line(&self, pc: Addr) -> Option<SourceLocation> {
        let pc = self.to_static(pc);
        let row = self.static_row_at(pc)?;
        Some(SourceLocation {
            file: self.files[row.file].clone(),
            line: row.line,
            function: self.static_function_at(pc).map(|f| self.relocate(f)),
        })
    }

    fn line_to_address(&self, file: &str, line: u64) -> Option<(Addr, Option<FunctionRef>)> {
        let addr = self
            .rows
            .iter()
            .filter(|r| !r.end_sequence && r.is_stmt && r.line == line)
            .filter(|r| self.file_matches(r.file, file))
            .map(|r| r.addr)
            .min()?;
        let function = self.static_function_at(addr).map(|f| self.relocate(f));
        Some((self.to_runtime(addr), function))
    }

    fn function_by_name(&self, name: &str) -> Option<FunctionRef> {
        self.functions
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.functions.iter().find(|f| f.short_name == name))
            .map(|f| self.relocate(f))
    }

    fn attach(&mut self, pid: Pid) -> Result<()> {
        if !self.position_independent {
            return Ok(());
        }
        let maps = proc_maps::get_process_maps(pid.into())?;
        let own = maps.iter().find(|m| {
            m.offset == 0
                && match (&self.executable, m.filename()) {
                    (Some(exe), Some(p)) => p == Path::new(exe),
                    _ => false,
                }
        });
        let base = match own.or_else(|| maps.first()) {
            Some(m) => m.start(),
            None => return Ok(()),
        };
        info!("position independent executable loaded at {}", Addr::from(base));
        self.bias = base;
        Ok(())
    }
}
