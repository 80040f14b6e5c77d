//! Loads a [`SymbolTable`] from the DWARF sections of an ELF executable.
//!
//! Functions come from `DW_TAG_subprogram` entries with a code range, lines from the line
//! programs of all compilation units.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use gimli::{AttributeValue, Reader, Unit};
use object::{Object, ObjectKind, ObjectSection};
use tracing::{debug, trace, warn};

use crate::addr::Addr;
use crate::dbginfo::{FunctionRef, SymbolTable};
use crate::errors::{DebuggerError, Result};

pub(crate) type GimliReaderThing = gimli::EndianReader<gimli::RunTimeEndian, Rc<[u8]>>;

impl SymbolTable {
    /// Reads the executable at `path` and builds its symbol table
    ///
    /// # Errors
    ///
    /// Fails if the file can not be read or parsed, or if it carries no line information at all.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let object_info = object::File::parse(&*data)?;
        let mut table = Self::from_object(&object_info)?;
        if table.files().is_empty() {
            return Err(DebuggerError::NoDebugInfo(path.to_string_lossy().to_string()));
        }
        if object_info.kind() == ObjectKind::Dynamic {
            let canonical = std::fs::canonicalize(path)
                .ok()
                .map(|p| p.to_string_lossy().to_string());
            table.set_position_independent(canonical);
        }
        Ok(table)
    }

    /// Builds the symbol table from an already parsed object file
    ///
    /// # Errors
    ///
    /// Fails if the DWARF data is malformed.
    pub fn from_object(object_info: &object::File<'_>) -> Result<Self> {
        let endian = if object_info.is_little_endian() {
            gimli::RunTimeEndian::Little
        } else {
            gimli::RunTimeEndian::Big
        };
        let loader = |section: gimli::SectionId| -> std::result::Result<_, gimli::Error> {
            let data = object_info
                .section_by_name(section.name())
                .and_then(|s| s.uncompressed_data().ok())
                .unwrap_or(Cow::Borrowed(&[][..]));
            Ok(GimliReaderThing::new(Rc::from(data.as_ref()), endian))
        };
        let dwarf = gimli::Dwarf::load(loader)?;

        let mut table = SymbolTable::new();
        let mut iter = dwarf.units();
        while let Some(header) = iter.next()? {
            let unit = dwarf.unit(header)?;
            read_lines(&dwarf, &unit, &mut table)?;
            read_functions(&dwarf, &unit, &mut table)?;
        }
        table.finish();
        Ok(table)
    }
}

fn read_lines(
    dwarf: &gimli::Dwarf<GimliReaderThing>,
    unit: &Unit<GimliReaderThing>,
    table: &mut SymbolTable,
) -> Result<()> {
    let Some(program) = unit.line_program.clone() else {
        return Ok(());
    };
    let mut rows = program.rows();
    while let Some((header, row)) = rows.next_row()? {
        if row.end_sequence() {
            table.add_end_sequence(Addr::from(row.address()));
            continue;
        }
        let Some(line) = row.line() else {
            continue;
        };
        let Some(file) = row.file(header) else {
            continue;
        };
        let path = render_file(dwarf, unit, file, header)?;
        table.add_row(Addr::from(row.address()), &path, line.get(), row.is_stmt());
    }
    Ok(())
}

fn render_file(
    dwarf: &gimli::Dwarf<GimliReaderThing>,
    unit: &Unit<GimliReaderThing>,
    file: &gimli::FileEntry<GimliReaderThing>,
    header: &gimli::LineProgramHeader<GimliReaderThing>,
) -> Result<String> {
    let mut path = PathBuf::new();
    if let Some(comp_dir) = &unit.comp_dir {
        path.push(comp_dir.to_string_lossy()?.as_ref());
    }
    if file.directory_index() != 0 {
        if let Some(dir) = file.directory(header) {
            path.push(dwarf.attr_string(unit, dir)?.to_string_lossy()?.as_ref());
        }
    }
    path.push(
        dwarf
            .attr_string(unit, file.path_name())?
            .to_string_lossy()?
            .as_ref(),
    );
    Ok(path.to_string_lossy().to_string())
}

fn read_functions(
    dwarf: &gimli::Dwarf<GimliReaderThing>,
    unit: &Unit<GimliReaderThing>,
    table: &mut SymbolTable,
) -> Result<()> {
    let mut entries = unit.entries();
    while let Some((_, entry)) = entries.next_dfs()? {
        if entry.tag() != gimli::DW_TAG_subprogram {
            continue;
        }
        let low = match entry.attr_value(gimli::DW_AT_low_pc)? {
            Some(v) => dwarf.attr_address(unit, v)?,
            None => None,
        };
        let Some(low) = low else {
            continue;
        };
        let high = match entry.attr_value(gimli::DW_AT_high_pc)? {
            Some(v @ (AttributeValue::Addr(_) | AttributeValue::DebugAddrIndex(_))) => {
                dwarf.attr_address(unit, v)?
            }
            Some(v) => v.udata_value().map(|len| low + len),
            None => None,
        };
        let Some(high) = high else {
            trace!("subprogram at {low:#x} has no high pc, skipping");
            continue;
        };

        let (name, short_name) = match function_names(dwarf, unit, entry)? {
            Some(n) => n,
            None => {
                debug!("unnamed subprogram at {low:#x}");
                continue;
            }
        };
        table.add_function(FunctionRef {
            name,
            short_name,
            entry: Addr::from(low),
            end: Addr::from(high),
            file: String::new(),
        });
    }
    Ok(())
}

/// Qualified and plain name of a subprogram, looking through its specification or abstract
/// origin if the entry itself is nameless
fn function_names(
    dwarf: &gimli::Dwarf<GimliReaderThing>,
    unit: &Unit<GimliReaderThing>,
    entry: &gimli::DebuggingInformationEntry<'_, '_, GimliReaderThing>,
) -> Result<Option<(String, String)>> {
    let short = attr_string(dwarf, unit, entry, gimli::DW_AT_name)?;
    let linkage = match attr_string(dwarf, unit, entry, gimli::DW_AT_linkage_name)? {
        Some(l) => Some(l),
        None => attr_string(dwarf, unit, entry, gimli::DW_AT_MIPS_linkage_name)?,
    };

    if short.is_none() && linkage.is_none() {
        for at in [gimli::DW_AT_specification, gimli::DW_AT_abstract_origin] {
            if let Some(AttributeValue::UnitRef(offset)) = entry.attr_value(at)? {
                let origin = unit.entry(offset)?;
                return function_names(dwarf, unit, &origin);
            }
        }
        return Ok(None);
    }

    let name = match &linkage {
        Some(l) => format!("{:#}", rustc_demangle::demangle(l)),
        None => short.clone().unwrap_or_default(),
    };
    let short = short.unwrap_or_else(|| name.rsplit("::").next().unwrap_or(&name).to_string());
    Ok(Some((name, short)))
}

fn attr_string(
    dwarf: &gimli::Dwarf<GimliReaderThing>,
    unit: &Unit<GimliReaderThing>,
    entry: &gimli::DebuggingInformationEntry<'_, '_, GimliReaderThing>,
    at: gimli::DwAt,
) -> Result<Option<String>> {
    Ok(match entry.attr_value(at)? {
        Some(v) => match dwarf.attr_string(unit, v) {
            Ok(s) => Some(s.to_string_lossy()?.to_string()),
            Err(e) => {
                warn!("could not read {at} string: {e}");
                None
            }
        },
        None => None,
    })
}
