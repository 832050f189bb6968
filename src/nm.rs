//! Writes an nm-style listing of symbols: one line per symbol with its
//! section-relative offset and a classification character derived from the
//! owning section and binding.

use crate::error::Result;
use crate::model::Symbol;
use crate::model::SymbolBinding;
use itertools::Itertools;
use std::io::Write;

/// Writes one `<16-hex-digit offset> <class> <name>` line per symbol to
/// `out`. Undefined symbols sort last and print offset zero; everything else
/// sorts by (section, offset, name). Works on the symbols of an input object
/// just as well as on a linked image.
pub fn write_listing(symbols: &[Symbol], out: &mut dyn Write) -> Result {
    let sorted = symbols.iter().sorted_by_key(|sym| {
        (
            sym.binding == SymbolBinding::Undefined,
            sym.section.as_deref().unwrap_or(""),
            sym.offset,
            sym.name.as_str(),
        )
    });
    for sym in sorted {
        let offset = if sym.binding == SymbolBinding::Undefined { 0 } else { sym.offset };
        writeln!(out, "{offset:016x} {} {}", classification(sym), sym.name)?;
    }
    Ok(())
}

fn classification(sym: &Symbol) -> char {
    if sym.binding == SymbolBinding::Undefined {
        return 'U';
    }
    let section = sym.section.as_deref().unwrap_or("");
    let base = if section.starts_with(".text") {
        'T'
    } else if section.starts_with(".data") {
        'D'
    } else if section.starts_with(".bss") {
        'B'
    } else if section.starts_with(".rodata") {
        'R'
    } else {
        '?'
    };
    match sym.binding {
        SymbolBinding::Local => base.to_ascii_lowercase(),
        SymbolBinding::Weak => match base {
            'T' => 'W',
            'D' | 'B' | 'R' => 'V',
            _ => base,
        },
        SymbolBinding::Global | SymbolBinding::Undefined => base,
    }
}
