//! Resolves symbol references between the participating objects. Globals go
//! through a single table that enforces strong/weak/undefined precedence.
//! Dot-prefixed and local-bound symbols go into per-object tables, since
//! their names are expected to collide across objects. Symbol offsets are
//! rewritten twice, mirroring the two merging stages: first to be relative
//! to the stage-one buffer, then to the output section.

use crate::error::LinkError;
use crate::error::Result;
use crate::merging::SectionMerge;
use crate::model::Object;
use crate::model::Symbol;
use crate::model::SymbolBinding;
use crate::output_section_id;
use crate::output_section_id::OutputSectionId;
use ahash::AHashMap;
use anyhow::Context;
use indexmap::map::Entry;
use indexmap::IndexMap;

/// Where a resolved symbol lives. `Input` places exist only between the two
/// rewriting phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SymbolPlace<'data> {
    /// No owning section: undefined symbols and absolute values.
    None,
    /// An input section; offset is relative to its stage-one buffer.
    Input(&'data str),
    /// An output section; offset is relative to its start.
    Output(OutputSectionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GlobalSymbol<'data> {
    pub(crate) binding: SymbolBinding,
    pub(crate) place: SymbolPlace<'data>,
    pub(crate) offset: u64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LocalSymbol<'data> {
    /// Input-section name; local addresses are computed through the merge
    /// maps rather than being rewritten to output sections.
    pub(crate) section: Option<&'data str>,
    /// Offset relative to the stage-one buffer of `section`.
    pub(crate) offset: u64,
}

#[derive(Debug)]
pub(crate) struct SymbolResolution<'data> {
    /// All global, weak and undefined symbols by name. Insertion-ordered so
    /// that the output symbol list is deterministic.
    pub(crate) globals: IndexMap<&'data str, GlobalSymbol<'data>>,
    /// Per participant: dot-prefixed and local-bound symbols by name. Later
    /// definitions shadow earlier ones within one object only.
    pub(crate) locals: Vec<AHashMap<&'data str, LocalSymbol<'data>>>,
    /// Symbols destined for the output image: local copies in input order,
    /// then defined globals in resolution order.
    pub(crate) output_symbols: Vec<Symbol>,
}

#[tracing::instrument(skip_all, name = "Resolve symbols")]
pub(crate) fn resolve_symbols<'data>(
    participants: &[&'data Object],
    merge: &SectionMerge<'data>,
) -> Result<SymbolResolution<'data>> {
    let mut globals: IndexMap<&str, GlobalSymbol> = IndexMap::new();
    let mut locals = Vec::with_capacity(participants.len());
    let mut output_symbols = Vec::new();

    for (index, obj) in participants.iter().enumerate() {
        let mut object_locals = AHashMap::new();
        for sym in &obj.symbols {
            resolve_symbol(sym, index, merge, &mut globals, &mut object_locals, &mut output_symbols)
                .with_context(|| format!("Failed to resolve symbols in `{}`", obj.name))?;
        }
        locals.push(object_locals);
    }

    assign_output_sections(&mut globals, &mut output_symbols, merge);

    Ok(SymbolResolution { globals, locals, output_symbols })
}

fn resolve_symbol<'data>(
    sym: &'data Symbol,
    index: usize,
    merge: &SectionMerge<'data>,
    globals: &mut IndexMap<&'data str, GlobalSymbol<'data>>,
    object_locals: &mut AHashMap<&'data str, LocalSymbol<'data>>,
    output_symbols: &mut Vec<Symbol>,
) -> Result {
    let section = sym.section.as_deref();
    // First rewrite: express the offset relative to the stage-one buffer.
    let offset = match section {
        Some(sec) => sym.offset + merge.object_offsets[index].get(sec).copied().unwrap_or(0),
        None => sym.offset,
    };

    if sym.name.starts_with('.') || sym.binding == SymbolBinding::Local {
        object_locals.insert(&sym.name, LocalSymbol { section, offset });
        output_symbols.push(Symbol {
            name: sym.name.clone(),
            binding: SymbolBinding::Local,
            section: sym.section.clone(),
            offset,
        });
        return Ok(());
    }

    let place = match section {
        Some(sec) => SymbolPlace::Input(sec),
        None => SymbolPlace::None,
    };
    let candidate = GlobalSymbol { binding: sym.binding, place, offset };
    match globals.entry(&sym.name) {
        Entry::Vacant(entry) => {
            entry.insert(candidate);
        }
        Entry::Occupied(mut entry) => {
            use SymbolBinding::{Global, Undefined, Weak};
            let existing = entry.get_mut();
            match (existing.binding, candidate.binding) {
                (Global, Global) => {
                    return Err(LinkError::MultipleDefinition(sym.name.clone()).into());
                }
                (Weak, Global) | (Undefined, Global) | (Undefined, Weak) => *existing = candidate,
                // Everything else keeps the existing resolution.
                _ => {}
            }
        }
    }
    Ok(())
}

/// Second rewrite, once stage-two merging has fixed each input section's
/// place within its output section. Defined globals then join the output
/// symbol list.
fn assign_output_sections<'data>(
    globals: &mut IndexMap<&'data str, GlobalSymbol<'data>>,
    output_symbols: &mut Vec<Symbol>,
    merge: &SectionMerge<'data>,
) {
    for global in globals.values_mut() {
        if let SymbolPlace::Input(section) = global.place {
            match merge.output_assignment.get(section) {
                Some(&id) => {
                    global.offset += merge.offset_in_output[section];
                    global.place = SymbolPlace::Output(id);
                }
                // The section never reached the merger (the input violated
                // the section-map invariant); classify it by prefix the way
                // stage two would have.
                None => global.place = SymbolPlace::Output(output_section_id::for_input_name(section)),
            }
        }
    }

    for symbol in output_symbols.iter_mut() {
        let Some(section) = symbol.section.as_deref() else {
            continue;
        };
        if let Some(&id) = merge.output_assignment.get(section) {
            symbol.offset += merge.offset_in_output[section];
            symbol.section = Some(id.name().to_owned());
        }
    }

    for (name, global) in globals.iter() {
        if global.binding == SymbolBinding::Undefined {
            continue;
        }
        output_symbols.push(Symbol {
            name: (*name).to_owned(),
            binding: global.binding,
            section: match global.place {
                SymbolPlace::Output(id) => Some(id.name().to_owned()),
                SymbolPlace::Input(_) | SymbolPlace::None => None,
            },
            offset: global.offset,
        });
    }
}
