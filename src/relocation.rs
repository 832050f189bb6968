//! Applies relocations to the merged output sections. By this point every
//! relocation offset is relative to its output section, so the patch site
//! address is just base + section offset + relocation offset. Values are
//! stored little-endian and range-checked per relocation kind.

use crate::error::Error;
use crate::error::LinkError;
use crate::error::Result;
use crate::layout::Layout;
use crate::layout::BASE_ADDRESS;
use crate::merging::OutputContent;
use crate::merging::SectionMerge;
use crate::merging::TaggedRelocation;
use crate::model::OutputKind;
use crate::model::RelocationKind;
use crate::model::SymbolBinding;
use crate::output_section_id;
use crate::output_section_id::OutputSectionId;
use crate::output_section_map::OutputSectionMap;
use crate::resolution::SymbolResolution;

#[tracing::instrument(skip_all, name = "Apply relocations")]
pub(crate) fn apply_relocations(
    outputs: &mut OutputSectionMap<Option<OutputContent>>,
    merge: &SectionMerge,
    resolution: &SymbolResolution,
    layout: &Layout,
    output_kind: OutputKind,
) -> Result {
    for id in output_section_id::built_in_section_ids() {
        // `.bss` has no file bytes, so its relocations are skipped.
        if !id.has_data_in_file() {
            continue;
        }
        let Some(content) = outputs.get_mut(id).as_mut() else {
            continue;
        };
        let section_offset = layout.vaddr_offset(id).unwrap();
        let OutputContent { data, relocations } = content;
        for rel in relocations.iter() {
            let place = BASE_ADDRESS + section_offset + rel.offset;
            let Some(target) = resolve_target(rel, merge, resolution, layout, output_kind)? else {
                tracing::debug!(symbol = rel.symbol, "Left relocation for the dynamic loader");
                continue;
            };
            patch(data, id, rel, target, place)?;
        }
    }
    Ok(())
}

/// Computes the virtual address of the relocation's target symbol. `None`
/// means the relocation stays unapplied for the dynamic loader.
fn resolve_target(
    rel: &TaggedRelocation,
    merge: &SectionMerge,
    resolution: &SymbolResolution,
    layout: &Layout,
    output_kind: OutputKind,
) -> Result<Option<u64>> {
    if rel.symbol.starts_with('.') {
        // A local label. Only the object the relocation came from can
        // define it, which is why merging tagged each relocation with its
        // origin.
        return match local_target(rel, merge, resolution, layout) {
            Some(address) => Ok(Some(address)),
            None => Err(LinkError::UndefinedLocalSymbol(rel.symbol.to_owned()).into()),
        };
    }
    if let Some(symbol) = resolution.globals.get(rel.symbol) {
        if symbol.binding != SymbolBinding::Undefined {
            return Ok(Some(layout.global_address(symbol)));
        }
    }
    // Local-bound symbols stay out of the global table even when their
    // names aren't dot-prefixed, but the defining object can still
    // relocate against them by name.
    if let Some(address) = local_target(rel, merge, resolution, layout) {
        return Ok(Some(address));
    }
    match output_kind {
        OutputKind::Shared => Ok(None),
        OutputKind::Executable => Err(LinkError::UndefinedSymbol(rel.symbol.to_owned()).into()),
    }
}

/// Address of `rel`'s target within the origin object's local symbols, if
/// that object defines it in a section the output has a home for.
fn local_target(
    rel: &TaggedRelocation,
    merge: &SectionMerge,
    resolution: &SymbolResolution,
    layout: &Layout,
) -> Option<u64> {
    let local = resolution.locals[rel.origin].get(rel.symbol)?;
    let section = local.section?;
    let id = merge.output_assignment.get(section)?;
    let section_offset = layout.vaddr_offset(*id).unwrap_or(0) + merge.offset_in_output[section];
    Some(BASE_ADDRESS + section_offset + local.offset)
}

fn patch(
    data: &mut [u8],
    section: OutputSectionId,
    rel: &TaggedRelocation,
    target: u64,
    place: u64,
) -> Result {
    let width = rel.kind.width();
    if rel.offset + width as u64 > data.len() as u64 {
        return Err(LinkError::RelocationOutOfBounds {
            section: section.name().to_owned(),
            offset: rel.offset,
        }
        .into());
    }
    let site = rel.offset as usize;
    match rel.kind {
        RelocationKind::Abs32 => {
            let value = target.wrapping_add(rel.addend as u64);
            if value > u64::from(u32::MAX) {
                return Err(overflow(rel));
            }
            data[site..site + 4].copy_from_slice(&(value as u32).to_le_bytes());
        }
        RelocationKind::Abs32Signed => {
            let value = (target as i64).wrapping_add(rel.addend);
            let value = i32::try_from(value).map_err(|_| overflow(rel))?;
            data[site..site + 4].copy_from_slice(&value.to_le_bytes());
        }
        RelocationKind::PcRel32 => {
            let value = (target as i64).wrapping_add(rel.addend).wrapping_sub(place as i64);
            let value = i32::try_from(value).map_err(|_| overflow(rel))?;
            data[site..site + 4].copy_from_slice(&value.to_le_bytes());
        }
        RelocationKind::Abs64 => {
            let value = target.wrapping_add(rel.addend as u64);
            data[site..site + 8].copy_from_slice(&value.to_le_bytes());
        }
    }
    Ok(())
}

fn overflow(rel: &TaggedRelocation) -> Error {
    LinkError::RelocationOverflow { symbol: rel.symbol.to_owned(), kind: rel.kind }.into()
}
