//! Core of a static linker for x86-64 relocatable objects that have already
//! been parsed into the in-memory model. Given a set of objects and archives
//! it selects the participating archive members, merges sections, resolves
//! symbols, lays out a page-aligned image starting at `BASE_ADDRESS` and
//! applies relocations. Container parsing, output serialization and the
//! command line belong to the embedding tool.

mod archive;
pub mod error;
mod layout;
mod merging;
pub mod model;
pub mod nm;
mod output_section_id;
mod output_section_map;
mod relocation;
mod resolution;

pub use crate::error::LinkError;
pub use crate::error::Result;
pub use crate::layout::BASE_ADDRESS;
pub use crate::layout::PAGE_SIZE;

use crate::merging::OutputContent;
use crate::model::LinkOptions;
use crate::model::Object;
use crate::model::OutputImage;
use crate::model::OutputKind;
use crate::model::Relocation;
use crate::model::Section;
use crate::output_section_map::OutputSectionMap;
use crate::resolution::SymbolResolution;
use std::collections::BTreeMap;

/// Links `objects` into a single output image. The inputs are only borrowed;
/// the returned image owns all of its buffers.
#[tracing::instrument(skip_all, name = "Link")]
pub fn link(objects: &[Object], options: &LinkOptions) -> Result<OutputImage> {
    let participants = archive::select_participants(objects)?;
    let mut merge = merging::merge_sections(&participants);
    let resolution = resolution::resolve_symbols(&participants, &merge)?;
    let layout = layout::compute(&merge, &resolution, options);
    let mut outputs = core::mem::take(&mut merge.outputs);
    relocation::apply_relocations(&mut outputs, &merge, &resolution, &layout, options.output_kind)?;
    Ok(build_image(outputs, &layout, resolution, options))
}

fn build_image(
    mut outputs: OutputSectionMap<Option<OutputContent>>,
    layout: &layout::Layout,
    resolution: SymbolResolution,
    options: &LinkOptions,
) -> OutputImage {
    let (section_headers, program_headers) = layout.build_headers();
    let mut sections = BTreeMap::new();
    for id in output_section_id::built_in_section_ids() {
        let Some(content) = outputs.get_mut(id).take() else {
            continue;
        };
        // Executable output has had its relocations applied, so they're
        // dropped; shared output keeps them for the dynamic loader.
        let relocations = match options.output_kind {
            OutputKind::Executable => Vec::new(),
            OutputKind::Shared => content
                .relocations
                .into_iter()
                .map(|rel| Relocation {
                    offset: rel.offset,
                    symbol: rel.symbol.to_owned(),
                    addend: rel.addend,
                    kind: rel.kind,
                })
                .collect(),
        };
        sections.insert(
            id.name().to_owned(),
            Section {
                name: id.name().to_owned(),
                data: content.data,
                relocations,
                has_symbols: false,
            },
        );
    }
    OutputImage {
        name: options.output_name.clone(),
        kind: options.output_kind,
        entry: layout.entry,
        sections,
        symbols: resolution.output_symbols,
        section_headers,
        program_headers,
    }
}
