//! Decides where each output section lands in the address space and in the
//! output file, and through that, the image's entry point. Sections are laid
//! out in a fixed order, each starting on a page boundary. File offsets are
//! packed with no alignment; `.bss` occupies address space but no file
//! bytes.

use crate::merging::SectionMerge;
use crate::model::LinkOptions;
use crate::model::ProgramHeader;
use crate::model::SectionHeader;
use crate::model::SymbolBinding;
use crate::output_section_id;
use crate::output_section_id::OutputSectionId;
use crate::output_section_map::OutputSectionMap;
use crate::resolution::GlobalSymbol;
use crate::resolution::SymbolPlace;
use crate::resolution::SymbolResolution;

/// Virtual address at which the image's first output section is placed.
pub const BASE_ADDRESS: u64 = 0x400000;

pub const PAGE_SIZE: u64 = 4096;

pub(crate) struct Layout {
    /// Present output sections in layout order.
    pub(crate) order: Vec<OutputSectionId>,
    /// Virtual-address offset of each present section from the base.
    vaddr_offsets: OutputSectionMap<Option<u64>>,
    file_offsets: OutputSectionMap<u64>,
    mem_sizes: OutputSectionMap<u64>,
    pub(crate) entry: u64,
}

#[tracing::instrument(skip_all, name = "Compute layout")]
pub(crate) fn compute(
    merge: &SectionMerge,
    resolution: &SymbolResolution,
    options: &LinkOptions,
) -> Layout {
    let mut order = Vec::new();
    let mut vaddr_offsets: OutputSectionMap<Option<u64>> = OutputSectionMap::default();
    let mut file_offsets: OutputSectionMap<u64> = OutputSectionMap::default();
    let mut mem_sizes: OutputSectionMap<u64> = OutputSectionMap::default();
    let mut vaddr_cursor = 0_u64;
    let mut file_cursor = 0_u64;

    for id in output_section_id::built_in_section_ids() {
        let Some(content) = merge.outputs.get(id) else {
            continue;
        };
        order.push(id);
        vaddr_cursor = vaddr_cursor.next_multiple_of(PAGE_SIZE);
        *vaddr_offsets.get_mut(id) = Some(vaddr_cursor);
        let mem_size = if id == output_section_id::BSS {
            merge.bss_size
        } else {
            content.data.len() as u64
        };
        if id.has_data_in_file() {
            *file_offsets.get_mut(id) = file_cursor;
            file_cursor += content.data.len() as u64;
        }
        *mem_sizes.get_mut(id) = mem_size;
        vaddr_cursor += mem_size;
    }

    let mut layout = Layout { order, vaddr_offsets, file_offsets, mem_sizes, entry: 0 };
    layout.entry = compute_entry(&layout, resolution, options);
    tracing::debug!(entry = layout.entry, "Layout complete");
    layout
}

/// The entry is the configured entry symbol when that resolves to a defined
/// global, otherwise the start of `.text`, otherwise the base address.
fn compute_entry(layout: &Layout, resolution: &SymbolResolution, options: &LinkOptions) -> u64 {
    if let Some(symbol) = resolution.globals.get(options.entry_symbol.as_str()) {
        if symbol.binding != SymbolBinding::Undefined {
            return layout.global_address(symbol);
        }
    }
    match layout.vaddr_offset(output_section_id::TEXT) {
        Some(offset) => BASE_ADDRESS + offset,
        None => BASE_ADDRESS,
    }
}

impl Layout {
    pub(crate) fn vaddr_offset(&self, id: OutputSectionId) -> Option<u64> {
        *self.vaddr_offsets.get(id)
    }

    /// Virtual address of a resolved global. Symbols whose section didn't
    /// make it into the output (and section-less symbols) resolve relative
    /// to the base address.
    pub(crate) fn global_address(&self, symbol: &GlobalSymbol) -> u64 {
        let section_offset = match symbol.place {
            SymbolPlace::Output(id) => self.vaddr_offset(id).unwrap_or(0),
            SymbolPlace::Input(_) | SymbolPlace::None => 0,
        };
        BASE_ADDRESS + section_offset + symbol.offset
    }

    pub(crate) fn build_headers(&self) -> (Vec<SectionHeader>, Vec<ProgramHeader>) {
        let mut section_headers = Vec::with_capacity(self.order.len());
        let mut program_headers = Vec::with_capacity(self.order.len());
        for &id in &self.order {
            let details = id.details();
            let vaddr = BASE_ADDRESS + self.vaddr_offset(id).unwrap();
            let file_offset = *self.file_offsets.get(id);
            let size = *self.mem_sizes.get(id);
            section_headers.push(SectionHeader {
                name: details.name.to_owned(),
                vaddr,
                file_offset,
                size,
                flags: details.section_flags,
            });
            program_headers.push(ProgramHeader {
                name: details.name.to_owned(),
                vaddr,
                file_offset,
                size,
                flags: details.segment_flags,
            });
        }
        (section_headers, program_headers)
    }
}
