//! Merges input sections in two stages. Stage one concatenates sections
//! with the same name across all participating objects, in input order.
//! Stage two groups the stage-one buffers into the standard output sections
//! by name prefix. Relocation offsets are rewritten at each stage so that
//! they end up relative to the output section that holds their patch site.

use crate::model::Object;
use crate::model::RelocationKind;
use crate::output_section_id;
use crate::output_section_id::OutputSectionId;
use crate::output_section_map::OutputSectionMap;
use ahash::AHashMap;
use std::collections::BTreeMap;

/// A relocation with its offset rewritten by merging. `origin` remembers
/// which participant supplied it so that dot-prefixed targets can later be
/// looked up in the right object's local symbols without searching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TaggedRelocation<'data> {
    pub(crate) offset: u64,
    pub(crate) symbol: &'data str,
    pub(crate) addend: i64,
    pub(crate) kind: RelocationKind,
    /// Index into the participant list of the object this came from.
    pub(crate) origin: usize,
}

/// A stage-one buffer: every input section of one name, concatenated.
#[derive(Debug, Default, PartialEq, Eq)]
struct MergedSection<'data> {
    data: Vec<u8>,
    relocations: Vec<TaggedRelocation<'data>>,
}

/// The contents of one output section.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct OutputContent<'data> {
    /// Empty for `.bss`, whose inputs contribute size but no bytes.
    pub(crate) data: Vec<u8>,
    pub(crate) relocations: Vec<TaggedRelocation<'data>>,
}

#[derive(Debug)]
pub(crate) struct SectionMerge<'data> {
    /// Per participant: input-section name -> offset of that object's bytes
    /// within the stage-one buffer of the same name.
    pub(crate) object_offsets: Vec<AHashMap<&'data str, u64>>,
    /// Input-section name -> the output section it was assigned to.
    pub(crate) output_assignment: AHashMap<&'data str, OutputSectionId>,
    /// Input-section name -> offset of its stage-one buffer within the
    /// output section.
    pub(crate) offset_in_output: AHashMap<&'data str, u64>,
    /// Materialized output sections. `None` means absent from the output.
    pub(crate) outputs: OutputSectionMap<Option<OutputContent<'data>>>,
    /// Memory size of `.bss`: the summed lengths of all `.bss*` inputs.
    pub(crate) bss_size: u64,
}

#[tracing::instrument(skip_all, name = "Merge sections")]
pub(crate) fn merge_sections<'data>(participants: &[&'data Object]) -> SectionMerge<'data> {
    let (merged, object_offsets) = merge_inputs(participants);

    let mut output_assignment = AHashMap::new();
    let mut offset_in_output = AHashMap::new();
    let mut outputs: OutputSectionMap<Option<OutputContent>> = OutputSectionMap::default();

    for id in output_section_id::built_in_section_ids() {
        let mut content = OutputContent::default();
        let mut cursor = 0;
        let mut matched_any = false;
        for (name, buffer) in &merged {
            if !name.starts_with(id.name()) {
                continue;
            }
            matched_any = true;
            output_assignment.insert(*name, id);
            offset_in_output.insert(*name, cursor);
            if id.has_data_in_file() {
                content.data.extend_from_slice(&buffer.data);
            }
            content.relocations.extend(
                buffer
                    .relocations
                    .iter()
                    .map(|rel| TaggedRelocation { offset: rel.offset + cursor, ..*rel }),
            );
            cursor += buffer.data.len() as u64;
        }
        // `.bss` is always materialized so that zero-size bss layouts still
        // have a home in the output.
        if matched_any || id == output_section_id::BSS {
            *outputs.get_mut(id) = Some(content);
        }
    }

    // Input sections that no prefix claimed go at the end of `.data`.
    for (name, buffer) in &merged {
        if output_assignment.contains_key(name) {
            continue;
        }
        let content = outputs
            .get_mut(output_section_id::DATA)
            .get_or_insert_with(OutputContent::default);
        let cursor = content.data.len() as u64;
        output_assignment.insert(*name, output_section_id::DATA);
        offset_in_output.insert(*name, cursor);
        content.data.extend_from_slice(&buffer.data);
        content.relocations.extend(
            buffer
                .relocations
                .iter()
                .map(|rel| TaggedRelocation { offset: rel.offset + cursor, ..*rel }),
        );
    }

    let bss_size = merged
        .iter()
        .filter(|(name, _)| name.starts_with(".bss"))
        .map(|(_, buffer)| buffer.data.len() as u64)
        .sum();

    SectionMerge {
        object_offsets,
        output_assignment,
        offset_in_output,
        outputs,
        bss_size,
    }
}

/// Stage one. Returns the per-name buffers and, for each participant, where
/// its contribution to each buffer starts.
fn merge_inputs<'data>(
    participants: &[&'data Object],
) -> (BTreeMap<&'data str, MergedSection<'data>>, Vec<AHashMap<&'data str, u64>>) {
    let mut merged: BTreeMap<&str, MergedSection> = BTreeMap::new();
    let mut object_offsets = Vec::with_capacity(participants.len());
    for (origin, obj) in participants.iter().enumerate() {
        let mut offsets = AHashMap::new();
        for (name, section) in &obj.sections {
            let buffer = merged.entry(name.as_str()).or_default();
            let start = buffer.data.len() as u64;
            offsets.insert(name.as_str(), start);
            buffer.data.extend_from_slice(&section.data);
            buffer.relocations.extend(section.relocations.iter().map(|rel| TaggedRelocation {
                offset: rel.offset + start,
                symbol: &rel.symbol,
                addend: rel.addend,
                kind: rel.kind,
                origin,
            }));
        }
        object_offsets.push(offsets);
    }
    (merged, object_offsets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectKind;
    use crate::model::Relocation;
    use crate::model::Section;

    fn object(name: &str, sections: Vec<Section>) -> Object {
        let mut obj = Object::new(name, ObjectKind::Relocatable);
        for section in sections {
            obj.sections.insert(section.name.clone(), section);
        }
        obj
    }

    fn section(name: &str, data: &[u8]) -> Section {
        Section {
            name: name.to_owned(),
            data: data.to_vec(),
            relocations: Vec::new(),
            has_symbols: false,
        }
    }

    fn section_with_reloc(name: &str, data: &[u8], offset: u64, symbol: &str) -> Section {
        let mut sec = section(name, data);
        sec.relocations.push(Relocation {
            offset,
            symbol: symbol.to_owned(),
            addend: 0,
            kind: RelocationKind::Abs64,
        });
        sec
    }

    #[test]
    fn stage_one_concatenates_in_input_order() {
        let a = object("a.o", vec![section(".text", &[1, 2, 3])]);
        let b = object("b.o", vec![section(".text", &[4, 5])]);
        let participants = vec![&a, &b];
        let (merged, object_offsets) = merge_inputs(&participants);
        assert_eq!(merged[".text"].data, [1, 2, 3, 4, 5]);
        assert_eq!(object_offsets[0][".text"], 0);
        assert_eq!(object_offsets[1][".text"], 3);
    }

    #[test]
    fn stage_one_shifts_relocations_and_tags_origins() {
        let a = object("a.o", vec![section_with_reloc(".text", &[0; 8], 2, "foo")]);
        let b = object("b.o", vec![section_with_reloc(".text", &[0; 8], 4, "bar")]);
        let participants = vec![&a, &b];
        let (merged, _) = merge_inputs(&participants);
        let relocs = &merged[".text"].relocations;
        assert_eq!(relocs.len(), 2);
        assert_eq!((relocs[0].offset, relocs[0].origin), (2, 0));
        assert_eq!((relocs[1].offset, relocs[1].origin), (12, 1));
    }

    #[test]
    fn stage_two_groups_by_prefix_in_name_order() {
        let a = object(
            "a.o",
            vec![
                section(".text.cold", &[7, 8]),
                section(".text", &[1, 2, 3]),
                section(".rodata", &[9]),
            ],
        );
        let participants = vec![&a];
        let merge = merge_sections(&participants);
        // ".text" sorts before ".text.cold".
        let text = merge.outputs.get(output_section_id::TEXT).as_ref().unwrap();
        assert_eq!(text.data, [1, 2, 3, 7, 8]);
        assert_eq!(merge.offset_in_output[".text"], 0);
        assert_eq!(merge.offset_in_output[".text.cold"], 3);
        assert_eq!(merge.output_assignment[".rodata"], output_section_id::RODATA);
    }

    #[test]
    fn stage_two_shifts_relocations_by_section_offset() {
        let a = object("a.o", vec![section(".text", &[0; 10])]);
        let b = object("b.o", vec![section_with_reloc(".text.hot", &[0; 8], 1, "foo")]);
        let participants = vec![&a, &b];
        let merge = merge_sections(&participants);
        let text = merge.outputs.get(output_section_id::TEXT).as_ref().unwrap();
        // `.text.hot` starts after the 10 bytes of `.text`.
        assert_eq!(text.relocations[0].offset, 11);
        assert_eq!(text.relocations[0].origin, 1);
    }

    #[test]
    fn unmatched_sections_go_to_end_of_data() {
        let a = object(
            "a.o",
            vec![section(".data", &[1, 2]), section(".mystuff", &[3, 4, 5])],
        );
        let participants = vec![&a];
        let merge = merge_sections(&participants);
        let data = merge.outputs.get(output_section_id::DATA).as_ref().unwrap();
        assert_eq!(data.data, [1, 2, 3, 4, 5]);
        assert_eq!(merge.output_assignment[".mystuff"], output_section_id::DATA);
        assert_eq!(merge.offset_in_output[".mystuff"], 2);
    }

    #[test]
    fn bss_accumulates_size_but_no_bytes() {
        let a = object("a.o", vec![section(".bss", &[0; 16])]);
        let b = object("b.o", vec![section(".bss.extra", &[0; 8])]);
        let participants = vec![&a, &b];
        let merge = merge_sections(&participants);
        let bss = merge.outputs.get(output_section_id::BSS).as_ref().unwrap();
        assert!(bss.data.is_empty());
        assert_eq!(merge.bss_size, 24);
        assert_eq!(merge.offset_in_output[".bss"], 0);
        assert_eq!(merge.offset_in_output[".bss.extra"], 16);
    }

    #[test]
    fn bss_is_always_materialized() {
        let a = object("a.o", vec![section(".text", &[1])]);
        let participants = vec![&a];
        let merge = merge_sections(&participants);
        assert!(merge.outputs.get(output_section_id::BSS).is_some());
        assert!(merge.outputs.get(output_section_id::RODATA).is_none());
        assert_eq!(merge.bss_size, 0);
    }
}
