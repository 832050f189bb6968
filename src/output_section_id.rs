use crate::model::SectionFlags;

/// Identifies one of the output sections the linker produces. Input sections
/// are grouped into these by name prefix, with `.data` collecting anything
/// that no prefix claims.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct OutputSectionId(u8);

pub(crate) const TEXT: OutputSectionId = OutputSectionId(0);
pub(crate) const RODATA: OutputSectionId = OutputSectionId(1);
pub(crate) const DATA: OutputSectionId = OutputSectionId(2);
pub(crate) const BSS: OutputSectionId = OutputSectionId(3);

pub(crate) const NUM_OUTPUT_SECTIONS: usize = SECTION_DEFINITIONS.len();

pub(crate) struct BuiltInSectionDetails {
    pub(crate) name: &'static str,
    pub(crate) section_flags: SectionFlags,
    pub(crate) segment_flags: SectionFlags,
}

/// Layout order is the order of this array. When adding new sections here,
/// be sure to update `test_constant_ids`.
const SECTION_DEFINITIONS: [BuiltInSectionDetails; 4] = [
    BuiltInSectionDetails {
        name: ".text",
        section_flags: SectionFlags::ALLOC
            .union(SectionFlags::READ)
            .union(SectionFlags::EXEC),
        segment_flags: SectionFlags::READ.union(SectionFlags::EXEC),
    },
    BuiltInSectionDetails {
        name: ".rodata",
        section_flags: SectionFlags::ALLOC.union(SectionFlags::READ),
        segment_flags: SectionFlags::READ,
    },
    BuiltInSectionDetails {
        name: ".data",
        section_flags: SectionFlags::ALLOC
            .union(SectionFlags::READ)
            .union(SectionFlags::WRITE),
        segment_flags: SectionFlags::READ.union(SectionFlags::WRITE),
    },
    BuiltInSectionDetails {
        name: ".bss",
        section_flags: SectionFlags::ALLOC
            .union(SectionFlags::READ)
            .union(SectionFlags::WRITE)
            .union(SectionFlags::NOBITS),
        segment_flags: SectionFlags::READ.union(SectionFlags::WRITE),
    },
];

pub(crate) fn built_in_section_ids() -> impl ExactSizeIterator<Item = OutputSectionId> {
    (0..NUM_OUTPUT_SECTIONS).map(|n| OutputSectionId(n as u8))
}

/// Classifies an input-section name the way stage-two merging does: first
/// output section whose name is a prefix, `.data` for everything else.
pub(crate) fn for_input_name(name: &str) -> OutputSectionId {
    built_in_section_ids()
        .find(|id| name.starts_with(id.name()))
        .unwrap_or(DATA)
}

impl OutputSectionId {
    pub(crate) fn as_usize(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn name(self) -> &'static str {
        self.details().name
    }

    pub(crate) fn details(self) -> &'static BuiltInSectionDetails {
        &SECTION_DEFINITIONS[self.as_usize()]
    }

    pub(crate) fn has_data_in_file(self) -> bool {
        !self.details().section_flags.contains(SectionFlags::NOBITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_ids() {
        let check = &[(TEXT, ".text"), (RODATA, ".rodata"), (DATA, ".data"), (BSS, ".bss")];
        for (id, name) in check {
            assert_eq!(id.name(), *name);
        }
        assert_eq!(NUM_OUTPUT_SECTIONS, check.len());
    }

    #[test]
    fn test_input_name_classification() {
        assert_eq!(for_input_name(".text"), TEXT);
        assert_eq!(for_input_name(".text.startup"), TEXT);
        assert_eq!(for_input_name(".rodata.str1.1"), RODATA);
        assert_eq!(for_input_name(".data.rel.ro"), DATA);
        assert_eq!(for_input_name(".bss.page_tables"), BSS);
        // Anything unrecognized lands in `.data`.
        assert_eq!(for_input_name(".comment"), DATA);
        assert_eq!(for_input_name(".tex"), DATA);
    }

    /// `.text` must never be writable, `.rodata` never writable or
    /// executable, and only `.bss` may omit file bytes.
    #[test]
    fn test_permission_table() {
        for id in built_in_section_ids() {
            let flags = id.details().section_flags;
            assert!(flags.contains(SectionFlags::ALLOC | SectionFlags::READ));
        }
        assert!(!TEXT.details().section_flags.contains(SectionFlags::WRITE));
        assert!(!RODATA.details().section_flags.contains(SectionFlags::WRITE));
        assert!(!RODATA.details().section_flags.contains(SectionFlags::EXEC));
        assert!(BSS.details().section_flags.contains(SectionFlags::NOBITS));
        assert!(built_in_section_ids().filter(|id| !id.has_data_in_file()).eq([BSS]));
    }
}
