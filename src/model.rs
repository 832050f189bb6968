//! The in-memory representation shared between the linker core and the
//! collaborators that sit either side of it. The external parser builds
//! `Object`s, the core traverses them read-only, and the serializer consumes
//! the resulting `OutputImage`. Nothing in here knows about the on-disk
//! container format.

use bitflags::bitflags;
use std::collections::BTreeMap;
use std::fmt::Display;

/// One input to the linker: a translation unit, an archive of them, or an
/// already-linked image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    pub name: String,
    pub kind: ObjectKind,
    /// Keyed by input-section name. The ordering of a `BTreeMap` is load
    /// bearing: sections merge in ascending name order within each object.
    pub sections: BTreeMap<String, Section>,
    pub symbols: Vec<Symbol>,
    /// Member objects. Only populated when `kind` is `Archive`.
    pub members: Vec<Object>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Relocatable,
    Archive,
    Executable,
    Shared,
}

impl Object {
    pub fn new(name: impl Into<String>, kind: ObjectKind) -> Object {
        Object {
            name: name.into(),
            kind,
            sections: BTreeMap::new(),
            symbols: Vec::new(),
            members: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    /// Raw section contents. For nobits sections the bytes are zero-filled
    /// and only their length is meaningful; they never reach the output
    /// file.
    pub data: Vec<u8>,
    pub relocations: Vec<Relocation>,
    /// Whether any symbol definitions point into this section.
    pub has_symbols: bool,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Section {
        Section {
            name: name.into(),
            data: Vec::new(),
            relocations: Vec::new(),
            has_symbols: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub binding: SymbolBinding,
    /// Name of the owning section. `None` for undefined symbols and for
    /// symbols with absolute values.
    pub section: Option<String>,
    /// Bytes from the start of the owning section.
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolBinding {
    /// A strong definition. At most one per name.
    Global,
    /// Yields to any strong definition and coexists with other weak ones.
    Weak,
    /// Scoped to the defining object; never participates in global
    /// resolution.
    Local,
    /// A reference with no definition in the owning object.
    Undefined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    /// Byte offset of the patch site within the containing section.
    pub offset: u64,
    /// Name of the referenced symbol.
    pub symbol: String,
    pub addend: i64,
    pub kind: RelocationKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocationKind {
    /// Absolute 32-bit, zero-extended (R_X86_64_32).
    Abs32,
    /// Absolute 32-bit, sign-extended (R_X86_64_32S).
    Abs32Signed,
    /// 32-bit PC-relative (R_X86_64_PC32).
    PcRel32,
    /// Absolute 64-bit (R_X86_64_64).
    Abs64,
}

impl RelocationKind {
    /// Number of bytes written at the patch site.
    pub fn width(self) -> usize {
        match self {
            RelocationKind::Abs32 | RelocationKind::Abs32Signed | RelocationKind::PcRel32 => 4,
            RelocationKind::Abs64 => 8,
        }
    }
}

impl Display for RelocationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RelocationKind::Abs32 => "abs32",
            RelocationKind::Abs32Signed => "abs32_signed",
            RelocationKind::PcRel32 => "pcrel32",
            RelocationKind::Abs64 => "abs64",
        };
        Display::fmt(name, f)
    }
}

bitflags! {
    /// Permissions carried by section and program headers. How these are
    /// encoded on disk is the serializer's business.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SectionFlags: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
        const ALLOC = 1 << 3;
        /// The section occupies no bytes in the output file.
        const NOBITS = 1 << 4;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: String,
    pub vaddr: u64,
    pub file_offset: u64,
    pub size: u64,
    pub flags: SectionFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramHeader {
    pub name: String,
    pub vaddr: u64,
    pub file_offset: u64,
    pub size: u64,
    pub flags: SectionFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Executable,
    Shared,
}

/// The result of a link. Owns all of its buffers; the input objects can be
/// dropped once this exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputImage {
    pub name: String,
    pub kind: OutputKind,
    /// Virtual address execution starts at.
    pub entry: u64,
    /// Keyed by output-section name.
    pub sections: BTreeMap<String, Section>,
    pub symbols: Vec<Symbol>,
    pub section_headers: Vec<SectionHeader>,
    pub program_headers: Vec<ProgramHeader>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    pub output_kind: OutputKind,
    /// Symbol the entry point resolves through when it's defined.
    pub entry_symbol: String,
    pub output_name: String,
}

impl Default for LinkOptions {
    fn default() -> LinkOptions {
        LinkOptions {
            output_kind: OutputKind::Executable,
            entry_symbol: "_start".to_owned(),
            output_name: "a.out".to_owned(),
        }
    }
}
