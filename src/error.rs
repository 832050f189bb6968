use crate::model::RelocationKind;
use std::fmt::Display;

pub use anyhow::Error;

pub type Result<T = (), E = Error> = core::result::Result<T, E>;

/// The ways a link can fail. All of these abort the current link; values are
/// carried inside `anyhow::Error` so that callers can attach context and
/// still match on the kind via `downcast_ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The participating object set was empty after archive selection.
    NoInput,
    /// Two strong global definitions share a name.
    MultipleDefinition(String),
    /// Executable output referenced a symbol that nothing defines.
    UndefinedSymbol(String),
    /// A dot-prefixed reference that the originating object doesn't define.
    UndefinedLocalSymbol(String),
    /// A computed relocation value doesn't fit the relocation's width.
    RelocationOverflow { symbol: String, kind: RelocationKind },
    /// A relocation kind outside the supported set. The model's
    /// `RelocationKind` can't express such a kind, so this is raised by
    /// collaborators that normalize inputs, never by the core itself.
    UnsupportedRelocation(String),
    /// A patch site extends past the end of its output section.
    RelocationOutOfBounds { section: String, offset: u64 },
}

impl Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkError::NoInput => write!(f, "No input objects to link"),
            LinkError::MultipleDefinition(name) => {
                write!(f, "Multiple definition of strong symbol `{name}`")
            }
            LinkError::UndefinedSymbol(name) => write!(f, "Undefined symbol `{name}`"),
            LinkError::UndefinedLocalSymbol(name) => {
                write!(f, "Undefined local symbol `{name}`")
            }
            LinkError::RelocationOverflow { symbol, kind } => {
                write!(f, "{kind} relocation against `{symbol}` out of range")
            }
            LinkError::UnsupportedRelocation(kind) => {
                write!(f, "Unsupported relocation kind `{kind}`")
            }
            LinkError::RelocationOutOfBounds { section, offset } => {
                write!(
                    f,
                    "Relocation at offset 0x{offset:x} extends past the end of `{section}`"
                )
            }
        }
    }
}

impl std::error::Error for LinkError {}
