//! Entity identifiers
//!
//! Entities live in arenas owned by [`Program`](super::Program); ids are indices into
//! those arenas. Two ids are equal exactly when they name the same entity.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            /// Arena index
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

entity_id!(
    /// Class identifier
    ClassId,
    "class#"
);
entity_id!(
    /// Function identifier
    FunctionId,
    "fn#"
);
entity_id!(
    /// Field identifier
    FieldId,
    "field#"
);
entity_id!(
    /// Library identifier
    LibraryId,
    "lib#"
);
entity_id!(
    /// Type parameter identifier
    TypeParamId,
    "tp#"
);
entity_id!(
    /// Script identifier
    ScriptId,
    "script#"
);

/// Position of a token in its script (byte offset into the source)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenPos(pub u32);

impl TokenPos {
    /// Raw offset
    #[inline]
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TokenPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}
