//! Dense identifiers shared by every stage of the compiler.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            pub const fn index(self) -> usize {
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

define_id!(
    /// Identifier of an expression node. Unique across a whole program.
    ExprId,
    "e"
);
define_id!(
    /// Identifier of a resolved symbol (function, parameter, or local binding).
    SymbolId,
    "s"
);
define_id!(
    /// Index into the program's type table.
    TypeId,
    "t"
);
define_id!(
    /// Identifier of an effect declaration.
    EffectId,
    "eff"
);
define_id!(
    /// Identifier of an operation within its effect.
    OpId,
    "op"
);
define_id!(
    /// Loop label used by `break`/`continue`.
    LabelId,
    "l"
);
