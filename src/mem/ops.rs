use std::fmt;
use std::str::FromStr;

use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

/// Expands the operation table into `OperationKind`, its `ALL` listing and
/// the display-name table. Variant order is the numbering; `Invalid` must
/// stay first so that it maps to zero.
macro_rules! memory_operations {
    ($($(#[$meta:meta])* $variant:ident => $name:literal),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[derive(FromPrimitive, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum OperationKind {
            $(
                $(#[$meta])*
                #[serde(rename = $name)]
                $variant,
            )+
        }

        impl OperationKind {
            /// Number of kinds, including `Invalid`.
            pub const COUNT: usize = [$($name),+].len();

            pub const ALL: [OperationKind; Self::COUNT] = [$(OperationKind::$variant),+];
        }

        /// Display names, indexed by `OperationKind as usize`.
        pub const OPERATION_NAMES: [&str; OperationKind::COUNT] = [$($name),+];
    };
}

memory_operations! {
    #[default]
    Invalid => "INVALID",
    Load => "LOAD",
    Store => "STORE",
    Fetch => "FETCH",
    Prefetch => "PREFETCH",
    Update => "UPDATE",
    Evict => "EVICT",
    Invalidate => "INVALIDATE",
    Flush => "FLUSH",
}

const _: () = {
    assert!(OPERATION_NAMES.len() == OperationKind::COUNT);
    assert!(OperationKind::Invalid as usize == 0);
    let mut i = 0;
    while i < OperationKind::COUNT {
        assert!(OperationKind::ALL[i] as usize == i);
        i += 1;
    }
};

/// Name of the operation numbered `index`. Panics when `index >= COUNT`.
pub fn operation_name(index: usize) -> &'static str {
    assert!(
        index < OperationKind::COUNT,
        "operation index {} out of range (count {})",
        index,
        OperationKind::COUNT
    );
    OPERATION_NAMES[index]
}

impl OperationKind {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        OPERATION_NAMES[self.index()]
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// True for every kind that may be carried by a dispatched request.
    pub fn is_valid(self) -> bool {
        self != Self::Invalid
    }

    /// Kinds a core can issue, i.e. everything except `Invalid`.
    pub fn dispatchable() -> impl Iterator<Item = OperationKind> {
        Self::ALL.into_iter().filter(|kind| kind.is_valid())
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        OPERATION_NAMES
            .iter()
            .position(|name| name.eq_ignore_ascii_case(value))
            .and_then(Self::from_index)
            .ok_or_else(|| {
                format!(
                    "unknown operation '{}', expected one of: {}",
                    value,
                    OPERATION_NAMES.join(", ")
                )
            })
    }
}
