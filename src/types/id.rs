//! Identifier types for compilation entities.
//!
//! Type-safe handles for the entities the engine tracks across a session:
//! registered types, function implementations, and compilation units. All of
//! them wrap dense `u32` indices into per-session arenas, so they are `Copy`,
//! order-stable, and cheap to embed in tables.

use core::fmt;
use serde::{Deserialize, Serialize};

/// An interned, compact handle for a registered type.
///
/// Allocated densely by the [`TypeRegistry`](crate::registry::TypeRegistry)
/// in registration order. The ordering is meaningful: it is the deterministic
/// tie-break wherever two types compare equal on every other axis.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    /// Reconstructs a type id from its raw index, e.g. when decoding a
    /// serialized table. Ids are only meaningful against the registry that
    /// allocated them.
    #[inline]
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying arena index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the raw `u32` value, for serialized table encodings.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// A stable identifier for a registered function implementation.
///
/// Allocated densely by the
/// [`SignatureAnalyzer`](crate::signature::SignatureAnalyzer) in registration
/// order and never reused within a session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId(pub(crate) u32);

impl FunctionId {
    /// Creates a function id from a raw arena index (internal use).
    #[inline]
    #[must_use]
    pub(crate) const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying arena index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionId({})", self.0)
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// An identifier for a compilation unit.
///
/// Units are external collaborators; the id is assigned by the driver and
/// used here as the vertex key of the dependency graph and the subject of
/// interface CIDs. Topological tie-breaks order on it, so drivers should
/// assign ids deterministically.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub u32);

impl UnitId {
    /// Creates a unit id from a raw index.
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitId({})", self.0)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U{}", self.0)
    }
}
