//! Error types for the dispatch engine.
//!
//! Per-call-site dispatch failures (ambiguity, no match) are *not* errors in
//! this module's sense: they are diagnostic records that accumulate in a
//! [`DiagnosticSink`](crate::diagnostics::DiagnosticSink) while analysis
//! continues. The types here cover infrastructure failures that abort the
//! current session: registry misuse, circular dependencies, cache corruption,
//! and I/O.

use crate::types::{SourceSpan, UnitId};
use std::path::PathBuf;
use thiserror::Error;

/// Errors from type registration and lookup.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A type with this name is already registered.
    #[error("type `{0}` is already registered")]
    DuplicateType(String),

    /// A named supertype has not been registered yet.
    ///
    /// Supertypes must be registered before their subtypes; this ordering is
    /// what makes supertype cycles impossible by construction.
    #[error("unknown supertype `{supertype}` while registering `{name}`")]
    UnknownSupertype {
        /// The type being registered.
        name: String,
        /// The missing supertype name.
        supertype: String,
    },

    /// Primitives are sealed leaves and cannot be subtyped.
    #[error("`{name}` cannot declare primitive `{supertype}` as a supertype")]
    PrimitiveSupertype {
        /// The type being registered.
        name: String,
        /// The primitive that was named as a supertype.
        supertype: String,
    },
}

/// Errors from implementation registration.
#[derive(Debug, Error)]
pub enum SignatureError {
    /// The same definition (identity and parameter types) registered twice.
    #[error("duplicate implementation of `{module}::{name}` at {span}")]
    DuplicateImplementation {
        /// Function name.
        name: String,
        /// Defining module.
        module: String,
        /// Span of the rejected (later) definition.
        span: SourceSpan,
    },

    /// No group exists for `(name, arity)`.
    #[error("no signature group for `{name}` with arity {arity}")]
    UnknownGroup {
        /// Function name.
        name: String,
        /// Call arity.
        arity: usize,
    },
}

/// Errors from the dependency graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The dependency graph contains at least one cycle.
    ///
    /// Carries the edges that remained unresolvable after Kahn's algorithm,
    /// which together cover every cycle.
    #[error("circular dependency across {} edge(s)", cycle_edges.len())]
    CircularDependency {
        /// `(dependent, dependency)` pairs on the cycle.
        cycle_edges: Vec<(UnitId, UnitId)>,
    },

    /// An edge referenced a unit that was never added.
    #[error("unit {0} is not part of the dependency graph")]
    UnknownUnit(UnitId),
}

/// Errors from the on-disk build cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Underlying filesystem failure.
    #[error("cache I/O failure at {path}: {source}")]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A cache record failed header or checksum validation.
    ///
    /// Corruption is recoverable: the caller falls back to a fresh build and
    /// the record is overwritten at session end.
    #[error("corrupt cache record at {path}: {reason}")]
    Corrupt {
        /// The record file.
        path: PathBuf,
        /// What failed to validate.
        reason: String,
    },

    /// A table failed to serialize or deserialize.
    #[error("cache serialization failure: {0}")]
    Codec(String),

    /// No session is active for a session-scoped operation.
    #[error("no active cache session")]
    NoSession,
}

/// Top-level engine error, with the CLI exit-code mapping from the driver
/// contract: `0` success, `2` dispatch error, `3` circular dependency,
/// `4` cache corruption, `5` I/O failure.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Type registry failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Implementation registration failure.
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// Dependency graph failure.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Build cache failure.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// One or more call sites failed dispatch analysis; the diagnostics are
    /// in the session's sink.
    #[error("{0} call site(s) failed dispatch analysis")]
    DispatchFailed(usize),
}

impl EngineError {
    /// Maps the error to the driver's process exit code.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::DispatchFailed(_) => 2,
            Self::Graph(GraphError::CircularDependency { .. }) => 3,
            Self::Cache(CacheError::Corrupt { .. }) => 4,
            Self::Cache(_) | Self::Registry(_) | Self::Signature(_) | Self::Graph(_) => 5,
        }
    }
}
