//! Polydispatch: multiple-dispatch resolution and compressed dispatch tables
//! for multimethod compilation.
//!
//! # Overview
//!
//! Polydispatch is the dispatch core of a static compiler for a language with
//! multimethod semantics: functions overload on the runtime types of *every*
//! argument and resolve by type specificity. Given a family of definitions
//! sharing a name, the engine decides at compile time which implementation a
//! call resolves to, emits a compact runtime dispatch structure where
//! resolution cannot be fully static, and feeds an incremental-build cache
//! keyed on each compilation unit's interface CID.
//!
//! # Core Guarantees
//!
//! - **Determinism**: identical inputs produce bit-identical analysis
//!   results, table bytes, and interface CIDs, across runs and hosts
//! - **No silent preference**: specificity ties are ambiguous by default;
//!   the configured tie-break, when one fires, is recorded on the resolution
//! - **Per-site failure isolation**: ambiguity and no-match failures are
//!   diagnostics, never aborts; analysis of other call sites continues
//! - **Table equivalence**: for any call the specificity analyzer resolves
//!   uniquely, the compressed table's lookup returns that implementation
//! - **Interface-addressed caching**: CIDs depend only on a unit's public
//!   interface; bodies, private declarations, and comments cannot move them
//!
//! # Module Structure
//!
//! - [`types`]: identifier handles and source spans
//! - [`registry`]: type registry and subtype lattice
//! - [`signature`]: implementation grouping by `(name, arity)`
//! - [`specificity`]: candidate ordering and resolution
//! - [`classify`]: static-vs-dynamic call classification
//! - [`table`]: dispatch-table generation, compression, and runtime lookup
//! - [`diagnostics`]: structured dispatch diagnostics
//! - [`interface`]: interface extraction and CIDs
//! - [`depgraph`]: typed dependency graph over compilation units
//! - [`cache`]: incremental-build cache manager
//! - [`profiler`]: dispatch counters, breakpoints, and frame history
//! - [`session`]: the per-compilation session owner
//! - [`config`]: engine configuration
//! - [`error`](mod@error): error taxonomy and exit codes
//! - [`util`]: deterministic hashing utilities

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_precision_loss)]

pub mod cache;
pub mod classify;
pub mod config;
pub mod depgraph;
pub mod diagnostics;
pub mod error;
pub mod interface;
pub mod profiler;
pub mod registry;
pub mod session;
pub mod signature;
pub mod specificity;
pub mod table;
pub mod types;
pub mod util;

pub use cache::{BuildCacheManager, BuildMetrics, CacheConfig};
pub use classify::{
    CacheEfficiency, CallSite, Classifier, ClassifierConfig, DispatchDecision, DispatchStrategy,
    StaticTier,
};
pub use config::EngineConfig;
pub use depgraph::{
    DependencyGraph, DependencyKind, DependencyRelationship, DependencyStrength, strength_for,
};
pub use diagnostics::{
    AmbiguousDispatch, Diagnostic, DiagnosticCode, DiagnosticId, DiagnosticSink,
    NoMatchingImplementation, RejectionInfo, RejectionReason, Severity, SuggestedFix,
};
pub use error::{CacheError, EngineError, GraphError, RegistryError, SignatureError};
pub use interface::{
    CompilationUnit, Declaration, DeclarationKind, InterfaceCid, InterfaceElement,
    aggregate_cids, compute_interface_cid, extract_interface,
};
pub use profiler::{DispatchProfiler, ProbeSite, ProfileReport, WatchSpec};
pub use registry::{TypeInfo, TypeKind, TypeRegistry};
pub use session::{InterfaceDelta, Session};
pub use signature::{
    EffectSet, Implementation, SignatureAnalyzer, SignatureGroup, SignatureKey, SignatureStats,
};
pub use specificity::{Resolution, TieBreakPolicy, TieBreakRule, resolve};
pub use table::{
    CompressedDispatchTable, Compressor, DecisionTree, DispatchTable, ExactMatch, Predicate,
    TableBuilder, TableConfig, TreeNode, lookup,
};
pub use types::{FunctionId, SourceSpan, TypeId, UnitId};
