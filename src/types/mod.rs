//! Core types shared across the dispatch engine.
//!
//! - [`id`]: identifier handles (`TypeId`, `FunctionId`, `UnitId`)
//! - [`span`]: source locations (`SourceSpan`)

pub mod id;
pub mod span;

pub use id::{FunctionId, TypeId, UnitId};
pub use span::SourceSpan;
