//! Internal utilities for the dispatch engine.
//!
//! Deliberately minimal and dependency-free so every analysis pass stays
//! deterministic for fixed inputs.

pub mod det_hash;

pub use det_hash::{DetBuildHasher, DetHashMap, DetHashSet, DetHasher, det_hash, hash_name};
