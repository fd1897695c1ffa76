//! Deterministic hashing for analysis reproducibility.
//!
//! Every hash that reaches a signature key, a dispatch table, or a cache
//! record must be identical across runs and across hosts, so the std
//! `RandomState` hasher is off limits anywhere near analysis results. The
//! hasher here combines two well-known public constructions: an FNV-1a
//! byte loop for accumulation and a splitmix64 finalizer for avalanche.
//! Both use their standard published constants.

use std::hash::{BuildHasher, Hash, Hasher};

/// Deterministic, non-cryptographic hasher.
///
/// FNV-1a over the input bytes (xor, then multiply by the FNV prime), with
/// a splitmix64 mix on [`Hasher::finish`] so low-entropy inputs such as
/// small dense `TypeId`s still spread across the output bits. Collisions are
/// tolerable everywhere this is used; stability is not negotiable.
#[derive(Debug, Clone)]
pub struct DetHasher {
    state: u64,
}

impl DetHasher {
    /// FNV-1a 64-bit offset basis.
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    /// FNV-1a 64-bit prime.
    const PRIME: u64 = 0x0000_0100_0000_01b3;
}

impl Default for DetHasher {
    fn default() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }
}

impl Hasher for DetHasher {
    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= u64::from(byte);
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }

    fn write_u8(&mut self, i: u8) {
        self.write(&[i]);
    }

    fn write_u16(&mut self, i: u16) {
        self.write(&i.to_le_bytes());
    }

    fn write_u32(&mut self, i: u32) {
        self.write(&i.to_le_bytes());
    }

    fn write_u64(&mut self, i: u64) {
        self.write(&i.to_le_bytes());
    }

    // The default forwards native-endian bytes, which would make slice
    // length prefixes host-dependent.
    fn write_usize(&mut self, i: usize) {
        self.write_u64(i as u64);
    }

    fn finish(&self) -> u64 {
        // splitmix64 finalizer.
        let mut z = self.state;
        z ^= z >> 30;
        z = z.wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z ^= z >> 27;
        z = z.wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }
}

/// Builder for deterministic hashers.
#[derive(Clone, Default)]
pub struct DetBuildHasher;

impl BuildHasher for DetBuildHasher {
    type Hasher = DetHasher;

    fn build_hasher(&self) -> Self::Hasher {
        DetHasher::default()
    }
}

/// Deterministic `HashMap` with reproducible hashing across runs.
pub type DetHashMap<K, V> = std::collections::HashMap<K, V, DetBuildHasher>;

/// Deterministic `HashSet` with reproducible hashing across runs.
pub type DetHashSet<K> = std::collections::HashSet<K, DetBuildHasher>;

/// Hashes a single value with the deterministic hasher.
pub fn det_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DetHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Hashes a name for use in signature keys.
///
/// Stable across runs. Two distinct names may collide, which is why group
/// lookups always confirm the full name stored on the group record. The
/// trailing sentinel keeps `"ab"` and `"ab\0..."`-style extensions from
/// sharing a prefix state.
#[must_use]
pub fn hash_name(name: &str) -> u64 {
    let mut hasher = DetHasher::default();
    hasher.write(name.as_bytes());
    hasher.write_u8(0xff);
    hasher.finish()
}
