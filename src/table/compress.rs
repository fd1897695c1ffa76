//! Dispatch-table compression.
//!
//! Four composable techniques shrink a logical table into its runtime form:
//!
//! 1. **Type dictionary**: every `TypeId` in the table interns to a `u16`
//!    index; the dictionary is frequency-sorted so frequent types get small
//!    indices.
//! 2. **Pattern dictionary**: each parameter-type sequence interns by its
//!    64-bit hash; entries reference sequences by `u16` index.
//! 3. **Implementation pool**: `(function, module, signature-hash)` triples
//!    dedupe behind `u16` indices with refcounts.
//! 4. **Delta coding**: sequences longer than one element store a base type
//!    id plus `i16` deltas when that beats the raw form; clamping falls back
//!    to raw storage.
//!
//! Compression is one logical pass: everything is interned, the type
//! dictionary is frequency-sorted, and only then are entry fields and
//! refined tree predicates computed. No index obtained before the sort
//! survives into the output, so equal input groups always produce equal
//! output bytes.

use super::{DecisionTree, DispatchTable, NodeId, Predicate, TableMetadata, TreeNode};
use crate::error::CacheError;
use crate::registry::TypeRegistry;
use crate::signature::{Implementation, SignatureGroup};
use crate::types::{FunctionId, TypeId};
use crate::util::{DetHashMap, DetHasher, det_hash};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::Hasher as _;

/// First bloom hash seed.
const BLOOM_SEED_A: u64 = 0x51ed_270b_a5f4_2c27;
/// Second bloom hash seed.
const BLOOM_SEED_B: u64 = 0xc2b2_ae3d_27d4_eb4f;

fn bloom_bit(ty: TypeId, seed: u64) -> u32 {
    let mut hasher = DetHasher::default();
    hasher.write_u64(seed);
    hasher.write_u32(ty.raw());
    1 << (hasher.finish() % 32)
}

/// Computes the 32-bit bloom of a type sequence: two independently seeded
/// bits per type.
#[must_use]
pub fn bloom_bits(types: &[TypeId]) -> u32 {
    types
        .iter()
        .fold(0, |bits, &t| bits | bloom_bit(t, BLOOM_SEED_A) | bloom_bit(t, BLOOM_SEED_B))
}

/// Frequency-sorted dictionary of every `TypeId` appearing in a table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDictionary {
    /// Types in descending frequency order (ties broken by type id).
    types: Vec<TypeId>,
    /// Occurrence counts, parallel to `types`.
    frequencies: Vec<u32>,
    /// Lookup index; rebuilt after deserialization.
    #[serde(skip)]
    index: DetHashMap<TypeId, u16>,
}

impl TypeDictionary {
    /// Records one occurrence of a type during the intern pass.
    fn observe(&mut self, ty: TypeId) {
        if let Some(&idx) = self.index.get(&ty) {
            self.frequencies[idx as usize] += 1;
        } else {
            let idx = u16::try_from(self.types.len()).expect("type dictionary exceeds u16");
            self.types.push(ty);
            self.frequencies.push(1);
            self.index.insert(ty, idx);
        }
    }

    /// Sorts by descending frequency (type id as the tie) and rebuilds the
    /// lookup index. Called exactly once, before any entry field is computed.
    fn optimize(&mut self) {
        let mut order: Vec<usize> = (0..self.types.len()).collect();
        order.sort_by(|&a, &b| {
            self.frequencies[b]
                .cmp(&self.frequencies[a])
                .then_with(|| self.types[a].cmp(&self.types[b]))
        });
        self.types = order.iter().map(|&i| self.types[i]).collect();
        self.frequencies = order.iter().map(|&i| self.frequencies[i]).collect();
        self.rebuild_index();
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .types
            .iter()
            .enumerate()
            .map(|(i, &t)| (t, u16::try_from(i).expect("type dictionary exceeds u16")))
            .collect();
    }

    /// The dictionary index of a type, if present.
    #[must_use]
    pub fn index_of(&self, ty: TypeId) -> Option<u16> {
        self.index.get(&ty).copied()
    }

    /// The type at a dictionary index.
    #[must_use]
    pub fn type_at(&self, index: u16) -> Option<TypeId> {
        self.types.get(usize::from(index)).copied()
    }

    /// Number of distinct types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the dictionary is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Total occurrences observed across the table.
    #[must_use]
    pub fn total_occurrences(&self) -> u64 {
        self.frequencies.iter().map(|&f| u64::from(f)).sum()
    }
}

/// A stored type sequence: raw, or delta-coded when that is smaller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternEncoding {
    /// Raw type ids, 4 bytes each.
    Raw(Vec<u32>),
    /// Base type id plus `i16` deltas between successive ids.
    Delta {
        /// First type id of the sequence.
        base: u32,
        /// Differences between successive type ids.
        deltas: Vec<i16>,
    },
}

impl PatternEncoding {
    /// Encodes a sequence, choosing the smaller representation.
    ///
    /// Deltas that would clamp at the `i16` bounds lose information, so such
    /// sequences stay raw.
    #[must_use]
    pub fn encode(types: &[TypeId]) -> Self {
        let raw: Vec<u32> = types.iter().map(|t| t.raw()).collect();
        if raw.len() > 1 {
            let deltas: Option<Vec<i16>> = raw
                .windows(2)
                .map(|w| i16::try_from(i64::from(w[1]) - i64::from(w[0])).ok())
                .collect();
            if let Some(deltas) = deltas {
                let delta_form = Self::Delta {
                    base: raw[0],
                    deltas,
                };
                if delta_form.byte_len() < Self::Raw(raw.clone()).byte_len() {
                    return delta_form;
                }
            }
        }
        Self::Raw(raw)
    }

    /// Decodes back to the original type sequence.
    #[must_use]
    pub fn decode(&self) -> Vec<TypeId> {
        match self {
            Self::Raw(raw) => raw.iter().map(|&r| TypeId::from_index(r)).collect(),
            Self::Delta { base, deltas } => {
                let mut out = Vec::with_capacity(deltas.len() + 1);
                let mut current = i64::from(*base);
                out.push(TypeId::from_index(*base));
                for &d in deltas {
                    current += i64::from(d);
                    out.push(TypeId::from_index(
                        u32::try_from(current).expect("delta walked below zero"),
                    ));
                }
                out
            }
        }
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Raw(raw) => raw.len() * 4,
            Self::Delta { deltas, .. } => 4 + deltas.len() * 2,
        }
    }

    /// Whether this is the delta form.
    #[must_use]
    pub const fn is_delta(&self) -> bool {
        matches!(self, Self::Delta { .. })
    }
}

/// One stored pattern.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternRecord {
    /// 64-bit hash of the raw sequence.
    pub hash: u64,
    /// The stored encoding.
    pub encoding: PatternEncoding,
}

/// Dictionary of deduplicated parameter-type sequences.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternDictionary {
    patterns: Vec<PatternRecord>,
    #[serde(skip)]
    by_hash: DetHashMap<u64, u16>,
    /// Number of intern calls that hit an existing pattern.
    dedup_hits: u32,
}

impl PatternDictionary {
    /// Interns a sequence, returning its pattern index.
    pub fn intern(&mut self, types: &[TypeId]) -> u16 {
        let raw: Vec<u32> = types.iter().map(|t| t.raw()).collect();
        let hash = det_hash(&raw);
        if let Some(&idx) = self.by_hash.get(&hash) {
            self.dedup_hits += 1;
            return idx;
        }
        let idx = u16::try_from(self.patterns.len()).expect("pattern dictionary exceeds u16");
        self.patterns.push(PatternRecord {
            hash,
            encoding: PatternEncoding::encode(types),
        });
        self.by_hash.insert(hash, idx);
        idx
    }

    /// Recovers the exact type sequence for a pattern index.
    #[must_use]
    pub fn decode(&self, index: u16) -> Option<Vec<TypeId>> {
        self.patterns
            .get(usize::from(index))
            .map(|p| p.encoding.decode())
    }

    /// The record at an index.
    #[must_use]
    pub fn record(&self, index: u16) -> Option<&PatternRecord> {
        self.patterns.get(usize::from(index))
    }

    /// Number of distinct patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the dictionary is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Number of intern calls deduplicated against an existing pattern.
    #[must_use]
    pub const fn dedup_hits(&self) -> u32 {
        self.dedup_hits
    }

    fn rebuild_index(&mut self) {
        self.by_hash = self
            .patterns
            .iter()
            .enumerate()
            .map(|(i, p)| (p.hash, u16::try_from(i).expect("pattern dictionary exceeds u16")))
            .collect();
    }
}

/// A pooled implementation reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PooledImplementation {
    /// The implementation's stable id.
    pub function: FunctionId,
    /// Function name.
    pub function_name: String,
    /// Defining module.
    pub module_name: String,
    /// Hash of the parameter signature.
    pub signature_hash: u64,
    /// Number of entries referencing this implementation.
    pub refcount: u32,
}

/// Deduplicated pool of implementation references.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationPool {
    entries: Vec<PooledImplementation>,
    #[serde(skip)]
    by_key: DetHashMap<(String, String, u64), u16>,
}

impl ImplementationPool {
    /// Interns an implementation, bumping the refcount on duplicates.
    pub fn intern(&mut self, imp: &Implementation) -> u16 {
        let raw_params: Vec<u32> = imp.params().iter().map(|t| t.raw()).collect();
        let signature_hash = det_hash(&raw_params);
        let key = (
            imp.name().to_owned(),
            imp.module().to_owned(),
            signature_hash,
        );
        if let Some(&idx) = self.by_key.get(&key) {
            self.entries[idx as usize].refcount += 1;
            return idx;
        }
        let idx = u16::try_from(self.entries.len()).expect("implementation pool exceeds u16");
        self.entries.push(PooledImplementation {
            function: imp.id(),
            function_name: key.0.clone(),
            module_name: key.1.clone(),
            signature_hash,
            refcount: 1,
        });
        self.by_key.insert(key, idx);
        idx
    }

    /// The pooled record at an index.
    #[must_use]
    pub fn get(&self, index: u16) -> Option<&PooledImplementation> {
        self.entries.get(usize::from(index))
    }

    /// Number of pooled implementations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn rebuild_index(&mut self) {
        self.by_key = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| {
                (
                    (
                        e.function_name.clone(),
                        e.module_name.clone(),
                        e.signature_hash,
                    ),
                    u16::try_from(i).expect("implementation pool exceeds u16"),
                )
            })
            .collect();
    }
}

bitflags! {
    /// Per-entry dispatch flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct EntryFlags: u8 {
        /// Every pattern type is sealed: the combination folds statically.
        const STATIC = 1 << 0;
        /// High observed call frequency.
        const HOT = 1 << 1;
        /// The group's least specific entry; last resort at runtime.
        const FALLBACK = 1 << 2;
        /// The implementation lives outside the group's primary module.
        const CROSS_MODULE = 1 << 3;
        /// A generic parameter appears in the pattern.
        const GENERIC = 1 << 4;
        /// The entry's pattern index is delta-coded against the previous
        /// entry.
        const DELTA_COMPRESSED = 1 << 5;
    }
}

/// One compressed dispatch entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedEntry {
    /// Pattern-dictionary index of the parameter sequence.
    pub pattern_index: u16,
    /// Delta against the previous entry's pattern index, when in `i16`
    /// range; mirrors `pattern_index` for streaming decoders.
    pub pattern_delta: Option<i16>,
    /// Implementation-pool index.
    pub implementation_index: u16,
    /// Specificity rank clamped to a byte.
    pub specificity: u8,
    /// `log2` of the observed call count.
    pub call_frequency_log: u16,
    /// Entry flags.
    pub flags: EntryFlags,
    /// Bloom over the pattern's type ids.
    pub bloom_bits: u32,
}

/// Per-technique savings report and aggregate ratio.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressionStats {
    /// Estimated size of the uncompressed table in bytes.
    pub original_bytes: usize,
    /// Estimated size of the compressed table in bytes.
    pub compressed_bytes: usize,
    /// Bytes saved by `u16` type interning.
    pub dictionary_savings: usize,
    /// Bytes saved by pattern deduplication.
    pub pattern_savings: usize,
    /// Bytes saved by delta-coding stored sequences.
    pub delta_savings: usize,
    /// Bytes spent on bloom bits.
    pub bloom_overhead: usize,
    /// `compressed_bytes / original_bytes`.
    pub ratio: f32,
}

/// A dispatch table after compression: dictionaries, entries, and the
/// refined decision tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompressedDispatchTable {
    /// The group's signature name.
    pub signature_name: String,
    /// Group arity.
    pub arity: usize,
    /// Frequency-sorted type dictionary.
    pub type_dict: TypeDictionary,
    /// Deduplicated pattern dictionary.
    pub pattern_dict: PatternDictionary,
    /// Deduplicated implementation pool.
    pub impl_pool: ImplementationPool,
    /// Entries in descending specificity order.
    pub entries: Vec<CompressedEntry>,
    /// Refined decision tree.
    pub decision_tree: Option<DecisionTree>,
    /// Compression report.
    pub stats: CompressionStats,
    /// Metadata carried over from the logical table.
    pub metadata: TableMetadata,
}

impl CompressedDispatchTable {
    /// The pooled implementation referenced by an entry index.
    #[must_use]
    pub fn entry_implementation(&self, entry: u32) -> Option<&PooledImplementation> {
        let entry = self.entries.get(entry as usize)?;
        self.impl_pool.get(entry.implementation_index)
    }

    /// The decoded pattern of an entry index.
    #[must_use]
    pub fn entry_pattern(&self, entry: u32) -> Option<Vec<TypeId>> {
        let entry = self.entries.get(entry as usize)?;
        self.pattern_dict.decode(entry.pattern_index)
    }

    /// Serializes the table to its canonical byte form.
    ///
    /// Deterministic: equal tables produce equal bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CacheError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CacheError::Codec(e.to_string()))
    }

    /// Deserializes a table and rebuilds the skip-serialized lookup indices.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        let (mut table, _): (Self, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| CacheError::Codec(e.to_string()))?;
        table.type_dict.rebuild_index();
        table.pattern_dict.rebuild_index();
        table.impl_pool.rebuild_index();
        Ok(table)
    }
}

/// Compresses logical dispatch tables.
#[derive(Clone, Debug, Default)]
pub struct Compressor {
    /// Observed call counts per implementation, from the profiler.
    frequencies: BTreeMap<FunctionId, u32>,
}

impl Compressor {
    /// Entries at or above this frequency log are flagged `HOT`.
    const HOT_LOG_THRESHOLD: u16 = 10;

    /// Creates a compressor with no frequency data.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Supplies observed call counts for `HOT` flagging and frequency logs.
    #[must_use]
    pub fn with_frequencies(mut self, frequencies: BTreeMap<FunctionId, u32>) -> Self {
        self.frequencies = frequencies;
        self
    }

    /// Compresses a logical table.
    #[must_use]
    pub fn compress(
        &self,
        group: &SignatureGroup,
        table: &DispatchTable,
        registry: &TypeRegistry,
    ) -> CompressedDispatchTable {
        let impls = group.implementations();

        // Intern pass: observe every type the table mentions, then sort the
        // dictionary once. Entry fields are computed only after this point.
        let mut type_dict = TypeDictionary::default();
        for imp in impls {
            for &ty in imp.params() {
                type_dict.observe(ty);
            }
        }
        if let Some(tree) = &table.decision_tree {
            for node in &tree.nodes {
                if let TreeNode::Internal { predicate, .. } = node {
                    match predicate {
                        Predicate::TypeEquals { ty, .. } | Predicate::SubtypeOf { ty, .. } => {
                            type_dict.observe(*ty);
                        }
                        _ => {}
                    }
                }
            }
        }
        type_dict.optimize();

        let mut pattern_dict = PatternDictionary::default();
        let mut impl_pool = ImplementationPool::default();
        let mut entries = Vec::with_capacity(impls.len());
        let primary_module = impls.first().map(Implementation::module);
        let mut previous_pattern: Option<u16> = None;

        for (position, imp) in impls.iter().enumerate() {
            let pattern_index = pattern_dict.intern(imp.params());
            let implementation_index = impl_pool.intern(imp);

            let pattern_delta = previous_pattern.and_then(|prev| {
                i16::try_from(i32::from(pattern_index) - i32::from(prev)).ok()
            });
            previous_pattern = Some(pattern_index);

            let frequency = self.frequencies.get(&imp.id()).copied().unwrap_or(0);
            let call_frequency_log =
                u16::try_from(u32::checked_ilog2(frequency + 1).unwrap_or(0)).unwrap_or(u16::MAX);

            let mut flags = EntryFlags::empty();
            if imp.params().iter().all(|&t| registry.is_sealed(t)) {
                flags |= EntryFlags::STATIC;
            }
            if call_frequency_log >= Self::HOT_LOG_THRESHOLD {
                flags |= EntryFlags::HOT;
            }
            if impls.len() > 1 && position == impls.len() - 1 {
                flags |= EntryFlags::FALLBACK;
            }
            if primary_module.is_some_and(|primary| imp.module() != primary) {
                flags |= EntryFlags::CROSS_MODULE;
            }
            if imp.params().iter().any(|&t| {
                registry
                    .info(t)
                    .is_some_and(|i| i.kind() == crate::registry::TypeKind::Generic)
            }) {
                flags |= EntryFlags::GENERIC;
            }
            if pattern_delta.is_some() {
                flags |= EntryFlags::DELTA_COMPRESSED;
            }

            entries.push(CompressedEntry {
                pattern_index,
                pattern_delta,
                implementation_index,
                specificity: u8::try_from(imp.specificity_rank().min(255)).expect("clamped"),
                call_frequency_log,
                flags,
                bloom_bits: bloom_bits(imp.params()),
            });
        }

        // Stats snapshot before refinement: refinement re-interns existing
        // patterns and must not inflate the dedup accounting.
        let stats = compression_stats(group, &type_dict, &pattern_dict, &impl_pool, &entries);
        let decision_tree = refine_tree(group, table, registry, &type_dict, &mut pattern_dict);

        CompressedDispatchTable {
            signature_name: table.signature_name.clone(),
            arity: table.arity,
            type_dict,
            pattern_dict,
            impl_pool,
            entries,
            decision_tree,
            stats,
            metadata: table.metadata,
        }
    }
}

/// Refines the generator's tree against the sorted dictionaries.
///
/// Small all-leaf groups become a flat `PatternMatches` chain; long equality
/// chains over one argument gain a `TypeInSet` or bloom guard, whichever is
/// the more discriminating of the eligible forms.
fn refine_tree(
    group: &SignatureGroup,
    table: &DispatchTable,
    registry: &TypeRegistry,
    type_dict: &TypeDictionary,
    pattern_dict: &mut PatternDictionary,
) -> Option<DecisionTree> {
    let impls = group.implementations();

    // Flat pattern chain: every pattern distinct, and no pattern type has
    // subtypes that could reach the entry through narrowing.
    let leaf_only = impls.len() >= 2
        && impls.len() <= 3
        && impls
            .iter()
            .all(|imp| imp.params().iter().all(|&t| !registry.has_proper_subtypes(t)))
        && {
            let mut seen: Vec<&[TypeId]> = Vec::new();
            impls.iter().all(|imp| {
                let fresh = !seen.contains(&imp.params());
                seen.push(imp.params());
                fresh
            })
        };
    if leaf_only {
        let mut tree = DecisionTree::default();
        let terminator = tree.push(TreeNode::Internal {
            predicate: Predicate::AlwaysFalse,
            on_true: None,
            on_false: None,
        });
        let mut next = terminator;
        for (position, imp) in impls.iter().enumerate().rev() {
            let pattern = pattern_dict.intern(imp.params());
            let leaf = tree.push(TreeNode::Leaf {
                entry: u32::try_from(position).expect("entry index exceeds u32"),
            });
            next = tree.push(TreeNode::Internal {
                predicate: Predicate::PatternMatches { pattern },
                on_true: Some(leaf),
                on_false: Some(next),
            });
        }
        tree.root = Some(next);
        return Some(tree);
    }

    let source = table.decision_tree.as_ref()?;
    let mut tree = source.clone();
    let Some(root) = tree.root else {
        return Some(tree);
    };
    let guarded = guard_equality_chains(&mut tree, root, type_dict);
    tree.root = Some(guarded);
    Some(tree)
}

/// Minimum equality-chain length worth a guard node.
const GUARD_CHAIN_LEN: usize = 3;

/// Walks the tree and inserts set/bloom guards above long equality chains.
///
/// Returns the (possibly new) subtree root. Guards are sound here because an
/// equality chain only matches arguments equal to one of its tested types:
/// an argument outside the set can never match, so rejecting it early is
/// exact, and a bloom reject is a superset of that test.
fn guard_equality_chains(tree: &mut DecisionTree, node: NodeId, dict: &TypeDictionary) -> NodeId {
    // Collect the equality chain starting at `node`, if one exists.
    let mut chain_types: Vec<TypeId> = Vec::new();
    let mut cursor = Some(node);
    let mut chain_arg: Option<u8> = None;
    while let Some(id) = cursor {
        match &tree.nodes[id as usize] {
            TreeNode::Internal {
                predicate: Predicate::TypeEquals { arg, ty },
                on_false,
                ..
            } if chain_arg.is_none_or(|a| a == *arg) => {
                chain_arg = Some(*arg);
                chain_types.push(*ty);
                cursor = *on_false;
            }
            _ => break,
        }
    }

    // Recurse into children first (on the original structure).
    recurse_children(tree, node, dict);

    if chain_types.len() < GUARD_CHAIN_LEN {
        return node;
    }
    let arg = chain_arg.expect("chain implies an argument index");

    // Candidate guards, most discriminating first: an exact dictionary-index
    // set when every type fits the low 64 slots, otherwise a bloom union.
    let set: Option<u64> = chain_types
        .iter()
        .map(|&t| dict.index_of(t).filter(|&i| i < 64).map(|i| 1u64 << i))
        .try_fold(0u64, |acc, bit| bit.map(|b| acc | b));
    let predicate = if let Some(set) = set {
        Predicate::TypeInSet { arg, set }
    } else {
        Predicate::BloomFilter {
            bits: chain_types
                .iter()
                .fold(0, |bits, &t| bits | bloom_bit(t, BLOOM_SEED_A) | bloom_bit(t, BLOOM_SEED_B)),
        }
    };
    tree.push(TreeNode::Internal {
        predicate,
        on_true: Some(node),
        on_false: None,
    })
}

fn recurse_children(tree: &mut DecisionTree, node: NodeId, dict: &TypeDictionary) {
    let (on_true, on_false) = match &tree.nodes[node as usize] {
        TreeNode::Internal {
            on_true, on_false, ..
        } => (*on_true, *on_false),
        TreeNode::Leaf { .. } => return,
    };
    if let Some(child) = on_true {
        let new_child = guard_equality_chains(tree, child, dict);
        if new_child != child
            && let TreeNode::Internal { on_true, .. } = &mut tree.nodes[node as usize]
        {
            *on_true = Some(new_child);
        }
    }
    if let Some(child) = on_false {
        // False links inside a chain stay untouched; the guard wraps the
        // chain head only. Still recurse for nested structures.
        recurse_children(tree, child, dict);
    }
}

fn compression_stats(
    group: &SignatureGroup,
    type_dict: &TypeDictionary,
    pattern_dict: &PatternDictionary,
    impl_pool: &ImplementationPool,
    entries: &[CompressedEntry],
) -> CompressionStats {
    let impls = group.implementations();

    // Uncompressed: every entry carries its full type sequence and its full
    // implementation reference.
    let original_bytes: usize = impls
        .iter()
        .map(|imp| imp.params().len() * 4 + imp.name().len() + imp.module().len() + 8 + 8)
        .sum();

    let pattern_bytes: usize = (0..pattern_dict.len())
        .map(|i| {
            pattern_dict
                .record(u16::try_from(i).expect("checked by len"))
                .map_or(0, |r| r.encoding.byte_len() + 8)
        })
        .sum();
    let pool_bytes: usize = (0..impl_pool.len())
        .map(|i| {
            impl_pool
                .get(u16::try_from(i).expect("checked by len"))
                .map_or(0, |e| e.function_name.len() + e.module_name.len() + 8 + 4)
        })
        .sum();
    let dict_bytes = type_dict.len() * 8;
    let entry_bytes = entries.len() * 14;
    let bloom_overhead = entries.len() * 4;
    let compressed_bytes = pattern_bytes + pool_bytes + dict_bytes + entry_bytes;

    let occurrences = usize::try_from(type_dict.total_occurrences()).unwrap_or(usize::MAX);
    let dictionary_savings = occurrences.saturating_mul(2);
    let pattern_savings = usize::try_from(pattern_dict.dedup_hits()).unwrap_or(usize::MAX)
        * group.arity().saturating_mul(4);
    let delta_savings: usize = (0..pattern_dict.len())
        .filter_map(|i| pattern_dict.record(u16::try_from(i).expect("checked by len")))
        .filter(|r| r.encoding.is_delta())
        .map(|r| (r.encoding.decode().len() * 4).saturating_sub(r.encoding.byte_len()))
        .sum();

    CompressionStats {
        original_bytes,
        compressed_bytes,
        dictionary_savings,
        pattern_savings,
        delta_savings,
        bloom_overhead,
        ratio: if original_bytes == 0 {
            1.0
        } else {
            compressed_bytes as f32 / original_bytes as f32
        },
    }
}
