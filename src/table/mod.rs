//! Dispatch-table generation.
//!
//! For a signature group that stays dynamic, the generator builds the logical
//! [`DispatchTable`]: an exact-match table over argument type combinations
//! (binary-searchable by combination hash) and a predicate decision tree that
//! discriminates implementations parameter by parameter.
//!
//! Tree shape invariant: at each parameter index, declared types are tested
//! most-specific-first (primitives before open types, descending specificity
//! score, type id as the final tie). Together with monotone specificity
//! scores this guarantees that for any call the specificity analyzer resolves
//! uniquely, the tree walk lands on the entry of that same implementation.

pub mod compress;
pub mod lookup;

pub use compress::{
    CompressedDispatchTable, CompressedEntry, CompressionStats, Compressor, EntryFlags,
    ImplementationPool, PatternDictionary, PatternEncoding, TypeDictionary, bloom_bits,
};
pub use lookup::{evaluate_predicate, lookup};

use crate::classify::{CacheEfficiency, DispatchStrategy};
use crate::registry::{TypeKind, TypeRegistry};
use crate::signature::SignatureGroup;
use crate::specificity::{Resolution, TieBreakPolicy, resolve};
use crate::types::{FunctionId, TypeId};
use crate::util::det_hash;
use serde::{Deserialize, Serialize};

/// Limits for table generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Upper bound on exact-match entries per table.
    pub max_exact_matches: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            max_exact_matches: 10_000,
        }
    }
}

/// One statically resolvable argument combination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExactMatch {
    /// Deterministic hash of the argument type combination.
    pub type_combination_hash: u64,
    /// The implementation the combination resolves to.
    pub function: FunctionId,
}

/// Hashes an argument type combination for the exact-match table.
#[must_use]
pub fn combination_hash(types: &[TypeId]) -> u64 {
    let raw: Vec<u32> = types.iter().map(|t| t.raw()).collect();
    det_hash(&raw)
}

/// A predicate evaluated against call argument types at a tree node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Predicate {
    /// `args[arg] == ty`.
    TypeEquals {
        /// Argument index.
        arg: u8,
        /// The type to compare against.
        ty: TypeId,
    },
    /// `args[arg] <: ty`.
    SubtypeOf {
        /// Argument index.
        arg: u8,
        /// The supertype bound.
        ty: TypeId,
    },
    /// `args[arg]`'s *dictionary index* is a member of a 64-bit set.
    ///
    /// Only produced by the compressor's refinement pass, after the type
    /// dictionary is frequency-sorted; frequent types occupy the low indices
    /// the set can address.
    TypeInSet {
        /// Argument index.
        arg: u8,
        /// Bitset over type-dictionary indices `0..64`.
        set: u64,
    },
    /// The full argument combination equals a dictionary pattern.
    PatternMatches {
        /// Pattern-dictionary index.
        pattern: u16,
    },
    /// Bloom prefilter: every query bit must be present in `bits`.
    BloomFilter {
        /// Union of the subtree entries' bloom bits.
        bits: u32,
    },
    /// Always taken.
    AlwaysTrue,
    /// Never taken.
    AlwaysFalse,
}

/// Index of a node within a [`DecisionTree`] arena.
pub type NodeId = u32;

/// A decision-tree node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeNode {
    /// Internal predicate node.
    Internal {
        /// The predicate to evaluate.
        predicate: Predicate,
        /// Branch when the predicate holds.
        on_true: Option<NodeId>,
        /// Branch when it does not.
        on_false: Option<NodeId>,
    },
    /// Leaf: dispatch to the entry at this index (group order).
    Leaf {
        /// Entry index.
        entry: u32,
    },
}

/// An owning decision tree: arena of nodes plus a root index.
///
/// Nodes reference children by index only, so cycles are unrepresentable and
/// the tree serializes as flat data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionTree {
    /// Node arena.
    pub nodes: Vec<TreeNode>,
    /// Root node, if the tree is non-empty.
    pub root: Option<NodeId>,
}

impl DecisionTree {
    /// Maximum depth from root to any leaf.
    #[must_use]
    pub fn max_depth(&self) -> u32 {
        fn depth_of(tree: &DecisionTree, node: Option<NodeId>) -> u32 {
            let Some(id) = node else { return 0 };
            match &tree.nodes[id as usize] {
                TreeNode::Leaf { .. } => 1,
                TreeNode::Internal {
                    on_true, on_false, ..
                } => 1 + depth_of(tree, *on_true).max(depth_of(tree, *on_false)),
            }
        }
        depth_of(self, self.root)
    }

    /// Number of nodes in the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, node: TreeNode) -> NodeId {
        let id = u32::try_from(self.nodes.len()).expect("decision tree exceeds u32 node space");
        self.nodes.push(node);
        id
    }
}

/// Summary metadata of a generated table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Estimated in-memory footprint in bytes.
    pub total_memory_bytes: usize,
    /// Fraction of implementations covered by an exact match.
    pub exact_match_coverage: f32,
    /// Depth of the decision tree.
    pub max_tree_depth: u32,
    /// Cache-friendliness of the chosen strategy.
    pub cache_efficiency: CacheEfficiency,
}

/// The logical dispatch table for one signature group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispatchTable {
    /// The group's signature name.
    pub signature_name: String,
    /// Group arity.
    pub arity: usize,
    /// Exact matches sorted ascending by combination hash.
    pub exact_matches: Vec<ExactMatch>,
    /// Predicate decision tree, when the group warranted one.
    pub decision_tree: Option<DecisionTree>,
    /// Summary metadata.
    pub metadata: TableMetadata,
}

impl DispatchTable {
    /// Binary-searches the exact-match table for an argument combination.
    #[must_use]
    pub fn exact_match(&self, args: &[TypeId]) -> Option<FunctionId> {
        let hash = combination_hash(args);
        self.exact_matches
            .binary_search_by_key(&hash, |m| m.type_combination_hash)
            .ok()
            .map(|i| self.exact_matches[i].function)
    }
}

/// Builds logical dispatch tables for signature groups.
#[derive(Clone, Copy, Debug, Default)]
pub struct TableBuilder {
    config: TableConfig,
}

impl TableBuilder {
    /// Creates a builder with the given limits.
    #[must_use]
    pub const fn new(config: TableConfig) -> Self {
        Self { config }
    }

    /// Builds the logical table for a group.
    #[must_use]
    pub fn build(&self, group: &SignatureGroup, registry: &TypeRegistry) -> DispatchTable {
        let exact_matches = self.exact_matches(group, registry);
        let decision_tree = build_decision_tree(group, registry);

        let coverage = if group.is_empty() {
            0.0
        } else {
            exact_matches.len() as f32 / group.len() as f32
        };
        let tree_depth = decision_tree.as_ref().map_or(0, DecisionTree::max_depth);
        let tree_nodes = decision_tree.as_ref().map_or(0, DecisionTree::len);
        let strategy = DispatchStrategy::for_count(group.len());
        let metadata = TableMetadata {
            total_memory_bytes: exact_matches.len() * size_of::<ExactMatch>()
                + tree_nodes * size_of::<TreeNode>(),
            exact_match_coverage: coverage,
            max_tree_depth: tree_depth,
            cache_efficiency: CacheEfficiency::rate(strategy, group.len()),
        };

        DispatchTable {
            signature_name: group.name().to_owned(),
            arity: group.arity(),
            exact_matches,
            decision_tree,
            metadata,
        }
    }

    /// One exact match per implementation whose own parameter combination
    /// resolves unambiguously to it, capped at `max_exact_matches`.
    fn exact_matches(&self, group: &SignatureGroup, registry: &TypeRegistry) -> Vec<ExactMatch> {
        let mut matches = Vec::new();
        for imp in group.implementations() {
            if matches.len() >= self.config.max_exact_matches {
                tracing::debug!(
                    signature = group.name(),
                    cap = self.config.max_exact_matches,
                    "exact-match table capped"
                );
                break;
            }
            let resolution = resolve(
                group,
                imp.params(),
                registry,
                TieBreakPolicy::Strict,
                None,
            );
            if let Resolution::Unique { implementation, .. } = resolution
                && implementation.id() == imp.id()
            {
                matches.push(ExactMatch {
                    type_combination_hash: combination_hash(imp.params()),
                    function: imp.id(),
                });
            }
        }
        matches.sort_by_key(|m| (m.type_combination_hash, m.function));
        matches
    }
}

/// Builds the predicate decision tree for a group.
///
/// Returns `None` for empty and single-implementation groups, which dispatch
/// without discrimination.
#[must_use]
pub fn build_decision_tree(
    group: &SignatureGroup,
    registry: &TypeRegistry,
) -> Option<DecisionTree> {
    if group.len() < 2 {
        return None;
    }
    let mut tree = DecisionTree::default();
    let indices: Vec<u32> = (0..u32::try_from(group.len()).expect("group exceeds u32")).collect();
    let root = build_node(&mut tree, group, registry, &indices, 0);
    root.map(|root| {
        tree.root = Some(root);
        tree
    })
}

fn build_node(
    tree: &mut DecisionTree,
    group: &SignatureGroup,
    registry: &TypeRegistry,
    indices: &[u32],
    param: usize,
) -> Option<NodeId> {
    match indices {
        [] => return None,
        &[only] => return Some(tree.push(TreeNode::Leaf { entry: only })),
        _ => {}
    }
    if param >= group.arity() {
        // Parameters exhausted with several candidates left: the group order
        // is descending specificity, so the first index is the most specific.
        return Some(tree.push(TreeNode::Leaf { entry: indices[0] }));
    }

    let impls = group.implementations();
    let distinct = distinct_param_types(impls, indices, param, registry);

    if distinct.len() == 1 {
        let ty = distinct[0];
        let on_true = build_node(tree, group, registry, indices, param + 1)?;
        let predicate = guard_predicate(param, ty, registry);
        if matches!(predicate, Predicate::AlwaysTrue) {
            // Every argument satisfies `<: Any`; skip the node entirely.
            return Some(on_true);
        }
        return Some(tree.push(TreeNode::Internal {
            predicate,
            on_true: Some(on_true),
            on_false: None,
        }));
    }

    // Chain the distinct types most-specific-first; each branch keeps every
    // implementation that accepts an argument of exactly that type.
    let mut next: Option<NodeId> = None;
    for &ty in distinct.iter().rev() {
        let branch: Vec<u32> = indices
            .iter()
            .copied()
            .filter(|&i| registry.is_subtype(ty, impls[i as usize].params()[param]))
            .collect();
        // `ty` is declared by at least one implementation in `indices`, so
        // the branch is never empty.
        let on_true = build_node(tree, group, registry, &branch, param + 1);
        next = Some(tree.push(TreeNode::Internal {
            predicate: guard_predicate(param, ty, registry),
            on_true,
            on_false: next,
        }));
    }
    next
}

/// The discrimination predicate for one declared type at one parameter.
///
/// Primitives have no proper subtypes, so equality suffices; `Any` accepts
/// everything; open types need the subtype walk.
fn guard_predicate(param: usize, ty: TypeId, registry: &TypeRegistry) -> Predicate {
    let arg = u8::try_from(param).expect("arity exceeds u8");
    if ty == registry.any() {
        return Predicate::AlwaysTrue;
    }
    match registry.info(ty).map(crate::registry::TypeInfo::kind) {
        Some(TypeKind::Primitive) => Predicate::TypeEquals { arg, ty },
        _ => Predicate::SubtypeOf { arg, ty },
    }
}

/// Distinct declared types at `param` among the given implementations,
/// ordered for the discrimination chain: primitives first, then descending
/// specificity score, then type id.
fn distinct_param_types(
    impls: &[crate::signature::Implementation],
    indices: &[u32],
    param: usize,
    registry: &TypeRegistry,
) -> Vec<TypeId> {
    let mut types: Vec<TypeId> = Vec::new();
    for &i in indices {
        let ty = impls[i as usize].params()[param];
        if !types.contains(&ty) {
            types.push(ty);
        }
    }
    types.sort_by(|&a, &b| {
        let a_primitive = registry
            .info(a)
            .is_some_and(|t| t.kind() == TypeKind::Primitive);
        let b_primitive = registry
            .info(b)
            .is_some_and(|t| t.kind() == TypeKind::Primitive);
        b_primitive
            .cmp(&a_primitive)
            .then_with(|| registry.specificity_score(b).cmp(&registry.specificity_score(a)))
            .then_with(|| a.cmp(&b))
    });
    types
}
