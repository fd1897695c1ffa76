//! Runtime lookup over compressed dispatch tables.
//!
//! Two paths, per table shape:
//!
//! 1. **Predicate walk**: when the table carries a decision tree, evaluate
//!    predicates from the root until a leaf yields an entry index.
//! 2. **Bloom-gated linear scan**: otherwise compute the query bloom, skip
//!    entries whose bloom cannot contain it, and compare survivors against
//!    their decompressed pattern. First full match wins; entries are stored
//!    in descending specificity order.

use super::compress::{CompressedDispatchTable, bloom_bits};
use super::{Predicate, TreeNode};
use crate::registry::TypeRegistry;
use crate::types::TypeId;

/// Evaluates one predicate against call argument types.
///
/// `table` supplies the dictionaries that dictionary-indexed predicates
/// (`TypeInSet`, `PatternMatches`) resolve against; predicates produced by
/// the generator never need it.
#[must_use]
pub fn evaluate_predicate(
    predicate: &Predicate,
    args: &[TypeId],
    registry: &TypeRegistry,
    table: Option<&CompressedDispatchTable>,
) -> bool {
    match predicate {
        Predicate::TypeEquals { arg, ty } => args.get(usize::from(*arg)) == Some(ty),
        Predicate::SubtypeOf { arg, ty } => args
            .get(usize::from(*arg))
            .is_some_and(|&a| registry.is_subtype(a, *ty)),
        Predicate::TypeInSet { arg, set } => args.get(usize::from(*arg)).is_some_and(|&a| {
            table
                .and_then(|t| t.type_dict.index_of(a))
                .is_some_and(|idx| idx < 64 && set & (1 << idx) != 0)
        }),
        Predicate::PatternMatches { pattern } => table
            .and_then(|t| t.pattern_dict.decode(*pattern))
            .is_some_and(|p| p == args),
        Predicate::BloomFilter { bits } => {
            let query = bloom_bits(args);
            bits & query == query
        }
        Predicate::AlwaysTrue => true,
        Predicate::AlwaysFalse => false,
    }
}

/// Looks up the dispatch entry for a call's argument types.
///
/// Returns the entry index in the table's entry order, or `None` when no
/// entry matches.
#[must_use]
pub fn lookup(
    table: &CompressedDispatchTable,
    args: &[TypeId],
    registry: &TypeRegistry,
) -> Option<u32> {
    if args.len() != table.arity {
        return None;
    }
    if let Some(tree) = &table.decision_tree {
        let mut current = tree.root;
        while let Some(id) = current {
            match &tree.nodes[id as usize] {
                TreeNode::Leaf { entry } => return Some(*entry),
                TreeNode::Internal {
                    predicate,
                    on_true,
                    on_false,
                } => {
                    current = if evaluate_predicate(predicate, args, registry, Some(table)) {
                        *on_true
                    } else {
                        *on_false
                    };
                }
            }
        }
        return None;
    }
    linear_lookup(table, args)
}

/// The bloom-gated linear fallback, also used directly by property tests.
#[must_use]
pub(crate) fn linear_lookup(table: &CompressedDispatchTable, args: &[TypeId]) -> Option<u32> {
    let query = bloom_bits(args);
    for (index, entry) in table.entries.iter().enumerate() {
        if entry.bloom_bits & query != query {
            continue;
        }
        if table
            .pattern_dict
            .decode(entry.pattern_index)
            .is_some_and(|pattern| pattern == args)
        {
            return Some(u32::try_from(index).expect("entry index exceeds u32"));
        }
    }
    None
}
