//! Signature analysis: grouping implementations by `(name, arity)`.
//!
//! Every declared implementation of a multimethod lands here. The analyzer
//! interns a [`FunctionId`] per definition, maintains each group in
//! descending specificity order, tracks per-group sealing, and rejects exact
//! duplicates (same function identity, same parameter types).

use crate::error::SignatureError;
use crate::registry::TypeRegistry;
use crate::types::{FunctionId, SourceSpan, TypeId};
use crate::util::hash_name;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;

bitflags! {
    /// Effects an implementation may perform.
    ///
    /// The engine carries effect sets for tie-breaking and surfaces them in
    /// diagnostics; it does not enforce them. An empty set means pure.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EffectSet: u8 {
        /// Reads or writes external state (files, network, devices).
        const IO = 1 << 0;
        /// Mutates reachable memory.
        const MUTATION = 1 << 1;
        /// Allocates on the heap.
        const ALLOC = 1 << 2;
        /// May panic or trap.
        const PANIC = 1 << 3;
    }
}

impl EffectSet {
    /// Whether the implementation is pure (no declared effects).
    #[must_use]
    pub const fn is_pure(self) -> bool {
        self.is_empty()
    }

    /// Strictness rank: fewer effects is stricter. Used as a tie-break.
    #[must_use]
    pub const fn strictness(self) -> u32 {
        self.bits().count_ones()
    }
}

/// Inline capacity for parameter-type sequences; most multimethods are
/// arity ≤ 4.
pub type ParamTypes = SmallVec<[TypeId; 4]>;

/// A single registered implementation of a multimethod.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    id: FunctionId,
    name: String,
    module: String,
    params: ParamTypes,
    return_type: TypeId,
    effects: EffectSet,
    span: SourceSpan,
    specificity_rank: u32,
}

impl Implementation {
    /// Stable id of this definition.
    #[must_use]
    pub const fn id(&self) -> FunctionId {
        self.id
    }

    /// Function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Defining module.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Qualified `module::name` form, as used in diagnostics.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.module, self.name)
    }

    /// Parameter types in declared order.
    #[must_use]
    pub fn params(&self) -> &[TypeId] {
        &self.params
    }

    /// Number of parameters.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Declared return type.
    #[must_use]
    pub const fn return_type(&self) -> TypeId {
        self.return_type
    }

    /// Declared effect set.
    #[must_use]
    pub const fn effects(&self) -> EffectSet {
        self.effects
    }

    /// Source span of the definition.
    #[must_use]
    pub const fn span(&self) -> &SourceSpan {
        &self.span
    }

    /// Sum of parameter specificity scores.
    #[must_use]
    pub const fn specificity_rank(&self) -> u32 {
        self.specificity_rank
    }
}

/// Key of a signature group: deterministic name hash plus arity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignatureKey {
    /// Deterministic hash of the function name.
    pub name_hash: u64,
    /// Number of parameters.
    pub arity: u16,
}

impl SignatureKey {
    /// Builds the key for `(name, arity)`.
    #[must_use]
    pub fn new(name: &str, arity: usize) -> Self {
        Self {
            name_hash: hash_name(name),
            arity: u16::try_from(arity).unwrap_or(u16::MAX),
        }
    }
}

/// All implementations sharing a `(name, arity)` signature.
///
/// Implementations are kept in descending specificity-rank order, with
/// registration order as the deterministic tie-break.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignatureGroup {
    key: SignatureKey,
    name: String,
    implementations: Vec<Implementation>,
    is_sealed: bool,
}

impl SignatureGroup {
    /// The group key.
    #[must_use]
    pub const fn key(&self) -> SignatureKey {
        self.key
    }

    /// The shared function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The group arity.
    #[must_use]
    pub fn arity(&self) -> usize {
        usize::from(self.key.arity)
    }

    /// Implementations in descending specificity order.
    #[must_use]
    pub fn implementations(&self) -> &[Implementation] {
        &self.implementations
    }

    /// Number of implementations in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.implementations.len()
    }

    /// Whether the group has no implementations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.implementations.is_empty()
    }

    /// Whether every implementation's parameter types are sealed.
    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        self.is_sealed
    }

    /// Finds an implementation by id within this group.
    #[must_use]
    pub fn implementation(&self, id: FunctionId) -> Option<&Implementation> {
        self.implementations.iter().find(|imp| imp.id() == id)
    }

    fn resort(&mut self) {
        self.implementations
            .sort_by(|a, b| match b.specificity_rank.cmp(&a.specificity_rank) {
                std::cmp::Ordering::Equal => a.id.cmp(&b.id),
                other => other,
            });
    }
}

/// Aggregate statistics over all signature groups.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureStats {
    /// Number of distinct `(name, arity)` groups.
    pub total_groups: usize,
    /// Number of groups whose implementations are all over sealed types.
    pub sealed_groups: usize,
    /// Largest implementation count in any single group.
    pub max_implementations: usize,
    /// Total registered implementations.
    pub total_implementations: usize,
}

/// The per-session signature analyzer.
#[derive(Clone, Debug, Default)]
pub struct SignatureAnalyzer {
    groups: BTreeMap<SignatureKey, SignatureGroup>,
    /// `FunctionId → group key`, for id-based lookups.
    locations: Vec<SignatureKey>,
}

impl SignatureAnalyzer {
    /// Creates an empty analyzer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an implementation and returns its stable id.
    ///
    /// Rejects only exact duplicates: the same `(module, name)` identity with
    /// an identical parameter-type sequence. Identical signatures from
    /// distinct modules are allowed and resolved by module precedence at
    /// dispatch time.
    pub fn add_implementation(
        &mut self,
        name: &str,
        module: &str,
        params: &[TypeId],
        return_type: TypeId,
        effects: EffectSet,
        span: SourceSpan,
        registry: &TypeRegistry,
    ) -> Result<FunctionId, SignatureError> {
        let key = SignatureKey::new(name, params.len());
        if let Some(group) = self.groups.get(&key) {
            let duplicate = group.implementations.iter().any(|imp| {
                imp.module == module && imp.name == name && imp.params.as_slice() == params
            });
            if duplicate {
                return Err(SignatureError::DuplicateImplementation {
                    name: name.to_owned(),
                    module: module.to_owned(),
                    span,
                });
            }
        }

        let id = FunctionId::from_index(
            u32::try_from(self.locations.len()).expect("implementation arena exceeds u32"),
        );
        let specificity_rank = params
            .iter()
            .map(|&t| registry.specificity_score(t))
            .sum::<u32>();
        let implementation = Implementation {
            id,
            name: name.to_owned(),
            module: module.to_owned(),
            params: ParamTypes::from_slice(params),
            return_type,
            effects,
            span,
            specificity_rank,
        };

        let group = self
            .groups
            .entry(key)
            .or_insert_with(|| SignatureGroup {
                key,
                name: name.to_owned(),
                implementations: Vec::new(),
                is_sealed: false,
            });
        group.implementations.push(implementation);
        group.resort();
        // Sealing is re-derived on insert so a stale flag never survives.
        group.is_sealed = group
            .implementations
            .iter()
            .all(|imp| imp.params.iter().all(|&t| registry.is_sealed(t)));
        self.locations.push(key);
        Ok(id)
    }

    /// Looks up the group for `(name, arity)`.
    #[must_use]
    pub fn group(&self, name: &str, arity: usize) -> Option<&SignatureGroup> {
        let key = SignatureKey::new(name, arity);
        self.groups.get(&key).filter(|g| g.name == name)
    }

    /// Marks the group for `(name, arity)` as sealed if every implementation
    /// parameter type is sealed; returns the resulting sealed state.
    pub fn seal_group(
        &mut self,
        name: &str,
        arity: usize,
        registry: &TypeRegistry,
    ) -> Result<bool, SignatureError> {
        let key = SignatureKey::new(name, arity);
        let group = self
            .groups
            .get_mut(&key)
            .filter(|g| g.name == name)
            .ok_or_else(|| SignatureError::UnknownGroup {
                name: name.to_owned(),
                arity,
            })?;
        group.is_sealed = group
            .implementations
            .iter()
            .all(|imp| imp.params.iter().all(|&t| registry.is_sealed(t)));
        Ok(group.is_sealed)
    }

    /// Finds an implementation anywhere in the analyzer by id.
    #[must_use]
    pub fn implementation(&self, id: FunctionId) -> Option<&Implementation> {
        let key = self.locations.get(id.index())?;
        self.groups.get(key)?.implementation(id)
    }

    /// Iterates over all groups in key order.
    pub fn groups(&self) -> impl Iterator<Item = &SignatureGroup> {
        self.groups.values()
    }

    /// Aggregate statistics over the current groups.
    #[must_use]
    pub fn stats(&self) -> SignatureStats {
        let mut stats = SignatureStats {
            total_groups: self.groups.len(),
            ..SignatureStats::default()
        };
        for group in self.groups.values() {
            if group.is_sealed {
                stats.sealed_groups += 1;
            }
            stats.max_implementations = stats.max_implementations.max(group.len());
            stats.total_implementations += group.len();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeKind;

    fn registry_with_primitives() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        for name in ["int", "float", "string"] {
            registry.register(name, TypeKind::Primitive, &[]).unwrap();
        }
        registry
    }

    fn span_at(line: u32) -> SourceSpan {
        SourceSpan::new("test.poly", line * 100, line * 100 + 10, line, 1)
    }

    // --- Registration ---

    #[test]
    fn groups_form_per_name_and_arity() {
        let registry = registry_with_primitives();
        let int = registry.lookup("int").unwrap();
        let float = registry.lookup("float").unwrap();
        let mut analyzer = SignatureAnalyzer::new();

        analyzer
            .add_implementation(
                "add",
                "math",
                &[int, int],
                int,
                EffectSet::empty(),
                span_at(1),
                &registry,
            )
            .unwrap();
        analyzer
            .add_implementation(
                "add",
                "math",
                &[float, float],
                float,
                EffectSet::empty(),
                span_at(2),
                &registry,
            )
            .unwrap();
        analyzer
            .add_implementation(
                "add",
                "math",
                &[int, int, int],
                int,
                EffectSet::empty(),
                span_at(3),
                &registry,
            )
            .unwrap();

        assert_eq!(analyzer.group("add", 2).unwrap().len(), 2);
        assert_eq!(analyzer.group("add", 3).unwrap().len(), 1);
        assert!(analyzer.group("add", 4).is_none());
        assert!(analyzer.group("sub", 2).is_none());
    }

    #[test]
    fn exact_duplicate_is_rejected_but_cross_module_twin_is_not() {
        let registry = registry_with_primitives();
        let int = registry.lookup("int").unwrap();
        let mut analyzer = SignatureAnalyzer::new();

        analyzer
            .add_implementation(
                "add",
                "math",
                &[int, int],
                int,
                EffectSet::empty(),
                span_at(1),
                &registry,
            )
            .unwrap();
        let duplicate = analyzer.add_implementation(
            "add",
            "math",
            &[int, int],
            int,
            EffectSet::empty(),
            span_at(2),
            &registry,
        );
        assert!(matches!(
            duplicate,
            Err(SignatureError::DuplicateImplementation { .. })
        ));

        // Same signature from another module is allowed.
        analyzer
            .add_implementation(
                "add",
                "vectors",
                &[int, int],
                int,
                EffectSet::empty(),
                span_at(3),
                &registry,
            )
            .unwrap();
        assert_eq!(analyzer.group("add", 2).unwrap().len(), 2);
    }

    // --- Ordering and sealing ---

    #[test]
    fn implementations_sort_by_descending_specificity() {
        let mut registry = TypeRegistry::new();
        registry
            .register("Animal", TypeKind::TableOpen, &[])
            .unwrap();
        let animal = registry.lookup("Animal").unwrap();
        let dog = registry
            .register("Dog", TypeKind::TableSealed, &["Animal"])
            .unwrap();
        let mut analyzer = SignatureAnalyzer::new();

        analyzer
            .add_implementation(
                "speak",
                "zoo",
                &[animal],
                animal,
                EffectSet::empty(),
                span_at(1),
                &registry,
            )
            .unwrap();
        analyzer
            .add_implementation(
                "speak",
                "zoo",
                &[dog],
                animal,
                EffectSet::empty(),
                span_at(2),
                &registry,
            )
            .unwrap();

        let group = analyzer.group("speak", 1).unwrap();
        assert_eq!(group.implementations()[0].params(), &[dog]);
        assert_eq!(group.implementations()[1].params(), &[animal]);
    }

    #[test]
    fn sealing_reflects_parameter_kinds() {
        let mut registry = registry_with_primitives();
        registry
            .register("Animal", TypeKind::TableOpen, &[])
            .unwrap();
        let int = registry.lookup("int").unwrap();
        let animal = registry.lookup("Animal").unwrap();
        let mut analyzer = SignatureAnalyzer::new();

        analyzer
            .add_implementation(
                "f",
                "m",
                &[int],
                int,
                EffectSet::empty(),
                span_at(1),
                &registry,
            )
            .unwrap();
        assert!(analyzer.seal_group("f", 1, &registry).unwrap());

        analyzer
            .add_implementation(
                "g",
                "m",
                &[animal],
                int,
                EffectSet::empty(),
                span_at(2),
                &registry,
            )
            .unwrap();
        assert!(!analyzer.seal_group("g", 1, &registry).unwrap());
        assert!(matches!(
            analyzer.seal_group("missing", 1, &registry),
            Err(SignatureError::UnknownGroup { .. })
        ));
    }

    #[test]
    fn stats_track_groups_and_extremes() {
        let registry = registry_with_primitives();
        let int = registry.lookup("int").unwrap();
        let float = registry.lookup("float").unwrap();
        let string = registry.lookup("string").unwrap();
        let mut analyzer = SignatureAnalyzer::new();

        for (i, params) in [[int, int], [float, float], [string, string]]
            .iter()
            .enumerate()
        {
            analyzer
                .add_implementation(
                    "add",
                    "math",
                    params,
                    int,
                    EffectSet::empty(),
                    span_at(u32::try_from(i).unwrap() + 1),
                    &registry,
                )
                .unwrap();
        }
        analyzer
            .add_implementation(
                "sqrt",
                "math",
                &[float],
                float,
                EffectSet::empty(),
                span_at(9),
                &registry,
            )
            .unwrap();
        analyzer.seal_group("add", 2, &registry).unwrap();
        analyzer.seal_group("sqrt", 1, &registry).unwrap();

        let stats = analyzer.stats();
        assert_eq!(stats.total_groups, 2);
        assert_eq!(stats.sealed_groups, 2);
        assert_eq!(stats.max_implementations, 3);
        assert_eq!(stats.total_implementations, 4);
    }

    #[test]
    fn implementation_lookup_by_id() {
        let registry = registry_with_primitives();
        let int = registry.lookup("int").unwrap();
        let mut analyzer = SignatureAnalyzer::new();
        let id = analyzer
            .add_implementation(
                "add",
                "math",
                &[int, int],
                int,
                EffectSet::empty(),
                span_at(1),
                &registry,
            )
            .unwrap();
        let imp = analyzer.implementation(id).unwrap();
        assert_eq!(imp.qualified_name(), "math::add");
        assert_eq!(imp.arity(), 2);
    }
}
