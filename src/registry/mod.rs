//! Type registry and subtype lattice.
//!
//! Canonical typing for a compilation session: interned [`TypeId`]s, type
//! kinds, sub/supertype queries, and precomputed specificity scores.
//!
//! The subtype relation is a DAG rooted at the universal `Any` type. It is
//! stored as a per-type ancestor bitset computed at registration, which makes
//! [`TypeRegistry::is_subtype`] O(1) and makes supertype cycles impossible by
//! construction: a type can only name already-registered supertypes.

use crate::error::RegistryError;
use crate::types::TypeId;
use crate::util::DetHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// The kind of a registered type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    /// Built-in scalar. Always a sealed leaf: no proper subtypes.
    Primitive,
    /// A table (record) type whose subtype set is closed.
    TableSealed,
    /// A table (record) type open to downstream subtyping.
    TableOpen,
    /// A closed sum of variants.
    Variant,
    /// A generic parameter placeholder.
    Generic,
}

impl TypeKind {
    /// Whether every subtype of a type of this kind is known at compile time.
    #[must_use]
    pub const fn is_sealed(self) -> bool {
        matches!(self, Self::Primitive | Self::TableSealed | Self::Variant)
    }

    /// Specificity contribution of this kind, added on top of the most
    /// specific supertype's score.
    ///
    /// Strictly positive for every kind, which is what keeps scores monotone:
    /// a subtype always scores higher than each of its supertypes.
    const fn score_step(self) -> u32 {
        match self {
            Self::Primitive => 40,
            Self::TableSealed => 30,
            Self::Variant => 25,
            Self::TableOpen => 10,
            Self::Generic => 5,
        }
    }
}

/// A registered type: name, kind, declared supertypes, and derived data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypeInfo {
    id: TypeId,
    name: String,
    kind: TypeKind,
    supertypes: SmallVec<[TypeId; 2]>,
    /// Bitset over type indices: every ancestor, plus the type itself.
    ancestors: AncestorSet,
    /// Longest supertype chain down from `Any`.
    depth: u32,
    specificity_score: u32,
}

impl TypeInfo {
    /// The type's interned id.
    #[must_use]
    pub const fn id(&self) -> TypeId {
        self.id
    }

    /// The type's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type's kind.
    #[must_use]
    pub const fn kind(&self) -> TypeKind {
        self.kind
    }

    /// The immediate declared supertypes.
    #[must_use]
    pub fn supertypes(&self) -> &[TypeId] {
        &self.supertypes
    }

    /// Precomputed specificity score. Monotone: more specific types score
    /// strictly higher than their supertypes.
    #[must_use]
    pub const fn specificity_score(&self) -> u32 {
        self.specificity_score
    }

    /// Longest chain of supertypes between this type and `Any`.
    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }
}

/// Dense bitset over type indices.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct AncestorSet {
    blocks: SmallVec<[u64; 4]>,
}

impl AncestorSet {
    fn insert(&mut self, index: usize) {
        let block = index / 64;
        if block >= self.blocks.len() {
            self.blocks.resize(block + 1, 0);
        }
        self.blocks[block] |= 1 << (index % 64);
    }

    fn contains(&self, index: usize) -> bool {
        let block = index / 64;
        self.blocks
            .get(block)
            .is_some_and(|bits| bits & (1 << (index % 64)) != 0)
    }

    fn union_with(&mut self, other: &Self) {
        if other.blocks.len() > self.blocks.len() {
            self.blocks.resize(other.blocks.len(), 0);
        }
        for (dst, src) in self.blocks.iter_mut().zip(other.blocks.iter()) {
            *dst |= src;
        }
    }
}

/// The per-session type registry.
///
/// `Any` is registered at construction as the root of the lattice; every
/// other type is (transitively) its subtype. Primitives should be registered
/// first, before any open types reference them.
#[derive(Clone, Debug)]
pub struct TypeRegistry {
    types: Vec<TypeInfo>,
    by_name: DetHashMap<String, TypeId>,
    any: TypeId,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// The name of the universal root type.
    pub const ANY: &'static str = "Any";

    /// Creates a registry with `Any` pre-registered as the lattice root.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            types: Vec::new(),
            by_name: DetHashMap::default(),
            any: TypeId::from_index(0),
        };
        let any = registry
            .register_unchecked(Self::ANY, TypeKind::TableOpen, SmallVec::new())
            .expect("registering Any into an empty registry cannot fail");
        registry.any = any;
        registry
    }

    /// The universal root type.
    #[must_use]
    pub const fn any(&self) -> TypeId {
        self.any
    }

    /// Number of registered types, including `Any`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether only `Any` is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.len() <= 1
    }

    /// Registers a type and returns its interned id.
    ///
    /// `supertypes` must already be registered; an empty list means the type
    /// sits directly under `Any`. Primitives cannot appear as supertypes.
    pub fn register(
        &mut self,
        name: &str,
        kind: TypeKind,
        supertypes: &[&str],
    ) -> Result<TypeId, RegistryError> {
        if self.by_name.contains_key(name) {
            return Err(RegistryError::DuplicateType(name.to_owned()));
        }
        let mut supers: SmallVec<[TypeId; 2]> = SmallVec::new();
        for &super_name in supertypes {
            let id = self
                .lookup(super_name)
                .ok_or_else(|| RegistryError::UnknownSupertype {
                    name: name.to_owned(),
                    supertype: super_name.to_owned(),
                })?;
            if self.types[id.index()].kind == TypeKind::Primitive {
                return Err(RegistryError::PrimitiveSupertype {
                    name: name.to_owned(),
                    supertype: super_name.to_owned(),
                });
            }
            supers.push(id);
        }
        if supers.is_empty() {
            supers.push(self.any);
        }
        self.register_unchecked(name, kind, supers)
    }

    fn register_unchecked(
        &mut self,
        name: &str,
        kind: TypeKind,
        supertypes: SmallVec<[TypeId; 2]>,
    ) -> Result<TypeId, RegistryError> {
        let index = u32::try_from(self.types.len()).expect("type arena exceeds u32 index space");
        let id = TypeId::from_index(index);

        let mut ancestors = AncestorSet::default();
        ancestors.insert(id.index());
        let mut depth = 0;
        let mut base_score = 0;
        for &sup in &supertypes {
            let info = &self.types[sup.index()];
            ancestors.union_with(&info.ancestors);
            depth = depth.max(info.depth + 1);
            base_score = base_score.max(info.specificity_score);
        }
        let specificity_score = if supertypes.is_empty() {
            // Only Any takes this path; the root scores zero.
            0
        } else {
            base_score + kind.score_step()
        };

        self.types.push(TypeInfo {
            id,
            name: name.to_owned(),
            kind,
            supertypes,
            ancestors,
            depth,
            specificity_score,
        });
        self.by_name.insert(name.to_owned(), id);
        Ok(id)
    }

    /// Looks up a type by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    /// Returns the info record for a type id.
    #[must_use]
    pub fn info(&self, id: TypeId) -> Option<&TypeInfo> {
        self.types.get(id.index())
    }

    /// Returns the type's name, or a placeholder for foreign ids.
    #[must_use]
    pub fn type_name(&self, id: TypeId) -> &str {
        self.info(id).map_or("<unknown>", TypeInfo::name)
    }

    /// Reflexive, transitive subtype query: is `a` a subtype of `b`?
    ///
    /// O(1) amortized via the ancestor bitset computed at registration.
    #[must_use]
    pub fn is_subtype(&self, a: TypeId, b: TypeId) -> bool {
        self.types
            .get(a.index())
            .is_some_and(|info| info.ancestors.contains(b.index()))
    }

    /// Precomputed specificity score of a type. Unregistered ids score zero.
    #[must_use]
    pub fn specificity_score(&self, id: TypeId) -> u32 {
        self.info(id).map_or(0, TypeInfo::specificity_score)
    }

    /// Whether the type's subtype set is fully known at compile time.
    #[must_use]
    pub fn is_sealed(&self, id: TypeId) -> bool {
        self.info(id).is_some_and(|info| info.kind.is_sealed())
    }

    /// Whether any registered type is a proper subtype of `id`.
    ///
    /// Linear in the registry; intended for table construction, not for the
    /// dispatch hot path.
    #[must_use]
    pub fn has_proper_subtypes(&self, id: TypeId) -> bool {
        self.types
            .iter()
            .any(|info| info.id != id && info.ancestors.contains(id.index()))
    }

    /// Iterates over every registered type in id order.
    pub fn iter(&self) -> impl Iterator<Item = &TypeInfo> {
        self.types.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn animal_registry() -> (TypeRegistry, TypeId, TypeId, TypeId) {
        let mut registry = TypeRegistry::new();
        let animal = registry
            .register("Animal", TypeKind::TableOpen, &[])
            .unwrap();
        let dog = registry
            .register("Dog", TypeKind::TableSealed, &["Animal"])
            .unwrap();
        let cat = registry
            .register("Cat", TypeKind::TableSealed, &["Animal"])
            .unwrap();
        (registry, animal, dog, cat)
    }

    // --- Lattice structure ---

    #[test]
    fn any_is_the_universal_supertype() {
        let (registry, animal, dog, _) = animal_registry();
        let any = registry.any();
        assert!(registry.is_subtype(animal, any));
        assert!(registry.is_subtype(dog, any));
        assert!(registry.is_subtype(any, any));
    }

    #[test]
    fn subtype_is_reflexive() {
        let (registry, animal, dog, cat) = animal_registry();
        for id in [animal, dog, cat] {
            assert!(registry.is_subtype(id, id));
        }
    }

    #[test]
    fn subtype_is_transitive() {
        let mut registry = TypeRegistry::new();
        registry
            .register("Animal", TypeKind::TableOpen, &[])
            .unwrap();
        registry
            .register("Dog", TypeKind::TableOpen, &["Animal"])
            .unwrap();
        let puppy = registry
            .register("Puppy", TypeKind::TableSealed, &["Dog"])
            .unwrap();
        let animal = registry.lookup("Animal").unwrap();
        assert!(registry.is_subtype(puppy, animal));
    }

    #[test]
    fn siblings_are_unrelated() {
        let (registry, _, dog, cat) = animal_registry();
        assert!(!registry.is_subtype(dog, cat));
        assert!(!registry.is_subtype(cat, dog));
    }

    #[test]
    fn diamond_ancestry_reaches_both_parents() {
        let mut registry = TypeRegistry::new();
        registry
            .register("Flying", TypeKind::TableOpen, &[])
            .unwrap();
        registry
            .register("Swimming", TypeKind::TableOpen, &[])
            .unwrap();
        let duck = registry
            .register("Duck", TypeKind::TableSealed, &["Flying", "Swimming"])
            .unwrap();
        let flying = registry.lookup("Flying").unwrap();
        let swimming = registry.lookup("Swimming").unwrap();
        assert!(registry.is_subtype(duck, flying));
        assert!(registry.is_subtype(duck, swimming));
        assert!(!registry.is_subtype(flying, swimming));
    }

    // --- Registration errors ---

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = TypeRegistry::new();
        registry.register("int", TypeKind::Primitive, &[]).unwrap();
        let err = registry.register("int", TypeKind::Primitive, &[]);
        assert!(matches!(err, Err(RegistryError::DuplicateType(_))));
    }

    #[test]
    fn primitives_cannot_be_supertypes() {
        let mut registry = TypeRegistry::new();
        registry.register("int", TypeKind::Primitive, &[]).unwrap();
        let err = registry.register("MyInt", TypeKind::TableSealed, &["int"]);
        assert!(matches!(err, Err(RegistryError::PrimitiveSupertype { .. })));
    }

    #[test]
    fn unknown_supertype_is_rejected() {
        let mut registry = TypeRegistry::new();
        let err = registry.register("Dog", TypeKind::TableSealed, &["Animal"]);
        assert!(matches!(err, Err(RegistryError::UnknownSupertype { .. })));
    }

    // --- Scores and sealing ---

    #[test]
    fn scores_are_monotone_down_the_lattice() {
        let (registry, animal, dog, _) = animal_registry();
        let any = registry.any();
        assert!(registry.specificity_score(animal) > registry.specificity_score(any));
        assert!(registry.specificity_score(dog) > registry.specificity_score(animal));
    }

    #[test]
    fn primitives_outscore_open_tables_at_the_same_depth() {
        let mut registry = TypeRegistry::new();
        let int = registry.register("int", TypeKind::Primitive, &[]).unwrap();
        let table = registry
            .register("Config", TypeKind::TableOpen, &[])
            .unwrap();
        assert!(registry.specificity_score(int) > registry.specificity_score(table));
    }

    #[test]
    fn sealing_follows_kind() {
        let (registry, animal, dog, _) = animal_registry();
        assert!(registry.is_sealed(dog));
        assert!(!registry.is_sealed(animal));
        assert!(!registry.is_sealed(registry.any()));
    }
}
