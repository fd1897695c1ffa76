//! Typed dependency graph between compilation units.
//!
//! Vertices are units, edges are semantic dependency relationships with a
//! kind and a strength. Topological order uses Kahn's algorithm with a
//! `BTreeSet` frontier keyed on unit id, so the order is stable for a fixed
//! graph regardless of insertion order; cycles surface as
//! [`GraphError::CircularDependency`] carrying the unresolved edges.

use crate::error::GraphError;
use crate::types::{SourceSpan, UnitId};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The semantic kind of a dependency edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyKind {
    /// The source's public interface mentions the target.
    Interface,
    /// The source uses a type the target defines.
    TypeDefinition,
    /// The source references a symbol the target defines.
    SymbolReference,
    /// The source imports the target as a module.
    ModuleImport,
    /// Reached only transitively.
    Transitive,
}

/// How strongly a dependency binds rebuilds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DependencyStrength {
    /// Any target change invalidates the source.
    Critical,
    /// Most target changes invalidate the source.
    Strong,
    /// Implementation-level coupling.
    Moderate,
    /// Transitive coupling only.
    Weak,
    /// Never invalidates.
    Optional,
}

/// Computes the strength of an edge from its kind and whether the dependency
/// appears in the source's public interface.
#[must_use]
pub const fn strength_for(kind: DependencyKind, in_public_interface: bool) -> DependencyStrength {
    if in_public_interface {
        return DependencyStrength::Critical;
    }
    match kind {
        DependencyKind::Interface => DependencyStrength::Critical,
        DependencyKind::ModuleImport => DependencyStrength::Strong,
        DependencyKind::TypeDefinition | DependencyKind::SymbolReference => {
            DependencyStrength::Moderate
        }
        DependencyKind::Transitive => DependencyStrength::Weak,
    }
}

/// A typed dependency edge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRelationship {
    /// The depending unit.
    pub source: UnitId,
    /// The unit depended upon.
    pub target: UnitId,
    /// Semantic kind.
    pub kind: DependencyKind,
    /// Human-readable detail (the symbol or type involved).
    pub details: String,
    /// Invalidation strength.
    pub strength: DependencyStrength,
    /// Where in the source the dependency arises, when known.
    pub span: Option<SourceSpan>,
}

/// The dependency graph of a compilation.
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<UnitId, DependencyRelationship>,
    nodes: BTreeMap<UnitId, NodeIndex>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a unit vertex. Idempotent.
    pub fn add_unit(&mut self, unit: UnitId) {
        self.nodes
            .entry(unit)
            .or_insert_with(|| self.graph.add_node(unit));
    }

    /// Whether the unit is present.
    #[must_use]
    pub fn contains(&self, unit: UnitId) -> bool {
        self.nodes.contains_key(&unit)
    }

    /// Number of units.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Adds a dependency edge. Both endpoints must already be added.
    pub fn add_dependency(&mut self, relationship: DependencyRelationship) -> Result<(), GraphError> {
        let source = *self
            .nodes
            .get(&relationship.source)
            .ok_or(GraphError::UnknownUnit(relationship.source))?;
        let target = *self
            .nodes
            .get(&relationship.target)
            .ok_or(GraphError::UnknownUnit(relationship.target))?;
        self.graph.add_edge(source, target, relationship);
        Ok(())
    }

    /// Units the given unit directly depends on, sorted by id.
    #[must_use]
    pub fn dependencies(&self, unit: UnitId) -> Vec<UnitId> {
        self.neighbors(unit, Direction::Outgoing)
    }

    /// Units that directly depend on the given unit, sorted by id.
    #[must_use]
    pub fn dependents(&self, unit: UnitId) -> Vec<UnitId> {
        self.neighbors(unit, Direction::Incoming)
    }

    fn neighbors(&self, unit: UnitId, direction: Direction) -> Vec<UnitId> {
        let Some(&index) = self.nodes.get(&unit) else {
            return Vec::new();
        };
        let mut out: BTreeSet<UnitId> = self
            .graph
            .neighbors_directed(index, direction)
            .map(|n| self.graph[n])
            .collect();
        out.remove(&unit);
        out.into_iter().collect()
    }

    /// Topological order, dependencies first.
    ///
    /// Kahn's algorithm with a smallest-unit-id frontier: the order is a
    /// pure function of the graph. Cycles raise
    /// [`GraphError::CircularDependency`] with every unresolved edge.
    pub fn topological_order(&self) -> Result<Vec<UnitId>, GraphError> {
        // Remaining out-degree counts dependencies not yet emitted.
        let mut remaining: BTreeMap<UnitId, usize> = BTreeMap::new();
        for (&unit, &index) in &self.nodes {
            let degree = self
                .graph
                .neighbors_directed(index, Direction::Outgoing)
                .filter(|&n| self.graph[n] != unit)
                .collect::<BTreeSet<_>>()
                .len();
            remaining.insert(unit, degree);
        }

        let mut frontier: BTreeSet<UnitId> = remaining
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&u, _)| u)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(&unit) = frontier.iter().next() {
            frontier.remove(&unit);
            remaining.remove(&unit);
            order.push(unit);
            let index = self.nodes[&unit];
            let dependents: BTreeSet<UnitId> = self
                .graph
                .neighbors_directed(index, Direction::Incoming)
                .map(|n| self.graph[n])
                .collect();
            for dependent in dependents {
                if let Some(degree) = remaining.get_mut(&dependent) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        frontier.insert(dependent);
                    }
                }
            }
        }

        if order.len() == self.nodes.len() {
            return Ok(order);
        }

        // Every edge between unemitted units participates in a cycle chain.
        let stuck: BTreeSet<UnitId> = remaining.keys().copied().collect();
        let mut cycle_edges: Vec<(UnitId, UnitId)> = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (s, t) = self.graph.edge_endpoints(e)?;
                let (s, t) = (self.graph[s], self.graph[t]);
                (stuck.contains(&s) && stuck.contains(&t)).then_some((s, t))
            })
            .collect();
        cycle_edges.sort_unstable();
        cycle_edges.dedup();
        tracing::warn!(edges = cycle_edges.len(), "circular dependency detected");
        Err(GraphError::CircularDependency { cycle_edges })
    }

    /// Units transitively invalidated when any of `changed` changes.
    ///
    /// Walks dependent edges, ignoring [`DependencyStrength::Optional`]
    /// edges, and returns the affected units sorted by id (the changed units
    /// themselves excluded).
    #[must_use]
    pub fn affected_dependents(&self, changed: &[UnitId]) -> Vec<UnitId> {
        let mut affected: BTreeSet<UnitId> = BTreeSet::new();
        let mut work: Vec<UnitId> = changed.to_vec();
        while let Some(unit) = work.pop() {
            let Some(&index) = self.nodes.get(&unit) else {
                continue;
            };
            let incoming: Vec<(UnitId, DependencyStrength)> = self
                .graph
                .edge_indices()
                .filter_map(|e| {
                    let (s, t) = self.graph.edge_endpoints(e)?;
                    (t == index).then(|| (self.graph[s], self.graph[e].strength))
                })
                .collect();
            for (dependent, strength) in incoming {
                if strength == DependencyStrength::Optional {
                    continue;
                }
                if !changed.contains(&dependent) && affected.insert(dependent) {
                    work.push(dependent);
                }
            }
        }
        affected.into_iter().collect()
    }

    /// All edges, for diagnostics.
    pub fn edges(&self) -> impl Iterator<Item = &DependencyRelationship> {
        self.graph.edge_weights()
    }
}
