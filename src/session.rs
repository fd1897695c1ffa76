//! The per-compilation session.
//!
//! A [`Session`] owns every mutable piece of the engine: type registry,
//! signature analyzer, diagnostic sink, built tables, and (optionally) the
//! build cache and profiler. Components hold no locks of their own; a driver
//! may run several sessions on parallel threads as long as each owns its own
//! `Session`, coordinating only through the on-disk cache.

use crate::cache::{BuildCacheManager, BuildMetrics};
use crate::classify::{CallSite, Classifier, DispatchDecision};
use crate::config::EngineConfig;
use crate::depgraph::{DependencyGraph, DependencyRelationship, strength_for};
use crate::diagnostics::{Diagnostic, DiagnosticSink, DuplicateImplementation};
use crate::error::{EngineError, SignatureError};
use crate::interface::{
    CompilationUnit, InterfaceCid, InterfaceElement, compute_interface_cid, extract_interface,
};
use crate::profiler::{DispatchProfiler, ProbeSite};
use crate::registry::{TypeKind, TypeRegistry};
use crate::signature::{EffectSet, SignatureAnalyzer, SignatureKey};
use crate::specificity::TieBreakPolicy;
use crate::table::{CompressedDispatchTable, Compressor, TableBuilder, lookup};
use crate::types::{FunctionId, SourceSpan, TypeId, UnitId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Interface-change report for a set of units.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InterfaceDelta {
    /// Units whose CID moved since the previous computation, with the new
    /// CID.
    pub changed: Vec<(UnitId, InterfaceCid)>,
    /// Downstream units invalidated by the changes.
    pub affected: Vec<UnitId>,
}

/// A compilation session: the single owner of all engine state.
#[derive(Debug)]
pub struct Session {
    config: EngineConfig,
    registry: TypeRegistry,
    signatures: SignatureAnalyzer,
    diagnostics: DiagnosticSink,
    classifier: Classifier,
    builder: TableBuilder,
    tables: BTreeMap<SignatureKey, Arc<CompressedDispatchTable>>,
    cache: Option<BuildCacheManager>,
    profiler: Option<DispatchProfiler>,
    previous_cids: BTreeMap<UnitId, InterfaceCid>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Session {
    /// Creates a session from a configuration.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let classifier = Classifier::new(config.classifier, config.tie_break_policy);
        let builder = TableBuilder::new(config.table);
        let cache = config.cache.clone().map(BuildCacheManager::new);
        let profiler = config.profiling.then(DispatchProfiler::default);
        Self {
            config,
            registry: TypeRegistry::new(),
            signatures: SignatureAnalyzer::new(),
            diagnostics: DiagnosticSink::new(),
            classifier,
            builder,
            tables: BTreeMap::new(),
            cache,
            profiler,
            previous_cids: BTreeMap::new(),
        }
    }

    /// Starts the session, opening the cache when one is configured.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if let Some(cache) = &mut self.cache {
            cache.start_session()?;
        }
        Ok(())
    }

    /// The session's type registry.
    #[must_use]
    pub const fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// The session's signature analyzer.
    #[must_use]
    pub const fn signatures(&self) -> &SignatureAnalyzer {
        &self.signatures
    }

    /// Diagnostics accumulated so far.
    #[must_use]
    pub const fn diagnostics(&self) -> &DiagnosticSink {
        &self.diagnostics
    }

    /// The attached profiler, when profiling is enabled.
    #[must_use]
    pub const fn profiler(&self) -> Option<&DispatchProfiler> {
        self.profiler.as_ref()
    }

    /// Registers a type. See [`TypeRegistry::register`].
    pub fn register_type(
        &mut self,
        name: &str,
        kind: TypeKind,
        supertypes: &[&str],
    ) -> Result<TypeId, EngineError> {
        Ok(self.registry.register(name, kind, supertypes)?)
    }

    /// Registers an implementation.
    ///
    /// Duplicate definitions are rejected *and* reported as a diagnostic, so
    /// the front-end can keep going.
    #[allow(clippy::too_many_arguments)]
    pub fn add_implementation(
        &mut self,
        name: &str,
        module: &str,
        params: &[TypeId],
        return_type: TypeId,
        effects: EffectSet,
        span: SourceSpan,
    ) -> Result<FunctionId, EngineError> {
        match self.signatures.add_implementation(
            name,
            module,
            params,
            return_type,
            effects,
            span,
            &self.registry,
        ) {
            Ok(id) => Ok(id),
            Err(err) => {
                if let SignatureError::DuplicateImplementation { name, module, span } = &err {
                    self.diagnostics
                        .push(Diagnostic::Duplicate(DuplicateImplementation {
                            qualified_name: format!("{module}::{name}"),
                            span: span.clone(),
                        }));
                }
                Err(err.into())
            }
        }
    }

    /// Seals the group for `(name, arity)`.
    pub fn seal_group(&mut self, name: &str, arity: usize) -> Result<bool, EngineError> {
        Ok(self.signatures.seal_group(name, arity, &self.registry)?)
    }

    /// Analyzes one call site and returns its dispatch decision.
    ///
    /// Dynamic decisions also build (or fetch from cache) the group's
    /// compressed dispatch table, retrievable via [`Session::table`].
    pub fn analyze_call(
        &mut self,
        name: &str,
        arg_types: &[TypeId],
        span: SourceSpan,
        caller_module: Option<&str>,
    ) -> Result<DispatchDecision, EngineError> {
        let site = CallSite {
            name: name.to_owned(),
            arg_types: arg_types.to_vec(),
            span,
            caller_module: caller_module.map(str::to_owned),
        };
        let decision = self.classifier.classify(
            &site,
            self.signatures.group(name, arg_types.len()),
            &self.registry,
            &mut self.diagnostics,
        );
        if let DispatchDecision::Dynamic { table, .. } = &decision {
            self.ensure_table(*table, name, arg_types.len())?;
        }
        Ok(decision)
    }

    /// The built table for a signature key, when one exists.
    #[must_use]
    pub fn table(&self, key: SignatureKey) -> Option<&Arc<CompressedDispatchTable>> {
        self.tables.get(&key)
    }

    /// Runtime lookup entry point: resolves argument types against a table,
    /// recording the dispatch with the profiler when one is attached.
    pub fn runtime_lookup(
        &mut self,
        table: &CompressedDispatchTable,
        args: &[TypeId],
    ) -> Option<u32> {
        let entry = lookup(table, args, &self.registry);
        if let Some(profiler) = &mut self.profiler {
            profiler.record_dispatch(
                ProbeSite {
                    signature: table.signature_name.clone(),
                    location: None,
                },
                args,
                entry,
            );
        }
        entry
    }

    fn ensure_table(
        &mut self,
        key: SignatureKey,
        name: &str,
        arity: usize,
    ) -> Result<(), EngineError> {
        if self.tables.contains_key(&key) {
            return Ok(());
        }
        let Some(group) = self.signatures.group(name, arity) else {
            return Ok(());
        };
        let registry = &self.registry;
        let builder = self.builder;
        let build = || {
            let table = builder.build(group, registry);
            Compressor::new().compress(group, &table, registry)
        };

        let table = if let Some(cache) = &mut self.cache {
            let type_signature: Vec<TypeId> = group
                .implementations()
                .iter()
                .flat_map(|imp| imp.params().iter().copied())
                .collect();
            cache.get_or_build_dispatch_table(name, &type_signature, build)?
        } else {
            Arc::new(build())
        };
        self.tables.insert(key, table);
        Ok(())
    }

    /// Extracts a unit's public interface elements.
    #[must_use]
    pub fn extract_interface(&self, unit: &CompilationUnit) -> Vec<InterfaceElement> {
        extract_interface(unit)
    }

    /// Computes a unit's interface CID.
    #[must_use]
    pub fn compute_interface_cid(&self, unit: &CompilationUnit) -> InterfaceCid {
        compute_interface_cid(unit)
    }

    /// Builds the dependency graph over a set of units, deriving
    /// module-import edges from each unit's import list.
    pub fn build_dependency_graph(
        &self,
        units: &[CompilationUnit],
    ) -> Result<DependencyGraph, EngineError> {
        let mut graph = DependencyGraph::new();
        for unit in units {
            graph.add_unit(unit.id);
        }
        for unit in units {
            for &import in &unit.imports {
                graph.add_dependency(DependencyRelationship {
                    source: unit.id,
                    target: import,
                    kind: crate::depgraph::DependencyKind::ModuleImport,
                    details: format!("import of {import}"),
                    strength: strength_for(crate::depgraph::DependencyKind::ModuleImport, false),
                    span: None,
                })?;
            }
        }
        Ok(graph)
    }

    /// Recomputes interface CIDs and reports the changed units plus the
    /// downstream units they invalidate.
    pub fn interface_delta(
        &mut self,
        units: &[CompilationUnit],
        graph: &DependencyGraph,
    ) -> InterfaceDelta {
        let mut changed = Vec::new();
        for unit in units {
            let cid = compute_interface_cid(unit);
            if self.previous_cids.insert(unit.id, cid) != Some(cid) {
                changed.push((unit.id, cid));
            }
        }
        let changed_ids: Vec<UnitId> = changed.iter().map(|(id, _)| *id).collect();
        InterfaceDelta {
            affected: graph.affected_dependents(&changed_ids),
            changed,
        }
    }

    /// Validates dependency files through the cache manager.
    ///
    /// Without a cache, every dependency counts as changed.
    pub fn validate_dependencies(
        &mut self,
        file: &std::path::Path,
        dependencies: &[std::path::PathBuf],
    ) -> Vec<std::path::PathBuf> {
        match &mut self.cache {
            Some(cache) => cache.validate_dependencies(file, dependencies),
            None => dependencies.to_vec(),
        }
    }

    /// The error the driver should exit with, when dispatch analysis failed
    /// anywhere.
    #[must_use]
    pub fn dispatch_error(&self) -> Option<EngineError> {
        let errors = self.diagnostics.error_count();
        (errors > 0).then_some(EngineError::DispatchFailed(errors))
    }

    /// Ends the session: flushes the cache and returns the build metrics.
    pub fn finish(&mut self) -> Result<BuildMetrics, EngineError> {
        match &mut self.cache {
            Some(cache) => Ok(cache.end_session()?),
            None => Ok(BuildMetrics::default()),
        }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The tie-break policy in effect.
    #[must_use]
    pub const fn tie_break_policy(&self) -> TieBreakPolicy {
        self.config.tie_break_policy
    }
}
