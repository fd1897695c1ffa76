//! Static-dispatch classification of call sites.
//!
//! For every call the classifier decides: fold to a direct call (the group is
//! sealed, the arguments are sealed, resolution is unique), go through a
//! dynamic dispatch structure, or fail with a diagnostic. Dynamic calls get a
//! strategy and cycle-cost estimate by implementation count, and costly
//! dispatches emit performance hints into the sink.

use crate::diagnostics::{
    Diagnostic, DiagnosticId, DiagnosticSink, PerformanceHint, Severity, report_ambiguous,
    report_no_match,
};
use crate::registry::TypeRegistry;
use crate::signature::{SignatureGroup, SignatureKey};
use crate::specificity::{Resolution, TieBreakPolicy, resolve};
use crate::types::{FunctionId, SourceSpan, TypeId};
use serde::{Deserialize, Serialize};

/// Thresholds for the classifier's cost model, in estimated cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Costs below this emit an informational hint for dynamic calls.
    pub max_static_cost: u32,
    /// Costs at or above this emit a warning.
    pub warning_threshold: u32,
    /// Costs at or above this emit an error-severity hint.
    pub max_dynamic_cost: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_static_cost: 5,
            warning_threshold: 20,
            max_dynamic_cost: 50,
        }
    }
}

/// A call site under analysis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    /// The called signature name.
    pub name: String,
    /// Static argument types at the call.
    pub arg_types: Vec<TypeId>,
    /// Location of the call.
    pub span: SourceSpan,
    /// Module containing the call, for tie-breaking.
    pub caller_module: Option<String>,
}

/// Sub-tier of a statically folded call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StaticTier {
    /// Pure, arity ≤ 2: candidate for inlining. ~0 cycles.
    InlinedCall,
    /// Arity ≤ 4: specialized entry point. ~1 cycle.
    SpecializedCall,
    /// Plain direct call. ~2 cycles.
    DirectCall,
}

impl StaticTier {
    /// Estimated call cost in cycles.
    #[must_use]
    pub const fn estimated_cost(self) -> u32 {
        match self {
            Self::InlinedCall => 0,
            Self::SpecializedCall => 1,
            Self::DirectCall => 2,
        }
    }
}

/// Strategy for a dynamically dispatched group, chosen by implementation
/// count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchStrategy {
    /// ≤ 3 implementations: scan them in order.
    LinearSearch,
    /// ≤ 10 implementations: predicate decision tree.
    DecisionTree,
    /// ≤ 50 implementations: hash on the argument type combination.
    HashTable,
    /// > 50 implementations: compressed dispatch table.
    CompressedTable,
}

impl DispatchStrategy {
    /// Chooses the strategy for an implementation count.
    #[must_use]
    pub const fn for_count(n: usize) -> Self {
        match n {
            0..=3 => Self::LinearSearch,
            4..=10 => Self::DecisionTree,
            11..=50 => Self::HashTable,
            _ => Self::CompressedTable,
        }
    }

    /// Estimated dispatch cost in cycles for `n` implementations.
    #[must_use]
    pub fn estimated_cost(self, n: usize) -> u32 {
        let n32 = u32::try_from(n).unwrap_or(u32::MAX);
        match self {
            Self::LinearSearch => 3 * n32,
            Self::DecisionTree => 5 * n32.max(1).next_power_of_two().trailing_zeros().max(1),
            Self::HashTable => 15,
            Self::CompressedTable => 25,
        }
    }

    /// Rendered name, as used in performance hints.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LinearSearch => "linear_search",
            Self::DecisionTree => "decision_tree",
            Self::HashTable => "hash_table",
            Self::CompressedTable => "compressed_table",
        }
    }
}

/// Cache-friendliness rating of a dispatch strategy at a given size.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum CacheEfficiency {
    /// Fits in a cache line or two.
    Excellent,
    /// Compact working set.
    Good,
    /// Pointer-chasing or a hash probe per dispatch.
    #[default]
    Moderate,
    /// Large working set; expect misses.
    Poor,
}

impl CacheEfficiency {
    /// Rates a strategy for `n` implementations.
    #[must_use]
    pub const fn rate(strategy: DispatchStrategy, n: usize) -> Self {
        match strategy {
            DispatchStrategy::LinearSearch => Self::Excellent,
            DispatchStrategy::DecisionTree => Self::Good,
            DispatchStrategy::HashTable => Self::Moderate,
            DispatchStrategy::CompressedTable => {
                if n > 500 {
                    Self::Poor
                } else {
                    Self::Moderate
                }
            }
        }
    }
}

/// The classifier's verdict for one call site.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchDecision {
    /// The call folds to a direct call of one implementation.
    Static {
        /// The selected implementation.
        function: FunctionId,
        /// Sub-tier of the fold.
        tier: StaticTier,
        /// Estimated cost in cycles.
        estimated_cost: u32,
    },
    /// The call goes through a runtime dispatch structure.
    Dynamic {
        /// Chosen strategy.
        strategy: DispatchStrategy,
        /// Estimated cost in cycles.
        estimated_cost: u32,
        /// Cache-friendliness rating.
        cache_efficiency: CacheEfficiency,
        /// Key of the signature group whose table serves this call.
        table: SignatureKey,
    },
    /// Dispatch analysis failed; the diagnostic is in the session sink.
    Error {
        /// Handle of the emitted diagnostic.
        diagnostic: DiagnosticId,
    },
}

impl DispatchDecision {
    /// Whether the call folded to a static target.
    #[must_use]
    pub const fn is_static(&self) -> bool {
        matches!(self, Self::Static { .. })
    }
}

/// Classifies call sites against analyzed signature groups.
#[derive(Clone, Copy, Debug, Default)]
pub struct Classifier {
    config: ClassifierConfig,
    policy: TieBreakPolicy,
}

impl Classifier {
    /// Creates a classifier with the given thresholds and tie-break policy.
    #[must_use]
    pub const fn new(config: ClassifierConfig, policy: TieBreakPolicy) -> Self {
        Self { config, policy }
    }

    /// Classifies one call site.
    ///
    /// `group` is the signature group for `(site.name, site.arg_types.len())`
    /// if one exists; `None` always produces a no-match error.
    pub fn classify(
        &self,
        site: &CallSite,
        group: Option<&SignatureGroup>,
        registry: &TypeRegistry,
        sink: &mut DiagnosticSink,
    ) -> DispatchDecision {
        let Some(group) = group else {
            let record =
                report_no_match(&site.name, &site.arg_types, site.span.clone(), &[], registry);
            let diagnostic = sink.push(Diagnostic::NoMatch(record));
            return DispatchDecision::Error { diagnostic };
        };

        let resolution = resolve(
            group,
            &site.arg_types,
            registry,
            self.policy,
            site.caller_module.as_deref(),
        );

        match resolution {
            Resolution::Unique {
                implementation, ..
            } => {
                let all_sealed =
                    site.arg_types.iter().all(|&t| registry.is_sealed(t));
                if group.is_sealed() && all_sealed {
                    let tier = if implementation.effects().is_pure() && implementation.arity() <= 2
                    {
                        StaticTier::InlinedCall
                    } else if implementation.arity() <= 4 {
                        StaticTier::SpecializedCall
                    } else {
                        StaticTier::DirectCall
                    };
                    return DispatchDecision::Static {
                        function: implementation.id(),
                        tier,
                        estimated_cost: tier.estimated_cost(),
                    };
                }
                self.dynamic_decision(site, group, sink)
            }
            Resolution::Ambiguous(candidates) => {
                let record = report_ambiguous(
                    &site.name,
                    &site.arg_types,
                    site.span.clone(),
                    &candidates,
                    registry,
                );
                let diagnostic = sink.push(Diagnostic::Ambiguous(record));
                DispatchDecision::Error { diagnostic }
            }
            Resolution::NoMatch => {
                let record = report_no_match(
                    &site.name,
                    &site.arg_types,
                    site.span.clone(),
                    group.implementations(),
                    registry,
                );
                let diagnostic = sink.push(Diagnostic::NoMatch(record));
                DispatchDecision::Error { diagnostic }
            }
        }
    }

    fn dynamic_decision(
        &self,
        site: &CallSite,
        group: &SignatureGroup,
        sink: &mut DiagnosticSink,
    ) -> DispatchDecision {
        let n = group.len();
        let strategy = DispatchStrategy::for_count(n);
        let estimated_cost = strategy.estimated_cost(n);
        let cache_efficiency = CacheEfficiency::rate(strategy, n);

        let hint_severity = if estimated_cost >= self.config.max_dynamic_cost {
            Some(Severity::Error)
        } else if estimated_cost >= self.config.warning_threshold {
            Some(Severity::Warning)
        } else if estimated_cost < self.config.max_static_cost {
            Some(Severity::Info)
        } else {
            None
        };
        if let Some(severity) = hint_severity {
            sink.push(Diagnostic::Performance(PerformanceHint {
                signature_name: site.name.clone(),
                call_site: site.span.clone(),
                estimated_cost,
                strategy: strategy.as_str().to_owned(),
                severity,
            }));
        }

        DispatchDecision::Dynamic {
            strategy,
            estimated_cost,
            cache_efficiency,
            table: group.key(),
        }
    }
}
