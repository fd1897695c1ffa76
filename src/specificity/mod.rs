//! Specificity analysis: choosing among applicable implementations.
//!
//! Given a call's argument types, the analyzer filters a signature group to
//! the applicable implementations, orders them by pairwise specificity, and
//! reduces the minimal (most specific) set to a [`Resolution`].
//!
//! Everything here is a pure function of its inputs. Candidate iteration
//! follows the group's stored order (descending specificity rank, then
//! registration id), never hash-map iteration order, so results are
//! bit-identical across runs.

use crate::registry::TypeRegistry;
use crate::signature::{Implementation, SignatureGroup};
use crate::types::TypeId;
use serde::{Deserialize, Serialize};

/// Policy for specificity ties among minimal candidates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakPolicy {
    /// Any tie among minimal candidates is ambiguous and reported.
    #[default]
    Strict,
    /// Apply the ordered tie-breaks: caller module, stricter effect set,
    /// lexical order. The applied rule is recorded on the resolution, never
    /// silently.
    PreferLocal,
}

/// The tie-break rule that produced a unique resolution, when one fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TieBreakRule {
    /// The candidate defined in the calling unit's module won.
    CallerModule,
    /// The candidate with the strictest effect set won.
    StricterEffects,
    /// Deterministic lexical order (source span) decided.
    LexicalOrder,
}

/// Result of specificity analysis for one call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// Exactly one most-specific applicable implementation.
    Unique {
        /// The selected implementation.
        implementation: &'a Implementation,
        /// The tie-break rule that decided, if specificity alone did not.
        tie_break: Option<TieBreakRule>,
    },
    /// Two or more minimal, incomparable candidates.
    Ambiguous(Vec<&'a Implementation>),
    /// No applicable implementation.
    NoMatch,
}

impl Resolution<'_> {
    /// The unique implementation, if resolution succeeded.
    #[must_use]
    pub fn unique(&self) -> Option<&Implementation> {
        match self {
            Resolution::Unique { implementation, .. } => Some(implementation),
            _ => None,
        }
    }
}

/// Whether `imp` accepts a call with the given argument types.
///
/// Arity must match and every argument must be a subtype of the
/// corresponding parameter.
#[must_use]
pub fn is_applicable(imp: &Implementation, args: &[TypeId], registry: &TypeRegistry) -> bool {
    imp.arity() == args.len()
        && imp
            .params()
            .iter()
            .zip(args)
            .all(|(&param, &arg)| registry.is_subtype(arg, param))
}

/// Whether `a` is at least as specific as `b`: every parameter of `a` is a
/// subtype of the corresponding parameter of `b`.
#[must_use]
pub fn at_least_as_specific(
    a: &Implementation,
    b: &Implementation,
    registry: &TypeRegistry,
) -> bool {
    a.arity() == b.arity()
        && a.params()
            .iter()
            .zip(b.params())
            .all(|(&pa, &pb)| registry.is_subtype(pa, pb))
}

/// Whether `a` is strictly more specific than `b`.
#[must_use]
pub fn strictly_more_specific(
    a: &Implementation,
    b: &Implementation,
    registry: &TypeRegistry,
) -> bool {
    at_least_as_specific(a, b, registry) && !at_least_as_specific(b, a, registry)
}

/// Whether a call could reach `imp` for *some* runtime narrowing of its
/// static argument types: at every position the argument and parameter types
/// are related in one direction or the other.
#[must_use]
pub fn could_apply(imp: &Implementation, args: &[TypeId], registry: &TypeRegistry) -> bool {
    imp.arity() == args.len()
        && imp.params().iter().zip(args).all(|(&param, &arg)| {
            registry.is_subtype(arg, param) || registry.is_subtype(param, arg)
        })
}

/// Resolves a call against a signature group.
///
/// Strictly applicable implementations (every argument a subtype of the
/// parameter) drive `Unique`. When nothing is strictly applicable but two or
/// more incomparable implementations could still be reached by runtime
/// narrowing of an open argument type, the call is `Ambiguous`: the compiler
/// cannot pick, and the user must annotate or add a covering implementation.
///
/// `caller_module` feeds the first tie-break under
/// [`TieBreakPolicy::PreferLocal`]; it is ignored under `Strict`.
#[must_use]
pub fn resolve<'a>(
    group: &'a SignatureGroup,
    args: &[TypeId],
    registry: &TypeRegistry,
    policy: TieBreakPolicy,
    caller_module: Option<&str>,
) -> Resolution<'a> {
    let applicable: Vec<&Implementation> = group
        .implementations()
        .iter()
        .filter(|imp| is_applicable(imp, args, registry))
        .collect();

    if applicable.is_empty() {
        let potential: Vec<&Implementation> = group
            .implementations()
            .iter()
            .filter(|imp| could_apply(imp, args, registry))
            .collect();
        let minimal = minimal_elements(&potential, registry);
        // Tie-breaks never apply here: these candidates are not equally
        // specific, they are unreachable without runtime narrowing.
        return if minimal.len() >= 2 {
            Resolution::Ambiguous(minimal)
        } else {
            Resolution::NoMatch
        };
    }

    let minimal = minimal_elements(&applicable, registry);
    match minimal.len() {
        0 => Resolution::NoMatch,
        1 => Resolution::Unique {
            implementation: minimal[0],
            tie_break: None,
        },
        _ => match policy {
            TieBreakPolicy::Strict => Resolution::Ambiguous(minimal),
            TieBreakPolicy::PreferLocal => break_tie(minimal, caller_module),
        },
    }
}

/// Candidates not dominated by any strictly more specific candidate,
/// preserving the group's deterministic order.
fn minimal_elements<'a>(
    candidates: &[&'a Implementation],
    registry: &TypeRegistry,
) -> Vec<&'a Implementation> {
    candidates
        .iter()
        .filter(|&&imp| {
            !candidates.iter().any(|&other| {
                !std::ptr::eq(other, imp) && strictly_more_specific(other, imp, registry)
            })
        })
        .copied()
        .collect()
}

/// Applies the ordered tie-break rules to a set of minimal candidates.
///
/// Each rule narrows the candidate set; the first rule that narrows it to one
/// candidate is recorded on the resolution. Lexical order always decides if
/// the earlier rules cannot.
fn break_tie<'a>(
    mut candidates: Vec<&'a Implementation>,
    caller_module: Option<&str>,
) -> Resolution<'a> {
    if let Some(caller) = caller_module {
        let local: Vec<&Implementation> = candidates
            .iter()
            .filter(|imp| imp.module() == caller)
            .copied()
            .collect();
        if local.len() == 1 {
            return Resolution::Unique {
                implementation: local[0],
                tie_break: Some(TieBreakRule::CallerModule),
            };
        }
        if !local.is_empty() {
            candidates = local;
        }
    }

    let strictest = candidates
        .iter()
        .map(|imp| imp.effects().strictness())
        .min()
        .unwrap_or(0);
    let strict: Vec<&Implementation> = candidates
        .iter()
        .filter(|imp| imp.effects().strictness() == strictest)
        .copied()
        .collect();
    if strict.len() == 1 {
        return Resolution::Unique {
            implementation: strict[0],
            tie_break: Some(TieBreakRule::StricterEffects),
        };
    }
    candidates = strict;

    let winner = candidates
        .into_iter()
        .min_by(|a, b| a.span().cmp(b.span()).then(a.id().cmp(&b.id())))
        .expect("tie-break over a non-empty candidate set");
    Resolution::Unique {
        implementation: winner,
        tie_break: Some(TieBreakRule::LexicalOrder),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeKind;
    use crate::signature::{EffectSet, SignatureAnalyzer};
    use crate::types::SourceSpan;

    struct Fixture {
        registry: TypeRegistry,
        analyzer: SignatureAnalyzer,
    }

    impl Fixture {
        fn animals() -> Self {
            let mut registry = TypeRegistry::new();
            registry
                .register("Animal", TypeKind::TableOpen, &[])
                .unwrap();
            registry
                .register("Dog", TypeKind::TableSealed, &["Animal"])
                .unwrap();
            registry
                .register("Cat", TypeKind::TableSealed, &["Animal"])
                .unwrap();
            Self {
                registry,
                analyzer: SignatureAnalyzer::new(),
            }
        }

        fn ty(&self, name: &str) -> TypeId {
            self.registry.lookup(name).unwrap()
        }

        fn add(&mut self, name: &str, module: &str, params: &[&str], line: u32) {
            self.add_with_effects(name, module, params, line, EffectSet::empty());
        }

        fn add_with_effects(
            &mut self,
            name: &str,
            module: &str,
            params: &[&str],
            line: u32,
            effects: EffectSet,
        ) {
            let params: Vec<TypeId> = params.iter().map(|p| self.ty(p)).collect();
            let ret = self.registry.any();
            self.analyzer
                .add_implementation(
                    name,
                    module,
                    &params,
                    ret,
                    effects,
                    SourceSpan::new("zoo.poly", line * 10, line * 10 + 5, line, 1),
                    &self.registry,
                )
                .unwrap();
        }

        fn resolve(&self, name: &str, args: &[&str], policy: TieBreakPolicy) -> Resolution<'_> {
            self.resolve_from(name, args, policy, None)
        }

        fn resolve_from(
            &self,
            name: &str,
            args: &[&str],
            policy: TieBreakPolicy,
            caller: Option<&str>,
        ) -> Resolution<'_> {
            let args: Vec<TypeId> = args.iter().map(|a| self.ty(a)).collect();
            let group = self.analyzer.group(name, args.len()).unwrap();
            resolve(group, &args, &self.registry, policy, caller)
        }
    }

    // --- Core resolution ---

    #[test]
    fn subtype_argument_selects_the_more_specific_impl() {
        let mut fx = Fixture::animals();
        fx.add("speak", "zoo", &["Animal"], 1);
        fx.add("speak", "zoo", &["Dog"], 2);

        let resolution = fx.resolve("speak", &["Dog"], TieBreakPolicy::Strict);
        let unique = resolution.unique().unwrap();
        assert_eq!(unique.params(), &[fx.ty("Dog")]);
    }

    #[test]
    fn supertype_argument_falls_back_to_the_general_impl() {
        let mut fx = Fixture::animals();
        fx.add("speak", "zoo", &["Animal"], 1);
        fx.add("speak", "zoo", &["Dog"], 2);

        let resolution = fx.resolve("speak", &["Animal"], TieBreakPolicy::Strict);
        assert_eq!(resolution.unique().unwrap().params(), &[fx.ty("Animal")]);
    }

    #[test]
    fn open_argument_over_incomparable_impls_is_ambiguous() {
        let mut fx = Fixture::animals();
        fx.add("process", "zoo", &["Dog"], 1);
        fx.add("process", "zoo", &["Cat"], 2);

        // A Dog argument resolves; an Animal argument could narrow to either
        // branch at runtime, so the compiler refuses to pick.
        assert!(
            fx.resolve("process", &["Dog"], TieBreakPolicy::Strict)
                .unique()
                .is_some()
        );
        match fx.resolve("process", &["Animal"], TieBreakPolicy::Strict) {
            Resolution::Ambiguous(candidates) => {
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn single_narrowing_candidate_is_not_a_match() {
        let mut fx = Fixture::animals();
        fx.add("speak", "zoo", &["Dog"], 1);
        // Animal could narrow to Dog at runtime, but with only one candidate
        // the static answer is still "no applicable implementation".
        assert_eq!(
            fx.resolve("speak", &["Animal"], TieBreakPolicy::Strict),
            Resolution::NoMatch
        );
    }

    #[test]
    fn identical_cross_module_signatures_tie() {
        let mut fx = Fixture::animals();
        fx.add("process", "zoo", &["Dog"], 1);
        fx.add("process", "wild", &["Dog"], 2);

        match fx.resolve("process", &["Dog"], TieBreakPolicy::Strict) {
            Resolution::Ambiguous(candidates) => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn no_match_when_nothing_applies() {
        let mut fx = Fixture::animals();
        fx.add("speak", "zoo", &["Dog"], 1);
        assert_eq!(
            fx.resolve("speak", &["Cat"], TieBreakPolicy::Strict),
            Resolution::NoMatch
        );
    }

    #[test]
    fn arity_mismatch_never_applies() {
        let mut fx = Fixture::animals();
        fx.add("speak", "zoo", &["Dog", "Dog"], 1);
        let args = vec![fx.ty("Dog")];
        let group = fx.analyzer.group("speak", 2).unwrap();
        let resolution = resolve(
            group,
            &args,
            &fx.registry,
            TieBreakPolicy::Strict,
            None,
        );
        assert_eq!(resolution, Resolution::NoMatch);
    }

    // --- Tie-breaks ---

    #[test]
    fn prefer_local_picks_the_callers_module() {
        let mut fx = Fixture::animals();
        fx.add("process", "zoo", &["Dog"], 1);
        fx.add("process", "wild", &["Dog"], 2);

        let resolution =
            fx.resolve_from("process", &["Dog"], TieBreakPolicy::PreferLocal, Some("wild"));
        match resolution {
            Resolution::Unique {
                implementation,
                tie_break,
            } => {
                assert_eq!(implementation.module(), "wild");
                assert_eq!(tie_break, Some(TieBreakRule::CallerModule));
            }
            other => panic!("expected unique via caller module, got {other:?}"),
        }
    }

    #[test]
    fn stricter_effects_break_remaining_ties() {
        let mut fx = Fixture::animals();
        fx.add_with_effects("process", "zoo", &["Dog"], 1, EffectSet::IO);
        fx.add_with_effects("process", "wild", &["Dog"], 2, EffectSet::empty());

        let resolution = fx.resolve("process", &["Dog"], TieBreakPolicy::PreferLocal);
        match resolution {
            Resolution::Unique {
                implementation,
                tie_break,
            } => {
                assert!(implementation.effects().is_pure());
                assert_eq!(tie_break, Some(TieBreakRule::StricterEffects));
            }
            other => panic!("expected unique via effects, got {other:?}"),
        }
    }

    #[test]
    fn lexical_order_is_the_final_fallback() {
        let mut fx = Fixture::animals();
        fx.add("process", "zoo", &["Dog"], 5);
        fx.add("process", "wild", &["Dog"], 2);

        let resolution = fx.resolve("process", &["Dog"], TieBreakPolicy::PreferLocal);
        match resolution {
            Resolution::Unique {
                implementation,
                tie_break,
            } => {
                // Line 2 sorts before line 5.
                assert_eq!(implementation.module(), "wild");
                assert_eq!(tie_break, Some(TieBreakRule::LexicalOrder));
            }
            other => panic!("expected unique via lexical order, got {other:?}"),
        }
    }

    // --- Determinism ---

    #[test]
    fn resolution_is_reproducible() {
        let mut fx = Fixture::animals();
        fx.add("process", "zoo", &["Dog"], 1);
        fx.add("process", "wild", &["Dog"], 2);
        fx.add("process", "zoo", &["Animal"], 3);

        let first = format!(
            "{:?}",
            fx.resolve("process", &["Dog"], TieBreakPolicy::Strict)
        );
        for _ in 0..16 {
            let again = format!(
                "{:?}",
                fx.resolve("process", &["Dog"], TieBreakPolicy::Strict)
            );
            assert_eq!(first, again);
        }
    }
}
