//! End-to-end dispatch scenarios: registration through resolution,
//! classification, table construction, and runtime lookup.

#![allow(missing_docs)]

#[macro_use]
mod common;

use polydispatch::classify::DispatchDecision;
use polydispatch::diagnostics::{Diagnostic, RejectionReason};
use polydispatch::signature::EffectSet;
use polydispatch::specificity::{Resolution, TieBreakPolicy, resolve};
use polydispatch::types::{SourceSpan, TypeId};
use polydispatch::{Session, TypeKind};
use std::sync::Arc;

fn span(line: u32) -> SourceSpan {
    SourceSpan::new("main.poly", line * 100, line * 100 + 10, line, 1)
}

fn def_span(file: &str, line: u32) -> SourceSpan {
    SourceSpan::new(file, line * 100, line * 100 + 10, line, 1)
}

fn primitive_session() -> Session {
    common::init_test_logging();
    let mut session = Session::default();
    session.start().unwrap();
    for name in ["int", "float", "string"] {
        session
            .register_type(name, TypeKind::Primitive, &[])
            .unwrap();
    }
    session
}

fn animal_session() -> Session {
    let mut session = primitive_session();
    session
        .register_type("Animal", TypeKind::TableOpen, &[])
        .unwrap();
    session
        .register_type("Dog", TypeKind::TableSealed, &["Animal"])
        .unwrap();
    session
        .register_type("Cat", TypeKind::TableSealed, &["Animal"])
        .unwrap();
    session
}

fn ty(session: &Session, name: &str) -> TypeId {
    session.registry().lookup(name).unwrap()
}

// --- Exact static dispatch over sealed primitives ---

#[test]
fn sealed_primitive_group_folds_to_a_static_call() {
    test_phase!("exact_static");
    let mut session = primitive_session();
    let (int, float, string) = (
        ty(&session, "int"),
        ty(&session, "float"),
        ty(&session, "string"),
    );
    for (i, t) in [int, float, string].into_iter().enumerate() {
        session
            .add_implementation(
                "add",
                "math",
                &[t, t],
                t,
                EffectSet::empty(),
                def_span("math.poly", u32::try_from(i).unwrap() + 1),
            )
            .unwrap();
    }
    assert!(session.seal_group("add", 2).unwrap());

    let decision = session.analyze_call("add", &[int, int], span(10), None).unwrap();
    let DispatchDecision::Static {
        function,
        estimated_cost,
        ..
    } = decision
    else {
        panic!("expected a static decision, got {decision:?}");
    };
    let imp = session.signatures().implementation(function).unwrap();
    assert_eq!(imp.qualified_name(), "math::add");
    assert_eq!(imp.params(), &[int, int]);
    assert_with_log!(estimated_cost <= 2, "static cost", "<= 2", estimated_cost);
    assert!(session.dispatch_error().is_none());
}

// --- Subtype resolution selects the most specific implementation ---

#[test]
fn subtype_argument_resolves_to_the_specific_impl() {
    test_phase!("subtype_resolution");
    let mut session = animal_session();
    let (animal, dog) = (ty(&session, "Animal"), ty(&session, "Dog"));
    let any = session.registry().any();
    session
        .add_implementation("speak", "zoo", &[animal], any, EffectSet::empty(), def_span("zoo.poly", 1))
        .unwrap();
    session
        .add_implementation("speak", "zoo", &[dog], any, EffectSet::empty(), def_span("zoo.poly", 2))
        .unwrap();

    let group = session.signatures().group("speak", 1).unwrap();
    let resolution = resolve(
        group,
        &[dog],
        session.registry(),
        TieBreakPolicy::Strict,
        None,
    );
    let unique = resolution.unique().expect("unique resolution");
    assert_eq!(unique.params(), &[dog]);

    // The specific impl also wins through analysis and runtime lookup.
    let decision = session.analyze_call("speak", &[dog], span(20), None).unwrap();
    let DispatchDecision::Dynamic { table: key, .. } = decision else {
        panic!("open group must stay dynamic, got {decision:?}");
    };
    let table = Arc::clone(session.table(key).unwrap());
    let entry = session.runtime_lookup(&table, &[dog]).unwrap();
    assert_eq!(table.entry_pattern(entry).unwrap(), vec![dog]);
}

// --- Incomparable candidates are ambiguous and reported ---

#[test]
fn open_argument_over_incomparable_impls_is_ambiguous() {
    test_phase!("ambiguous_dispatch");
    let mut session = animal_session();
    let (animal, dog, cat) = (
        ty(&session, "Animal"),
        ty(&session, "Dog"),
        ty(&session, "Cat"),
    );
    let any = session.registry().any();
    session
        .add_implementation("process", "zoo", &[dog], any, EffectSet::empty(), def_span("zoo.poly", 1))
        .unwrap();
    session
        .add_implementation("process", "zoo", &[cat], any, EffectSet::empty(), def_span("zoo.poly", 2))
        .unwrap();

    // A Dog argument is unique.
    let decision = session.analyze_call("process", &[dog], span(30), None).unwrap();
    assert!(!matches!(decision, DispatchDecision::Error { .. }));

    // An Animal argument is ambiguous and produces a structured report.
    let decision = session
        .analyze_call("process", &[animal], span(31), None)
        .unwrap();
    let DispatchDecision::Error { diagnostic } = decision else {
        panic!("expected an error decision, got {decision:?}");
    };
    let Some(Diagnostic::Ambiguous(record)) = session.diagnostics().get(diagnostic) else {
        panic!("expected an ambiguous-dispatch record");
    };
    assert_eq!(record.conflicting.len(), 2);
    assert_with_log!(
        record.suggested_fixes.len() >= 2,
        "fix count",
        ">= 2",
        record.suggested_fixes.len()
    );
    assert!(session.dispatch_error().is_some());
}

// --- No matching implementation, with rejection analysis ---

#[test]
fn unrelated_argument_reports_no_match_with_rejections() {
    test_phase!("no_match");
    let mut session = primitive_session();
    let (float, string) = (ty(&session, "float"), ty(&session, "string"));
    session
        .add_implementation("sqrt", "math", &[float], float, EffectSet::empty(), def_span("math.poly", 1))
        .unwrap();

    let decision = session
        .analyze_call("sqrt", &[string], span(40), None)
        .unwrap();
    let DispatchDecision::Error { diagnostic } = decision else {
        panic!("expected an error decision, got {decision:?}");
    };
    let Some(Diagnostic::NoMatch(record)) = session.diagnostics().get(diagnostic) else {
        panic!("expected a no-match record");
    };
    assert_eq!(record.rejections.len(), 1);
    let rejection = &record.rejections[0];
    assert_eq!(rejection.reason, RejectionReason::TypeMismatch);
    assert_eq!(rejection.parameter_index, Some(0));
    assert_eq!(rejection.expected.as_deref(), Some("float"));
    assert_eq!(rejection.actual.as_deref(), Some("string"));
    assert!(!record.suggested_fixes.is_empty());
}

// --- Analysis determinism ---

#[test]
fn analysis_is_bit_identical_across_repeated_runs() {
    test_phase!("determinism");
    let run = || {
        let mut session = animal_session();
        let (animal, dog, cat) = (
            ty(&session, "Animal"),
            ty(&session, "Dog"),
            ty(&session, "Cat"),
        );
        let any = session.registry().any();
        for (i, t) in [animal, dog, cat].into_iter().enumerate() {
            session
                .add_implementation(
                    "touch",
                    "zoo",
                    &[t],
                    any,
                    EffectSet::empty(),
                    def_span("zoo.poly", u32::try_from(i).unwrap() + 1),
                )
                .unwrap();
        }
        let decisions: Vec<String> = [animal, dog, cat]
            .into_iter()
            .map(|t| {
                format!(
                    "{:?}",
                    session.analyze_call("touch", &[t], span(50), None).unwrap()
                )
            })
            .collect();
        let key = match session.analyze_call("touch", &[dog], span(51), None).unwrap() {
            DispatchDecision::Dynamic { table, .. } => table,
            other => panic!("expected dynamic, got {other:?}"),
        };
        let bytes = session.table(key).unwrap().to_bytes().unwrap();
        (decisions, bytes)
    };
    assert_eq!(run(), run());
}

// --- Table lookup agrees with unique resolutions ---

#[test]
fn compressed_lookup_agrees_with_every_unique_resolution() {
    test_phase!("table_equivalence");
    let mut session = animal_session();
    let (animal, dog, cat, int, float) = (
        ty(&session, "Animal"),
        ty(&session, "Dog"),
        ty(&session, "Cat"),
        ty(&session, "int"),
        ty(&session, "float"),
    );
    let any = session.registry().any();
    let combos: [&[TypeId]; 5] = [
        &[animal, int],
        &[dog, int],
        &[dog, float],
        &[cat, int],
        &[animal, float],
    ];
    for (i, params) in combos.into_iter().enumerate() {
        session
            .add_implementation(
                "feed",
                "zoo",
                params,
                any,
                EffectSet::empty(),
                def_span("zoo.poly", u32::try_from(i).unwrap() + 1),
            )
            .unwrap();
    }

    let decision = session
        .analyze_call("feed", &[dog, int], span(60), None)
        .unwrap();
    let DispatchDecision::Dynamic { table: key, .. } = decision else {
        panic!("expected dynamic, got {decision:?}");
    };
    let table = Arc::clone(session.table(key).unwrap());

    for first in [animal, dog, cat] {
        for second in [int, float] {
            let args = [first, second];
            let group = session.signatures().group("feed", 2).unwrap();
            let resolution = resolve(
                group,
                &args,
                session.registry(),
                TieBreakPolicy::Strict,
                None,
            );
            let expected = match resolution {
                Resolution::Unique { implementation, .. } => Some(implementation.id()),
                _ => None,
            };
            if let Some(expected) = expected {
                let entry = session
                    .runtime_lookup(&table, &args)
                    .unwrap_or_else(|| panic!("lookup must find {args:?}"));
                let pooled = table.entry_implementation(entry).unwrap();
                assert_with_log!(
                    pooled.function == expected,
                    "table agrees with resolution",
                    expected,
                    pooled.function
                );
            }
        }
    }
}

// --- Tie-break policy surfaces, never silently prefers ---

#[test]
fn prefer_local_records_the_applied_tie_break() {
    test_phase!("tie_break_policy");
    let mut session = animal_session();
    let dog = ty(&session, "Dog");
    let any = session.registry().any();
    session
        .add_implementation("groom", "zoo", &[dog], any, EffectSet::empty(), def_span("zoo.poly", 1))
        .unwrap();
    session
        .add_implementation("groom", "wild", &[dog], any, EffectSet::empty(), def_span("wild.poly", 1))
        .unwrap();

    let group = session.signatures().group("groom", 1).unwrap();
    let strict = resolve(
        group,
        &[dog],
        session.registry(),
        TieBreakPolicy::Strict,
        Some("wild"),
    );
    assert!(matches!(strict, Resolution::Ambiguous(_)));

    let relaxed = resolve(
        group,
        &[dog],
        session.registry(),
        TieBreakPolicy::PreferLocal,
        Some("wild"),
    );
    let Resolution::Unique {
        implementation,
        tie_break,
    } = relaxed
    else {
        panic!("expected unique under PreferLocal, got {relaxed:?}");
    };
    assert_eq!(implementation.module(), "wild");
    assert!(tie_break.is_some(), "applied tie-break must be recorded");
}
