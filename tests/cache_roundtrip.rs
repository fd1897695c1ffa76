//! Build-cache round trips through full sessions: a cached table must
//! equal the fresh build bitwise, and session metrics must add up.

#![allow(missing_docs)]

#[macro_use]
mod common;

use polydispatch::cache::CacheConfig;
use polydispatch::classify::DispatchDecision;
use polydispatch::config::EngineConfig;
use polydispatch::signature::EffectSet;
use polydispatch::types::{SourceSpan, TypeId};
use polydispatch::{Session, TypeKind};
use std::sync::Arc;
use tempfile::TempDir;

fn span(line: u32) -> SourceSpan {
    SourceSpan::new("zoo.poly", line * 10, line * 10 + 5, line, 1)
}

fn cached_session(dir: &TempDir) -> Session {
    common::init_test_logging();
    let mut session = Session::new(EngineConfig {
        cache: Some(CacheConfig {
            cache_dir: dir.path().to_owned(),
            ..CacheConfig::default()
        }),
        ..EngineConfig::default()
    });
    session.start().unwrap();
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

fn analyze_speak(session: &mut Session) -> Arc<polydispatch::CompressedDispatchTable> {
    let animal = session.registry().lookup("Animal").unwrap();
    let dog = session.registry().lookup("Dog").unwrap();
    let cat = session.registry().lookup("Cat").unwrap();
    let any = session.registry().any();
    for (i, t) in [animal, dog, cat].into_iter().enumerate() {
        session
            .add_implementation(
                "speak",
                "zoo",
                &[t],
                any,
                EffectSet::empty(),
                span(u32::try_from(i).unwrap() + 1),
            )
            .unwrap();
    }
    let decision = session
        .analyze_call("speak", &[animal], span(20), None)
        .unwrap();
    let DispatchDecision::Dynamic { table: key, .. } = decision else {
        panic!("expected dynamic, got {decision:?}");
    };
    Arc::clone(session.table(key).unwrap())
}

#[test]
fn second_session_serves_the_identical_table_from_cache() {
    test_phase!("cache_round_trip");
    let dir = TempDir::new().unwrap();

    let mut first = cached_session(&dir);
    let fresh = analyze_speak(&mut first);
    let metrics = first.finish().unwrap();
    assert_eq!(metrics.tables_built_fresh, 1);
    assert_eq!(metrics.tables_from_cache, 0);

    let mut second = cached_session(&dir);
    let cached = analyze_speak(&mut second);
    let metrics = second.finish().unwrap();
    assert_eq!(metrics.tables_from_cache, 1);
    assert_eq!(metrics.tables_built_fresh, 0);
    assert!((metrics.cache_hit_ratio() - 1.0).abs() < f64::EPSILON);
    assert!(metrics.build_speedup_ratio() > 1.0);

    assert_with_log!(
        fresh.to_bytes().unwrap() == cached.to_bytes().unwrap(),
        "cached table equals fresh build bitwise",
        "equal bytes",
        "diverging bytes"
    );
}

#[test]
fn cached_tables_answer_lookups_after_deserialization() {
    let dir = TempDir::new().unwrap();

    let mut first = cached_session(&dir);
    analyze_speak(&mut first);
    first.finish().unwrap();

    let mut second = cached_session(&dir);
    let table = analyze_speak(&mut second);
    let dog = second.registry().lookup("Dog").unwrap();
    let entry = second.runtime_lookup(&table, &[dog]).unwrap();
    assert_eq!(table.entry_pattern(entry).unwrap(), vec![dog]);
}

#[test]
fn cache_records_and_cleanup_stamp_land_on_disk() {
    let dir = TempDir::new().unwrap();
    let mut session = cached_session(&dir);
    analyze_speak(&mut session);
    session.finish().unwrap();

    let mut records = 0;
    let mut stamps = 0;
    for entry in std::fs::read_dir(dir.path()).unwrap().flatten() {
        let path = entry.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some("pdt") => records += 1,
            _ if path.file_name().is_some_and(|n| n == ".last_cleanup") => stamps += 1,
            _ => {}
        }
    }
    assert_eq!(records, 1);
    assert_eq!(stamps, 1);
}

#[test]
fn sessions_without_cache_config_stay_off_disk() {
    let mut session = Session::default();
    session.start().unwrap();
    session
        .register_type("int", TypeKind::Primitive, &[])
        .unwrap();
    let int: TypeId = session.registry().lookup("int").unwrap();
    session
        .add_implementation("id", "m", &[int], int, EffectSet::empty(), span(1))
        .unwrap();
    let metrics = session.finish().unwrap();
    assert_eq!(metrics.tables_built_fresh, 0);
    assert_eq!(metrics.tables_from_cache, 0);
}
