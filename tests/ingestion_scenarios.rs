//! End-to-end ingestion: raw JSON batch -> pipeline -> chunked commit -> snapshot -> queries

use std::num::NonZeroUsize;

use codegraph::query::QueryEngine;
use codegraph::raw::RawBatch;
use codegraph::{CodeEntity, EntityType, GraphStore, Pipeline, SqliteStore, StoreView};

fn ingest(store: &SqliteStore, json: &str) -> (codegraph::TransformReport, StoreView) {
    let graph = GraphStore::new(store, NonZeroUsize::new(2).unwrap());
    graph.install_schema().unwrap();
    let raw = RawBatch::from_json(json).unwrap();
    let (report, result) = graph.ingest(&Pipeline::new(), &raw);
    result.unwrap();
    (report, graph.snapshot().unwrap())
}

fn by_name<'a>(view: &'a StoreView, name: &str) -> &'a CodeEntity {
    view.entities()
        .iter()
        .find(|e| e.name == name)
        .unwrap_or_else(|| panic!("no entity named {}", name))
}

fn names(entities: &[&CodeEntity]) -> Vec<String> {
    entities.iter().map(|e| e.name.clone()).collect()
}

#[test]
fn test_foo_calls_bar() {
    let store = SqliteStore::open_in_memory().unwrap();
    let (report, view) = ingest(
        &store,
        r#"{
            "entities": [
                {"name": "foo", "type": "Function", "complexity": 5},
                {"name": "bar", "type": "Function", "complexity": 15}
            ],
            "relationships": [{"type": "Calls", "from": "foo", "to": "bar"}]
        }"#,
    );
    assert_eq!(report.entities_stored, 2);
    assert_eq!(report.relationships_stored, 1);

    let engine = QueryEngine::new(&view);
    let bar = by_name(&view, "bar");

    assert_eq!(names(&engine.complex_functions(10).unwrap()), vec!["bar"]);
    assert_eq!(names(&engine.callers_of(bar.id)), vec!["foo"]);
    assert_eq!(names(&engine.unused_functions()), vec!["foo"]);
}

#[test]
fn test_unresolved_relationship_is_dropped_everywhere() {
    let store = SqliteStore::open_in_memory().unwrap();
    let (report, view) = ingest(
        &store,
        r#"{
            "entities": [
                {"name": "foo", "type": "Function"},
                {"name": "bar", "type": "Function"}
            ],
            "relationships": [
                {"type": "Calls", "from": "ghost", "to": "bar"},
                {"type": "Calls", "from": "foo", "to": "bar"}
            ]
        }"#,
    );
    assert_eq!(report.relationships_dropped, 1);
    assert_eq!(report.relationships_stored, 1);
    assert_eq!(view.relationships().len(), 1);

    let engine = QueryEngine::new(&view);
    let bar = by_name(&view, "bar");
    assert_eq!(names(&engine.callers_of(bar.id)), vec!["foo"]);
    assert!(engine.find_by_name_pattern("ghost").unwrap().is_empty());
    let ranked = engine.most_called(10).unwrap();
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].count, 1);
}

#[test]
fn test_most_called_picks_the_top_callee() {
    let store = SqliteStore::open_in_memory().unwrap();
    let mut entities = vec![
        r#"{"name": "a", "type": "Function"}"#.to_string(),
        r#"{"name": "b", "type": "Function"}"#.to_string(),
        r#"{"name": "c", "type": "Function"}"#.to_string(),
    ];
    let mut relationships = Vec::new();
    for (target, count) in [("a", 2), ("b", 5), ("c", 1)] {
        for i in 0..count {
            let caller = format!("{}_caller_{}", target, i);
            entities.push(format!(r#"{{"name": "{}", "type": "Function"}}"#, caller));
            relationships.push(format!(
                r#"{{"type": "Calls", "from": "{}", "to": "{}"}}"#,
                caller, target
            ));
        }
    }
    let json = format!(
        r#"{{"entities": [{}], "relationships": [{}]}}"#,
        entities.join(","),
        relationships.join(",")
    );
    let (_, view) = ingest(&store, &json);

    let top = QueryEngine::new(&view).most_called(1).unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].name, "b");
    assert_eq!(top[0].count, 5);
}

#[test]
fn test_callers_and_callees_agree() {
    let store = SqliteStore::open_in_memory().unwrap();
    let (_, view) = ingest(
        &store,
        r#"{
            "entities": [
                {"name": "main", "type": "Function"},
                {"name": "parse", "type": "Function"},
                {"name": "lex", "type": "Function"},
                {"name": "Parser", "type": "Class"}
            ],
            "relationships": [
                {"type": "Calls", "from": "main", "to": "parse"},
                {"type": "Calls", "from": "parse", "to": "lex"},
                {"type": "Calls", "from": "lex", "to": "parse"},
                {"type": "Contains", "from": "Parser", "to": "parse"}
            ]
        }"#,
    );
    let engine = QueryEngine::new(&view);
    for a in view.entities() {
        for b in engine.callees_of(a.id) {
            assert!(
                engine.callers_of(b.id).iter().any(|c| c.id == a.id),
                "{} calls {} but is not among its callers",
                a.name,
                b.name
            );
        }
    }
}

#[test]
fn test_complex_functions_only_returns_functions() {
    let store = SqliteStore::open_in_memory().unwrap();
    let (_, view) = ingest(
        &store,
        r#"{
            "entities": [
                {"name": "f", "type": "Function", "complexity": 20},
                {"name": "C", "type": "Class"},
                {"name": "m", "type": "Module"},
                {"name": "g", "type": "Function"}
            ],
            "relationships": []
        }"#,
    );
    let found = QueryEngine::new(&view).complex_functions(0).unwrap();
    assert_eq!(names(&found), vec!["f"]);
    assert!(found.iter().all(|e| e.entity_type() == EntityType::Function));
}

#[test]
fn test_install_is_idempotent() {
    let store = SqliteStore::open_in_memory().unwrap();
    let graph = GraphStore::new(&store, NonZeroUsize::new(10).unwrap());

    let first = graph.install_schema().unwrap();
    let shapes_after_first = codegraph::Datastore::db(&store).unwrap().attribute_shapes().unwrap();
    let second = graph.install_schema().unwrap();
    let shapes_after_second = codegraph::Datastore::db(&store).unwrap().attribute_shapes().unwrap();

    assert!(first.installed > 0);
    assert_eq!(second.installed, 0);
    assert_eq!(second.existing, first.installed + first.existing);
    assert_eq!(shapes_after_first, shapes_after_second);
}

#[test]
fn test_second_batch_links_to_persisted_entities() {
    let store = SqliteStore::open_in_memory().unwrap();
    let (_, first) = ingest(
        &store,
        r#"{"entities": [{"name": "util", "type": "Function"}], "relationships": []}"#,
    );

    let graph = GraphStore::new(&store, NonZeroUsize::new(2).unwrap());
    let raw = RawBatch::from_json(
        r#"{
            "entities": [{"name": "app", "type": "Function"}],
            "relationships": [{"type": "Calls", "from": "app", "to": "util"}]
        }"#,
    )
    .unwrap();
    let (report, result) = graph.ingest(&Pipeline::new().with_known_entities(&first), &raw);
    result.unwrap();
    assert_eq!(report.relationships_dropped, 0);

    let view = graph.snapshot().unwrap();
    let util = by_name(&view, "util");
    assert_eq!(names(&QueryEngine::new(&view).callers_of(util.id)), vec!["app"]);
    assert_eq!(view.repositories().len(), 2);
}
