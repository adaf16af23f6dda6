//! Integration tests for the concept memory: the three-chapter scenario,
//! purge, and the snapshot file contract.

use std::fs;

use serde_json::{Value, json};
use tempfile::TempDir;

use chapterwise::subsystems::memory::{ConceptMemory, NO_CONCEPTS_SENTINEL, UnitId};

// ── helpers ──────────────────────────────────────────────────────────────────

fn record(memory: &mut ConceptMemory, unit: &str, concepts: Value) {
    memory.update_from_value(&concepts, &UnitId::new(unit).unwrap());
}

fn snapshot_json(memory: &ConceptMemory) -> Value {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("kg.json");
    memory.save(&path).unwrap();
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn scenario() -> ConceptMemory {
    let mut m = ConceptMemory::new();
    record(&mut m, "u1", json!([{"name": "辩证法", "definition": "定义1"}]));
    record(
        &mut m,
        "u2",
        json!([
            {"name": "辩证法", "definition": "定义2"},
            {"name": "矛盾", "definition": "定义A"}
        ]),
    );
    record(&mut m, "u3", json!([{"name": "矛盾", "definition": "定义B"}]));
    m
}

// ── tests ────────────────────────────────────────────────────────────────────

#[test]
fn scenario_final_state_matches_snapshot() {
    let m = scenario();
    assert_eq!(
        snapshot_json(&m),
        json!({
            "concepts": {"辩证法": "定义1", "矛盾": "定义A"},
            "relations": [],
            "appearances": {"辩证法": ["u1", "u2"], "矛盾": ["u2", "u3"]}
        })
    );
}

#[test]
fn scenario_purge_deletes_orphaned_concept() {
    let mut m = scenario();
    m.purge("u2");
    assert_eq!(
        snapshot_json(&m),
        json!({
            "concepts": {"矛盾": "定义A"},
            "relations": [],
            "appearances": {"矛盾": ["u3"]}
        })
    );
}

#[test]
fn snapshot_keeps_insertion_order_on_disk() {
    let m = scenario();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("kg.json");
    m.save(&path).unwrap();
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.find("辩证法").unwrap() < text.find("矛盾").unwrap());
}

#[test]
fn resume_from_snapshot_continues_accumulating() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("book").join("knowledge_graph.json");

    let mut first = ConceptMemory::load_or_default(&path);
    record(&mut first, "u1", json!([{"name": "实践", "definition": "认识的来源"}]));
    first.save(&path).unwrap();

    let mut second = ConceptMemory::load_or_default(&path);
    assert_eq!(second, first);
    record(&mut second, "u2", json!([{"name": "实践", "definition": "later"}]));
    assert_eq!(second.definition("实践"), Some("认识的来源"));
    assert_eq!(second.appearances_of("实践"), ["u1", "u2"]);
}

#[test]
fn older_snapshot_without_relations_loads() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("kg.json");
    fs::write(
        &path,
        r#"{"concepts": {"X": "def"}, "appearances": {"X": ["u1"]}}"#,
    )
    .unwrap();
    let m = ConceptMemory::load(&path).unwrap();
    assert_eq!(m.definition("X"), Some("def"));
    assert!(m.relations().is_empty());
}

#[test]
fn corrupt_snapshot_degrades_to_empty_memory() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("kg.json");
    fs::write(&path, "\u{0}\u{0}garbage").unwrap();
    let m = ConceptMemory::load_or_default(&path);
    assert!(m.is_empty());
    assert_eq!(m.context_summary(20, 80), NO_CONCEPTS_SENTINEL);
}

#[test]
fn context_summary_is_side_effect_free() {
    let m = scenario();
    let before = snapshot_json(&m);
    let a = m.context_summary(1, 2);
    let b = m.context_summary(1, 2);
    assert_eq!(a, b);
    assert_eq!(snapshot_json(&m), before);
    // Both concepts have two appearances; insertion order decides.
    assert!(a.contains("- 辩证法: 定义…"));
    assert!(!a.contains("矛盾"));
}
