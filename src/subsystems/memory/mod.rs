//! Memory subsystem: the cross-chapter concept memory.
//!
//! One [`ConceptMemory`] per book. It is owned by the pipeline, mutated once
//! per analysed chapter and snapshotted to disk after every mutation:
//!
//! ```text
//! {output_dir}/{book}/
//! └── knowledge_graph.json
//! ```
//!
//! Invariants held after every public operation:
//!
//! - every name in `concepts` has a non-empty appearance list, and every
//!   appearance list belongs to a name in `concepts`;
//! - a definition never changes once recorded (earliest wins);
//! - a unit id occurs at most once per appearance list.

pub mod observation;
pub mod ordered;
pub mod snapshot;

pub use observation::{Observation, UnitId};
pub use ordered::OrderedMap;
pub use snapshot::{Relation, SnapshotError};

use std::path::Path;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use snapshot::Snapshot;

/// Returned by [`ConceptMemory::context_summary`] when nothing is known yet.
pub const NO_CONCEPTS_SENTINEL: &str =
    "Known concepts so far: none yet. This is the first chapter to be analysed.";

const SUMMARY_HEADER: &str = "Known concepts so far:";
const TRUNCATION_MARKER: char = '…';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("unit id must not be empty")]
    EmptyUnitId,
}

/// Result of one [`ConceptMemory::update`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Valid observations applied.
    pub recorded: usize,
    /// Concepts seen for the first time.
    pub new_concepts: usize,
    /// Malformed entries dropped at the boundary.
    pub skipped: usize,
}

/// Result of one [`ConceptMemory::purge`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    /// Appearance lists the unit was removed from.
    pub detached: usize,
    /// Concepts deleted because no appearance was left.
    pub removed: usize,
}

impl PurgeOutcome {
    pub fn is_noop(&self) -> bool {
        self.detached == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConceptMemory {
    concepts: OrderedMap<String>,
    appearances: OrderedMap<Vec<String>>,
    relations: Vec<Relation>,
}

impl ConceptMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a snapshot file. A missing file is an empty memory; an
    /// unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let Some(snapshot) = Snapshot::read(path)? else {
            debug!(path = %path.display(), "no snapshot yet; starting empty");
            return Ok(Self::new());
        };
        let mut memory = Self {
            concepts: snapshot.concepts,
            appearances: snapshot.appearances,
            relations: snapshot.relations,
        };
        memory.heal();
        info!(
            path = %path.display(),
            concepts = memory.len(),
            units = memory.units().len(),
            "concept memory loaded"
        );
        Ok(memory)
    }

    /// Like [`load`](Self::load), but any snapshot error is logged and
    /// degrades to an empty memory.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            warn!(error = %e, "concept memory snapshot unusable; starting empty");
            Self::new()
        })
    }

    /// Restore the invariants on state read from disk.
    fn heal(&mut self) {
        let mut deduped = 0usize;
        for units in self.appearances.values_mut() {
            let before = units.len();
            let mut seen = std::collections::HashSet::new();
            units.retain(|u| seen.insert(u.clone()));
            deduped += before - units.len();
        }

        let appearances = &self.appearances;
        let before = self.concepts.len();
        self.concepts
            .retain(|name, _| appearances.get(name).is_some_and(|u| !u.is_empty()));
        let orphans = before - self.concepts.len();

        let concepts = &self.concepts;
        let before = self.appearances.len();
        self.appearances.retain(|name, _| concepts.contains_key(name));
        let dangling = before - self.appearances.len();

        if deduped + orphans + dangling > 0 {
            warn!(
                deduped,
                orphans, dangling, "snapshot was inconsistent; repaired on load"
            );
        }
    }

    /// Record `observations` as contributed by `unit`.
    pub fn update<'a, I>(&mut self, observations: I, unit: &UnitId) -> UpdateOutcome
    where
        I: IntoIterator<Item = &'a Observation>,
    {
        let mut outcome = UpdateOutcome::default();
        for obs in observations {
            if self
                .concepts
                .insert_if_absent(&obs.name, obs.definition.clone())
            {
                outcome.new_concepts += 1;
            }
            let units = self.appearances.entry_or_default(&obs.name);
            if !units.iter().any(|u| u == unit.as_str()) {
                units.push(unit.as_str().to_string());
            }
            outcome.recorded += 1;
        }
        outcome
    }

    /// Validate an untrusted `key_concepts` value and record what survives.
    pub fn update_from_value(&mut self, key_concepts: &Value, unit: &UnitId) -> UpdateOutcome {
        let (observations, skipped) = Observation::parse_batch(key_concepts);
        let mut outcome = self.update(&observations, unit);
        outcome.skipped = skipped;
        outcome
    }

    /// Remove every contribution of `unit`. Concepts left without any
    /// appearance are deleted. Unknown units are a no-op.
    pub fn purge(&mut self, unit: &str) -> PurgeOutcome {
        let mut outcome = PurgeOutcome::default();
        let mut emptied = Vec::new();

        let names: Vec<String> = self.appearances.keys().map(str::to_string).collect();
        for name in names {
            let Some(units) = self.appearances.get_mut(&name) else {
                continue;
            };
            let before = units.len();
            units.retain(|u| u != unit);
            if units.len() != before {
                outcome.detached += 1;
                if units.is_empty() {
                    emptied.push(name);
                }
            }
        }

        for name in &emptied {
            self.appearances.remove(name);
            self.concepts.remove(name);
        }
        outcome.removed = emptied.len();
        outcome
    }

    /// Prompt-ready digest of the `limit` most referenced concepts, with
    /// definitions cut to `preview_chars` characters.
    pub fn context_summary(&self, limit: usize, preview_chars: usize) -> String {
        if self.concepts.is_empty() {
            return NO_CONCEPTS_SENTINEL.to_string();
        }

        let mut out = String::from(SUMMARY_HEADER);
        for (name, definition) in self.ranked().into_iter().take(limit) {
            out.push_str("\n- ");
            out.push_str(name);
            out.push_str(": ");
            out.push_str(&preview(definition, preview_chars));
        }
        out.push('\n');
        out
    }

    /// Concepts ordered by descending appearance count, ties in insertion
    /// order. Recency weighting, if ever wanted, belongs here.
    fn ranked(&self) -> Vec<(&str, &str)> {
        let mut ranked: Vec<(&str, &str, usize)> = self
            .concepts
            .iter()
            .map(|(name, def)| (name, def.as_str(), self.appearance_count(name)))
            .collect();
        // Stable sort keeps insertion order among equal counts.
        ranked.sort_by(|a, b| b.2.cmp(&a.2));
        ranked.into_iter().map(|(n, d, _)| (n, d)).collect()
    }

    /// Same ranking as [`context_summary`](Self::context_summary), with counts.
    pub fn top_concepts(&self, limit: usize) -> Vec<(&str, usize)> {
        self.ranked()
            .into_iter()
            .take(limit)
            .map(|(name, _)| (name, self.appearance_count(name)))
            .collect()
    }

    /// Persist the full state. The in-memory state is unaffected by failure.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let snapshot = Snapshot {
            concepts: self.concepts.clone(),
            relations: self.relations.clone(),
            appearances: self.appearances.clone(),
        };
        snapshot.write(path)?;
        debug!(path = %path.display(), concepts = self.len(), "concept memory saved");
        Ok(())
    }

    pub fn definition(&self, name: &str) -> Option<&str> {
        self.concepts.get(name).map(String::as_str)
    }

    pub fn appearances_of(&self, name: &str) -> &[String] {
        self.appearances
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn appearance_count(&self, name: &str) -> usize {
        self.appearances_of(name).len()
    }

    /// `(name, definition)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.concepts.iter().map(|(n, d)| (n, d.as_str()))
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Every distinct unit id, in first-seen order.
    pub fn units(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.appearances
            .iter()
            .flat_map(|(_, units)| units.iter().map(String::as_str))
            .filter(|u| seen.insert(*u))
            .collect()
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            let mut s = text[..cut].to_string();
            s.push(TRUNCATION_MARKER);
            s
        }
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn unit(id: &str) -> UnitId {
        UnitId::new(id).unwrap()
    }

    fn obs(name: &str, def: &str) -> Observation {
        Observation::new(name, def).unwrap()
    }

    fn record(m: &mut ConceptMemory, u: &str, pairs: &[(&str, &str)]) -> UpdateOutcome {
        let batch: Vec<_> = pairs.iter().map(|(n, d)| obs(n, d)).collect();
        m.update(&batch, &unit(u))
    }

    fn names(m: &ConceptMemory) -> Vec<&str> {
        m.iter().map(|(n, _)| n).collect()
    }

    #[test]
    fn earliest_definition_wins() {
        let mut m = ConceptMemory::new();
        record(&mut m, "u1", &[("c", "d1")]);
        record(&mut m, "u2", &[("c", "d2")]);
        assert_eq!(m.definition("c"), Some("d1"));
        assert_eq!(m.appearances_of("c"), ["u1", "u2"]);
    }

    #[test]
    fn repeated_update_records_unit_once() {
        let mut m = ConceptMemory::new();
        record(&mut m, "u", &[("c", "d")]);
        let second = record(&mut m, "u", &[("c", "d")]);
        assert_eq!(m.appearances_of("c"), ["u"]);
        assert_eq!(second.new_concepts, 0);
        assert_eq!(second.recorded, 1);
    }

    #[test]
    fn same_name_twice_in_one_batch() {
        let mut m = ConceptMemory::new();
        let out = record(&mut m, "u", &[("c", "first"), ("c", "second")]);
        assert_eq!(m.definition("c"), Some("first"));
        assert_eq!(m.appearances_of("c"), ["u"]);
        assert_eq!(out.new_concepts, 1);
    }

    #[test]
    fn names_are_exact_strings() {
        let mut m = ConceptMemory::new();
        let unit = UnitId::new("u1").unwrap();
        let out = m.update_from_value(
            &json!([
                {"name": " X", "definition": " d "},
                {"name": "X", "definition": "e"}
            ]),
            &unit,
        );
        assert_eq!(out.new_concepts, 2);
        assert_eq!(m.definition(" X"), Some(" d "));
        assert_eq!(m.definition("X"), Some("e"));
    }

    #[test]
    fn purge_deletes_orphans() {
        let mut m = ConceptMemory::new();
        record(&mut m, "u1", &[("X", "def")]);
        let out = m.purge("u1");
        assert_eq!(out, PurgeOutcome { detached: 1, removed: 1 });
        assert!(m.definition("X").is_none());
        assert!(m.appearances_of("X").is_empty());
        assert!(m.is_empty());
    }

    #[test]
    fn purge_keeps_concepts_with_other_units() {
        let mut m = ConceptMemory::new();
        record(&mut m, "u1", &[("X", "def")]);
        record(&mut m, "u2", &[("X", "other")]);
        let out = m.purge("u1");
        assert_eq!(out.removed, 0);
        assert_eq!(m.appearances_of("X"), ["u2"]);
        assert_eq!(m.definition("X"), Some("def"));
    }

    #[test]
    fn purge_unknown_unit_is_noop_and_idempotent() {
        let mut m = ConceptMemory::new();
        record(&mut m, "u1", &[("A", "a"), ("B", "b")]);
        record(&mut m, "u2", &[("B", "b2")]);
        let before = m.clone();

        assert!(m.purge("never-seen").is_noop());
        assert_eq!(m, before);

        m.purge("u2");
        let after_once = m.clone();
        assert!(m.purge("u2").is_noop());
        assert_eq!(m, after_once);
    }

    #[test]
    fn malformed_batch_changes_nothing() {
        let mut m = ConceptMemory::new();
        let v = json!([{"name": "X"}, {"definition": "no name"}, null, "garbage"]);
        let out = m.update_from_value(&v, &unit("u1"));
        assert_eq!(out, UpdateOutcome { recorded: 0, new_concepts: 0, skipped: 4 });
        assert!(m.is_empty());
        assert!(m.units().is_empty());
    }

    #[test]
    fn non_array_key_concepts_is_empty_batch() {
        let mut m = ConceptMemory::new();
        let out = m.update_from_value(&json!({"name": "X", "definition": "d"}), &unit("u1"));
        assert_eq!(out, UpdateOutcome::default());
        assert!(m.is_empty());
    }

    #[test]
    fn ranking_by_count_then_insertion() {
        let mut m = ConceptMemory::new();
        record(&mut m, "u1", &[("A", "a"), ("C", "c"), ("B", "b")]);
        record(&mut m, "u2", &[("A", "a"), ("C", "c")]);
        record(&mut m, "u3", &[("A", "a"), ("C", "c")]);

        let summary = m.context_summary(2, 80);
        assert!(summary.contains("- A: a"));
        assert!(summary.contains("- C: c"));
        assert!(!summary.contains("- B"));
        assert!(summary.find("- A").unwrap() < summary.find("- C").unwrap());
        assert_eq!(m.top_concepts(3), vec![("A", 3), ("C", 3), ("B", 1)]);
    }

    #[test]
    fn empty_memory_summary_is_sentinel() {
        let m = ConceptMemory::new();
        let s = m.context_summary(20, 80);
        assert_eq!(s, NO_CONCEPTS_SENTINEL);
        assert!(!s.is_empty());
    }

    #[test]
    fn summary_truncates_by_chars_with_marker() {
        let mut m = ConceptMemory::new();
        record(&mut m, "u1", &[("矛盾", "对立统一规律是唯物辩证法的根本规律"), ("短", "ok")]);
        let s = m.context_summary(10, 4);
        assert!(s.contains("- 矛盾: 对立统一…"));
        // Short definitions get no marker.
        assert!(s.contains("- 短: ok\n"));
        assert_eq!(m.context_summary(10, 4), s);
    }

    #[test]
    fn three_unit_scenario_then_purge() {
        let mut m = ConceptMemory::new();
        record(&mut m, "u1", &[("辩证法", "定义1")]);
        record(&mut m, "u2", &[("辩证法", "定义2"), ("矛盾", "定义A")]);
        record(&mut m, "u3", &[("矛盾", "定义B")]);

        assert_eq!(names(&m), vec!["辩证法", "矛盾"]);
        assert_eq!(m.definition("辩证法"), Some("定义1"));
        assert_eq!(m.definition("矛盾"), Some("定义A"));
        assert_eq!(m.appearances_of("辩证法"), ["u1", "u2"]);
        assert_eq!(m.appearances_of("矛盾"), ["u2", "u3"]);

        m.purge("u2");
        assert_eq!(names(&m), vec!["矛盾"]);
        assert_eq!(m.definition("矛盾"), Some("定义A"));
        assert_eq!(m.appearances_of("矛盾"), ["u3"]);
        assert!(m.appearances_of("辩证法").is_empty());
    }

    #[test]
    fn save_then_load_is_identity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kg.json");
        let mut m = ConceptMemory::new();
        record(&mut m, "u1", &[("辩证法", "定义1"), ("实践", "认识的来源")]);
        record(&mut m, "u2", &[("实践", "x")]);
        m.save(&path).unwrap();

        let loaded = ConceptMemory::load(&path).unwrap();
        assert_eq!(loaded, m);
        assert_eq!(names(&loaded), vec!["辩证法", "实践"]);
    }

    #[test]
    fn empty_memory_round_trips_all_three_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kg.json");
        ConceptMemory::new().save(&path).unwrap();
        let v: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(v, json!({"concepts": {}, "relations": [], "appearances": {}}));
        assert_eq!(ConceptMemory::load(&path).unwrap(), ConceptMemory::new());
    }

    #[test]
    fn missing_snapshot_loads_empty() {
        let dir = TempDir::new().unwrap();
        let m = ConceptMemory::load(&dir.path().join("none.json")).unwrap();
        assert!(m.is_empty());
    }

    #[test]
    fn corrupt_snapshot_falls_back_to_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kg.json");
        std::fs::write(&path, "{\"concepts\": [").unwrap();
        assert!(ConceptMemory::load(&path).is_err());
        assert!(ConceptMemory::load_or_default(&path).is_empty());
    }

    #[test]
    fn load_heals_inconsistent_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kg.json");
        let raw = json!({
            "concepts": {"kept": "k", "orphan": "o", "empty": "e"},
            "appearances": {"kept": ["u1", "u1", "u2"], "dangling": ["u3"], "empty": []}
        });
        std::fs::write(&path, raw.to_string()).unwrap();

        let m = ConceptMemory::load(&path).unwrap();
        assert_eq!(names(&m), vec!["kept"]);
        assert_eq!(m.appearances_of("kept"), ["u1", "u2"]);
        assert!(m.appearances_of("dangling").is_empty());
        assert_eq!(m.units(), vec!["u1", "u2"]);
    }
}
