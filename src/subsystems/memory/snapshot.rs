//! On-disk snapshot of the concept memory.
//!
//! ## Format
//!
//! `knowledge_graph.json`:
//!
//! ```json
//! {
//!   "concepts":    { "<name>": "<definition>", ... },
//!   "relations":   [ ["<subject>", "<label>", "<object>"], ... ],
//!   "appearances": { "<name>": ["<unit-id>", ...], ... }
//! }
//! ```
//!
//! Every field is optional on read. Object key order is preserved in both
//! directions. Writes go to a sibling `.tmp` file which is then renamed over
//! the target, so a crash mid-write leaves the previous snapshot intact.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::ordered::OrderedMap;

/// `(subject, label, object)`; serialised as a 3-element array.
pub type Relation = (String, String, String);

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("cannot read snapshot {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("malformed snapshot {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("cannot serialise snapshot: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("cannot write snapshot {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Serde shape of the snapshot file.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub(super) struct Snapshot {
    #[serde(default)]
    pub concepts: OrderedMap<String>,
    #[serde(default)]
    pub relations: Vec<Relation>,
    #[serde(default)]
    pub appearances: OrderedMap<Vec<String>>,
}

impl Snapshot {
    /// Read `path`. `Ok(None)` when the file does not exist.
    pub fn read(path: &Path) -> Result<Option<Self>, SnapshotError> {
        let data = match fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SnapshotError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|source| SnapshotError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Write `self` to `path` via a temp file and rename.
    pub fn write(&self, path: &Path) -> Result<(), SnapshotError> {
        let data = serde_json::to_string_pretty(self).map_err(SnapshotError::Serialize)?;

        let write_err = |source: io::Error| SnapshotError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let tmp = tmp_path(path);
        fs::write(&tmp, data).map_err(write_err)?;
        fs::rename(&tmp, path).map_err(|source| {
            let _ = fs::remove_file(&tmp);
            write_err(source)
        })
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "snapshot.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(Snapshot::read(&dir.path().join("absent.json")).unwrap().is_none());
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kg.json");
        fs::write(&path, r#"{"concepts": {"实践": "认识的来源"}}"#).unwrap();
        let snap = Snapshot::read(&path).unwrap().unwrap();
        assert_eq!(snap.concepts.get("实践").map(String::as_str), Some("认识的来源"));
        assert!(snap.relations.is_empty());
        assert!(snap.appearances.is_empty());
    }

    #[test]
    fn garbage_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kg.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(Snapshot::read(&path), Err(SnapshotError::Parse { .. })));
    }

    #[test]
    fn write_creates_parent_and_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book").join("kg.json");
        let mut snap = Snapshot::default();
        snap.concepts.insert_if_absent("矛盾", "对立统一".to_string());
        snap.appearances.entry_or_default("矛盾").push("u1".to_string());
        snap.relations.push(("a".into(), "b".into(), "c".into()));
        snap.write(&path).unwrap();

        assert!(!tmp_path(&path).exists());
        let text = fs::read_to_string(&path).unwrap();
        // Non-ASCII is written as-is, not \u-escaped.
        assert!(text.contains("对立统一"));
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["relations"][0], serde_json::json!(["a", "b", "c"]));
        assert_eq!(Snapshot::read(&path).unwrap().unwrap(), snap);
    }

    #[test]
    fn write_into_unwritable_location_errors() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let err = Snapshot::default().write(&blocker.join("kg.json")).unwrap_err();
        assert!(matches!(err, SnapshotError::Write { .. }));
    }
}
