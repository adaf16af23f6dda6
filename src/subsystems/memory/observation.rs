//! Boundary types between the untrusted analysis output and the memory.
//!
//! The model's `key_concepts` field is loosely typed JSON. It is validated
//! here, once, into [`Observation`]s; the memory itself only ever sees
//! well-formed records.

use std::fmt;

use serde_json::Value;
use tracing::debug;

use super::MemoryError;

/// Identifier of one unit of work (a chapter's link name). Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Result<Self, MemoryError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(MemoryError::EmptyUnitId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UnitId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One validated `(name, definition)` pair. Both fields contain more than
/// whitespace and are stored exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub name: String,
    pub definition: String,
}

impl Observation {
    /// Build an observation, or `None` when either field is blank.
    pub fn new(name: &str, definition: &str) -> Option<Self> {
        if name.trim().is_empty() || definition.trim().is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            definition: definition.to_string(),
        })
    }

    /// Validate one JSON record. Anything but an object with string `name`
    /// and `definition` fields yields `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let name = obj.get("name")?.as_str()?;
        let definition = obj.get("definition")?.as_str()?;
        Self::new(name, definition)
    }

    /// Validate a whole batch. A non-array value is an empty batch; invalid
    /// entries are dropped individually. Returns the valid observations in
    /// input order and the number of entries dropped.
    pub fn parse_batch(value: &Value) -> (Vec<Self>, usize) {
        let Some(items) = value.as_array() else {
            if !value.is_null() {
                debug!(kind = json_kind(value), "key_concepts is not an array; ignored");
            }
            return (Vec::new(), 0);
        };

        let mut out = Vec::with_capacity(items.len());
        let mut skipped = 0;
        for (index, item) in items.iter().enumerate() {
            match Self::from_value(item) {
                Some(obs) => out.push(obs),
                None => {
                    skipped += 1;
                    debug!(index, kind = json_kind(item), "malformed concept observation skipped");
                }
            }
        }
        (out, skipped)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unit_id_rejects_blank() {
        assert!(matches!(UnitId::new(""), Err(MemoryError::EmptyUnitId)));
        assert!(UnitId::new("   ").is_err());
        assert_eq!(UnitId::new("001_实践论").unwrap().as_str(), "001_实践论");
    }

    #[test]
    fn observation_requires_both_fields() {
        assert!(Observation::new("X", "").is_none());
        assert!(Observation::new("", "def").is_none());
        assert!(Observation::new("  ", "def").is_none());
        assert!(Observation::new("X", " \n").is_none());
        let padded = Observation::new(" 矛盾 ", " 对立统一 ").unwrap();
        assert_eq!(padded.name, " 矛盾 ");
        assert_eq!(padded.definition, " 对立统一 ");
        assert_ne!(padded, Observation::new("矛盾", " 对立统一 ").unwrap());
    }

    #[test]
    fn parse_batch_skips_malformed_entries() {
        let v = json!([
            {"name": "X"},
            {"definition": "no name"},
            null,
            "garbage",
            {"name": 3, "definition": "numeric name"},
            {"name": "Y", "definition": "kept"}
        ]);
        let (obs, skipped) = Observation::parse_batch(&v);
        assert_eq!(skipped, 5);
        assert_eq!(obs, vec![Observation::new("Y", "kept").unwrap()]);
    }

    #[test]
    fn parse_batch_non_array_is_empty() {
        for v in [json!(null), json!("text"), json!({"name": "X", "definition": "d"}), json!(7)] {
            let (obs, skipped) = Observation::parse_batch(&v);
            assert!(obs.is_empty());
            assert_eq!(skipped, 0);
        }
    }

    #[test]
    fn extra_fields_are_ignored() {
        let v = json!({"name": "实践", "definition": "认识的来源", "importance": "high"});
        assert_eq!(Observation::from_value(&v).unwrap().name, "实践");
    }
}
