//! Insertion-ordered string map.
//!
//! Same shape as a capped k-v file: an `order` list next to a plain
//! `HashMap`. Serialises as a JSON object whose keys appear in insertion
//! order, and deserialises keeping document order, so the order survives a
//! snapshot round trip.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, Serializer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedMap<V> {
    order: Vec<String>,
    values: HashMap<String, V>,
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            values: HashMap::new(),
        }
    }
}

impl<V> OrderedMap<V> {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.values.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.values.get_mut(key)
    }

    /// Insert `value` under `key` unless the key is already present.
    /// Returns `true` when the key was new.
    pub fn insert_if_absent(&mut self, key: &str, value: V) -> bool {
        if self.values.contains_key(key) {
            return false;
        }
        self.order.push(key.to_string());
        self.values.insert(key.to_string(), value);
        true
    }

    /// Mutable access to the entry for `key`, inserting `V::default()` at the
    /// end of the order when missing.
    pub fn entry_or_default(&mut self, key: &str) -> &mut V
    where
        V: Default,
    {
        if !self.values.contains_key(key) {
            self.order.push(key.to_string());
        }
        self.values.entry(key.to_string()).or_default()
    }

    /// Remove `key`, keeping the relative order of the remaining keys.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.order.retain(|k| k != key);
        }
        removed
    }

    /// Keep only the entries for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &V) -> bool) {
        let values = &mut self.values;
        self.order.retain(|k| {
            let keep_it = values.get(k.as_str()).is_some_and(|v| keep(k.as_str(), v));
            if !keep_it {
                values.remove(k.as_str());
            }
            keep_it
        });
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.order
            .iter()
            .filter_map(|k| self.values.get(k).map(|v| (k.as_str(), v)))
    }

    /// Mutable values, in no particular order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.values.values_mut()
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.order.len()))?;
        for (k, v) in self.iter() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

struct OrderedMapVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
    type Value = OrderedMap<V>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map with string keys")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut out = OrderedMap::default();
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            // Duplicate keys in the document: the last value wins, the first
            // position is kept.
            if out.values.insert(key.clone(), value).is_none() {
                out.order.push(key);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_insertion_order() {
        let mut m = OrderedMap::default();
        assert!(m.insert_if_absent("b", 1));
        assert!(m.insert_if_absent("a", 2));
        assert!(!m.insert_if_absent("b", 3));
        assert_eq!(m.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(m.get("b"), Some(&1));
    }

    #[test]
    fn remove_and_retain_preserve_relative_order() {
        let mut m = OrderedMap::default();
        for (i, k) in ["x", "y", "z", "w"].iter().enumerate() {
            m.insert_if_absent(k, i);
        }
        assert_eq!(m.remove("y"), Some(1));
        assert_eq!(m.remove("y"), None);
        m.retain(|_, v| *v != 3);
        assert_eq!(m.keys().collect::<Vec<_>>(), vec!["x", "z"]);
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn json_object_order_survives_round_trip() {
        let json = r#"{"矛盾":"a","辩证法":"b","实践":"c"}"#;
        let m: OrderedMap<String> = serde_json::from_str(json).unwrap();
        assert_eq!(m.keys().collect::<Vec<_>>(), vec!["矛盾", "辩证法", "实践"]);
        assert_eq!(serde_json::to_string(&m).unwrap(), json);
    }

    #[test]
    fn rejects_non_object() {
        assert!(serde_json::from_str::<OrderedMap<String>>("[1,2]").is_err());
    }
}
