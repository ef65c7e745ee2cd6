//! Flat API records.
//!
//! A record is one backend resource (job, prompt, prompt chain) as a flat
//! key/value map. Values are scalars; nested values survive deserialization
//! but the binder ignores them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One backend resource as a flat key/value map.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Record identifier, when present and non-empty.
    #[must_use]
    pub fn id(&self) -> Option<String> {
        self.display("id").filter(|id| !id.trim().is_empty())
    }

    /// Scalar value as display text. Null renders empty; arrays and objects
    /// have no display form.
    #[must_use]
    pub fn display(&self, key: &str) -> Option<String> {
        self.get(key).and_then(display_value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Display text for a scalar JSON value.
#[must_use]
pub fn display_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
#[path = "record_test.rs"]
mod tests;
