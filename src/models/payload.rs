use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Partial payload update returned by a transition handler
///
/// Merged shallowly into the task payload: every top-level key replaces the
/// existing value and a `null` value removes the key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadDelta(Map<String, Value>);

impl PayloadDelta {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Mark a key for removal
    pub fn without(mut self, key: impl Into<String>) -> Self {
        self.0.insert(key.into(), Value::Null);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Apply this delta to a payload. Non-object payloads are replaced by an object.
    pub fn apply_to(&self, payload: &mut Value) {
        if !payload.is_object() {
            *payload = Value::Object(Map::new());
        }
        if let Value::Object(target) = payload {
            for (key, value) in &self.0 {
                if value.is_null() {
                    target.remove(key);
                } else {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

impl From<Map<String, Value>> for PayloadDelta {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
