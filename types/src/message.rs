use serde_json::{Map, Value};

/// An untyped data message decoded from the transport.
///
/// Nothing about its shape is guaranteed, so fields are looked up through
/// fallback chains of candidate keys.
#[derive(Debug, Clone, PartialEq)]
pub struct RawServerMessage {
    fields: Map<String, Value>,
}

impl RawServerMessage {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Parses a JSON document. Only objects are messages.
    pub fn from_json(text: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(text).ok()? {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The first key in `keys` that holds a string.
    pub fn first_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .find_map(|key| self.fields.get(*key).and_then(Value::as_str))
    }

    /// The first key in `keys` that is present and not null, with the key itself.
    pub fn first_present(&self, keys: &[&'static str]) -> Option<(&'static str, &Value)> {
        keys.iter().find_map(|key| match self.fields.get(*key) {
            None | Some(Value::Null) => None,
            Some(value) => Some((*key, value)),
        })
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}
