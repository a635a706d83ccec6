use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

type SchemaCheck = fn(&Value) -> Result<(), serde_json::Error>;

#[derive(Clone, Copy)]
struct Schema {
    name: &'static str,
    check: SchemaCheck,
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema").field("name", &self.name).finish()
    }
}

fn check_as<T: DeserializeOwned>(value: &Value) -> Result<(), serde_json::Error> {
    T::deserialize(value).map(|_| ())
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state does not match schema {schema}: {source}")]
    Schema {
        schema: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("state cannot be decoded: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Key/value state owned by one context; the payload persisted through the
/// session store.
#[derive(Debug, Clone, Default)]
pub struct State {
    values: Map<String, Value>,
    schema: Option<Schema>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// State whose contents are expected to decode as `T`. The schema is only
    /// consulted by [`State::validate`]; writes are never rejected.
    pub fn with_schema<T: DeserializeOwned>() -> Self {
        Self {
            values: Map::new(),
            schema: Some(Schema {
                name: std::any::type_name::<T>(),
                check: check_as::<T>,
            }),
        }
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self {
            values,
            schema: None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|value| T::deserialize(value).ok())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.values.clone()
    }

    /// Swaps in restored data, keeping the declared schema.
    pub fn replace_values(&mut self, values: Map<String, Value>) {
        self.values = values;
    }

    /// Checks the data against the declared schema without touching it.
    /// State without a schema is always valid.
    pub fn validate(&self) -> Result<(), StateError> {
        let Some(schema) = self.schema else {
            return Ok(());
        };
        let value = Value::Object(self.values.clone());
        (schema.check)(&value).map_err(|source| StateError::Schema {
            schema: schema.name,
            source,
        })
    }

    pub fn typed<T: DeserializeOwned>(&self) -> Result<T, StateError> {
        let value = Value::Object(self.values.clone());
        T::deserialize(&value).map_err(StateError::Decode)
    }
}
