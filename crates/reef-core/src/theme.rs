use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named set of design tokens pushed to clients with `theme_update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub name: String,
    #[serde(flatten)]
    pub tokens: Map<String, Value>,
}

impl Theme {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tokens: Map::new(),
        }
    }

    pub fn with_token(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.tokens.insert(key.into(), value.into());
        self
    }
}

impl Default for Theme {
    fn default() -> Self {
        Theme::new("light")
            .with_token("mode", "light")
            .with_token("primary", "#0b7285")
    }
}
