//! Boundary reply shape: `{success: true, message, ...payload}` or
//! `{success: false, message}`

use crate::error::{Result, WorkbenchError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Reply {
    /// Successful reply. Struct payloads are flattened; anything else lands
    /// under `result`.
    pub fn ok<T: Serialize>(message: impl Into<String>, payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(Value::Object(map)) => Self {
                success: true,
                message: message.into(),
                payload: map,
            },
            Ok(Value::Null) => Self {
                success: true,
                message: message.into(),
                payload: Map::new(),
            },
            Ok(other) => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                Self {
                    success: true,
                    message: message.into(),
                    payload: map,
                }
            }
            Err(e) => Self::failure(&WorkbenchError::from(e)),
        }
    }

    pub fn failure(error: &WorkbenchError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            payload: Map::new(),
        }
    }

    pub fn from_result<T: Serialize>(result: Result<T>, message: impl Into<String>) -> Self {
        match result {
            Ok(payload) => Self::ok(message, &payload),
            Err(e) => Self::failure(&e),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
