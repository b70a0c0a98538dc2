//! Reduction rules: how one event changes an aggregate's current payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};

/// The rule an event type uses to fold its payload into the current state.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Reduction {
  /// The payload becomes the whole current state.
  Replace,
  /// The payload's `changes` object is shallow-merged into the state; a
  /// `null` change removes the key.
  Merge,
  /// The payload is appended to the state's `annotations` array.
  Annotate,
  /// The payload's `resolvedPayload` becomes the whole current state.
  Resolve,
}

impl Reduction {
  /// Fold `payload` into `current`, returning the next current payload.
  ///
  /// Total over any JSON input; validated payloads are always objects, so
  /// a non-object `current` only occurs for hand-seeded fixtures and is
  /// treated as empty.
  pub fn apply(self, current: Option<&Value>, payload: &Value) -> Value {
    match self {
      Self::Replace => payload.clone(),
      Self::Resolve => payload
        .get("resolvedPayload")
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new())),
      Self::Merge => {
        let mut next = base_object(current);
        if let Some(changes) = payload.get("changes").and_then(Value::as_object) {
          for (key, value) in changes {
            if value.is_null() {
              next.remove(key);
            } else {
              next.insert(key.clone(), value.clone());
            }
          }
        }
        Value::Object(next)
      }
      Self::Annotate => {
        let mut next = base_object(current);
        let annotations = next
          .entry("annotations")
          .or_insert_with(|| Value::Array(Vec::new()));
        match annotations {
          Value::Array(items) => items.push(payload.clone()),
          other => *other = Value::Array(vec![payload.clone()]),
        }
        Value::Object(next)
      }
    }
  }
}

fn base_object(current: Option<&Value>) -> Map<String, Value> {
  current
    .and_then(Value::as_object)
    .cloned()
    .unwrap_or_default()
}
