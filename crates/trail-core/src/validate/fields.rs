//! Typed accessors over a JSON object that report failures by field path.

use std::fmt::Display;

use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::ValidationError;

type Result<T, E = ValidationError> = std::result::Result<T, E>;

/// A view of one JSON object inside a payload, rooted at `path`.
pub(crate) struct Fields<'a> {
  obj:  &'a Map<String, Value>,
  path: String,
}

impl<'a> Fields<'a> {
  /// The payload root; it must be a JSON object.
  pub fn root(payload: &'a Value) -> Result<Self> {
    match payload {
      Value::Object(obj) => Ok(Self { obj, path: String::new() }),
      other => Err(ValidationError::new(
        "payload",
        format!("must be a JSON object, found {}", kind_of(other)),
      )),
    }
  }

  /// Full path of `key` beneath this object.
  pub fn path(&self, key: &str) -> String {
    if self.path.is_empty() {
      key.to_owned()
    } else {
      format!("{}.{key}", self.path)
    }
  }

  pub fn error(&self, key: &str, reason: impl Display) -> ValidationError {
    ValidationError::new(self.path(key), reason.to_string())
  }

  /// Whether `key` appears at all, even as `null`.
  pub fn present(&self, key: &str) -> bool { self.obj.contains_key(key) }

  /// Present with a non-null value.
  pub fn required(&self, key: &str) -> Result<&'a Value> {
    match self.obj.get(key) {
      None => Err(self.error(key, "is required")),
      Some(Value::Null) => Err(self.error(key, "is required and must not be null")),
      Some(v) => Ok(v),
    }
  }

  /// Absent entirely. A `null` or empty value does not count as omitted.
  pub fn omitted(&self, key: &str, because: impl Display) -> Result<()> {
    if self.present(key) {
      Err(self.error(key, because))
    } else {
      Ok(())
    }
  }

  /// Optional fields are either absent or carry a real value; `null` is
  /// rejected so that "not provided" has exactly one spelling.
  fn optional(&self, key: &str) -> Result<Option<&'a Value>> {
    match self.obj.get(key) {
      None => Ok(None),
      Some(Value::Null) => Err(self.error(key, "must be omitted rather than null")),
      Some(v) => Ok(Some(v)),
    }
  }

  // ── Strings ─────────────────────────────────────────────────────────────

  pub fn required_str(&self, key: &str) -> Result<&'a str> {
    self.non_empty_str(key, self.required(key)?)
  }

  pub fn optional_str(&self, key: &str) -> Result<Option<&'a str>> {
    self
      .optional(key)?
      .map(|v| self.non_empty_str(key, v))
      .transpose()
  }

  fn non_empty_str(&self, key: &str, value: &'a Value) -> Result<&'a str> {
    match value {
      Value::String(s) if s.trim().is_empty() => Err(self.error(key, "must not be empty")),
      Value::String(s) => Ok(s),
      other => Err(self.error(key, format!("must be a string, found {}", kind_of(other)))),
    }
  }

  /// A string drawn from a closed vocabulary.
  pub fn required_enum(&self, key: &str, allowed: &[&str]) -> Result<&'a str> {
    let value = self.required_str(key)?;
    if allowed.contains(&value) {
      Ok(value)
    } else {
      Err(self.error(
        key,
        format!("{value:?} is not one of: {}", allowed.join(", ")),
      ))
    }
  }

  // ── Primitive formats ───────────────────────────────────────────────────

  pub fn required_uuid(&self, key: &str) -> Result<Uuid> {
    let raw = self.required_str(key)?;
    Uuid::parse_str(raw).map_err(|_| self.error(key, format!("{raw:?} is not a UUID")))
  }

  /// An RFC 3339 / ISO-8601 timestamp with an explicit offset (`Z` or `±hh:mm`).
  pub fn required_timestamp(&self, key: &str) -> Result<DateTime<FixedOffset>> {
    let raw = self.required_str(key)?;
    self.timestamp(key, raw)
  }

  pub fn optional_timestamp(&self, key: &str) -> Result<Option<DateTime<FixedOffset>>> {
    self
      .optional_str(key)?
      .map(|raw| self.timestamp(key, raw))
      .transpose()
  }

  fn timestamp(&self, key: &str, raw: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).map_err(|_| {
      self.error(
        key,
        format!("{raw:?} is not an ISO-8601 timestamp with an explicit offset"),
      )
    })
  }

  pub fn required_bool(&self, key: &str) -> Result<bool> {
    match self.required(key)? {
      Value::Bool(b) => Ok(*b),
      other => Err(self.error(key, format!("must be a boolean, found {}", kind_of(other)))),
    }
  }

  /// Absent flags read as `false`.
  pub fn flag(&self, key: &str) -> Result<bool> {
    match self.optional(key)? {
      None => Ok(false),
      Some(Value::Bool(b)) => Ok(*b),
      Some(other) => Err(self.error(key, format!("must be a boolean, found {}", kind_of(other)))),
    }
  }

  pub fn required_u64(&self, key: &str) -> Result<u64> {
    let value = self.required(key)?;
    value
      .as_u64()
      .ok_or_else(|| self.error(key, format!("must be a non-negative integer, found {value}")))
  }

  // ── Containers ──────────────────────────────────────────────────────────

  pub fn required_object(&self, key: &str) -> Result<&'a Map<String, Value>> {
    match self.required(key)? {
      Value::Object(obj) => Ok(obj),
      other => Err(self.error(key, format!("must be an object, found {}", kind_of(other)))),
    }
  }

  /// A non-empty array whose elements are all objects, each returned as a
  /// nested [`Fields`] rooted at `key[i]`.
  pub fn required_object_array(&self, key: &str) -> Result<Vec<Fields<'a>>> {
    let items = match self.required(key)? {
      Value::Array(items) => items,
      other => {
        return Err(self.error(key, format!("must be an array, found {}", kind_of(other))));
      }
    };
    if items.is_empty() {
      return Err(self.error(key, "must contain at least one element"));
    }

    items
      .iter()
      .enumerate()
      .map(|(i, item)| {
        let path = format!("{}[{i}]", self.path(key));
        match item {
          Value::Object(obj) => Ok(Fields { obj, path }),
          other => Err(ValidationError::new(
            path,
            format!("must be an object, found {}", kind_of(other)),
          )),
        }
      })
      .collect()
  }
}

fn kind_of(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}
