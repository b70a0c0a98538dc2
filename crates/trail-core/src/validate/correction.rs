//! `correction-v1.x`: a partial fix applied on top of the current record.

use serde_json::Value;

use super::fields::Fields;
use crate::ValidationError;

pub(super) fn check(payload: &Value) -> Result<(), ValidationError> {
  let f = Fields::root(payload)?;
  f.required_str("reason")?;
  if f.required_object("changes")?.is_empty() {
    return Err(f.error("changes", "must change at least one field"));
  }
  Ok(())
}
