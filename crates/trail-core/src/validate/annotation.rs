//! `annotation-v1.x`: investigator commentary attached to a record.

use serde_json::Value;

use super::fields::Fields;
use crate::ValidationError;

pub(super) fn check(payload: &Value) -> Result<(), ValidationError> {
  let f = Fields::root(payload)?;
  f.required_uuid("annotationId")?;
  f.required_str("author")?;
  f.required_timestamp("createdAt")?;
  f.required_str("text")?;
  f.optional_str("targetField")?;
  Ok(())
}
