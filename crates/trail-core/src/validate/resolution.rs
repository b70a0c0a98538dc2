//! `conflict-resolution-v1.x`: the corrective event appended when a
//! conflict is resolved.

use serde_json::Value;

use super::fields::Fields;
use crate::ValidationError;

/// The versioned type the auditor writes resolutions as.
pub const RESOLUTION_TYPE: &str = "conflict-resolution-v1.0";

const STRATEGIES: &[&str] = &["keep_incoming", "keep_existing", "manual_merge"];

pub(super) fn check(payload: &Value) -> Result<(), ValidationError> {
  let f = Fields::root(payload)?;
  f.required_uuid("conflictId")?;
  f.required_enum("strategy", STRATEGIES)?;
  f.required_object("resolvedPayload")?;
  f.optional_str("note")?;
  Ok(())
}
