//! `epistaxis-v1.x`: a nosebleed diary entry.
//!
//! A day is recorded either as an actual nosebleed (with a severity), as a
//! day without nosebleeds, or as a day whose events the participant cannot
//! recall. The two marker flags exclude each other and exclude the details
//! of an actual nosebleed.

use serde_json::Value;

use super::fields::Fields;
use crate::ValidationError;

pub const SEVERITIES: &[&str] =
  &["minimal", "mild", "moderate", "severe", "very_severe", "gushing"];

const NO_NOSEBLEEDS: &str = "isNoNosebleedsEvent";
const UNKNOWN: &str = "isUnknownEvent";

pub(super) fn check(payload: &Value) -> Result<(), ValidationError> {
  let f = Fields::root(payload)?;

  f.required_uuid("id")?;
  let start = f.required_timestamp("startTime")?;
  let no_nosebleeds = f.flag(NO_NOSEBLEEDS)?;
  let unknown = f.flag(UNKNOWN)?;

  if no_nosebleeds && unknown {
    return Err(f.error(
      UNKNOWN,
      format!("{NO_NOSEBLEEDS} and {UNKNOWN} are mutually exclusive"),
    ));
  }

  if no_nosebleeds || unknown {
    let flag = if no_nosebleeds { NO_NOSEBLEEDS } else { UNKNOWN };
    for detail in ["severity", "endTime"] {
      f.omitted(
        detail,
        format!("is mutually exclusive with {flag} and must be omitted, not null or empty"),
      )?;
    }
  } else {
    f.required_enum("severity", SEVERITIES)?;
    if let Some(end) = f.optional_timestamp("endTime")?
      && end < start
    {
      return Err(f.error("endTime", "must not precede startTime"));
    }
  }

  f.optional_str("notes")?;
  Ok(())
}
