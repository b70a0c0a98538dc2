//! `survey-v1.x`: a completed questionnaire.

use std::collections::HashSet;

use serde_json::Value;

use super::fields::Fields;
use crate::ValidationError;

pub(super) fn check(payload: &Value) -> Result<(), ValidationError> {
  let f = Fields::root(payload)?;

  f.required_uuid("surveyId")?;
  f.required_timestamp("completedAt")?;

  let mut seen = HashSet::new();
  for response in f.required_object_array("responses")? {
    response.required_str("questionId")?;

    let index = response.required_u64("index")?;
    if !seen.insert(index) {
      return Err(response.error("index", format!("{index} appears more than once")));
    }

    if response.required_bool("skipped")? {
      response.omitted("response", "must be omitted when the question was skipped")?;
    } else {
      response.required("response")?;
    }
  }

  Ok(())
}
