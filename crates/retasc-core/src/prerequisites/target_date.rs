use serde::Deserialize;

use crate::error::{RetascError, Result};
use crate::runtime_context::RuntimeContext;
use crate::state::ReleaseRuleState;
use crate::value::Value;

fn default_ignore_drafts() -> bool {
    true
}

/// Completed once the target date is reached.
///
/// Sets the `target_date` template parameter. While the matched schedule
/// task is a draft the state stays Pending, and reaching the date is an
/// error.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetDate {
    pub target_date: String,
    #[serde(default = "default_ignore_drafts")]
    pub ignore_drafts: bool,
}

impl TargetDate {
    pub fn update_state(&self, context: &mut RuntimeContext) -> Result<ReleaseRuleState> {
        let target_date = match context.template.evaluate(&self.target_date)? {
            Value::Date(date) => date,
            Value::DateTime(datetime) => datetime.date_naive(),
            other => {
                return Err(RetascError::prerequisite(format!(
                    "Target date expression '{}' must return a date, got {}",
                    self.target_date,
                    other.type_name()
                )))
            }
        };
        context
            .template
            .params
            .insert("target_date".into(), Value::Date(target_date));
        context.report.set("target_date", target_date);

        let days_remaining = (target_date - context.template.today()).num_days();
        if days_remaining > 0 {
            context.report.set("days_remaining", days_remaining);
        }

        let is_draft = context
            .template
            .params
            .get("schedule_task_is_draft")
            .is_some_and(Value::is_truthy);
        if self.ignore_drafts && is_draft {
            context.report.set("schedule_task_is_draft", true);
            if days_remaining <= 0 {
                return Err(RetascError::prerequisite(
                    "Target date was reached, but schedule is marked as draft",
                ));
            }
            return Ok(ReleaseRuleState::Pending);
        }

        if days_remaining <= 0 {
            Ok(ReleaseRuleState::Completed)
        } else {
            Ok(ReleaseRuleState::Pending)
        }
    }
}
