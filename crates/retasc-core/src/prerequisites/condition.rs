use serde::Deserialize;

use crate::error::Result;
use crate::runtime_context::RuntimeContext;
use crate::state::ReleaseRuleState;

/// Completed when the expression is truthy, Pending otherwise.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    pub condition: String,
}

impl Condition {
    pub fn update_state(&self, context: &mut RuntimeContext) -> Result<ReleaseRuleState> {
        let result = context.template.evaluate(&self.condition)?;
        let state = if result.is_truthy() {
            ReleaseRuleState::Completed
        } else {
            ReleaseRuleState::Pending
        };
        context.report.set("result", result);
        Ok(state)
    }
}
