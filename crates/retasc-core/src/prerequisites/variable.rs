use serde::Deserialize;

use crate::error::Result;
use crate::runtime_context::RuntimeContext;
use crate::state::ReleaseRuleState;
use crate::value::Value;

/// Assigns the value of an expression to a template parameter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Variable {
    pub variable: String,
    pub value: String,
}

impl Variable {
    pub fn update_state(&self, context: &mut RuntimeContext) -> Result<ReleaseRuleState> {
        let value = context.template.evaluate(&self.value)?;
        context.report.set("value", value.clone());
        context
            .template
            .params
            .insert(self.variable.clone(), value);
        Ok(ReleaseRuleState::Completed)
    }
}

/// Assigns a rendered template to a template parameter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableString {
    pub variable: String,
    pub string: String,
}

impl VariableString {
    pub fn update_state(&self, context: &mut RuntimeContext) -> Result<ReleaseRuleState> {
        let value = context.template.render(&self.string)?;
        context.report.set("variable", self.variable.as_str());
        context.report.set("value", value.as_str());
        context
            .template
            .params
            .insert(self.variable.clone(), Value::from(value));
        Ok(ReleaseRuleState::Completed)
    }
}
