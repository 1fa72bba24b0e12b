use serde::Deserialize;
use std::rc::Rc;

use crate::error::{RetascError, Result};
use crate::rule::Rule;
use crate::runtime_context::RuntimeContext;
use crate::state::ReleaseRuleState;

/// Takes the state of another rule, evaluated against the same input.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleRef {
    pub rule: String,
}

impl RuleRef {
    pub fn validation_errors(&self, rules: &[Rule]) -> Vec<String> {
        if rules.iter().any(|rule| rule.name == self.rule) {
            Vec::new()
        } else {
            vec![missing_rule(&self.rule)]
        }
    }

    pub fn update_state(&self, context: &mut RuntimeContext) -> Result<ReleaseRuleState> {
        let name = context.template.render(&self.rule)?;
        let rules = Rc::clone(&context.rules);
        let rule = rules
            .get(&name)
            .ok_or_else(|| RetascError::prerequisite(missing_rule(&name)))?;
        rule.update_state(context)
    }
}

fn missing_rule(name: &str) -> String {
    format!("Dependent rule does not exist: '{name}'")
}
