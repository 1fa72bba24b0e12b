use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use crate::error::Result;
use crate::inputs::{Input, ProductPagesReleases};
use crate::prerequisites::Prerequisite;
use crate::runtime_context::RuntimeContext;
use crate::state::ReleaseRuleState;
use crate::value::Value;

/// The latest rule schema version.
pub const SCHEMA_VERSION: u32 = 1;

fn default_version() -> u32 {
    SCHEMA_VERSION
}

fn default_inputs() -> Vec<Input> {
    vec![Input::ProductPagesReleases(ProductPagesReleases::new("rhel"))]
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// Ordered chain of prerequisites evaluated for each input value.
///
/// The state of a rule is the minimum over its prerequisites: Pending if any
/// is Pending, InProgress if any is InProgress, otherwise Completed.
/// Evaluation stops at the first Pending prerequisite.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    #[serde(default = "default_version")]
    pub version: u32,
    pub name: String,
    #[serde(default = "default_inputs")]
    pub inputs: Vec<Input>,
    pub prerequisites: Vec<Prerequisite>,
    #[serde(skip)]
    pub rule_file: Option<String>,
}

impl Rule {
    pub fn update_state(&self, context: &mut RuntimeContext) -> Result<ReleaseRuleState> {
        if let Some((params, state)) = context.rule_template_params.get(&self.name) {
            debug!("rule {:?} already evaluated for this input: {state}", self.name);
            let state = *state;
            let params = params.clone();
            context.template.params.extend(params);
            return Ok(state);
        }

        let mut rule_state = ReleaseRuleState::Completed;

        for prereq in &self.prerequisites {
            let params = &mut context.template.params;
            params.insert("state".into(), Value::from(rule_state.as_str()));
            params.insert("rule_file".into(), Value::from(self.rule_file.clone()));

            let section = prereq.section_name(context);
            let state = context.section(&section, |ctx| -> Result<ReleaseRuleState> {
                let state = match prereq.update_state(ctx) {
                    Ok(state) => state,
                    Err(e) if e.is_recoverable() => {
                        ctx.report.add_error(&e.to_string());
                        ReleaseRuleState::Pending
                    }
                    Err(e) => return Err(e),
                };
                if state != ReleaseRuleState::Completed {
                    ctx.report.set("state", state.as_str());
                }
                Ok(state)
            })?;

            rule_state = rule_state.min(state);
            context
                .template
                .params
                .insert("state".into(), Value::from(rule_state.as_str()));

            if rule_state == ReleaseRuleState::Pending {
                break;
            }
        }

        context.rule_template_params.insert(
            self.name.clone(),
            (context.template.params.clone(), rule_state),
        );
        Ok(rule_state)
    }
}

// ---------------------------------------------------------------------------
// RuleSet
// ---------------------------------------------------------------------------

/// Rules in load order, indexed by name.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    index: HashMap<String, usize>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        let index = rules
            .iter()
            .enumerate()
            .map(|(i, rule)| (rule.name.clone(), i))
            .collect();
        Self { rules, index }
    }

    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.index.get(name).map(|&i| &self.rules[i])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn as_slice(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}
