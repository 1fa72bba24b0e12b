//! Rule prerequisites.
//!
//! A prerequisite is recognised by its distinguishing key (`condition`,
//! `schedule_task`, `jira_issue` ...). Each variant rejects unknown keys.

mod condition;
mod http;
mod jira_issue;
mod pipeline_run;
mod rule_ref;
mod schedule;
mod target_date;
mod variable;

pub use condition::Condition;
pub use http::Http;
pub use jira_issue::{JiraIssue, JiraIssueTemplate};
pub use pipeline_run::PipelineRun;
pub use rule_ref::RuleRef;
pub use schedule::{MatchField, Schedule};
pub use target_date::TargetDate;
pub use variable::{Variable, VariableString};

use serde::de::{self, Deserialize, Deserializer};

use crate::config::Config;
use crate::error::Result;
use crate::rule::Rule;
use crate::runtime_context::RuntimeContext;
use crate::state::ReleaseRuleState;

#[derive(Debug, Clone, PartialEq)]
pub enum Prerequisite {
    Condition(Condition),
    Schedule(Schedule),
    TargetDate(TargetDate),
    Variable(Variable),
    VariableString(VariableString),
    Rule(RuleRef),
    JiraIssue(JiraIssue),
    Http(Http),
    PipelineRun(PipelineRun),
}

impl Prerequisite {
    /// Updates template params and the report, and returns the current state.
    pub fn update_state(&self, context: &mut RuntimeContext) -> Result<ReleaseRuleState> {
        match self {
            Prerequisite::Condition(p) => p.update_state(context),
            Prerequisite::Schedule(p) => p.update_state(context),
            Prerequisite::TargetDate(p) => p.update_state(context),
            Prerequisite::Variable(p) => p.update_state(context),
            Prerequisite::VariableString(p) => p.update_state(context),
            Prerequisite::Rule(p) => p.update_state(context),
            Prerequisite::JiraIssue(p) => p.update_state(context),
            Prerequisite::Http(p) => p.update_state(context),
            Prerequisite::PipelineRun(p) => p.update_state(context),
        }
    }

    /// Static checks run once when the rules are loaded.
    pub fn validation_errors(&self, rules: &[Rule], config: &Config) -> Vec<String> {
        match self {
            Prerequisite::Rule(p) => p.validation_errors(rules),
            Prerequisite::JiraIssue(p) => p.validation_errors(rules, config),
            Prerequisite::PipelineRun(p) => p.validation_errors(config),
            _ => Vec::new(),
        }
    }

    /// Report section for this prerequisite.
    pub fn section_name(&self, context: &RuntimeContext) -> String {
        match self {
            Prerequisite::Condition(p) => format!("Condition({:?})", p.condition),
            Prerequisite::Schedule(p) => {
                format!("Schedule({:?})", context.render_or_raw(&p.pattern))
            }
            Prerequisite::TargetDate(p) => format!("TargetDate({:?})", p.target_date),
            Prerequisite::Variable(p) => format!("Variable({:?})", p.variable),
            Prerequisite::VariableString(p) => format!("VariableString({:?})", p.variable),
            Prerequisite::Rule(p) => format!("Rule({:?})", context.render_or_raw(&p.rule)),
            Prerequisite::JiraIssue(p) => {
                format!("Jira({:?})", context.render_or_raw(&p.jira_issue))
            }
            Prerequisite::Http(p) => format!("Http({:?})", context.render_or_raw(&p.url)),
            Prerequisite::PipelineRun(p) => {
                format!("PipelineRun({:?})", context.render_or_raw(&p.pipeline_run))
            }
        }
    }
}

impl<'de> Deserialize<'de> for Prerequisite {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        let serde_yaml::Value::Mapping(mapping) = &value else {
            return Err(de::Error::custom("prerequisite must be a mapping"));
        };
        let has = |key: &str| mapping.contains_key(key);

        let parsed = if has("condition") {
            serde_yaml::from_value(value).map(Prerequisite::Condition)
        } else if has("schedule_task") || has("schedule_slug") || has("skip_if_missing") {
            serde_yaml::from_value(value).map(Prerequisite::Schedule)
        } else if has("target_date") {
            serde_yaml::from_value(value).map(Prerequisite::TargetDate)
        } else if has("variable") && has("string") {
            serde_yaml::from_value(value).map(Prerequisite::VariableString)
        } else if has("variable") {
            serde_yaml::from_value(value).map(Prerequisite::Variable)
        } else if has("rule") {
            serde_yaml::from_value(value).map(Prerequisite::Rule)
        } else if has("jira_issue") || has("jira_issue_id") {
            serde_yaml::from_value(value).map(Prerequisite::JiraIssue)
        } else if has("http") || has("url") {
            serde_yaml::from_value(value).map(Prerequisite::Http)
        } else if has("pipeline_run") {
            serde_yaml::from_value(value).map(Prerequisite::PipelineRun)
        } else {
            let keys: Vec<String> = mapping
                .keys()
                .filter_map(|key| key.as_str().map(str::to_string))
                .collect();
            return Err(de::Error::custom(format!(
                "unknown prerequisite type with keys: {}",
                crate::io::to_comma_separated(keys)
            )));
        };
        parsed.map_err(de::Error::custom)
    }
}
