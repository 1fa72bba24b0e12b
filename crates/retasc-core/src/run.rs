//! Evaluates every rule against every value of its inputs.

use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::{info, warn};

use crate::clients::{
    DryRunJiraClient, DryRunOpenShiftClient, HttpSession, IssueTracker, JiraClient, JobCluster,
    OpenShiftClient, ProductPagesApi,
};
use crate::config::{Config, JIRA_TOKEN_ENV, OPENSHIFT_TOKEN_ENV};
use crate::error::Result;
use crate::inputs::Input;
use crate::parse_rules::parse_rules;
use crate::report::Report;
use crate::rule::{Rule, RuleSet};
use crate::runtime_context::RuntimeContext;
use crate::value::{Map, Params, Value};

/// Jira answers 401 intermittently under load.
const JIRA_RETRY_STATUSES: &[u16] = &[401];

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Rule files or directories; `config.rules_path` when empty.
    pub rule_paths: Vec<PathBuf>,
    /// Skip every Jira and OpenShift mutation.
    pub dry_run: bool,
}

// ---------------------------------------------------------------------------
// Input buckets
// ---------------------------------------------------------------------------

/// One input value and the rules evaluated against it.
struct Bucket<'a> {
    input: &'a Input,
    values: Params,
    rules: Vec<&'a Rule>,
}

fn input_values(input: &Input, context: &mut RuntimeContext) -> Result<Vec<Params>> {
    match input.values(context) {
        Ok(values) => Ok(values),
        Err(e) if e.is_recoverable() => {
            let section = format!("Input({})", input.cache_key());
            context.section(&section, |ctx| ctx.report.add_error(&e.to_string()));
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

/// Groups rules by input value. Each distinct input declaration is
/// enumerated once; buckets keep first-seen order and rules load order.
fn rules_by_input<'a>(
    rules: &'a RuleSet,
    context: &mut RuntimeContext,
) -> Result<Vec<Bucket<'a>>> {
    let mut cache: HashMap<String, Vec<Params>> = HashMap::new();
    let mut buckets: Vec<Bucket<'a>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for rule in rules {
        for input in &rule.inputs {
            let values = match cache.entry(input.cache_key()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(input_values(input, context)?),
            };
            for values in values.iter() {
                let key = Value::Map(values.clone()).to_canonical_json();
                let position = *index.entry(key).or_insert_with(|| {
                    buckets.push(Bucket {
                        input,
                        values: values.clone(),
                        rules: Vec::new(),
                    });
                    buckets.len() - 1
                });
                let bucket = &mut buckets[position];
                if !bucket.rules.iter().any(|r| std::ptr::eq(*r, rule)) {
                    bucket.rules.push(rule);
                }
            }
        }
    }
    Ok(buckets)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Template view of the report as of the start of the current rule.
///
/// Each finished rule section is converted once and merged in, so the
/// `report` global costs nothing unless a template reads it.
#[derive(Clone, Default)]
struct ReportView(Rc<RefCell<Map>>);

impl ReportView {
    fn open_section(&self, section: &str) {
        self.0
            .borrow_mut()
            .entry(section.to_string())
            .or_insert_with(|| Value::Map(Map::new()));
    }

    fn record_rule(&self, report: &Report, section: &str, rule: &str) {
        let Some(node) = report.get(&[section, rule]) else {
            return;
        };
        if let Some(Value::Map(rules)) = self.0.borrow_mut().get_mut(section) {
            rules.insert(rule.to_string(), node.to_value());
        }
    }

    fn value(&self) -> Value {
        Value::Map(self.0.borrow().clone())
    }
}

/// Runs all rules in `context` and fills its report.
pub fn evaluate(context: &mut RuntimeContext) -> Result<()> {
    let rules = Rc::clone(&context.rules);
    let buckets = rules_by_input(&rules, context)?;

    let view = ReportView::default();
    if let Value::Map(data) = context.report.data_value() {
        *view.0.borrow_mut() = data;
    }
    let global = view.clone();
    context
        .template
        .register_global("report", move || global.value());

    for bucket in buckets {
        context.rule_template_params.clear();
        let section = bucket.input.section_name(&bucket.values);
        view.open_section(&section);
        context.section(&section, |ctx| -> Result<()> {
            for rule in &bucket.rules {
                let mut params = bucket.values.clone();
                params.insert("config".into(), ctx.config.to_value());
                params.insert("jira_issues".into(), Value::Map(ctx.report.jira_issues.clone()));
                ctx.template.params = params;

                ctx.section(&rule.name, |ctx| -> Result<()> {
                    let state = rule.update_state(ctx)?;
                    ctx.report.set("state", state.as_str());
                    info!("{section} -> {}: {state}", rule.name);
                    Ok(())
                })?;
                view.record_rule(&ctx.report, &section, &rule.name);
            }
            Ok(())
        })?;
    }
    Ok(())
}

fn sessions(config: &Config) -> Result<(HttpSession, HttpSession)> {
    let (connect, read) = config.timeouts();
    let session = HttpSession::new(connect, read)?;
    let (connect, read) = config.jira_timeouts();
    let jira_session = HttpSession::new(connect, read)?.retry_on_statuses(JIRA_RETRY_STATUSES);
    Ok((session, jira_session))
}

fn openshift_client(config: &Config, session: &HttpSession) -> Option<OpenShiftClient> {
    let api_url = config.openshift_api_url.as_deref()?;
    match std::env::var(OPENSHIFT_TOKEN_ENV) {
        Ok(token) => Some(OpenShiftClient::new(api_url, token, session.clone())),
        Err(_) => {
            warn!("{OPENSHIFT_TOKEN_ENV} is not set, PipelineRun prerequisites will fail");
            None
        }
    }
}

/// Loads the rules and evaluates them against the live services.
pub fn run(config: Config, options: &RunOptions) -> Result<Report> {
    let rule_paths = if options.rule_paths.is_empty() {
        vec![config.rules_path.clone()]
    } else {
        options.rule_paths.clone()
    };
    let rules = parse_rules(&rule_paths, &config)?;

    let (session, jira_session) = sessions(&config)?;
    let jira = JiraClient::new(&config.jira_url, std::env::var(JIRA_TOKEN_ENV).ok(), jira_session);
    let pp = ProductPagesApi::new(&config.product_pages_url, session.clone());
    let openshift = openshift_client(&config, &session);

    let (jira, openshift): (Box<dyn IssueTracker>, Option<Box<dyn JobCluster>>) =
        if options.dry_run {
            (
                Box::new(DryRunJiraClient::new(jira)),
                openshift.map(|c| Box::new(DryRunOpenShiftClient::new(c)) as Box<dyn JobCluster>),
            )
        } else {
            (
                Box::new(jira),
                openshift.map(|c| Box::new(c) as Box<dyn JobCluster>),
            )
        };

    let mut context = RuntimeContext::new(rules, config, jira, Box::new(pp), session, openshift);
    evaluate(&mut context)?;

    if options.dry_run {
        warn!("To apply changes, run without --dry-run flag");
    }
    Ok(context.report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::Phase;
    use crate::report::ReportNode;
    use crate::runtime_context::testing::*;
    use crate::state::ReleaseRuleState;
    use tempfile::TempDir;

    fn rules(yaml: &str) -> Vec<Rule> {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn report_value<'a>(context: &'a RuntimeContext, path: &[&str]) -> Option<&'a Value> {
        context.report.get(path).and_then(ReportNode::as_value)
    }

    #[test]
    fn end_to_end_rule_completes() {
        let dir = TempDir::new().unwrap();
        let rules = rules(
            r#"
- name: ga-ready
  inputs:
    - variables:
        release: rhel-10.0
        major: 10
        minor: 0
  prerequisites:
    - condition: "major >= 10"
    - schedule_task: "GA for rhel {{ major }}.{{ minor }}"
    - target_date: "start_date - 7|days"
"#,
        );
        let (mut context, fakes) = context_with(rules, test_config(dir.path()));
        fakes
            .pp
            .add_task("rhel-10.0", "GA for rhel 10.0", date(1990, 1, 1), date(1990, 1, 3));

        evaluate(&mut context).unwrap();

        let input = r#"Variables({"major":10,"minor":0,"release":"rhel-10.0"})"#;
        assert_eq!(
            report_value(&context, &[input, "ga-ready", "state"]),
            Some(&Value::from(ReleaseRuleState::Completed.as_str()))
        );
        assert_eq!(
            report_value(&context, &[input, "ga-ready", r#"Condition("major >= 10")"#, "result"]),
            Some(&Value::Bool(true))
        );
        assert_eq!(
            report_value(
                &context,
                &[input, "ga-ready", r#"Schedule("GA for rhel 10.0")"#, "schedule_task"]
            ),
            Some(&Value::from("GA for rhel 10.0"))
        );
        assert_eq!(
            report_value(
                &context,
                &[input, "ga-ready", r#"TargetDate("start_date - 7|days")"#, "target_date"]
            ),
            Some(&Value::Date(date(1989, 12, 25)))
        );
        assert!(context.report.errors().is_empty());
    }

    #[test]
    fn equal_inputs_are_enumerated_once() {
        let dir = TempDir::new().unwrap();
        let rules = rules(
            r#"
- name: first
  inputs:
    - product: rhel
  prerequisites:
    - condition: "true"
- name: second
  inputs:
    - product: rhel
      min_phase: Concept
  prerequisites:
    - condition: "major >= 10"
"#,
        );
        let (mut context, fakes) = context_with(rules, test_config(dir.path()));
        fakes.pp.add_release("rhel-9.6", Phase::Maintenance);
        fakes.pp.add_release("rhel-10.0", Phase::Development);

        evaluate(&mut context).unwrap();

        assert_eq!(fakes.pp.state.borrow().release_calls, 1);
        let sections: Vec<&str> = context.report.data().keys().collect();
        assert_eq!(
            sections,
            [r#"ProductPagesRelease("rhel-9.6")"#, r#"ProductPagesRelease("rhel-10.0")"#]
        );
        assert_eq!(
            report_value(&context, &[r#"ProductPagesRelease("rhel-9.6")"#, "second", "state"]),
            Some(&Value::from("Pending"))
        );
        assert_eq!(
            report_value(&context, &[r#"ProductPagesRelease("rhel-10.0")"#, "second", "state"]),
            Some(&Value::from("Completed"))
        );
    }

    #[test]
    fn rules_see_globals_and_earlier_results() {
        let dir = TempDir::new().unwrap();
        let rules = rules(
            r#"
- name: first
  inputs:
    - variables: {id: 1}
  prerequisites:
    - variable: seen
      value: "report is defined and config.jira_label_prefix == 'retasc-id-'"
- name: second
  inputs:
    - variables: {id: 1}
  prerequisites:
    - condition: "report['Variables({\"id\":1})'].first.state == 'Completed'"
"#,
        );
        let (mut context, _) = context_with(rules, test_config(dir.path()));
        evaluate(&mut context).unwrap();

        let input = r#"Variables({"id":1})"#;
        assert_eq!(
            report_value(&context, &[input, "first", r#"Variable("seen")"#, "value"]),
            Some(&Value::Bool(true))
        );
        assert_eq!(
            report_value(&context, &[input, "second", "state"]),
            Some(&Value::from("Completed"))
        );
    }

    #[test]
    fn report_is_a_global_not_a_param() {
        let dir = TempDir::new().unwrap();
        let rules = rules(
            r#"
- name: first
  inputs:
    - variables: {id: 1}
  prerequisites:
    - variable: before
      value: "report['Variables({\"id\":1})'] | length"
- name: second
  inputs:
    - variables: {id: 1}
  prerequisites:
    - variable: before
      value: "report['Variables({\"id\":1})'].keys()"
"#,
        );
        let (mut context, _) = context_with(rules, test_config(dir.path()));
        evaluate(&mut context).unwrap();

        let input = r#"Variables({"id":1})"#;
        assert!(!context.template.params.contains_key("report"));
        assert_eq!(
            report_value(&context, &[input, "first", r#"Variable("before")"#, "value"]),
            Some(&Value::Int(0))
        );
        assert_eq!(
            report_value(&context, &[input, "second", r#"Variable("before")"#, "value"]),
            Some(&Value::from(vec!["first"]))
        );
        assert_eq!(
            context.template.evaluate("report | length").unwrap(),
            Value::Int(1)
        );
    }

    #[test]
    fn input_errors_are_reported_and_skipped() {
        let dir = TempDir::new().unwrap();
        let rules = rules(
            r#"
- name: broken
  inputs:
    - http: http://127.0.0.1:9/releases
  prerequisites: []
- name: fine
  inputs:
    - variables: {a: 1}
  prerequisites: []
"#,
        );
        let (mut context, _) = context_with(rules, test_config(dir.path()));
        context.session = context.session.clone().with_max_retries(0);
        evaluate(&mut context).unwrap();

        assert_eq!(context.report.errors().len(), 1);
        assert!(context.report.errors()[0].starts_with("Input("));
        assert_eq!(
            report_value(&context, &[r#"Variables({"a":1})"#, "fine", "state"]),
            Some(&Value::from("Completed"))
        );
    }

    #[test]
    fn memoization_is_reset_per_input_value() {
        let dir = TempDir::new().unwrap();
        let rules = rules(
            r#"
- name: issue
  inputs:
    - variables: {release: a}
    - variables: {release: b}
  prerequisites:
    - jira_issue: "main-{{ release }}"
      fields:
        summary: "Main issue for {{ release }}"
"#,
        );
        let (mut context, fakes) = context_with(rules, test_config(dir.path()));
        evaluate(&mut context).unwrap();

        let tracker = fakes.jira.state.borrow();
        assert_eq!(tracker.created.len(), 2);
        assert_eq!(context.report.jira_issues.len(), 2);
    }
}
