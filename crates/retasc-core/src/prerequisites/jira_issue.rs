use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::info;

use crate::clients::{Issue, Transition};
use crate::config::Config;
use crate::error::{RetascError, Result};
use crate::io::to_comma_separated;
use crate::rule::Rule;
use crate::runtime_context::RuntimeContext;
use crate::state::ReleaseRuleState;
use crate::value::{Map, Value};

use super::Prerequisite;

/// Jira fields always fetched when searching for a managed issue.
const BASE_FIELDS: [&str; 3] = ["labels", "resolution", "status"];

/// A sub-task managed together with its parent issue.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JiraIssueTemplate {
    #[serde(alias = "id")]
    pub jira_issue: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub fields: Map,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub transitions: Vec<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Creates a Jira issue identified by a label, then keeps it up to date
/// until it is resolved.
///
/// The state is Completed once the issue is resolved and InProgress before
/// that. The issue is exposed as `issues[<id>]` to later templates.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JiraIssue {
    #[serde(alias = "jira_issue_id")]
    pub jira_issue: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub fields: Map,
    #[serde(default)]
    pub subtasks: Vec<JiraIssueTemplate>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub transitions: Vec<String>,
    #[serde(default)]
    pub comment: Option<String>,
    /// Only look the issue up, never create it.
    #[serde(default)]
    pub must_exist: bool,
}

impl JiraIssue {
    fn managed(&self) -> ManagedIssue<'_> {
        ManagedIssue {
            id: &self.jira_issue,
            template: self.template.as_deref(),
            fields: &self.fields,
            status: self.status.as_deref(),
            transitions: &self.transitions,
            comment: self.comment.as_deref(),
        }
    }

    fn all_managed(&self) -> impl Iterator<Item = ManagedIssue<'_>> {
        std::iter::once(self.managed()).chain(self.subtasks.iter().map(|subtask| ManagedIssue {
            id: &subtask.jira_issue,
            template: subtask.template.as_deref(),
            fields: &subtask.fields,
            status: subtask.status.as_deref(),
            transitions: &subtask.transitions,
            comment: subtask.comment.as_deref(),
        }))
    }

    fn issue_ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.jira_issue.as_str())
            .chain(self.subtasks.iter().map(|subtask| subtask.jira_issue.as_str()))
    }

    pub fn validation_errors(&self, rules: &[Rule], config: &Config) -> Vec<String> {
        let mut errors = Vec::new();

        let missing_files: Vec<&str> = self
            .all_managed()
            .filter_map(|issue| issue.template)
            .filter(|file| !config.jira_template_path.join(file).is_file())
            .collect();
        if !missing_files.is_empty() {
            errors.push(format!(
                "Jira issue template files not found: {}",
                to_comma_separated(missing_files)
            ));
        }

        if !self.must_exist {
            let preceding: BTreeSet<&str> = rules
                .iter()
                .flat_map(|rule| &rule.prerequisites)
                .filter_map(|prereq| match prereq {
                    Prerequisite::JiraIssue(jira) => Some(jira),
                    _ => None,
                })
                .take_while(|jira| !std::ptr::eq(*jira, self))
                .filter(|jira| !jira.must_exist)
                .flat_map(JiraIssue::issue_ids)
                .collect();
            let duplicates: Vec<&str> = self
                .issue_ids()
                .filter(|id| preceding.contains(id))
                .collect();
            if !duplicates.is_empty() {
                errors.push(format!(
                    "Jira issue ID(s) already used elsewhere: {}",
                    to_comma_separated(duplicates)
                ));
            }
        }

        for issue in self.all_managed() {
            if issue.template.is_none() && issue.fields.is_empty() {
                errors.push(format!(
                    "Jira issue '{}' requires either a template or fields",
                    issue.id
                ));
            }
            let reserved: Vec<String> = literal_labels(issue.fields)
                .into_iter()
                .filter(|label| label.starts_with(&config.jira_label_prefix))
                .collect();
            if !reserved.is_empty() {
                errors.push(format!(
                    "Jira issue '{}' must not use labels prefixed with '{}': {}",
                    issue.id,
                    config.jira_label_prefix,
                    to_comma_separated(reserved)
                ));
            }
        }

        errors
    }

    pub fn update_state(&self, context: &mut RuntimeContext) -> Result<ReleaseRuleState> {
        let Some(issue) = self.managed().sync(context, None, self.must_exist)? else {
            context.report.set("not_found", true);
            return Ok(ReleaseRuleState::InProgress);
        };
        if issue.is_resolved() {
            return Ok(ReleaseRuleState::Completed);
        }

        for subtask in self.all_managed().skip(1) {
            let section = format!("Subtask({:?})", context.render_or_raw(subtask.id));
            context.section(&section, |ctx| subtask.sync(ctx, Some(&issue.key), false))?;
        }

        Ok(ReleaseRuleState::InProgress)
    }
}

/// Labels written literally in the rule, ignoring templated entries.
fn literal_labels(fields: &Map) -> Vec<String> {
    fields
        .get("labels")
        .and_then(Value::as_list)
        .map(|labels| {
            labels
                .iter()
                .filter_map(Value::as_str)
                .filter(|label| !label.contains("{{"))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Issue synchronization
// ---------------------------------------------------------------------------

/// The parts shared by an issue and its sub-tasks.
struct ManagedIssue<'a> {
    id: &'a str,
    template: Option<&'a str>,
    fields: &'a Map,
    status: Option<&'a str>,
    transitions: &'a [String],
    comment: Option<&'a str>,
}

impl ManagedIssue<'_> {
    /// Creates or updates the issue. Returns `None` only when `must_exist`
    /// is set and no issue was found.
    fn sync(
        &self,
        context: &mut RuntimeContext,
        parent: Option<&str>,
        must_exist: bool,
    ) -> Result<Option<Issue>> {
        let id = context.template.render(self.id)?;
        let prefix = context.config.jira_label_prefix.clone();
        let label = format!("{prefix}{id}");

        let mut fields = self.issue_fields(context)?;
        let own_labels = take_labels(&mut fields, &id)?;
        let reserved: Vec<&String> = own_labels
            .iter()
            .filter(|l| l.starts_with(&prefix))
            .collect();
        if !reserved.is_empty() {
            return Err(RetascError::prerequisite(format!(
                "{} must not use labels prefixed with '{prefix}': {}",
                self.source(&id),
                to_comma_separated(reserved)
            )));
        }

        let mut labels: BTreeSet<String> = own_labels.into_iter().collect();
        labels.insert(label.clone());
        labels.extend(input_labels(context));

        let jql = format!("labels={}", serde_json::to_string(&label)?);
        let mut search_fields: BTreeSet<String> = fields.keys().cloned().collect();
        search_fields.extend(BASE_FIELDS.map(str::to_string));
        let search_fields: Vec<String> = search_fields.into_iter().collect();
        let mut found = context.jira.search_issues(&jql, &search_fields)?;

        let mut issue = match found.len() {
            0 if must_exist => return Ok(None),
            0 => {
                fields.insert(
                    "labels".into(),
                    Value::List(labels.into_iter().map(Value::from).collect()),
                );
                if let Some(parent) = parent {
                    fields.insert("parent".into(), crate::value::map([("key", parent)]));
                }
                context
                    .report
                    .set("create", Value::Map(fields.clone()).to_canonical_json());
                context.jira.create_issue(&fields)?
            }
            1 => {
                let mut issue = found.remove(0);
                if !issue.is_resolved() {
                    update_issue(context, &mut issue, fields, labels)?;
                }
                issue
            }
            _ => {
                let keys: Vec<String> = found.into_iter().map(|issue| issue.key).collect();
                return Err(RetascError::prerequisite(format!(
                    "Found multiple Jira issues with label '{label}': {}",
                    to_comma_separated(keys)
                )));
            }
        };

        record_issue(context, &id, &issue);

        if let Some(status) = self.status {
            let status = context.template.render(status)?;
            transition_issue(context, &mut issue, &status, self.transitions)?;
            record_issue(context, &id, &issue);
        }

        if issue.is_resolved() {
            return Ok(Some(issue));
        }

        if let Some(comment) = self.comment {
            let body = context.template.render(comment)?;
            add_comment(context, &issue, &body)?;
        }

        Ok(Some(issue))
    }

    fn source(&self, id: &str) -> String {
        match self.template {
            Some(template) => format!("Jira template '{template}'"),
            None => format!("Jira issue '{id}'"),
        }
    }

    /// Fields from the rendered template file merged with the rendered
    /// literal fields, keyed by Jira field name.
    fn issue_fields(&self, context: &RuntimeContext) -> Result<Map> {
        let config = &context.config;
        let mut fields = Map::new();

        if let Some(template) = self.template {
            let path = config.jira_template_path.join(template);
            let content = std::fs::read_to_string(&path).map_err(|e| {
                RetascError::prerequisite(format!(
                    "Failed to read Jira template '{template}': {e}"
                ))
            })?;
            let rendered = context.template.render(&content)?;
            let data = match serde_yaml::from_str::<Value>(&rendered) {
                Ok(Value::Map(data)) => data,
                Ok(Value::Null) => Map::new(),
                Ok(other) => {
                    return Err(RetascError::prerequisite(format!(
                        "Jira template '{template}' must be a mapping, got {}",
                        other.type_name()
                    )))
                }
                Err(e) => {
                    return Err(RetascError::prerequisite(format!(
                        "Invalid YAML in Jira template '{template}': {e}"
                    )))
                }
            };

            let unsupported: Vec<&String> = data
                .keys()
                .filter(|name| !config.jira_fields.contains_key(*name))
                .collect();
            if !unsupported.is_empty() {
                return Err(RetascError::prerequisite(format!(
                    "Jira template '{template}' contains unsupported fields: {}\nSupported fields: {}",
                    to_comma_separated(unsupported),
                    to_comma_separated(config.jira_fields.keys()),
                )));
            }

            for (name, value) in data {
                fields.insert(config.to_jira_field_name(&name).to_string(), value);
            }
        }

        if let Value::Map(overrides) = context.template.render_value(&Value::Map(self.fields.clone()))? {
            for (name, value) in overrides {
                fields.insert(config.to_jira_field_name(&name).to_string(), value);
            }
        }

        Ok(fields)
    }
}

fn take_labels(fields: &mut Map, id: &str) -> Result<Vec<String>> {
    match fields.remove("labels") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::List(labels)) => Ok(labels.iter().map(Value::to_string).collect()),
        Some(other) => Err(RetascError::prerequisite(format!(
            "Labels of Jira issue '{id}' must be a list, got {}",
            other.type_name()
        ))),
    }
}

/// Labels required by the current input (`jira_labels` parameter).
fn input_labels(context: &RuntimeContext) -> Vec<String> {
    context
        .template
        .params
        .get("jira_labels")
        .and_then(Value::as_list)
        .map(|labels| labels.iter().map(Value::to_string).collect())
        .unwrap_or_default()
}

fn update_issue(
    context: &mut RuntimeContext,
    issue: &mut Issue,
    fields: Map,
    labels: BTreeSet<String>,
) -> Result<()> {
    let mut changes: Map = fields
        .into_iter()
        .filter(|(name, value)| issue.fields.get(name) != Some(value))
        .collect();

    let current: BTreeSet<String> = issue.labels().into_iter().collect();
    if !labels.is_subset(&current) {
        let labels = current.union(&labels).cloned().map(Value::from).collect();
        changes.insert("labels".into(), Value::List(labels));
    }

    if changes.is_empty() {
        return Ok(());
    }

    context
        .report
        .set("update", Value::Map(changes.clone()).to_canonical_json());
    context.jira.edit_issue(&issue.key, &changes)?;
    issue.fields.extend(changes);
    Ok(())
}

fn record_issue(context: &mut RuntimeContext, id: &str, issue: &Issue) {
    let issues = context
        .template
        .params
        .entry("issues".to_string())
        .or_insert_with(|| Value::Map(Map::new()));
    if let Some(issues) = issues.as_map_mut() {
        issues.insert(id.to_string(), issue.to_value());
    }
    context
        .report
        .jira_issues
        .insert(id.to_string(), Value::from(&issue.key));
    context.report.set("issue", issue.key.as_str());
}

fn add_comment(context: &mut RuntimeContext, issue: &Issue, body: &str) -> Result<()> {
    let comments = context.jira.get_issue_comments(&issue.key)?;
    if comments
        .iter()
        .any(|comment| comment.body.trim() == body.trim())
    {
        context.report.set("comment_status", "skipped_duplicate");
        return Ok(());
    }
    context.jira.add_comment(&issue.key, body)?;
    context.report.set("comment_status", "added");
    Ok(())
}

// ---------------------------------------------------------------------------
// Status transitions
// ---------------------------------------------------------------------------

/// Statuses after `current` in `statuses`, or all of them if `current` is
/// not listed.
fn remaining_after<'a>(statuses: &'a [String], current: &str) -> &'a [String] {
    match statuses.iter().position(|status| status == current) {
        Some(index) => &statuses[index + 1..],
        None => statuses,
    }
}

/// The direct transition to `desired`, else the rightmost available
/// intermediate status.
fn next_transition<'a>(
    available: &'a [Transition],
    desired: &str,
    remaining: &[String],
) -> Option<&'a Transition> {
    let to = |status: &str| available.iter().find(|t| t.to == status);
    to(desired).or_else(|| remaining.iter().rev().find_map(|status| to(status)))
}

fn transition_issue(
    context: &mut RuntimeContext,
    issue: &mut Issue,
    desired: &str,
    intermediates: &[String],
) -> Result<()> {
    let current = issue.status().to_string();
    if current == desired {
        return Ok(());
    }

    let mut remaining = remaining_after(intermediates, &current);
    loop {
        let available = context.jira.get_issue_transitions(&issue.key)?;
        let Some(transition) = next_transition(&available, desired, remaining) else {
            let names: Vec<String> = available.iter().map(|t| format!("'{}'", t.to)).collect();
            return Err(RetascError::prerequisite(format!(
                "Cannot transition issue {} to '{desired}'; available transitions: [{}]",
                issue.key,
                names.join(", ")
            )));
        };

        info!(
            "Transitioning {} to {:?} via {:?}",
            issue.key, transition.to, transition.name
        );
        context.jira.transition_issue(&issue.key, &transition.id)?;
        issue
            .fields
            .insert("status".into(), crate::value::map([("name", transition.to.as_str())]));

        if transition.to == desired {
            break;
        }
        remaining = remaining_after(remaining, &transition.to);
    }

    context.report.set("status_transition", desired);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_context::testing::*;
    use crate::value::map;
    use std::path::Path;
    use tempfile::TempDir;

    fn jira(yaml: &str) -> JiraIssue {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn write_template(root: &Path, name: &str, content: &str) {
        let dir = root.join("templates");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), content).unwrap();
    }

    fn open_issue(summary: &str, labels: &[&str]) -> Value {
        map([
            ("summary", Value::from(summary)),
            ("labels", Value::from(labels.to_vec())),
            ("resolution", Value::Null),
            ("status", map([("name", "New")])),
        ])
    }

    #[test]
    fn creates_missing_issue() {
        let dir = TempDir::new().unwrap();
        write_template(
            dir.path(),
            "main.yaml",
            "summary: Main issue for {{ release }}\nissue_type: Task\nlabels: [extra]\n",
        );
        let (mut context, fakes) = context(dir.path());
        let params = &mut context.template.params;
        params.insert("release".into(), Value::from("rhel-10.0"));
        params.insert("jira_labels".into(), Value::from(vec!["rhel-10.0-managed"]));

        let state = jira("jira_issue: main\ntemplate: main.yaml")
            .update_state(&mut context)
            .unwrap();
        assert_eq!(state, ReleaseRuleState::InProgress);

        let tracker = fakes.jira.state.borrow();
        assert_eq!(tracker.searches, [r#"labels="retasc-id-main""#]);
        assert_eq!(tracker.created.len(), 1);
        let created = &tracker.created[0];
        assert_eq!(created.get("summary"), Some(&Value::from("Main issue for rhel-10.0")));
        assert_eq!(created.get("issuetype"), Some(&Value::from("Task")));
        assert_eq!(
            created.get("labels"),
            Some(&Value::from(vec!["extra", "retasc-id-main", "rhel-10.0-managed"]))
        );

        assert_eq!(
            context.report.jira_issues.get("main"),
            Some(&Value::from("TEST-1"))
        );
        assert_eq!(
            context
                .template
                .params
                .get("issues")
                .and_then(|issues| issues.pointer(&["main", "key"])),
            Some(&Value::from("TEST-1"))
        );
        assert!(context.report.get(&["create"]).is_some());
    }

    #[test]
    fn edits_only_divergent_fields() {
        let dir = TempDir::new().unwrap();
        let (mut context, fakes) = context(dir.path());
        fakes.jira.add_issue(
            "TEST-1",
            map([
                ("summary", Value::from("Old")),
                ("description", Value::from("Same")),
                ("labels", Value::from(vec!["retasc-id-main"])),
                ("resolution", Value::Null),
            ]),
        );

        let state = jira("jira_issue: main\nfields:\n  summary: New\n  description: Same\n")
            .update_state(&mut context)
            .unwrap();
        assert_eq!(state, ReleaseRuleState::InProgress);

        let tracker = fakes.jira.state.borrow();
        assert!(tracker.created.is_empty());
        assert_eq!(tracker.edited.len(), 1);
        let (key, changes) = &tracker.edited[0];
        assert_eq!(key, "TEST-1");
        assert_eq!(changes, &value_map(map([("summary", "New")])));
        assert_eq!(
            context.report.get(&["update"]).and_then(|n| n.as_value()),
            Some(&Value::from(r#"{"summary":"New"}"#))
        );
    }

    fn nested_issue(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn equal_nested_fields_are_not_edited() {
        let dir = TempDir::new().unwrap();
        let (mut context, fakes) = context(dir.path());
        fakes.jira.add_issue(
            "TEST-1",
            nested_issue(
                "project: {key: RHEL}\nversions: [{name: rhel-10.0}, {name: rhel-10.1}]\nlabels: [retasc-id-main]\nresolution: null\n",
            ),
        );

        jira("jira_issue: main\nfields:\n  project: {key: RHEL}\n  versions:\n    - name: rhel-10.0\n    - name: rhel-10.1\n")
            .update_state(&mut context)
            .unwrap();

        assert!(fakes.jira.state.borrow().edited.is_empty());
        assert!(context.report.get(&["update"]).is_none());
    }

    #[test]
    fn divergent_nested_list_is_edited_alone() {
        let dir = TempDir::new().unwrap();
        let (mut context, fakes) = context(dir.path());
        fakes.jira.add_issue(
            "TEST-1",
            nested_issue(
                "project: {key: RHEL}\nversions: [{name: rhel-10.0}]\nlabels: [retasc-id-main]\nresolution: null\n",
            ),
        );

        jira("jira_issue: main\nfields:\n  project: {key: RHEL}\n  versions:\n    - name: rhel-10.0\n    - name: rhel-10.1\n")
            .update_state(&mut context)
            .unwrap();

        let tracker = fakes.jira.state.borrow();
        assert_eq!(
            tracker.edited,
            [(
                "TEST-1".to_string(),
                value_map(nested_issue("versions: [{name: rhel-10.0}, {name: rhel-10.1}]"))
            )]
        );
    }

    #[test]
    fn missing_labels_are_added() {
        let dir = TempDir::new().unwrap();
        let (mut context, fakes) = context(dir.path());
        fakes
            .jira
            .add_issue("TEST-1", open_issue("Main", &["retasc-id-main", "manual"]));
        context
            .template
            .params
            .insert("jira_labels".into(), Value::from(vec!["managed"]));

        jira("jira_issue: main\nfields:\n  summary: Main\n")
            .update_state(&mut context)
            .unwrap();

        let tracker = fakes.jira.state.borrow();
        assert_eq!(
            tracker.edited,
            [(
                "TEST-1".to_string(),
                value_map(map([(
                    "labels",
                    vec!["managed", "manual", "retasc-id-main"]
                )]))
            )]
        );
    }

    #[test]
    fn existing_labels_are_kept() {
        let dir = TempDir::new().unwrap();
        let (mut context, fakes) = context(dir.path());
        fakes
            .jira
            .add_issue("TEST-1", open_issue("Main", &["retasc-id-main", "manual"]));

        let state = jira("jira_issue: main\nfields:\n  summary: Main\n")
            .update_state(&mut context)
            .unwrap();

        assert_eq!(state, ReleaseRuleState::InProgress);
        let tracker = fakes.jira.state.borrow();
        assert!(tracker.edited.is_empty(), "{:?}", tracker.edited);
        assert!(context.report.get(&["update"]).is_none());
        assert_eq!(
            context
                .template
                .params
                .get("issues")
                .and_then(|issues| issues.pointer(&["main", "fields", "labels"])),
            Some(&Value::from(vec!["retasc-id-main", "manual"]))
        );
    }

    #[test]
    fn resolved_issue_is_completed_without_changes() {
        let dir = TempDir::new().unwrap();
        let (mut context, fakes) = context(dir.path());
        fakes.jira.add_issue(
            "TEST-1",
            map([
                ("summary", Value::from("Old")),
                ("labels", Value::from(vec!["retasc-id-main"])),
                ("resolution", map([("name", "Done")])),
            ]),
        );

        let state = jira("jira_issue: main\nfields:\n  summary: New\ncomment: Hello\n")
            .update_state(&mut context)
            .unwrap();
        assert_eq!(state, ReleaseRuleState::Completed);
        assert_eq!(fakes.jira.mutation_count(), 0);
        assert_eq!(
            context.report.get(&["issue"]).and_then(|n| n.as_value()),
            Some(&Value::from("TEST-1"))
        );
    }

    #[test]
    fn must_exist_does_not_create() {
        let dir = TempDir::new().unwrap();
        let (mut context, fakes) = context(dir.path());
        let state = jira("jira_issue: main\nfields:\n  summary: Main\nmust_exist: true\n")
            .update_state(&mut context)
            .unwrap();
        assert_eq!(state, ReleaseRuleState::InProgress);
        assert_eq!(fakes.jira.mutation_count(), 0);
        assert_eq!(
            context.report.get(&["not_found"]).and_then(|n| n.as_value()),
            Some(&Value::Bool(true))
        );
    }

    #[test]
    fn ambiguous_search_is_an_error() {
        let dir = TempDir::new().unwrap();
        let (mut context, fakes) = context(dir.path());
        fakes.jira.add_issue("TEST-1", open_issue("A", &["retasc-id-main"]));
        fakes.jira.add_issue("TEST-2", open_issue("B", &["retasc-id-main"]));
        let err = jira("jira_issue: main\nfields:\n  summary: Main\n")
            .update_state(&mut context)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Found multiple Jira issues with label 'retasc-id-main': 'TEST-1', 'TEST-2'"
        );
        assert!(err.is_recoverable());
    }

    #[test]
    fn reserved_labels_fail_before_search() {
        let dir = TempDir::new().unwrap();
        write_template(dir.path(), "main.yaml", "labels: [retasc-id-other]\n");
        let (mut context, fakes) = context(dir.path());
        let err = jira("jira_issue: main\ntemplate: main.yaml")
            .update_state(&mut context)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Jira template 'main.yaml' must not use labels prefixed with 'retasc-id-': 'retasc-id-other'"
        );
        assert!(fakes.jira.state.borrow().searches.is_empty());
    }

    #[test]
    fn unsupported_template_fields() {
        let dir = TempDir::new().unwrap();
        write_template(dir.path(), "main.yaml", "summary: x\ncolor: red\n");
        let (mut context, _) = context(dir.path());
        let err = jira("jira_issue: main\ntemplate: main.yaml")
            .update_state(&mut context)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Jira template 'main.yaml' contains unsupported fields: 'color'\n\
             Supported fields: 'description', 'issue_type', 'labels', 'project', 'summary'"
        );
    }

    #[test]
    fn transitions_through_intermediate_statuses() {
        let dir = TempDir::new().unwrap();
        let (mut context, fakes) = context(dir.path());
        fakes.jira.add_issue("TEST-1", open_issue("Main", &["retasc-id-main"]));
        fakes.jira.add_transition("New", "11", "In Progress");
        fakes.jira.add_transition("In Progress", "21", "Review");
        fakes.jira.add_transition("Review", "31", "Closed");

        let prereq = jira(
            "jira_issue: main\nfields:\n  summary: Main\nstatus: Closed\n\
             transitions: [In Progress, Review]\n",
        );
        prereq.update_state(&mut context).unwrap();

        let transitioned: Vec<String> = fakes
            .jira
            .state
            .borrow()
            .transitioned
            .iter()
            .map(|(_, id)| id.clone())
            .collect();
        assert_eq!(transitioned, ["11", "21", "31"]);
        assert_eq!(
            context.report.get(&["status_transition"]).and_then(|n| n.as_value()),
            Some(&Value::from("Closed"))
        );

        // Already in the desired status.
        prereq.update_state(&mut context).unwrap();
        assert_eq!(fakes.jira.state.borrow().transitioned.len(), 3);
    }

    #[test]
    fn unreachable_status_is_an_error() {
        let dir = TempDir::new().unwrap();
        let (mut context, fakes) = context(dir.path());
        fakes.jira.add_issue("TEST-1", open_issue("Main", &["retasc-id-main"]));
        fakes.jira.add_transition("New", "11", "In Progress");

        let err = jira("jira_issue: main\nfields:\n  summary: Main\nstatus: Closed\n")
            .update_state(&mut context)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot transition issue TEST-1 to 'Closed'; available transitions: ['In Progress']"
        );
    }

    #[test]
    fn comments_are_not_duplicated() {
        let dir = TempDir::new().unwrap();
        let (mut context, fakes) = context(dir.path());
        fakes.jira.add_issue("TEST-1", open_issue("Main", &["retasc-id-main"]));
        let prereq = jira(
            "jira_issue: main\nfields:\n  summary: Main\ncomment: Build {{ release }} is ready\n",
        );
        context
            .template
            .params
            .insert("release".into(), Value::from("rhel-10.0"));

        prereq.update_state(&mut context).unwrap();
        assert_eq!(
            context.report.get(&["comment_status"]).and_then(|n| n.as_value()),
            Some(&Value::from("added"))
        );
        prereq.update_state(&mut context).unwrap();
        assert_eq!(
            context.report.get(&["comment_status"]).and_then(|n| n.as_value()),
            Some(&Value::from("skipped_duplicate"))
        );
        assert_eq!(
            fakes.jira.state.borrow().added_comments,
            [("TEST-1".to_string(), "Build rhel-10.0 is ready".to_string())]
        );
    }

    #[test]
    fn subtasks_reference_parent() {
        let dir = TempDir::new().unwrap();
        let (mut context, fakes) = context(dir.path());
        let prereq = jira(
            "jira_issue: main\nfields:\n  summary: Main\nsubtasks:\n\
             \x20 - id: sub\n    fields:\n      summary: Sub\n",
        );
        prereq.update_state(&mut context).unwrap();

        let tracker = fakes.jira.state.borrow();
        assert_eq!(tracker.created.len(), 2);
        assert_eq!(
            tracker.created[1].get("parent"),
            Some(&map([("key", "TEST-1")]))
        );
        assert_eq!(
            context
                .report
                .get(&["Subtask(\"sub\")", "issue"])
                .and_then(|n| n.as_value()),
            Some(&Value::from("TEST-2"))
        );
        assert_eq!(context.report.jira_issues.len(), 2);
    }

    #[test]
    fn validation() {
        let dir = TempDir::new().unwrap();
        write_template(dir.path(), "main.yaml", "summary: x\n");
        let config = test_config(dir.path());
        let rules: Vec<Rule> = serde_yaml::from_str(
            r#"
- name: first
  prerequisites:
    - jira_issue: main
      template: main.yaml
- name: second
  prerequisites:
    - jira_issue: main
      template: missing.yaml
      fields:
        labels: [retasc-id-x]
    - jira_issue: main
      must_exist: true
      fields:
        summary: x
    - jira_issue: empty
"#,
        )
        .unwrap();
        let errors_of = |rule: usize, prereq: usize| {
            rules[rule].prerequisites[prereq].validation_errors(&rules, &config)
        };

        assert!(errors_of(0, 0).is_empty());
        assert_eq!(
            errors_of(1, 0),
            [
                "Jira issue template files not found: 'missing.yaml'",
                "Jira issue ID(s) already used elsewhere: 'main'",
                "Jira issue 'main' must not use labels prefixed with 'retasc-id-': 'retasc-id-x'",
            ]
        );
        assert!(errors_of(1, 1).is_empty());
        assert_eq!(
            errors_of(1, 2),
            ["Jira issue 'empty' requires either a template or fields"]
        );
    }
}
