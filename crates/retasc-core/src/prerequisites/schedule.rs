use regex::Regex;
use serde::Deserialize;

use crate::clients::ScheduleTask;
use crate::error::{RetascError, Result};
use crate::runtime_context::RuntimeContext;
use crate::state::ReleaseRuleState;
use crate::value::{Params, Value};

/// Which schedule task attribute the pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    Name,
    Slug,
}

impl MatchField {
    fn as_str(self) -> &'static str {
        match self {
            MatchField::Name => "name",
            MatchField::Slug => "slug",
        }
    }

    fn of(self, task: &ScheduleTask) -> &str {
        match self {
            MatchField::Name => &task.name,
            MatchField::Slug => &task.slug,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ScheduleFields {
    schedule_task: Option<String>,
    schedule_slug: Option<String>,
    #[serde(default)]
    skip_if_missing: bool,
}

/// Looks up a Product Pages schedule task of the current release and
/// exposes its dates as template parameters.
///
/// A pattern enclosed in slashes (`/GA.*/`) is a regular expression search,
/// anything else must match exactly.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "ScheduleFields")]
pub struct Schedule {
    pub pattern: String,
    pub field: MatchField,
    pub skip_if_missing: bool,
}

impl TryFrom<ScheduleFields> for Schedule {
    type Error = String;

    fn try_from(fields: ScheduleFields) -> std::result::Result<Self, Self::Error> {
        let (pattern, field) = match (fields.schedule_task, fields.schedule_slug) {
            (Some(task), None) => (task, MatchField::Name),
            (None, Some(slug)) => (slug, MatchField::Slug),
            (None, None) => {
                return Err("Either schedule_task or schedule_slug must be set".to_string())
            }
            (Some(_), Some(_)) => {
                return Err("Only one of schedule_task or schedule_slug can be set".to_string())
            }
        };
        Ok(Self {
            pattern,
            field,
            skip_if_missing: fields.skip_if_missing,
        })
    }
}

enum Matcher {
    Exact(String),
    Regex(Regex),
}

impl Matcher {
    fn parse(pattern: &str) -> Result<Self> {
        let Some(inner) = pattern.strip_prefix('/') else {
            return Ok(Matcher::Exact(pattern.to_string()));
        };
        let Some(inner) = inner.strip_suffix('/') else {
            return Err(RetascError::prerequisite(format!(
                "Regular expression string '{pattern}' must be enclosed with slash \
                 character '/' on both sides."
            )));
        };
        Regex::new(inner).map(Matcher::Regex).map_err(|e| {
            RetascError::prerequisite(format!(
                "Invalid regular expression pattern '{inner}': {e}"
            ))
        })
    }

    fn is_match(&self, text: &str) -> bool {
        match self {
            Matcher::Exact(expected) => expected == text,
            Matcher::Regex(regex) => regex.is_match(text),
        }
    }
}

impl Schedule {
    pub fn update_state(&self, context: &mut RuntimeContext) -> Result<ReleaseRuleState> {
        let release = context
            .template
            .params
            .get("release")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RetascError::prerequisite("Schedule requires the 'release' template parameter")
            })?
            .to_string();
        let tasks = context.pp.release_schedules(&release)?;

        let schedule = Value::List(tasks.iter().map(ScheduleTask::to_value).collect());
        let mut local = Params::new();
        local.insert("schedule".into(), schedule);

        let pattern = context.template.render_with(&self.pattern, &local)?;
        let matcher = Matcher::parse(&pattern)?;
        let matching: Vec<&ScheduleTask> = tasks
            .iter()
            .filter(|task| matcher.is_match(self.field.of(task)))
            .collect();

        let task = match matching.as_slice() {
            [task] => *task,
            [] if self.skip_if_missing => {
                context.report.set("schedule_task_missing", true);
                return Ok(ReleaseRuleState::Pending);
            }
            [] => {
                return Err(RetascError::prerequisite(format!(
                    "Failed to find schedule task matching {} '{pattern}'",
                    self.field.as_str()
                )))
            }
            many => {
                let names: Vec<String> =
                    many.iter().map(|task| format!("'{}'", task.name)).collect();
                return Err(RetascError::prerequisite(format!(
                    "Found multiple schedule tasks matching {} '{pattern}', matching are: {}",
                    self.field.as_str(),
                    names.join(", ")
                )));
            }
        };

        local.insert("schedule_task".into(), Value::from(&task.name));
        local.insert("start_date".into(), Value::Date(task.start_date));
        local.insert("end_date".into(), Value::Date(task.end_date));
        local.insert("schedule_task_is_draft".into(), Value::Bool(task.is_draft));
        context.template.params.extend(local);
        context.report.set("schedule_task", task.name.as_str());

        Ok(ReleaseRuleState::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_context::testing::*;
    use crate::runtime_context::RuntimeContext;
    use tempfile::TempDir;

    fn schedule(yaml: &str) -> Schedule {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn setup(dir: &TempDir) -> (RuntimeContext, Fakes) {
        let (mut context, fakes) = context(dir.path());
        context
            .template
            .params
            .insert("release".into(), Value::from("rhel-10.0"));
        fakes.pp.add_task(
            "rhel-10.0",
            "GA for rhel 10.0",
            date(1990, 1, 1),
            date(1990, 1, 3),
        );
        fakes.pp.add_task(
            "rhel-10.0",
            "Beta for rhel 10.0",
            date(1989, 10, 1),
            date(1989, 10, 2),
        );
        (context, fakes)
    }

    #[test]
    fn exact_match_injects_dates() {
        let dir = TempDir::new().unwrap();
        let (mut context, _) = setup(&dir);
        let state = schedule("schedule_task: GA for rhel {{ release | replace('rhel-', '') }}")
            .update_state(&mut context)
            .unwrap();
        assert_eq!(state, ReleaseRuleState::Completed);

        let params = &context.template.params;
        assert_eq!(params.get("start_date"), Some(&Value::Date(date(1990, 1, 1))));
        assert_eq!(params.get("end_date"), Some(&Value::Date(date(1990, 1, 3))));
        assert_eq!(params.get("schedule_task"), Some(&Value::from("GA for rhel 10.0")));
        assert_eq!(params.get("schedule_task_is_draft"), Some(&Value::Bool(false)));
        assert_eq!(params.get("schedule").and_then(Value::as_list).map(Vec::len), Some(2));
        assert_eq!(
            context.report.get(&["schedule_task"]).and_then(|n| n.as_value()),
            Some(&Value::from("GA for rhel 10.0"))
        );
    }

    #[test]
    fn slug_and_regex_match() {
        let dir = TempDir::new().unwrap();
        let (mut context, _) = setup(&dir);
        schedule("schedule_slug: product.Beta for rhel 10.0")
            .update_state(&mut context)
            .unwrap();
        assert_eq!(
            context.template.params.get("schedule_task"),
            Some(&Value::from("Beta for rhel 10.0"))
        );

        schedule("schedule_task: /^GA/").update_state(&mut context).unwrap();
        assert_eq!(
            context.template.params.get("schedule_task"),
            Some(&Value::from("GA for rhel 10.0"))
        );
    }

    #[test]
    fn missing_task() {
        let dir = TempDir::new().unwrap();
        let (mut context, _) = setup(&dir);
        let err = schedule("schedule_task: Missing")
            .update_state(&mut context)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to find schedule task matching name 'Missing'"
        );
        assert!(err.is_recoverable());

        let state = schedule("schedule_task: Missing\nskip_if_missing: true")
            .update_state(&mut context)
            .unwrap();
        assert_eq!(state, ReleaseRuleState::Pending);
        assert!(!context.template.params.contains_key("start_date"));
    }

    #[test]
    fn multiple_matches_are_listed_in_schedule_order() {
        let dir = TempDir::new().unwrap();
        let (mut context, _) = setup(&dir);
        let err = schedule("schedule_task: /rhel 10/")
            .update_state(&mut context)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Found multiple schedule tasks matching name '/rhel 10/', matching are: \
             'GA for rhel 10.0', 'Beta for rhel 10.0'"
        );
    }

    #[test]
    fn malformed_regex() {
        let dir = TempDir::new().unwrap();
        let (mut context, _) = setup(&dir);
        let err = schedule("schedule_task: /GA")
            .update_state(&mut context)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Regular expression string '/GA' must be enclosed with slash character '/' on both sides."
        );

        let err = schedule("schedule_task: /GA(/")
            .update_state(&mut context)
            .unwrap_err();
        assert!(
            err.to_string()
                .starts_with("Invalid regular expression pattern 'GA(':"),
            "{err}"
        );
    }
}
