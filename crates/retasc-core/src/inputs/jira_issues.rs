use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::runtime_context::RuntimeContext;
use crate::value::{Params, Value};

/// One value per Jira issue matching a JQL query. Each value has
/// `jira_issue` and the full result list as `jira_issues`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JiraIssues {
    pub jql: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl JiraIssues {
    pub fn values(&self, context: &RuntimeContext) -> Result<Vec<Params>> {
        let issues: Vec<Value> = context
            .jira
            .search_issues(&self.jql, &self.fields)?
            .iter()
            .map(|issue| issue.to_value())
            .collect();

        Ok(issues
            .iter()
            .map(|issue| {
                let mut data = Params::new();
                data.insert("jira_issue".into(), issue.clone());
                data.insert("jira_issues".into(), Value::List(issues.clone()));
                data
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::Input;
    use crate::runtime_context::testing::*;
    use crate::value::map;
    use tempfile::TempDir;

    #[test]
    fn one_value_per_issue() {
        let dir = TempDir::new().unwrap();
        let (context, fakes) = context(dir.path());
        fakes.jira.add_issue("TEST-1", map([("summary", "a")]));
        fakes.jira.add_issue("TEST-2", map([("summary", "b")]));

        let input = Input::JiraIssues(JiraIssues {
            jql: "project = TEST".into(),
            fields: vec!["summary".into()],
        });
        let values = input.values(&context).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(
            values[1].get("jira_issue").and_then(|i| i.get("key")),
            Some(&Value::from("TEST-2"))
        );
        assert_eq!(
            values[0].get("jira_issues").and_then(Value::as_list).map(Vec::len),
            Some(2)
        );
        assert_eq!(input.section_name(&values[0]), r#"JiraIssues("TEST-1")"#);
        assert_eq!(fakes.jira.state.borrow().searches, ["project = TEST"]);
    }
}
