//! Jira REST API (v2) client.

use reqwest::Method;
use serde_json::json;
use tracing::{info, warn};

use super::http_session::HttpSession;
use crate::error::{RetascError, Result};
use crate::value::{Map, Value};

const SEARCH_PAGE_SIZE: usize = 100;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub key: String,
    pub fields: Map,
}

impl Issue {
    pub fn new(key: impl Into<String>, fields: Map) -> Self {
        Self {
            key: key.into(),
            fields,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.fields
            .get("resolution")
            .is_some_and(|resolution| !resolution.is_null())
    }

    pub fn status(&self) -> &str {
        self.fields
            .get("status")
            .and_then(|status| status.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn labels(&self) -> Vec<String> {
        self.fields
            .get("labels")
            .and_then(Value::as_list)
            .map(|labels| labels.iter().map(Value::to_string).collect())
            .unwrap_or_default()
    }

    /// `{key, fields}` as seen by templates.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("key".into(), Value::from(&self.key));
        map.insert("fields".into(), Value::Map(self.fields.clone()));
        Value::Map(map)
    }

    fn from_json(value: serde_json::Value) -> Result<Self> {
        let key = value
            .get("key")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| unexpected_response(&value))?
            .to_string();
        let fields = match Value::from(value.get("fields").cloned().unwrap_or_default()) {
            Value::Map(map) => map,
            _ => Map::new(),
        };
        Ok(Self { key, fields })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub id: String,
    pub name: String,
    /// Target status name.
    pub to: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub id: String,
    pub body: String,
}

fn unexpected_response(value: &serde_json::Value) -> RetascError {
    RetascError::prerequisite(format!("Unexpected response: {value}"))
}

// ---------------------------------------------------------------------------
// IssueTracker
// ---------------------------------------------------------------------------

pub trait IssueTracker {
    fn search_issues(&self, jql: &str, fields: &[String]) -> Result<Vec<Issue>>;
    fn create_issue(&self, fields: &Map) -> Result<Issue>;
    fn edit_issue(&self, key: &str, fields: &Map) -> Result<()>;
    fn get_issue_transitions(&self, key: &str) -> Result<Vec<Transition>>;
    fn transition_issue(&self, key: &str, transition_id: &str) -> Result<()>;
    fn get_issue_comments(&self, key: &str) -> Result<Vec<Comment>>;
    fn add_comment(&self, key: &str, body: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// JiraClient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct JiraClient {
    api_url: String,
    token: Option<String>,
    session: HttpSession,
}

impl JiraClient {
    pub fn new(api_url: &str, token: Option<String>, session: HttpSession) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
            session,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::blocking::RequestBuilder {
        let builder = self
            .session
            .request(method, &format!("{}/rest/api/2/{path}", self.api_url))
            .header(reqwest::header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

impl IssueTracker for JiraClient {
    fn search_issues(&self, jql: &str, fields: &[String]) -> Result<Vec<Issue>> {
        let mut issues = Vec::new();
        loop {
            let start_at = issues.len().to_string();
            let page_size = SEARCH_PAGE_SIZE.to_string();
            let mut query = vec![
                ("jql", jql.to_string()),
                ("startAt", start_at),
                ("maxResults", page_size),
            ];
            if !fields.is_empty() {
                query.push(("fields", fields.join(",")));
            }
            let data = self
                .session
                .send_json(self.request(Method::GET, "search").query(&query))?;
            let page = data
                .get("issues")
                .and_then(serde_json::Value::as_array)
                .ok_or_else(|| unexpected_response(&data))?;
            let page_len = page.len();
            for issue in page {
                issues.push(Issue::from_json(issue.clone())?);
            }
            let total = data
                .get("total")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0) as usize;
            if page_len == 0 || issues.len() >= total {
                return Ok(issues);
            }
        }
    }

    fn create_issue(&self, fields: &Map) -> Result<Issue> {
        let payload = Value::Map(fields.clone());
        info!("Creating new Jira issue with fields: {payload}");
        let body = json!({ "fields": payload.to_json() });
        let data = self.session.send_json(
            self.request(Method::POST, "issue")
                .query(&[("updateHistory", "false")])
                .json(&body),
        )?;
        let key = data
            .get("key")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| unexpected_response(&data))?;
        let mut issue_fields = fields.clone();
        issue_fields.entry("resolution".into()).or_insert(Value::Null);
        Ok(Issue::new(key, issue_fields))
    }

    fn edit_issue(&self, key: &str, fields: &Map) -> Result<()> {
        let payload = Value::Map(fields.clone());
        info!("Updating Jira issue {key} with fields: {payload}");
        let body = json!({ "fields": payload.to_json() });
        self.session.send_checked(
            self.request(Method::PUT, &format!("issue/{key}"))
                .query(&[("notifyUsers", "True")])
                .json(&body),
        )?;
        Ok(())
    }

    fn get_issue_transitions(&self, key: &str) -> Result<Vec<Transition>> {
        let data = self
            .session
            .send_json(self.request(Method::GET, &format!("issue/{key}/transitions")))?;
        let transitions = data
            .get("transitions")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| unexpected_response(&data))?;
        Ok(transitions
            .iter()
            .map(|t| Transition {
                id: json_string(t.get("id")),
                name: json_string(t.get("name")),
                to: json_string(t.get("to").and_then(|to| to.get("name"))),
            })
            .collect())
    }

    fn transition_issue(&self, key: &str, transition_id: &str) -> Result<()> {
        let body = json!({ "transition": { "id": transition_id } });
        self.session.send_checked(
            self.request(Method::POST, &format!("issue/{key}/transitions"))
                .json(&body),
        )?;
        Ok(())
    }

    fn get_issue_comments(&self, key: &str) -> Result<Vec<Comment>> {
        let data = self
            .session
            .send_json(self.request(Method::GET, &format!("issue/{key}/comment")))?;
        let comments = data
            .get("comments")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| unexpected_response(&data))?;
        Ok(comments
            .iter()
            .map(|c| Comment {
                id: json_string(c.get("id")),
                body: json_string(c.get("body")),
            })
            .collect())
    }

    fn add_comment(&self, key: &str, body: &str) -> Result<()> {
        info!("Adding comment to Jira issue {key}");
        self.session.send_checked(
            self.request(Method::POST, &format!("issue/{key}/comment"))
                .json(&json!({ "body": body })),
        )?;
        Ok(())
    }
}

fn json_string(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// DryRunJiraClient
// ---------------------------------------------------------------------------

/// Reads from the wrapped tracker; mutations are logged and skipped.
pub struct DryRunJiraClient<T> {
    inner: T,
}

impl<T: IssueTracker> DryRunJiraClient<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

impl<T: IssueTracker> IssueTracker for DryRunJiraClient<T> {
    fn search_issues(&self, jql: &str, fields: &[String]) -> Result<Vec<Issue>> {
        self.inner.search_issues(jql, fields)
    }

    fn create_issue(&self, fields: &Map) -> Result<Issue> {
        let payload = Value::Map(fields.clone());
        warn!("[DRY RUN] Skipping creating Jira issue: {payload}");
        let mut issue_fields = Map::new();
        issue_fields.insert("resolution".into(), Value::Null);
        issue_fields.extend(fields.clone());
        Ok(Issue::new("DRYRUN", issue_fields))
    }

    fn edit_issue(&self, key: &str, fields: &Map) -> Result<()> {
        let payload = Value::Map(fields.clone());
        warn!("[DRY RUN] Skipping updating Jira issue {key}: {payload}");
        Ok(())
    }

    fn get_issue_transitions(&self, key: &str) -> Result<Vec<Transition>> {
        if key == "DRYRUN" {
            return Ok(Vec::new());
        }
        self.inner.get_issue_transitions(key)
    }

    fn transition_issue(&self, key: &str, transition_id: &str) -> Result<()> {
        warn!("[DRY RUN] Skipping transition {transition_id} of Jira issue {key}");
        Ok(())
    }

    fn get_issue_comments(&self, key: &str) -> Result<Vec<Comment>> {
        if key == "DRYRUN" {
            return Ok(Vec::new());
        }
        self.inner.get_issue_comments(key)
    }

    fn add_comment(&self, key: &str, body: &str) -> Result<()> {
        warn!("[DRY RUN] Skipping adding comment to Jira issue {key}: {body}");
        Ok(())
    }
}
