use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::{RetascError, Result};
use crate::http_common::{default_method, response_value, HttpRequest};
use crate::runtime_context::RuntimeContext;
use crate::state::ReleaseRuleState;
use crate::value::{Map, Value};

/// Sends an HTTP request and exposes the response as `http_response`.
///
/// Only a failure to get any response is an error; the status code is left
/// for later conditions to check.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Http {
    #[serde(rename = "http", alias = "url")]
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub params: Map,
    #[serde(default)]
    pub data: Option<Value>,
}

impl Http {
    pub fn update_state(&self, context: &mut RuntimeContext) -> Result<ReleaseRuleState> {
        let request = HttpRequest {
            url: &self.url,
            method: &self.method,
            headers: &self.headers,
            params: &self.params,
            data: self.data.as_ref(),
        };
        let (_, builder) = request.build(context)?;
        let response = context.session.send(builder).map_err(|e| match e {
            RetascError::HttpTransport { source, .. } => {
                RetascError::prerequisite(format!("HTTP request failed: {source}"))
            }
            other => other,
        })?;

        let method = self.method.to_uppercase();
        let response = response_value(&method, response)?;
        if let Some(status_code) = response.get("status_code") {
            context.report.set("status_code", status_code.clone());
        }
        context
            .template
            .params
            .insert("http_response".into(), response);
        Ok(ReleaseRuleState::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_context::testing::*;
    use mockito::Matcher;
    use tempfile::TempDir;

    fn http(yaml: &str) -> Http {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn request_is_rendered_and_response_exposed() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/api/rhel-10.0")
            .match_header("x-release", "rhel-10.0")
            .match_query(Matcher::UrlEncoded("major".into(), "10".into()))
            .match_body(Matcher::Json(serde_json::json!({"release": "rhel-10.0"})))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": 7}"#)
            .create();

        let dir = TempDir::new().unwrap();
        let (mut context, _) = context(dir.path());
        let params = &mut context.template.params;
        params.insert("release".into(), Value::from("rhel-10.0"));
        params.insert("major".into(), Value::Int(10));
        params.insert("url".into(), Value::from(server.url()));

        let prereq = http(
            r#"
http: "{{ url }}/api/{{ release }}"
method: post
headers:
  X-Release: "{{ release }}"
params:
  major: "{{ major }}"
data:
  release: "{{ release }}"
"#,
        );
        assert_eq!(
            prereq.update_state(&mut context).unwrap(),
            ReleaseRuleState::Completed
        );
        mock.assert();

        let response = context.template.params.get("http_response").unwrap();
        assert_eq!(response.get("status_code"), Some(&Value::Int(201)));
        assert_eq!(response.pointer(&["json", "id"]), Some(&Value::Int(7)));
        assert_eq!(response.get("text"), Some(&Value::from(r#"{"id": 7}"#)));
        assert_eq!(
            response.pointer(&["headers", "content-type"]),
            Some(&Value::from("application/json"))
        );
        assert_eq!(
            context.report.get(&["status_code"]).and_then(|n| n.as_value()),
            Some(&Value::Int(201))
        );
    }

    #[test]
    fn error_status_is_not_an_error() {
        let mut server = mockito::Server::new();
        server.mock("GET", "/missing").with_status(404).create();

        let dir = TempDir::new().unwrap();
        let (mut context, _) = context(dir.path());
        let prereq = http(&format!("url: {}/missing", server.url()));
        assert_eq!(
            prereq.update_state(&mut context).unwrap(),
            ReleaseRuleState::Completed
        );
        assert_eq!(
            context.template.params.get("http_response").and_then(|r| r.get("json")),
            Some(&Value::Null)
        );
    }

    #[test]
    fn transport_failure_is_recoverable() {
        let dir = TempDir::new().unwrap();
        let (mut context, _) = context(dir.path());
        context.session = context.session.clone().with_max_retries(0);
        let prereq = http("http: http://127.0.0.1:9/unreachable");
        let err = prereq.update_state(&mut context).unwrap_err();
        assert!(err.to_string().starts_with("HTTP request failed: "), "{err}");
        assert!(err.is_recoverable());
    }
}
