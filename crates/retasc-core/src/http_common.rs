//! Request rendering shared by the `http` prerequisite and the `http` input.

use reqwest::blocking::{RequestBuilder, Response};
use reqwest::Method;
use std::collections::BTreeMap;

use crate::error::{RetascError, Result};
use crate::runtime_context::RuntimeContext;
use crate::value::{Map, Value};

pub(crate) fn default_method() -> String {
    "GET".to_string()
}

/// Borrowed view of the request fields declared in a rule.
pub(crate) struct HttpRequest<'a> {
    pub url: &'a str,
    pub method: &'a str,
    pub headers: &'a BTreeMap<String, String>,
    pub params: &'a Map,
    pub data: Option<&'a Value>,
}

impl HttpRequest<'_> {
    /// Renders every templated part of the request. Returns the rendered URL
    /// with the builder.
    pub fn build(&self, context: &RuntimeContext) -> Result<(String, RequestBuilder)> {
        let template = &context.template;
        let url = template.render(self.url)?;
        let method = Method::from_bytes(self.method.to_uppercase().as_bytes())
            .map_err(|_| RetascError::prerequisite(format!("Invalid HTTP method '{}'", self.method)))?;

        let mut builder = context.session.request(method, &url);
        for (name, value) in self.headers {
            builder = builder.header(name.as_str(), template.render(value)?);
        }

        let mut query = Vec::new();
        for (name, value) in self.params {
            match template.render_value(value)? {
                Value::Null => {}
                Value::List(items) => {
                    query.extend(items.iter().map(|item| (name.clone(), item.to_string())));
                }
                other => query.push((name.clone(), other.to_string())),
            }
        }
        if !query.is_empty() {
            builder = builder.query(&query);
        }

        if let Some(data) = self.data {
            builder = builder.json(&template.render_value(data)?.to_json());
        }

        Ok((url, builder))
    }
}

/// `{status_code, url, headers, text, json}` as seen by templates. `json` is
/// none unless the body parses as JSON.
pub(crate) fn response_value(method: &str, response: Response) -> Result<Value> {
    let status_code = response.status().as_u16();
    let url = response.url().to_string();
    let headers: Map = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                Value::from(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            )
        })
        .collect();
    let text = response.text().map_err(|source| RetascError::HttpTransport {
        method: method.to_string(),
        url: url.clone(),
        source,
    })?;
    let json = serde_json::from_str::<serde_json::Value>(&text)
        .map(Value::from)
        .unwrap_or(Value::Null);

    let mut map = Map::new();
    map.insert("status_code".into(), Value::from(u32::from(status_code)));
    map.insert("url".into(), Value::from(url));
    map.insert("headers".into(), Value::Map(headers));
    map.insert("text".into(), Value::from(text));
    map.insert("json".into(), json);
    Ok(Value::Map(map))
}
