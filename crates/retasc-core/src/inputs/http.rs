use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{RetascError, Result};
use crate::http_common::{default_method, HttpRequest};
use crate::runtime_context::RuntimeContext;
use crate::value::{Map, Params, Value};

fn default_inputs() -> String {
    "http_data".to_string()
}

/// One value per item of a JSON list fetched over HTTP.
///
/// The parsed response body is available as `http_data` to the `inputs`
/// expression, which selects the list (for example `http_data.results`).
/// Each value has `http_item` and `http_item_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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
    #[serde(default = "default_inputs")]
    pub inputs: String,
}

impl Http {
    pub fn values(&self, context: &RuntimeContext) -> Result<Vec<Params>> {
        let request = HttpRequest {
            url: &self.url,
            method: &self.method,
            headers: &self.headers,
            params: &self.params,
            data: self.data.as_ref(),
        };
        let (url, builder) = request.build(context)?;
        let text = context
            .session
            .send_checked(builder)?
            .text()
            .map_err(|e| RetascError::InputValues(format!("Failed to read response from {url}: {e}")))?;
        let http_data: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| RetascError::InputValues(format!("Failed to parse JSON response: {e}")))?;

        let mut overrides = Params::new();
        overrides.insert("http_data".into(), Value::from(http_data));
        let items = match context.template.evaluate_with(&self.inputs, &overrides)? {
            Value::List(items) => items,
            other => {
                return Err(RetascError::InputValues(format!(
                    "Expression '{}' did not return a list, got {}",
                    self.inputs,
                    other.type_name()
                )))
            }
        };

        Ok(items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let mut data = Params::new();
                data.insert("http_item".into(), item);
                data.insert("http_item_index".into(), Value::from(index));
                data
            })
            .collect())
    }
}
