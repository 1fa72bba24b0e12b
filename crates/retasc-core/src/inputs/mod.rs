//! Rule inputs.
//!
//! An input produces the parameter sets a rule is evaluated against, for
//! example one per active product release. Inputs are compared by value so
//! that rules declaring the same input share one evaluation per value.

mod http;
mod jira_issues;
mod product_pages_releases;
mod variables;

pub use http::Http;
pub use jira_issues::JiraIssues;
pub use product_pages_releases::{parse_version, ProductPagesReleases};
pub use variables::Variables;

use serde::de::{self, Deserialize, Deserializer};
use serde::Serialize;

use crate::error::Result;
use crate::runtime_context::RuntimeContext;
use crate::value::{Params, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Input {
    ProductPagesReleases(ProductPagesReleases),
    JiraIssues(JiraIssues),
    Variables(Variables),
    Http(Http),
}

impl Input {
    /// Parameter sets produced by this input, in order.
    pub fn values(&self, context: &RuntimeContext) -> Result<Vec<Params>> {
        match self {
            Input::ProductPagesReleases(input) => input.values(context),
            Input::JiraIssues(input) => input.values(context),
            Input::Variables(input) => Ok(input.values()),
            Input::Http(input) => input.values(context),
        }
    }

    /// Report section for one produced value.
    pub fn section_name(&self, values: &Params) -> String {
        let field = |name: &str| values.get(name).cloned().unwrap_or_default();
        match self {
            Input::ProductPagesReleases(_) => {
                format!("ProductPagesRelease({:?})", field("release").to_string())
            }
            Input::JiraIssues(_) => format!(
                "JiraIssues({:?})",
                field("jira_issue")
                    .get("key")
                    .map(Value::to_string)
                    .unwrap_or_default()
            ),
            Input::Variables(_) => {
                format!("Variables({})", Value::Map(values.clone()).to_canonical_json())
            }
            Input::Http(input) => {
                format!("Http({:?}, {})", input.url, field("http_item_index"))
            }
        }
    }

    /// Canonical JSON of the declaration; equal inputs have equal keys.
    pub fn cache_key(&self) -> String {
        Value::from_serialize(self).to_canonical_json()
    }
}

impl<'de> Deserialize<'de> for Input {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        let serde_yaml::Value::Mapping(mapping) = &value else {
            return Err(de::Error::custom("input must be a mapping"));
        };
        let has = |key: &str| mapping.contains_key(key);

        let parsed = if has("product") {
            serde_yaml::from_value(value).map(Input::ProductPagesReleases)
        } else if has("jql") {
            serde_yaml::from_value(value).map(Input::JiraIssues)
        } else if has("variables") {
            serde_yaml::from_value(value).map(Input::Variables)
        } else if has("http") || has("url") {
            serde_yaml::from_value(value).map(Input::Http)
        } else {
            let keys: Vec<String> = mapping
                .keys()
                .filter_map(|key| key.as_str().map(str::to_string))
                .collect();
            return Err(de::Error::custom(format!(
                "unknown input type with keys: {}",
                crate::io::to_comma_separated(keys)
            )));
        };
        parsed.map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::map;

    fn parse(yaml: &str) -> std::result::Result<Input, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    #[test]
    fn variants_are_recognised_by_key() {
        assert!(matches!(parse("product: rhel"), Ok(Input::ProductPagesReleases(_))));
        assert!(matches!(parse("jql: project = X\nfields: [summary]"), Ok(Input::JiraIssues(_))));
        assert!(matches!(parse("variables: {a: 1}"), Ok(Input::Variables(_))));
        assert!(matches!(parse("http: https://example.com"), Ok(Input::Http(_))));
        assert!(parse("product: rhel\nextra: 1").is_err());
        assert!(parse("unknown: 1").is_err());
    }

    #[test]
    fn equal_declarations_share_a_key() {
        let a = parse("product: rhel").unwrap();
        let b = parse("product: rhel\nmin_phase: Concept").unwrap();
        let c = parse("product: rhel\nmax_phase: Launch").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
    }

    #[test]
    fn section_names() {
        let input = parse("product: rhel").unwrap();
        let values = match map([("release", "rhel-10.0")]) {
            Value::Map(values) => values,
            _ => Params::new(),
        };
        assert_eq!(input.section_name(&values), r#"ProductPagesRelease("rhel-10.0")"#);

        let input = parse("variables: {b: 2, a: x}").unwrap();
        let values = match map([("b", Value::Int(2)), ("a", Value::from("x"))]) {
            Value::Map(values) => values,
            _ => Params::new(),
        };
        assert_eq!(input.section_name(&values), r#"Variables({"a":"x","b":2})"#);
    }
}
