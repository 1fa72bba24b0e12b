use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::clients::Phase;
use crate::error::Result;
use crate::runtime_context::RuntimeContext;
use crate::value::{Params, Value};

static VERSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+-(\d+)(?:[-.](\d+))?").expect("invalid regex"));

fn default_min_phase() -> Phase {
    Phase::Concept
}

fn default_max_phase() -> Phase {
    Phase::Maintenance
}

/// `(major, minor)` from a release short name such as `rhel-10.1`.
pub fn parse_version(release: &str) -> (i64, i64) {
    let Some(captures) = VERSION_REGEX.captures(release) else {
        return (0, 0);
    };
    let number = |i: usize| {
        captures
            .get(i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    (number(1), number(2))
}

/// Active releases of a product in Product Pages.
///
/// Each value has `product`, `release`, `major`, `minor` and `jira_labels`
/// (the rendered `jira_label_templates`, empty results dropped).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProductPagesReleases {
    pub product: String,
    #[serde(default = "default_min_phase")]
    pub min_phase: Phase,
    #[serde(default = "default_max_phase")]
    pub max_phase: Phase,
    #[serde(default)]
    pub jira_label_templates: Vec<String>,
}

impl ProductPagesReleases {
    pub fn new(product: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            min_phase: default_min_phase(),
            max_phase: default_max_phase(),
            jira_label_templates: Vec::new(),
        }
    }

    pub fn values(&self, context: &RuntimeContext) -> Result<Vec<Params>> {
        let releases = context
            .pp
            .active_releases(&self.product, self.min_phase, self.max_phase)?;

        let mut values = Vec::with_capacity(releases.len());
        for release in releases {
            let (major, minor) = parse_version(&release);
            let mut data = Params::new();
            data.insert("product".into(), Value::from(self.product.as_str()));
            data.insert("release".into(), Value::from(release));
            data.insert("major".into(), Value::Int(major));
            data.insert("minor".into(), Value::Int(minor));

            let mut labels = Vec::new();
            for template in &self.jira_label_templates {
                let label = context.template.render_with(template, &data)?;
                if !label.is_empty() {
                    labels.push(Value::from(label));
                }
            }
            data.insert("jira_labels".into(), Value::List(labels));
            values.push(data);
        }
        Ok(values)
    }
}
