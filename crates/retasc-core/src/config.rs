use crate::error::{RetascError, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "RETASC_CONFIG";
pub const JIRA_TOKEN_ENV: &str = "RETASC_JIRA_TOKEN";
pub const OPENSHIFT_TOKEN_ENV: &str = "RETASC_OPENSHIFT_TOKEN";

// ---------------------------------------------------------------------------
// ConfigWarning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub message: String,
}

impl ConfigWarning {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Path to rules, processed recursively.
    pub rules_path: PathBuf,
    /// Root directory for Jira issue templates.
    pub jira_template_path: PathBuf,
    pub product_pages_url: String,
    pub jira_url: String,
    /// Prefix of the label identifying a managed Jira issue.
    pub jira_label_prefix: String,
    /// Template property name to Jira field name, for example
    /// `affects_versions: versions`.
    #[serde(default)]
    pub jira_fields: BTreeMap<String, String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: f64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout: f64,
    #[serde(default = "default_connect_timeout")]
    pub jira_connect_timeout: f64,
    #[serde(default = "default_read_timeout")]
    pub jira_read_timeout: f64,

    #[serde(default)]
    pub openshift_api_url: Option<String>,
    #[serde(default = "default_pipeline_run_template_path")]
    pub pipeline_run_template_path: PathBuf,
    #[serde(default = "default_pipeline_run_name_prefix")]
    pub pipeline_run_name_prefix: String,
    #[serde(default)]
    pub pipeline_run_default_namespace: Option<String>,
    #[serde(default = "default_openshift_oc_image")]
    pub openshift_oc_image: String,
}

fn default_connect_timeout() -> f64 {
    15.0
}

fn default_read_timeout() -> f64 {
    30.0
}

fn default_pipeline_run_template_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_pipeline_run_name_prefix() -> String {
    "retasc-".to_string()
}

fn default_openshift_oc_image() -> String {
    "registry.redhat.io/openshift4/ose-cli:latest".to_string()
}

impl Config {
    /// Minimal configuration with defaults for everything optional.
    pub fn new(
        rules_path: impl Into<PathBuf>,
        jira_template_path: impl Into<PathBuf>,
        product_pages_url: impl Into<String>,
        jira_url: impl Into<String>,
    ) -> Self {
        Self {
            rules_path: rules_path.into(),
            jira_template_path: jira_template_path.into(),
            product_pages_url: product_pages_url.into(),
            jira_url: jira_url.into(),
            jira_label_prefix: "retasc-id-".to_string(),
            jira_fields: BTreeMap::new(),
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            jira_connect_timeout: default_connect_timeout(),
            jira_read_timeout: default_read_timeout(),
            openshift_api_url: None,
            pipeline_run_template_path: default_pipeline_run_template_path(),
            pipeline_run_name_prefix: default_pipeline_run_name_prefix(),
            pipeline_run_default_namespace: None,
            openshift_oc_image: default_openshift_oc_image(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| RetascError::Config {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        serde_yaml::from_str(&data).map_err(|e| RetascError::Config {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.jira_label_prefix.trim().is_empty() {
            warnings.push(ConfigWarning::new(
                "jira_label_prefix is empty; every label would be treated as reserved",
            ));
        }

        if !self.jira_template_path.is_dir() {
            warnings.push(ConfigWarning::new(format!(
                "jira_template_path '{}' is not a directory",
                self.jira_template_path.display()
            )));
        }

        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("read_timeout", self.read_timeout),
            ("jira_connect_timeout", self.jira_connect_timeout),
            ("jira_read_timeout", self.jira_read_timeout),
        ] {
            if !(value.is_finite() && value > 0.0) {
                warnings.push(ConfigWarning::new(format!(
                    "{name}={value} is not a positive number of seconds; the default is used"
                )));
            }
        }

        if self.openshift_api_url.is_none() && self.pipeline_run_default_namespace.is_some() {
            warnings.push(ConfigWarning::new(
                "pipeline_run_default_namespace is set but openshift_api_url is not configured",
            ));
        }

        warnings
    }

    // -----------------------------------------------------------------------
    // Jira field names
    // -----------------------------------------------------------------------

    /// Maps a template property name to the Jira field name, which may be
    /// something like `customfield_12345678`.
    pub fn to_jira_field_name<'a>(&'a self, field: &'a str) -> &'a str {
        self.jira_fields.get(field).map_or(field, String::as_str)
    }

    pub fn from_jira_field_name<'a>(&'a self, jira_field: &'a str) -> &'a str {
        self.jira_fields
            .iter()
            .find(|(_, v)| v.as_str() == jira_field)
            .map_or(jira_field, |(k, _)| k.as_str())
    }

    // -----------------------------------------------------------------------
    // Timeouts
    // -----------------------------------------------------------------------

    pub fn timeouts(&self) -> (Duration, Duration) {
        (
            seconds(self.connect_timeout, default_connect_timeout()),
            seconds(self.read_timeout, default_read_timeout()),
        )
    }

    pub fn jira_timeouts(&self) -> (Duration, Duration) {
        (
            seconds(self.jira_connect_timeout, default_connect_timeout()),
            seconds(self.jira_read_timeout, default_read_timeout()),
        )
    }

    /// The configuration as seen by templates (`config.jira_url` etc.).
    pub fn to_value(&self) -> Value {
        Value::from_serialize(self)
    }
}

fn seconds(value: f64, default: f64) -> Duration {
    Duration::try_from_secs_f64(value)
        .ok()
        .filter(|d| !d.is_zero())
        .unwrap_or_else(|| Duration::from_secs_f64(default))
}
