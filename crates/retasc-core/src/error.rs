use thiserror::Error;

use crate::template::TemplateError;

#[derive(Debug, Error)]
pub enum RetascError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("{0}")]
    PrerequisiteFailed(String),

    #[error("{0}")]
    InputValues(String),

    #[error("HTTP {method} {url} failed with status {status}: {body}")]
    HttpStatus {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("HTTP request failed: {method} {url}: {source}")]
    HttpTransport {
        method: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP request: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("{0}")]
    RuleParsing(String),

    #[error("No rules found in '{0}'")]
    NoRules(String),

    #[error("invalid configuration '{path}': {message}")]
    Config { path: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RetascError {
    pub fn prerequisite(message: impl Into<String>) -> Self {
        RetascError::PrerequisiteFailed(message.into())
    }

    /// Evaluation-time errors that degrade the failing prerequisite to
    /// Pending instead of aborting the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RetascError::Template(_)
                | RetascError::PrerequisiteFailed(_)
                | RetascError::InputValues(_)
                | RetascError::HttpStatus { .. }
                | RetascError::HttpTransport { .. }
                | RetascError::HttpClient(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RetascError>;
