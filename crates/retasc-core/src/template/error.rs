use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("template syntax error: {0}")]
    Syntax(String),

    #[error("'{0}' is undefined")]
    Undefined(String),

    #[error("template evaluation error: {0}")]
    Eval(String),
}

impl TemplateError {
    pub(crate) fn eval(message: impl Into<String>) -> Self {
        TemplateError::Eval(message.into())
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, TemplateError::Undefined(_))
    }
}
