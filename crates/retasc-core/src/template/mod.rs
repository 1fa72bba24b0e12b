//! Jinja-style expression and template evaluation.
//!
//! Templates are parsed with a winnow grammar into a small AST and
//! evaluated against the manager's parameter map. Undefined names are
//! always an error.

mod ast;
mod error;
mod eval;
mod grammar;

pub use error::TemplateError;
pub use grammar::{parse_expression, parse_template};

use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::value::{Params, Value};
use eval::Evaluator;

pub type Function = Rc<dyn Fn(&[Value]) -> Result<Value, TemplateError>>;
pub type Filter = Rc<dyn Fn(&Value, &[Value]) -> Result<Value, TemplateError>>;
/// A global computed on each lookup. `params` shadow globals.
pub type Global = Rc<dyn Fn() -> Value>;

// ---------------------------------------------------------------------------
// TemplateManager
// ---------------------------------------------------------------------------

/// Renders templates and evaluates expressions against `params`.
#[derive(Clone)]
pub struct TemplateManager {
    pub params: Params,
    today: NaiveDate,
    pub(crate) functions: HashMap<String, Function>,
    pub(crate) filters: HashMap<String, Filter>,
    pub(crate) globals: HashMap<String, Global>,
}

impl Default for TemplateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TemplateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut functions: Vec<&String> = self.functions.keys().collect();
        functions.sort();
        let mut filters: Vec<&String> = self.filters.keys().collect();
        filters.sort();
        let mut globals: Vec<&String> = self.globals.keys().collect();
        globals.sort();
        f.debug_struct("TemplateManager")
            .field("params", &self.params)
            .field("today", &self.today)
            .field("functions", &functions)
            .field("filters", &filters)
            .field("globals", &globals)
            .finish()
    }
}

impl TemplateManager {
    pub fn new() -> Self {
        Self::with_today(Utc::now().date_naive())
    }

    /// Manager whose `today` global is fixed to the given date.
    pub fn with_today(today: NaiveDate) -> Self {
        Self {
            params: Params::new(),
            today,
            functions: HashMap::new(),
            filters: HashMap::new(),
            globals: HashMap::new(),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn register_function(
        &mut self,
        name: impl Into<String>,
        function: impl Fn(&[Value]) -> Result<Value, TemplateError> + 'static,
    ) {
        self.functions.insert(name.into(), Rc::new(function));
    }

    pub fn register_filter(
        &mut self,
        name: impl Into<String>,
        filter: impl Fn(&Value, &[Value]) -> Result<Value, TemplateError> + 'static,
    ) {
        self.filters.insert(name.into(), Rc::new(filter));
    }

    pub fn register_global(
        &mut self,
        name: impl Into<String>,
        global: impl Fn() -> Value + 'static,
    ) {
        self.globals.insert(name.into(), Rc::new(global));
    }

    pub fn render(&self, text: &str) -> Result<String, TemplateError> {
        self.render_with(text, &Params::new())
    }

    /// Renders `text` with `overrides` shadowing `params`.
    pub fn render_with(&self, text: &str, overrides: &Params) -> Result<String, TemplateError> {
        if !text.contains('{') {
            return Ok(text.to_string());
        }
        let nodes = parse_template(text)?;
        let mut out = String::with_capacity(text.len());
        Evaluator::new(self, overrides).render(&nodes, &mut out)?;
        Ok(out)
    }

    pub fn evaluate(&self, expr: &str) -> Result<Value, TemplateError> {
        self.evaluate_with(expr, &Params::new())
    }

    pub fn evaluate_with(&self, expr: &str, overrides: &Params) -> Result<Value, TemplateError> {
        let expr = parse_expression(expr)?;
        Evaluator::new(self, overrides).eval(&expr)
    }

    /// Renders every string nested in `value`. Map keys are rendered too.
    pub fn render_value(&self, value: &Value) -> Result<Value, TemplateError> {
        match value {
            Value::String(s) => self.render(s).map(Value::String),
            Value::List(items) => items
                .iter()
                .map(|item| self.render_value(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Value::Map(map) => {
                let mut rendered = Params::new();
                for (key, item) in map {
                    rendered.insert(self.render(key)?, self.render_value(item)?);
                }
                Ok(Value::Map(rendered))
            }
            other => Ok(other.clone()),
        }
    }
}
