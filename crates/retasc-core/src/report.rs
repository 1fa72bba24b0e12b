use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::debug;

use crate::value::{Map, Value};

// ---------------------------------------------------------------------------
// ReportNode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ReportNode {
    Value(Value),
    Section(Section),
}

impl ReportNode {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ReportNode::Value(v) => Some(v),
            ReportNode::Section(_) => None,
        }
    }

    pub fn as_section(&self) -> Option<&Section> {
        match self {
            ReportNode::Section(s) => Some(s),
            ReportNode::Value(_) => None,
        }
    }

    /// Replaces a plain value with an empty section.
    fn make_section(&mut self) -> &mut Section {
        match self {
            ReportNode::Section(section) => section,
            node => {
                *node = ReportNode::Section(Section::default());
                node.make_section()
            }
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            ReportNode::Value(v) => v.clone(),
            ReportNode::Section(s) => s.to_value(),
        }
    }
}

impl Serialize for ReportNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ReportNode::Value(v) => v.serialize(serializer),
            ReportNode::Section(s) => s.serialize(serializer),
        }
    }
}

/// Report entries in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Section {
    entries: Vec<(String, ReportNode)>,
}

impl Section {
    pub fn get(&self, key: &str) -> Option<&ReportNode> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, n)| n)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ReportNode)> {
        self.entries.iter().map(|(k, n)| (k.as_str(), n))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, key: &str, node: ReportNode) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = node,
            None => self.entries.push((key.to_string(), node)),
        }
    }

    fn child_mut(&mut self, key: &str) -> &mut Section {
        let index = match self.entries.iter().position(|(k, _)| k == key) {
            Some(index) => index,
            None => {
                self.entries
                    .push((key.to_string(), ReportNode::Section(Section::default())));
                self.entries.len() - 1
            }
        };
        self.entries[index].1.make_section()
    }

    fn to_value(&self) -> Value {
        Value::Map(
            self.entries
                .iter()
                .map(|(k, n)| (k.clone(), n.to_value()))
                .collect::<Map>(),
        )
    }
}

impl Serialize for Section {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, node) in &self.entries {
            map.serialize_entry(key, node)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Hierarchical execution report.
///
/// Sections nest as input, rule, prerequisite and sub-item. Errors are
/// stored both at the failing section and in a flat list prefixed with the
/// section path.
#[derive(Debug, Clone, Default)]
pub struct Report {
    data: Section,
    current: Vec<String>,
    errors: Vec<String>,
    /// Jira issue id to issue key, shared across inputs.
    pub jira_issues: Map,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&self) -> &Section {
        &self.data
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn current_path(&self) -> &[String] {
        &self.current
    }

    pub fn enter(&mut self, name: &str) {
        debug!("{}{name}", "  ".repeat(self.current.len()));
        self.current_section_mut().child_mut(name);
        self.current.push(name.to_string());
    }

    pub fn leave(&mut self) {
        self.current.pop();
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        debug!("{}{key}: {value}", "  ".repeat(self.current.len()));
        self.current_section_mut()
            .insert(key, ReportNode::Value(value));
    }

    pub fn add_error(&mut self, message: &str) {
        self.set("error", message);
        self.errors
            .push(format!("{}: {message}", self.current.join(" -> ")));
    }

    /// Looks up a node by its section path.
    pub fn get(&self, path: &[&str]) -> Option<&ReportNode> {
        let (last, parents) = path.split_last()?;
        let mut section = &self.data;
        for key in parents {
            section = section.get(key)?.as_section()?;
        }
        section.get(last)
    }

    /// The report tree as a template value.
    pub fn data_value(&self) -> Value {
        self.data.to_value()
    }

    fn current_section_mut(&mut self) -> &mut Section {
        let mut section = &mut self.data;
        for key in &self.current {
            section = section.child_mut(key);
        }
        section
    }
}

impl Serialize for Report {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.data.serialize(serializer)
    }
}
