//! Loading and static validation of rule files.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{RetascError, Result};
use crate::io::to_comma_separated;
use crate::prerequisites::Prerequisite;
use crate::rule::{Rule, RuleSet, SCHEMA_VERSION};

/// Rule files under `path`: every `*.yaml` and `*.yml` file for a directory,
/// in file name order, or the path itself otherwise.
pub fn rule_files(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            RetascError::RuleParsing(format!("Failed to list rule files in '{}': {e}", path.display()))
        })?;
        let is_yaml = entry
            .path()
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if entry.file_type().is_file() && is_yaml {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

#[derive(Debug)]
struct ParseState<'a> {
    config: &'a Config,
    rules: Vec<Rule>,
    rule_files: BTreeMap<String, Vec<String>>,
    errors: Vec<String>,
}

impl<'a> ParseState<'a> {
    fn new(config: &'a Config) -> Self {
        Self {
            config,
            rules: Vec::new(),
            rule_files: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    fn parse_file(&mut self, path: &Path) {
        info!("Parsing {}", path.display());
        let file = path.display().to_string();

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                self.errors.push(format!("Failed to read rule file '{file}': {e}"));
                return;
            }
        };
        let documents = match serde_yaml::from_str::<serde_yaml::Value>(&content) {
            Ok(serde_yaml::Value::Sequence(items)) => items,
            Ok(serde_yaml::Value::Null) => Vec::new(),
            Ok(item) => vec![item],
            Err(e) => {
                self.errors.push(format!("Invalid YAML file '{file}': {e}"));
                return;
            }
        };

        for document in documents {
            let mut rule: Rule = match serde_yaml::from_value(document) {
                Ok(rule) => rule,
                Err(e) => {
                    self.errors.push(format!("Invalid rule file '{file}': {e}"));
                    continue;
                }
            };
            if rule.version != SCHEMA_VERSION {
                self.errors.push(format!(
                    "Invalid rule file '{file}': unsupported version {} of rule '{}', expected {SCHEMA_VERSION}",
                    rule.version, rule.name
                ));
                continue;
            }

            let files = self.rule_files.entry(rule.name.clone()).or_default();
            files.push(file.clone());
            if files.len() == 1 {
                debug!("Loaded rule '{}' from {file}", rule.name);
                rule.rule_file = Some(file.clone());
                self.rules.push(rule);
            }
        }
    }

    fn validate_unique_rule_names(&mut self) {
        for (name, files) in &self.rule_files {
            if files.len() > 1 {
                self.errors.push(format!(
                    "Duplicate rule name '{name}' in files: {}",
                    to_comma_separated(files)
                ));
            }
        }
    }

    fn validate_prerequisites(&mut self) {
        for rule in &self.rules {
            let errors: Vec<String> = rule
                .prerequisites
                .iter()
                .flat_map(|prereq| prereq.validation_errors(&self.rules, self.config))
                .collect();
            if !errors.is_empty() {
                self.errors.push(format!(
                    "Invalid rule '{}' (file '{}'):\n  {}",
                    rule.name,
                    rule.rule_file.as_deref().unwrap_or_default(),
                    errors.join("\n  ")
                ));
            }
        }
    }

    fn validate_no_cycles(&mut self) {
        if let Some(cycle) = find_cycle(&self.rules) {
            self.errors
                .push(format!("Rule reference cycle: {}", cycle.join(" -> ")));
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DfsState {
    InStack,
    Done,
}

/// First rule reference cycle, as rule names with the first name repeated at
/// the end. References are taken literally.
fn find_cycle(rules: &[Rule]) -> Option<Vec<String>> {
    let adjacency: HashMap<&str, Vec<&str>> = rules
        .iter()
        .map(|rule| {
            let references = rule
                .prerequisites
                .iter()
                .filter_map(|prereq| match prereq {
                    Prerequisite::Rule(reference) => Some(reference.rule.as_str()),
                    _ => None,
                })
                .collect();
            (rule.name.as_str(), references)
        })
        .collect();

    let mut state: HashMap<&str, DfsState> = HashMap::new();
    let mut stack: Vec<&str> = Vec::new();
    rules.iter().find_map(|rule| {
        let name = rule.name.as_str();
        if state.contains_key(name) {
            return None;
        }
        dfs(name, &adjacency, &mut state, &mut stack)
    })
}

fn dfs<'a>(
    node: &'a str,
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    state: &mut HashMap<&'a str, DfsState>,
    stack: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    state.insert(node, DfsState::InStack);
    stack.push(node);

    for &neighbor in adjacency.get(node).into_iter().flatten() {
        match state.get(neighbor) {
            Some(DfsState::InStack) => {
                let start = stack.iter().position(|&n| n == neighbor).unwrap_or(0);
                let mut cycle: Vec<String> =
                    stack[start..].iter().map(|&n| n.to_string()).collect();
                cycle.push(neighbor.to_string());
                return Some(cycle);
            }
            Some(DfsState::Done) => {}
            None => {
                if !adjacency.contains_key(neighbor) {
                    continue;
                }
                if let Some(cycle) = dfs(neighbor, adjacency, state, stack) {
                    return Some(cycle);
                }
            }
        }
    }

    stack.pop();
    state.insert(node, DfsState::Done);
    None
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Parses and validates the rules in `paths`. All problems are collected
/// into a single [`RetascError::RuleParsing`].
pub fn parse_rules(paths: &[PathBuf], config: &Config) -> Result<RuleSet> {
    let mut state = ParseState::new(config);
    for path in paths {
        for file in rule_files(path)? {
            state.parse_file(&file);
        }
    }

    state.validate_unique_rule_names();
    state.validate_prerequisites();
    state.validate_no_cycles();

    let location = paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join("', '");

    if !state.errors.is_empty() {
        return Err(RetascError::RuleParsing(format!(
            "Failed to parse rules in '{location}':\n{}",
            state.errors.join("\n")
        )));
    }
    if state.rules.is_empty() {
        return Err(RetascError::NoRules(location));
    }
    Ok(RuleSet::new(state.rules))
}
