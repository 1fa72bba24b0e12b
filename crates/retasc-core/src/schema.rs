//! JSON Schemas for rule files and the configuration file.

use serde_json::{json, Value as Json};

use crate::clients::Phase;
use crate::rule::SCHEMA_VERSION;

const DRAFT: &str = "http://json-schema.org/draft-07/schema#";

fn string(description: &str) -> Json {
    json!({"type": "string", "description": description})
}

fn boolean(description: &str, default: bool) -> Json {
    json!({"type": "boolean", "description": description, "default": default})
}

fn object(title: &str, description: &str, properties: Json, required: &[&str]) -> Json {
    json!({
        "type": "object",
        "title": title,
        "description": description,
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

fn string_map(description: &str) -> Json {
    json!({
        "type": "object",
        "description": description,
        "additionalProperties": {"type": "string"},
    })
}

fn http_properties() -> Json {
    json!({
        "http": string("URL template (alias: url)"),
        "url": string("URL template"),
        "method": {"type": "string", "description": "HTTP method", "default": "GET"},
        "headers": string_map("Header templates"),
        "params": {"type": "object", "description": "Query parameter templates"},
        "data": {"description": "JSON body, rendered recursively"},
    })
}

// ---------------------------------------------------------------------------
// Prerequisites
// ---------------------------------------------------------------------------

fn jira_issue_properties(id_description: &str) -> Json {
    json!({
        "jira_issue": string(id_description),
        "template": string("Path to a Jira issue template file, relative to jira_template_path"),
        "fields": {"type": "object", "description": "Field values overriding the template"},
        "status": string("Target status of the issue"),
        "transitions": {
            "type": "array",
            "items": {"type": "string"},
            "description": "Ordered intermediate statuses used to reach the target status",
        },
        "comment": string("Comment added once to an unresolved issue"),
    })
}

fn prerequisite_schemas() -> Vec<Json> {
    let mut subtask_properties = jira_issue_properties("Unique subtask identifier");
    subtask_properties["id"] = string("Alias of jira_issue");
    let subtask = json!({
        "type": "object",
        "properties": subtask_properties,
        "additionalProperties": false,
    });

    let mut jira_properties = jira_issue_properties("Unique Jira issue identifier");
    jira_properties["jira_issue_id"] = string("Alias of jira_issue");
    jira_properties["subtasks"] = json!({"type": "array", "items": subtask});
    jira_properties["must_exist"] = boolean("Only look up an existing issue, never create it", false);

    vec![
        object(
            "Condition",
            "Completed if the expression is true, Pending otherwise",
            json!({"condition": string("Boolean expression")}),
            &["condition"],
        ),
        object(
            "Schedule",
            "Finds a schedule task and sets start_date and end_date",
            json!({
                "schedule_task": string("Task name template, or /regex/"),
                "schedule_slug": string("Task slug template, or /regex/"),
                "skip_if_missing": boolean("Pending instead of an error when no task matches", false),
            }),
            &[],
        ),
        object(
            "TargetDate",
            "Completed once the target date is reached",
            json!({
                "target_date": string("Date expression, for example 'start_date - 7|days'"),
                "ignore_drafts": boolean("Stay Pending while the schedule is a draft", true),
            }),
            &["target_date"],
        ),
        object(
            "Variable",
            "Sets a parameter from an expression",
            json!({
                "variable": string("Parameter name"),
                "value": string("Expression"),
            }),
            &["variable", "value"],
        ),
        object(
            "VariableString",
            "Sets a parameter from a rendered template",
            json!({
                "variable": string("Parameter name"),
                "string": string("Template"),
            }),
            &["variable", "string"],
        ),
        object(
            "Rule",
            "State of another rule",
            json!({"rule": string("Rule name template")}),
            &["rule"],
        ),
        object(
            "JiraIssue",
            "Creates or updates a Jira issue; Completed once it is resolved",
            jira_properties,
            &[],
        ),
        object(
            "Http",
            "Sends an HTTP request and sets http_response",
            http_properties(),
            &[],
        ),
        object(
            "PipelineRun",
            "Creates a Tekton PipelineRun; Completed once it succeeds",
            json!({
                "pipeline_run": string("Unique PipelineRun identifier"),
                "template": string("Path to a PipelineRun template, relative to pipeline_run_template_path"),
                "namespace": string("Namespace template"),
            }),
            &["pipeline_run", "template"],
        ),
    ]
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

fn input_schemas() -> Vec<Json> {
    let phases: Vec<&str> = Phase::ALL.iter().map(|phase| phase.as_str()).collect();
    let phase = |description: &str, default: Phase| {
        json!({"enum": phases, "description": description, "default": default.as_str()})
    };

    let mut http_input = http_properties();
    http_input["inputs"] = json!({
        "type": "string",
        "description": "Expression selecting the list of items from http_data",
        "default": "http_data",
    });

    vec![
        object(
            "ProductPagesReleases",
            "One value per active release of a product",
            json!({
                "product": string("Product short name"),
                "min_phase": phase("Minimal release phase", Phase::Concept),
                "max_phase": phase("Maximal release phase", Phase::Maintenance),
                "jira_label_templates": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Templates of labels added to managed Jira issues",
                },
            }),
            &["product"],
        ),
        object(
            "JiraIssues",
            "One value per Jira issue found by a JQL query",
            json!({
                "jql": string("JQL query"),
                "fields": {"type": "array", "items": {"type": "string"}},
            }),
            &["jql", "fields"],
        ),
        object(
            "Variables",
            "A single value with the given variables",
            json!({"variables": {"type": "object"}}),
            &["variables"],
        ),
        object(
            "Http",
            "One value per item of a JSON list fetched over HTTP",
            http_input,
            &[],
        ),
    ]
}

/// Schema of a rule file: a single rule or a list of rules.
pub fn rules_schema() -> Json {
    let rule = object(
        "Rule",
        "Prerequisites evaluated in order for each input value",
        json!({
            "version": {"const": SCHEMA_VERSION, "default": SCHEMA_VERSION},
            "name": string("Unique rule name"),
            "inputs": {
                "type": "array",
                "items": {"anyOf": input_schemas()},
                "default": [{"product": "rhel"}],
            },
            "prerequisites": {"type": "array", "items": {"anyOf": prerequisite_schemas()}},
        }),
        &["name", "prerequisites"],
    );
    json!({
        "$schema": DRAFT,
        "title": "ReTaSC rules",
        "definitions": {"Rule": rule},
        "anyOf": [
            {"$ref": "#/definitions/Rule"},
            {"type": "array", "items": {"$ref": "#/definitions/Rule"}},
        ],
    })
}

/// Schema of the configuration file.
pub fn config_schema() -> Json {
    let timeout = |description: &str, default: f64| {
        json!({"type": "number", "description": description, "default": default})
    };
    let mut schema = object(
        "Config",
        "ReTaSC configuration",
        json!({
            "rules_path": string("Path to rules, processed recursively"),
            "jira_template_path": string("Root directory for Jira issue templates"),
            "product_pages_url": string("Product Pages API URL"),
            "jira_url": string("Jira URL"),
            "jira_label_prefix": string("Prefix of the label identifying a managed Jira issue"),
            "jira_fields": string_map("Template property name to Jira field name"),
            "connect_timeout": timeout("Connect timeout in seconds", 15.0),
            "read_timeout": timeout("Read timeout in seconds", 30.0),
            "jira_connect_timeout": timeout("Jira connect timeout in seconds", 15.0),
            "jira_read_timeout": timeout("Jira read timeout in seconds", 30.0),
            "openshift_api_url": string("OpenShift API URL"),
            "pipeline_run_template_path": {
                "type": "string",
                "description": "Root directory for PipelineRun templates",
                "default": ".",
            },
            "pipeline_run_name_prefix": {
                "type": "string",
                "description": "Prefix of created PipelineRun names",
                "default": "retasc-",
            },
            "pipeline_run_default_namespace": string("Namespace used when a prerequisite sets none"),
            "openshift_oc_image": string("Image with the oc client for storing PipelineRun results"),
        }),
        &[
            "rules_path",
            "jira_template_path",
            "product_pages_url",
            "jira_url",
            "jira_label_prefix",
        ],
    );
    schema["$schema"] = json!(DRAFT);
    schema
}
