use serde::Deserialize;

use crate::config::Config;
use crate::error::{RetascError, Result};
use crate::runtime_context::RuntimeContext;
use crate::state::ReleaseRuleState;
use crate::value::{map, Map, Value};

const RESULT_TASK_NAME: &str = "retasc-store-result";
const RESULT_LABEL: &str = "retasc.io/result";
const STATUS_ENV: &str = "RETASC_PIPELINE_RUN_STATUS";

/// Starts a Tekton PipelineRun once and tracks it until it succeeds.
///
/// The final status is stored by an injected finally task in a ConfigMap
/// named after the run, so the result survives pruning of the run itself.
/// The `pipeline_run` template parameter holds `name`, `namespace`,
/// `pipeline_run`, `status` and `is_completed`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineRun {
    pub pipeline_run: String,
    pub template: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl PipelineRun {
    pub fn validation_errors(&self, config: &Config) -> Vec<String> {
        let mut errors = Vec::new();
        let template_file = config.pipeline_run_template_path.join(&self.template);
        if !template_file.is_file() {
            errors.push(format!(
                "PipelineRun template file not found: {}",
                template_file.display()
            ));
        }
        if config.openshift_api_url.is_none() {
            errors.push(
                "openshift_api_url is not configured but required for pipeline_run prerequisite"
                    .to_string(),
            );
        }
        errors
    }

    pub fn update_state(&self, context: &mut RuntimeContext) -> Result<ReleaseRuleState> {
        if context.openshift.is_none() {
            return Err(RetascError::prerequisite(
                "OpenShift client is not initialized. Ensure RETASC_OPENSHIFT_TOKEN is set.",
            ));
        }

        let pipeline_run_id = context.template.render(&self.pipeline_run)?;
        let namespace = self.namespace(context)?;
        let suffix = context
            .template
            .params
            .get("pipeline_run_name_suffix")
            .map(Value::to_string)
            .unwrap_or_default();
        let name = format!(
            "{}{pipeline_run_id}{suffix}",
            context.config.pipeline_run_name_prefix
        );

        context.report.set("pipeline_run", pipeline_run_id.as_str());
        context.report.set("name", name.as_str());
        context.report.set("namespace", namespace.as_str());

        let result_status = self.result_status(context, &name, &namespace)?;
        let is_completed = result_status.is_some();
        context.report.set("is_completed", is_completed);

        let mut vars = Map::new();
        vars.insert("name".into(), Value::from(name.as_str()));
        vars.insert("namespace".into(), Value::from(namespace.as_str()));
        vars.insert("pipeline_run".into(), Value::from(pipeline_run_id));
        vars.insert("is_completed".into(), Value::Bool(is_completed));

        let (state, status) = match result_status {
            Some(status) => {
                let state = if matches!(status.as_str(), "Succeeded" | "Completed") {
                    ReleaseRuleState::Completed
                } else {
                    ReleaseRuleState::InProgress
                };
                (state, status)
            }
            None => match self.cluster_get(context, &name, &namespace)? {
                Some(run) => run_state(&run),
                None => {
                    self.create(context, &name, &namespace)?;
                    (ReleaseRuleState::InProgress, "Created".to_string())
                }
            },
        };

        context.report.set("status", status.as_str());
        vars.insert("status".into(), Value::from(status));
        context
            .template
            .params
            .insert("pipeline_run".into(), Value::Map(vars));
        Ok(state)
    }

    fn namespace(&self, context: &RuntimeContext) -> Result<String> {
        if let Some(namespace) = self.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            return Ok(context.template.render(namespace)?);
        }
        context
            .config
            .pipeline_run_default_namespace
            .clone()
            .ok_or_else(|| {
                RetascError::prerequisite(
                    "No namespace specified and pipeline_run_default_namespace not configured",
                )
            })
    }

    fn result_status(
        &self,
        context: &RuntimeContext,
        name: &str,
        namespace: &str,
    ) -> Result<Option<String>> {
        let Some(cluster) = context.openshift.as_deref() else {
            return Ok(None);
        };
        let config_map = cluster.get_config_map(name, namespace).map_err(|e| {
            RetascError::prerequisite(format!("Failed to check result ConfigMap: {e}"))
        })?;
        Ok(config_map
            .as_ref()
            .and_then(|cm| cm.pointer(&["data", "status"]))
            .map(Value::to_string))
    }

    fn cluster_get(
        &self,
        context: &RuntimeContext,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Value>> {
        match context.openshift.as_deref() {
            Some(cluster) => cluster.get_pipeline_run(name, namespace),
            None => Ok(None),
        }
    }

    fn create(&self, context: &RuntimeContext, name: &str, namespace: &str) -> Result<()> {
        let path = context
            .config
            .pipeline_run_template_path
            .join(&self.template);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            RetascError::prerequisite(format!(
                "Failed to read PipelineRun template '{}': {e}",
                path.display()
            ))
        })?;
        let rendered = context.template.render(&content)?;
        let mut run = match serde_yaml::from_str::<Value>(&rendered) {
            Ok(Value::Map(run)) => run,
            Ok(Value::Null) => Map::new(),
            Ok(other) => {
                return Err(RetascError::prerequisite(format!(
                    "PipelineRun template '{}' must be a mapping, got {}",
                    self.template,
                    other.type_name()
                )))
            }
            Err(e) => {
                return Err(RetascError::prerequisite(format!(
                    "Invalid YAML in PipelineRun template '{}': {e}",
                    self.template
                )))
            }
        };

        let mut metadata = take_map(&mut run, "metadata");
        metadata.insert("name".into(), Value::from(name));
        run.insert("metadata".into(), Value::Map(metadata));

        let mut spec = take_map(&mut run, "spec");
        let mut pipeline_spec = take_map(&mut spec, "pipelineSpec");
        let mut finally = match pipeline_spec.remove("finally") {
            Some(Value::List(tasks)) => tasks,
            _ => Vec::new(),
        };
        finally.push(result_task(name, &context.config.openshift_oc_image));
        pipeline_spec.insert("finally".into(), Value::List(finally));
        spec.insert("pipelineSpec".into(), Value::Map(pipeline_spec));
        run.insert("spec".into(), Value::Map(spec));

        if let Some(cluster) = context.openshift.as_deref() {
            cluster.create_pipeline_run(&Value::Map(run), namespace)?;
        }
        Ok(())
    }
}

/// Removes the map at `key`; anything else there is dropped.
fn take_map(parent: &mut Map, key: &str) -> Map {
    match parent.remove(key) {
        Some(Value::Map(map)) => map,
        _ => Map::new(),
    }
}

/// State and report status from the run's `Succeeded` condition.
fn run_state(run: &Value) -> (ReleaseRuleState, String) {
    let succeeded = run
        .pointer(&["status", "conditions"])
        .and_then(Value::as_list)
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.get("type").and_then(Value::as_str) == Some("Succeeded"))
        })
        .and_then(|c| c.get("status"))
        .and_then(Value::as_str);

    match succeeded {
        Some("True") => (ReleaseRuleState::Completed, "Succeeded".to_string()),
        Some("False") => (ReleaseRuleState::InProgress, "Failed".to_string()),
        _ => (ReleaseRuleState::InProgress, "Running".to_string()),
    }
}

/// Finally task writing the aggregate status into a ConfigMap.
fn result_task(name: &str, image: &str) -> Value {
    let script = format!(
        "#!/bin/bash\n\
         set -e\n\
         oc apply -f - <<EOF\n\
         apiVersion: v1\n\
         kind: ConfigMap\n\
         metadata:\n\
         \x20 name: '{name}'\n\
         \x20 labels:\n\
         \x20   {RESULT_LABEL}: \"true\"\n\
         data:\n\
         \x20 status: \"${STATUS_ENV}\"\n\
         EOF"
    );
    map([
        ("name", Value::from(RESULT_TASK_NAME)),
        (
            "params",
            Value::List(vec![map([
                ("name", "aggregateTasksStatus"),
                ("value", "$(tasks.status)"),
            ])]),
        ),
        (
            "taskSpec",
            map([(
                "steps",
                Value::List(vec![map([
                    ("name", Value::from("create-result")),
                    ("image", Value::from(image)),
                    (
                        "env",
                        Value::List(vec![map([
                            ("name", STATUS_ENV),
                            ("value", "$(params.aggregateTasksStatus)"),
                        ])]),
                    ),
                    ("script", Value::from(script)),
                ])]),
            )]),
        ),
    ])
}
