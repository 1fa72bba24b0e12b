//! OpenShift API client for Tekton PipelineRuns and ConfigMaps.

use reqwest::{Method, StatusCode};
use tracing::{info, warn};

use super::http_session::{check_status, response_json, HttpSession};
use crate::error::Result;
use crate::value::Value;

pub trait JobCluster {
    fn get_pipeline_run(&self, name: &str, namespace: &str) -> Result<Option<Value>>;
    fn get_config_map(&self, name: &str, namespace: &str) -> Result<Option<Value>>;
    fn create_pipeline_run(&self, pipeline_run: &Value, namespace: &str) -> Result<Value>;
}

// ---------------------------------------------------------------------------
// OpenShiftClient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OpenShiftClient {
    api_url: String,
    token: String,
    session: HttpSession,
}

impl OpenShiftClient {
    pub fn new(api_url: &str, token: impl Into<String>, session: HttpSession) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.into(),
            session,
        }
    }

    fn request(&self, method: Method, api_path: &str) -> reqwest::blocking::RequestBuilder {
        self.session
            .request(method, &format!("{}{api_path}", self.api_url))
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    /// GET returning `None` on 404.
    fn get_optional(&self, api_path: &str) -> Result<Option<Value>> {
        let response = self.session.send(self.request(Method::GET, api_path))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status("GET", response)?;
        Ok(Some(Value::from(response_json(response)?)))
    }
}

impl JobCluster for OpenShiftClient {
    fn get_pipeline_run(&self, name: &str, namespace: &str) -> Result<Option<Value>> {
        self.get_optional(&format!(
            "/apis/tekton.dev/v1/namespaces/{namespace}/pipelineruns/{name}"
        ))
    }

    fn get_config_map(&self, name: &str, namespace: &str) -> Result<Option<Value>> {
        self.get_optional(&format!("/api/v1/namespaces/{namespace}/configmaps/{name}"))
    }

    fn create_pipeline_run(&self, pipeline_run: &Value, namespace: &str) -> Result<Value> {
        let name = pipeline_run
            .pointer(&["metadata", "name"])
            .map(|name| name.to_string())
            .unwrap_or_default();
        info!("Creating PipelineRun {name:?} in namespace {namespace:?}");
        let data = self.session.send_json(
            self.request(
                Method::POST,
                &format!("/apis/tekton.dev/v1/namespaces/{namespace}/pipelineruns"),
            )
            .json(&pipeline_run.to_json()),
        )?;
        Ok(Value::from(data))
    }
}

// ---------------------------------------------------------------------------
// DryRunOpenShiftClient
// ---------------------------------------------------------------------------

/// Reads from the wrapped cluster; creating runs is logged and skipped.
pub struct DryRunOpenShiftClient<T> {
    inner: T,
}

impl<T: JobCluster> DryRunOpenShiftClient<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

impl<T: JobCluster> JobCluster for DryRunOpenShiftClient<T> {
    fn get_pipeline_run(&self, name: &str, namespace: &str) -> Result<Option<Value>> {
        self.inner.get_pipeline_run(name, namespace)
    }

    fn get_config_map(&self, name: &str, namespace: &str) -> Result<Option<Value>> {
        self.inner.get_config_map(name, namespace)
    }

    fn create_pipeline_run(&self, pipeline_run: &Value, namespace: &str) -> Result<Value> {
        warn!("[DRY RUN] Skipping creating PipelineRun in namespace {namespace:?}: {pipeline_run}");
        Ok(pipeline_run.clone())
    }
}
