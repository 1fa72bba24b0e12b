//! Blocking HTTP session with timeouts and bounded exponential-backoff retry.

use reqwest::blocking::{Client, Request, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use std::time::Duration;
use tracing::debug;

use crate::error::{RetascError, Result};

pub const USER_AGENT: &str = "sp-retasc-agent";

/// Maximum retry attempts on top of the original request.
const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Base delay for exponential backoff between retries.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

const DEFAULT_RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Clone)]
pub struct HttpSession {
    client: Client,
    retry_statuses: Vec<u16>,
    max_retries: u32,
    base_delay: Duration,
}

impl HttpSession {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()
            .map_err(RetascError::HttpClient)?;
        Ok(Self {
            client,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
            max_retries: MAX_RETRY_ATTEMPTS,
            base_delay: RETRY_BASE_DELAY,
        })
    }

    /// Adds statuses retried in addition to 429 and the 5xx gateway errors.
    pub fn retry_on_statuses(mut self, statuses: &[u16]) -> Self {
        for status in statuses {
            if !self.retry_statuses.contains(status) {
                self.retry_statuses.push(*status);
            }
        }
        self
    }

    pub fn with_retry_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    fn should_retry(&self, result: &std::result::Result<Response, reqwest::Error>) -> bool {
        match result {
            Err(_) => true,
            Ok(response) => self.retry_statuses.contains(&response.status().as_u16()),
        }
    }

    /// Sends the request, retrying transport errors and retryable statuses.
    ///
    /// The final response is returned whatever its status.
    pub fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let request = builder.build().map_err(RetascError::HttpClient)?;
        self.execute(request)
    }

    /// Like [`HttpSession::send`], but a non-success status is an error
    /// carrying the response body.
    pub fn send_checked(&self, builder: RequestBuilder) -> Result<Response> {
        let request = builder.build().map_err(RetascError::HttpClient)?;
        let method = request.method().to_string();
        let response = self.execute(request)?;
        check_status(&method, response)
    }

    pub fn send_json(&self, builder: RequestBuilder) -> Result<serde_json::Value> {
        let response = self.send_checked(builder)?;
        response_json(response)
    }

    fn execute(&self, request: Request) -> Result<Response> {
        let method = request.method().to_string();
        let url = request.url().to_string();
        let transport = |source| RetascError::HttpTransport {
            method: method.clone(),
            url: url.clone(),
            source,
        };

        let mut attempt = 0;
        loop {
            // Streaming bodies cannot be replayed; those are sent once.
            let Some(this_request) = request.try_clone() else {
                return self.client.execute(request).map_err(transport);
            };

            let result = self.client.execute(this_request);
            if attempt >= self.max_retries || !self.should_retry(&result) {
                return result.map_err(transport);
            }

            let delay = self.base_delay * 2u32.saturating_pow(attempt);
            debug!(
                "retrying HTTP {method} {url} (attempt {}, delay {}ms)",
                attempt + 1,
                delay.as_millis(),
            );
            std::thread::sleep(delay);
            attempt += 1;
        }
    }
}

pub(crate) fn check_status(method: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().unwrap_or_default();
    Err(RetascError::HttpStatus {
        method: method.to_string(),
        url,
        status: status.as_u16(),
        body,
    })
}

pub(crate) fn response_json(response: Response) -> Result<serde_json::Value> {
    let url = response.url().to_string();
    let text = response.text().map_err(|e| RetascError::HttpTransport {
        method: "GET".to_string(),
        url: url.clone(),
        source: e,
    })?;
    if text.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| {
        RetascError::prerequisite(format!("Invalid JSON response from {url}: {e}"))
    })
}
