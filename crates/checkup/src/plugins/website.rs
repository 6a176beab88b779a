use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use reqwest::Method;
use reqwest::redirect::Policy;
use serde_json::{Map, Value};
use tracing::{debug, error, info};
use url::Url;

use crate::config::PluginConfig;
use crate::plugin::{CheckPlugin, PluginType, validate_required};
use crate::result::{CheckResult, CheckStatus, RawData};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const ALLOWED_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH"];

/// `website_status` plugin - HTTP(S) reachability, status code and content checks
pub struct WebsitePlugin {
    config: PluginConfig,
}

/// Outcome of comparing a response against the expectations
#[derive(Debug, Clone, PartialEq)]
struct Evaluation {
    status: CheckStatus,
    message: String,
    status_match: bool,
    content_match: bool,
    content_issues: Vec<String>,
}

fn evaluate(
    status_code: u16,
    expected_status: u16,
    body: &str,
    expected_content: Option<&str>,
    unexpected_content: Option<&str>,
) -> Evaluation {
    let status_match = status_code == expected_status;
    let mut content_issues = Vec::new();

    if let Some(expected) = expected_content.filter(|c| !c.is_empty()) {
        if !body.contains(expected) {
            content_issues.push(format!("Expected content '{}' not found", expected));
        }
    }

    if let Some(unexpected) = unexpected_content.filter(|c| !c.is_empty()) {
        if body.contains(unexpected) {
            content_issues.push(format!("Unexpected content '{}' found", unexpected));
        }
    }

    let content_match = content_issues.is_empty();
    let (status, message) = if status_match && content_match {
        (CheckStatus::Success, format!("Website check successful. Status code: {}", status_code))
    } else if status_match {
        (
            CheckStatus::Warning,
            format!("Website accessible but content issues detected: {}", content_issues.join(", ")),
        )
    } else {
        (
            CheckStatus::Error,
            format!("Website check failed. Expected status: {}, actual: {}", expected_status, status_code),
        )
    };

    Evaluation { status, message, status_match, content_match, content_issues }
}

impl WebsitePlugin {
    fn url(&self) -> Result<Url> {
        let raw = self.config.get_str("url").ok_or_else(|| anyhow!("url is required"))?;
        let url = Url::parse(raw).map_err(|e| anyhow!("Invalid URL: {}", e))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(anyhow!("URL must use http or https, got {}", other)),
        }
    }

    fn method(&self) -> Result<Method> {
        let method = self.config.get_str("method").unwrap_or("GET").to_ascii_uppercase();
        if !ALLOWED_METHODS.contains(&method.as_str()) {
            return Err(anyhow!("Unsupported HTTP method: {}", method));
        }
        Method::from_bytes(method.as_bytes()).map_err(|e| anyhow!("Invalid HTTP method: {}", e))
    }

    fn expected_status(&self) -> Result<u16> {
        match self.config.get("expected_status") {
            None => Ok(200),
            Some(_) => self
                .config
                .get_u64("expected_status")
                .filter(|code| (100..=599).contains(code))
                .map(|code| code as u16)
                .ok_or_else(|| anyhow!("expected_status must be an HTTP status code")),
        }
    }

    fn timeout(&self) -> Result<Duration> {
        match self.config.get("timeout") {
            None => Ok(DEFAULT_TIMEOUT),
            Some(_) => self
                .config
                .get_duration_secs("timeout")
                .ok_or_else(|| anyhow!("timeout must be a non-negative number of seconds")),
        }
    }

    fn check_settings(&self) -> Result<()> {
        self.url()?;
        self.method()?;
        self.expected_status()?;
        self.timeout()?;
        if let Some(headers) = self.config.get("headers") {
            if !headers.is_object() && !headers.is_null() {
                return Err(anyhow!("headers must be an object"));
            }
        }
        if self.config.contains("auth_username") != self.config.contains("auth_password") {
            return Err(anyhow!("auth_username and auth_password must be given together"));
        }
        Ok(())
    }

    fn client(&self, timeout: Duration) -> Result<reqwest::Client> {
        let redirect = if self.config.get_bool_or("follow_redirects", true) {
            Policy::limited(10)
        } else {
            Policy::none()
        };

        Ok(reqwest::Client::builder()
            .timeout(timeout)
            .redirect(redirect)
            .danger_accept_invalid_certs(!self.config.get_bool_or("verify_ssl", true))
            .user_agent(concat!("checkup/", env!("CARGO_PKG_VERSION")))
            .build()?)
    }
}

impl PluginType for WebsitePlugin {
    const NAME: &'static str = "website_status";
    const DESCRIPTION: &'static str = "Check website availability, status code and content";

    fn required_config() -> &'static [&'static str] {
        &["url"]
    }

    fn optional_config() -> &'static [&'static str] {
        &[
            "timeout",
            "expected_status",
            "method",
            "headers",
            "body",
            "auth_username",
            "auth_password",
            "verify_ssl",
            "follow_redirects",
            "expected_content",
            "unexpected_content",
        ]
    }

    fn from_config(config: PluginConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl CheckPlugin for WebsitePlugin {
    fn config(&self) -> &PluginConfig {
        &self.config
    }

    fn validate_config(&self) -> bool {
        if !validate_required(&self.config, Self::NAME, Self::required_config()) {
            return false;
        }

        match self.check_settings() {
            Ok(()) => true,
            Err(e) => {
                error!(plugin = Self::NAME, error = %e, "Invalid website check configuration");
                false
            }
        }
    }

    async fn run_check(&self) -> Result<CheckResult> {
        let url = self.url()?;
        let expected_status = self.expected_status()?;
        let client = self.client(self.timeout()?)?;

        let mut request = client.request(self.method()?, url.clone());
        if let Some(headers) = self.config.get_object("headers") {
            for (name, value) in headers {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                request = request.header(name.as_str(), value);
            }
        }
        if let Some(body) = self.config.get_str("body") {
            request = request.body(body.to_string());
        }
        if let (Some(user), Some(password)) =
            (self.config.get_str("auth_username"), self.config.get_str("auth_password"))
        {
            request = request.basic_auth(user, Some(password));
        }

        debug!(%url, "Sending website check request");
        let start = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let error_type = if e.is_timeout() {
                    "Timeout"
                } else if e.is_connect() {
                    "ConnectionError"
                } else {
                    "RequestError"
                };
                return Ok(CheckResult::error_from(format!("Connection error: {}", e), &e, error_type)
                    .with_response_time(start.elapsed().as_secs_f64())
                    .with_detail("url", url.to_string()));
            }
        };

        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (name.to_string(), Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()))
            })
            .collect();

        let body = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                return Ok(CheckResult::error_from(format!("Connection error: {}", e), &e, "BodyError")
                    .with_response_time(start.elapsed().as_secs_f64())
                    .with_detail("url", url.to_string())
                    .with_detail("status_code", status_code));
            }
        };
        let response_time = start.elapsed().as_secs_f64();
        let text = String::from_utf8_lossy(&body);

        let evaluation = evaluate(
            status_code,
            expected_status,
            &text,
            self.config.get_str("expected_content"),
            self.config.get_str("unexpected_content"),
        );
        info!(%url, status = %evaluation.status, status_code, response_time, "Website check finished");

        let mut raw = RawData::new();
        raw.insert("url".into(), url.to_string().into());
        raw.insert("status_code".into(), status_code.into());
        raw.insert("expected_status".into(), expected_status.into());
        raw.insert("status_match".into(), evaluation.status_match.into());
        raw.insert("content_match".into(), evaluation.content_match.into());
        raw.insert("content_issues".into(), Value::from(evaluation.content_issues));
        raw.insert("response_headers".into(), Value::Object(headers));
        raw.insert("response_size".into(), body.len().into());
        raw.insert("final_url".into(), final_url.into());

        Ok(CheckResult::new(evaluation.status, evaluation.message, response_time, raw))
    }
}
