//! Blocking client for the toolset admin API.
//!
//! This module provides the [`ToolsetClient`] struct which handles all HTTP
//! communication with the toolset endpoints under `/api/v1/admin/toolset`.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::Url;

use super::types::{
    CreateInstanceRequest, ErrorBody, InstanceDto, KillInstanceRequest, Page, ToolDto,
};
use crate::constants;

/// API client for the toolset admin endpoints.
#[derive(Clone)]
pub struct ToolsetClient {
    client: Client,
    server_url: String,
    token: Option<String>,
}

impl std::fmt::Debug for ToolsetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolsetClient")
            .field("server_url", &self.server_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl ToolsetClient {
    /// Creates a new API client.
    ///
    /// # Arguments
    ///
    /// * `server_url` - Base URL of the toolset server
    /// * `token` - Bearer token, if any
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(server_url: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(constants::HTTP_REQUEST_TIMEOUT)
            .build()?;

        Ok(Self::with_client(client, server_url, token))
    }

    /// Creates an API client with a pre-configured HTTP client.
    pub fn with_client(client: Client, server_url: &str, token: Option<String>) -> Self {
        Self {
            client,
            server_url: server_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Returns the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Lists every tool the server can launch.
    pub fn list_tools(&self) -> Result<Vec<ToolDto>> {
        let response = self.send(self.client.get(self.endpoint("/list")))?;
        response.json().context("Invalid tool list")
    }

    /// Lists instances, running ones only unless `all` is set.
    pub fn list_instances(&self, all: bool, skip: u32, take: u32) -> Result<Page<InstanceDto>> {
        let request = self
            .client
            .get(self.endpoint("/instances"))
            .query(&[("all", all.to_string()), ("skip", skip.to_string()), ("take", take.to_string())]);
        let response = self.send(request)?;
        response.json().context("Invalid instance list")
    }

    /// Fetches one instance.
    pub fn get_instance(&self, id: &str) -> Result<InstanceDto> {
        let response = self.send(self.client.get(self.instance_endpoint(id, None)?))?;
        response
            .json()
            .with_context(|| format!("Invalid instance {id}"))
    }

    /// Launches `tool_id` with `args`.
    pub fn create_instance(
        &self,
        tool_id: &str,
        args: BTreeMap<String, serde_json::Value>,
    ) -> Result<InstanceDto> {
        let body = CreateInstanceRequest {
            tool_id: tool_id.to_string(),
            args,
        };
        let response = self.send(self.client.post(self.endpoint("/instances")).json(&body))?;
        let instance: InstanceDto = response.json().context("Invalid launch response")?;
        log::info!("[Api] Launched {} as instance {}", tool_id, instance.id);
        Ok(instance)
    }

    /// Downloads an instance's log: the last 1 MiB, or everything if `all`.
    pub fn fetch_log(&self, id: &str, all: bool) -> Result<Vec<u8>> {
        let request = self
            .client
            .get(self.instance_endpoint(id, Some("log"))?)
            .query(&[("all", all.to_string())]);
        let response = self.send(request)?;
        let bytes = response
            .bytes()
            .with_context(|| format!("Failed to read log of {id}"))?;
        Ok(bytes.to_vec())
    }

    /// Sends `signal` to a running instance.
    ///
    /// When the instance's tool is known, `signal` must be one of its
    /// allowed signals; it may be given by number or by name.
    pub fn kill_instance(&self, instance: &InstanceDto, signal: &str) -> Result<i32> {
        let value = resolve_signal(instance, signal)?;
        let body = KillInstanceRequest { signal: value };
        self.send(
            self.client
                .post(self.instance_endpoint(&instance.id, Some("kill"))?)
                .json(&body),
        )?;
        log::info!("[Api] Sent signal {} to instance {}", value, instance.id);
        Ok(value)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}{}", self.server_url, constants::TOOLSET_API_PATH, path)
    }

    fn instance_endpoint(&self, id: &str, action: Option<&str>) -> Result<Url> {
        let base = self.endpoint("/instances");
        let mut url = Url::parse(&base).with_context(|| format!("Invalid server URL {base}"))?;
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("Server URL {base} cannot carry a path"))?
            .push(id)
            .extend(action);
        Ok(url)
    }

    fn send(&self, request: RequestBuilder) -> Result<Response> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().context("Request to toolset server failed")?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().unwrap_or_default();
        let detail = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        log::warn!("[Api] Request failed: {} {}", status, detail);
        if detail.is_empty() {
            anyhow::bail!("Server returned {}", status)
        }
        anyhow::bail!("Server returned {}: {}", status, detail)
    }
}

/// Resolve `signal` (number or name) against the instance's allowed signals.
fn resolve_signal(instance: &InstanceDto, signal: &str) -> Result<i32> {
    match instance.tool.as_ref() {
        Some(tool) if !tool.allowed_signals.is_empty() => tool
            .find_signal(signal)
            .map(|s| s.value)
            .with_context(|| {
                let allowed: Vec<String> = tool
                    .allowed_signals
                    .iter()
                    .map(|s| format!("{} ({})", s.name, s.value))
                    .collect();
                format!(
                    "Signal {} is not allowed for {}; allowed: {}",
                    signal,
                    tool.name,
                    allowed.join(", ")
                )
            }),
        _ => signal
            .trim()
            .parse()
            .with_context(|| format!("Unknown signal {signal}; give a number")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{ToolDto, ToolSignalDto};

    fn instance_with_signals(signals: &[(i32, &str)]) -> InstanceDto {
        InstanceDto {
            id: "abc123".into(),
            tool: Some(ToolDto {
                id: "shell".into(),
                name: "Shell".into(),
                allowed_signals: signals
                    .iter()
                    .map(|&(value, name)| ToolSignalDto {
                        value,
                        name: name.into(),
                        description: String::new(),
                    })
                    .collect(),
                ..ToolDto::default()
            }),
            ..InstanceDto::default()
        }
    }

    #[test]
    fn test_client_creation_trims_trailing_slash() {
        let client = ToolsetClient::new("https://example.com/", Some("tok".into())).unwrap();
        assert_eq!(client.server_url(), "https://example.com");
        assert_eq!(
            client.endpoint("/list"),
            "https://example.com/api/v1/admin/toolset/list"
        );
    }

    #[test]
    fn test_instance_endpoint_escapes_id() {
        let client = ToolsetClient::new("http://localhost:8080", None).unwrap();
        assert_eq!(
            client.instance_endpoint("a/b c", Some("log")).unwrap().as_str(),
            "http://localhost:8080/api/v1/admin/toolset/instances/a%2Fb%20c/log"
        );
        assert_eq!(
            client.instance_endpoint("abc123", None).unwrap().as_str(),
            "http://localhost:8080/api/v1/admin/toolset/instances/abc123"
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let client = ToolsetClient::new("http://localhost:8080", Some("secret".into())).unwrap();
        assert!(!format!("{client:?}").contains("secret"));
    }

    #[test]
    fn test_resolve_signal_against_allowed_list() {
        let instance = instance_with_signals(&[(2, "SIGINT"), (15, "SIGTERM")]);
        assert_eq!(resolve_signal(&instance, "SIGTERM").unwrap(), 15);
        assert_eq!(resolve_signal(&instance, "2").unwrap(), 2);

        let err = resolve_signal(&instance, "9").unwrap_err().to_string();
        assert!(err.contains("not allowed"));
        assert!(err.contains("SIGINT (2)"));
    }

    #[test]
    fn test_resolve_signal_without_tool_needs_number() {
        let instance = InstanceDto::default();
        assert_eq!(resolve_signal(&instance, "9").unwrap(), 9);
        assert!(resolve_signal(&instance, "KILL").is_err());
    }
}
