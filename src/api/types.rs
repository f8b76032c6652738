//! Request and response types for the toolset admin API.
//!
//! Field names are camelCase on the wire. Response types default missing
//! fields so partial payloads from older servers still parse.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A launchable tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolDto {
    /// Unique tool identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Grouping label used by the dashboard.
    pub group: String,
    /// Launch arguments the tool accepts.
    pub args: Vec<ToolArgDto>,
    /// Signals an operator may send to a running instance.
    pub allowed_signals: Vec<ToolSignalDto>,
}

impl ToolDto {
    /// Look up an allowed signal by number or by name (case-insensitive,
    /// with or without the `SIG` prefix).
    pub fn find_signal(&self, signal: &str) -> Option<&ToolSignalDto> {
        let signal = signal.trim();
        if let Ok(value) = signal.parse::<i32>() {
            return self.allowed_signals.iter().find(|s| s.value == value);
        }
        let wanted = strip_sig_prefix(signal);
        self.allowed_signals
            .iter()
            .find(|s| strip_sig_prefix(&s.name).eq_ignore_ascii_case(wanted))
    }
}

fn strip_sig_prefix(name: &str) -> &str {
    match name.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("sig") => &name[3..],
        _ => name,
    }
}

/// One tool argument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolArgDto {
    /// Argument name.
    pub name: String,
    /// Argument type as declared by the tool (e.g. "string", "int", "bool").
    #[serde(rename = "type")]
    pub kind: String,
    /// Default value, any JSON.
    pub default: serde_json::Value,
    /// Human-readable description.
    pub description: String,
}

/// A signal a tool accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSignalDto {
    /// Signal number.
    pub value: i32,
    /// Signal name (e.g. "SIGTERM").
    pub name: String,
    /// Human-readable description.
    pub description: String,
}

/// A launched (running or finished) tool instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceDto {
    /// Unique instance identifier.
    pub id: String,
    /// Identifier of the tool this instance runs.
    pub tool_id: String,
    /// Name of that tool.
    pub tool_name: String,
    /// Full tool description, when the server includes it.
    pub tool: Option<ToolDto>,
    /// User who launched the instance.
    pub launch_user_name: String,
    /// Launch time.
    pub start_time: Option<DateTime<Utc>>,
    /// Exit time, once finished.
    pub end_time: Option<DateTime<Utc>>,
    /// Return code, once finished.
    pub ret: Option<i32>,
    /// Error message, if the process failed.
    pub err: Option<String>,
    /// Whether the process is still running.
    pub is_running: bool,
}

impl InstanceDto {
    /// Short status label for listings.
    pub fn status(&self) -> String {
        if self.is_running {
            return "running".to_string();
        }
        match (self.ret, self.err.as_deref()) {
            (_, Some(err)) if !err.is_empty() => format!("failed: {err}"),
            (Some(code), _) => format!("exited ({code})"),
            (None, _) => "finished".to_string(),
        }
    }
}

/// A page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Page<T> {
    /// Number of matching items overall.
    pub count: u64,
    /// Items on this page.
    pub items: Vec<T>,
    /// Offset of the first item.
    pub start: u64,
    /// Requested page size.
    pub total: u64,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            count: 0,
            items: Vec::new(),
            start: 0,
            total: 0,
        }
    }
}

/// Body of `POST /instances`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceRequest {
    /// Tool to launch.
    pub tool_id: String,
    /// Launch arguments by name.
    pub args: BTreeMap<String, serde_json::Value>,
}

/// Body of `POST /instances/{id}/kill`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KillInstanceRequest {
    /// Signal number to deliver.
    pub signal: i32,
}

/// Error body returned by the server on failure.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    pub(crate) error: String,
}
