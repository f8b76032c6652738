//! Tool and instance management commands.
//!
//! Thin wrappers around [`ToolsetClient`] that print human-readable output.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone, Utc};

use crate::api::{InstanceDto, ToolDto, ToolsetClient};

/// Prints every launchable tool with its arguments and signals.
pub fn tools(client: &ToolsetClient) -> Result<()> {
    let tools = client.list_tools()?;
    if tools.is_empty() {
        println!("No tools available.");
        return Ok(());
    }

    for tool in &tools {
        println!("{} ({}) [{}]", tool.id, tool.name, tool.group);
        if !tool.description.is_empty() {
            println!("    {}", tool.description);
        }
        for arg in &tool.args {
            println!(
                "    --arg {}=<{}>  default {}  {}",
                arg.name, arg.kind, arg.default, arg.description
            );
        }
        if !tool.allowed_signals.is_empty() {
            let signals: Vec<String> = tool
                .allowed_signals
                .iter()
                .map(|s| format!("{}={}", s.name, s.value))
                .collect();
            println!("    signals: {}", signals.join(", "));
        }
    }
    Ok(())
}

/// Prints a page of instances.
pub fn instances(client: &ToolsetClient, all: bool, skip: u32, take: u32) -> Result<()> {
    let page = client.list_instances(all, skip, take)?;
    if page.items.is_empty() {
        println!(
            "No {}instances.",
            if all { "" } else { "running " }
        );
        return Ok(());
    }

    let now = Local::now();
    println!(
        "{:<24} {:<16} {:<12} {:<10} STATUS",
        "ID", "TOOL", "USER", "STARTED"
    );
    println!("{}", "-".repeat(80));
    for instance in &page.items {
        println!(
            "{:<24} {:<16} {:<12} {:<10} {}",
            instance.id,
            instance.tool_name,
            instance.launch_user_name,
            format_start_time(instance.start_time, &now),
            instance.status()
        );
    }
    println!();
    let (first, last) = shown_range(skip, page.items.len());
    println!("Showing {}-{} of {}", first, last, page.count);
    Ok(())
}

/// One-based range of listing rows shown after skipping `skip`.
fn shown_range(skip: u32, shown: usize) -> (u64, u64) {
    let skip = u64::from(skip);
    (skip + 1, skip + shown as u64)
}

/// Prints details of one instance.
pub fn show(client: &ToolsetClient, id: &str) -> Result<()> {
    let instance = client.get_instance(id)?;
    let now = Local::now();

    println!("Instance:  {}", instance.id);
    println!("Tool:      {} ({})", instance.tool_name, instance.tool_id);
    println!("Launched:  {}", instance.launch_user_name);
    println!("Started:   {}", format_start_time(instance.start_time, &now));
    if let Some(end) = instance.end_time {
        println!("Ended:     {}", format_start_time(Some(end), &now));
    }
    println!("Status:    {}", instance.status());
    Ok(())
}

/// Writes an instance's log to `output`, or to stdout.
pub fn log(client: &ToolsetClient, id: &str, all: bool, output: Option<&Path>) -> Result<()> {
    let bytes = client.fetch_log(id, all)?;
    match output {
        Some(path) => {
            fs::write(path, &bytes).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {} bytes to {}", bytes.len(), path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

/// Sends a signal to a running instance.
pub fn kill(client: &ToolsetClient, id: &str, signal: &str) -> Result<()> {
    let instance = client.get_instance(id)?;
    if !instance.is_running {
        anyhow::bail!("Instance {} is not running", id);
    }
    let value = client.kill_instance(&instance, signal)?;
    println!("Sent signal {} to {}", value, id);
    Ok(())
}

/// Launches a tool and returns the new instance.
///
/// `tool` may be a tool id or name; `raw_args` are `NAME=VALUE` pairs.
pub fn launch(client: &ToolsetClient, tool: &str, raw_args: &[String]) -> Result<InstanceDto> {
    let tools = client.list_tools()?;
    let tool = find_tool(&tools, tool)?;
    let args = build_launch_args(tool, raw_args)?;
    let instance = client.create_instance(&tool.id, args)?;
    println!("Launched {} as instance {}", tool.id, instance.id);
    Ok(instance)
}

/// Find a tool by id, falling back to a case-insensitive name match.
pub fn find_tool<'a>(tools: &'a [ToolDto], wanted: &str) -> Result<&'a ToolDto> {
    tools
        .iter()
        .find(|t| t.id == wanted)
        .or_else(|| tools.iter().find(|t| t.name.eq_ignore_ascii_case(wanted)))
        .with_context(|| {
            let ids: Vec<&str> = tools.iter().map(|t| t.id.as_str()).collect();
            format!("Unknown tool {}; available: {}", wanted, ids.join(", "))
        })
}

/// Parse `NAME=VALUE` pairs into launch arguments for `tool`.
///
/// Values that parse as JSON are sent as JSON, anything else as a string.
/// Names must be declared by the tool when it declares any arguments.
pub fn build_launch_args(
    tool: &ToolDto,
    raw_args: &[String],
) -> Result<BTreeMap<String, serde_json::Value>> {
    let mut args = BTreeMap::new();
    for raw in raw_args {
        let (name, value) = raw
            .split_once('=')
            .with_context(|| format!("Invalid argument {raw}; expected NAME=VALUE"))?;
        let name = name.trim();
        if !tool.args.is_empty() && !tool.args.iter().any(|a| a.name == name) {
            let known: Vec<&str> = tool.args.iter().map(|a| a.name.as_str()).collect();
            anyhow::bail!(
                "{} has no argument {}; known: {}",
                tool.id,
                name,
                known.join(", ")
            );
        }
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        args.insert(name.to_string(), value);
    }
    Ok(args)
}

/// Format a start time relative to `now`: time of day when it is on the
/// same date, otherwise the date.
pub fn format_start_time<Tz>(start: Option<DateTime<Utc>>, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let Some(start) = start else {
        return "-".to_string();
    };
    let local = start.with_timezone(&now.timezone());
    if local.date_naive() == now.date_naive() {
        local.format("%H:%M:%S").to_string()
    } else {
        local.format("%Y-%m-%d").to_string()
    }
}
