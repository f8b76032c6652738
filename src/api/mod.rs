//! Toolset admin API.
//!
//! - [`client`] - Blocking HTTP client
//! - [`types`] - Request/response data types

pub mod client;
pub mod types;

pub use client::ToolsetClient;
pub use types::{InstanceDto, Page, ToolArgDto, ToolDto, ToolSignalDto};
