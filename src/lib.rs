//! Toolset attach - terminal client for remote toolset instances.
//!
//! This crate attaches a local terminal to a long-running process launched
//! through the toolset admin API, streaming its output and forwarding
//! keystrokes and resizes over a single binary WebSocket channel.
//!
//! # Architecture
//!
//! - **Attach** - Frame codec, transports, and the client session state machine
//! - **Api** - Blocking REST client for tools and instances
//! - **Commands** - CLI subcommand implementations
//!
//! # Modules
//!
//! - [`attach`] - Attachment channel
//! - [`api`] - Toolset REST client
//! - [`config`] - Configuration loading/saving

pub mod api;
pub mod attach;
pub mod commands;
pub mod config;
pub mod constants;
pub mod env;
pub mod ws;

// Re-export commonly used types
pub use attach::{AttachRequest, AttachSession, CredentialPlacement, Geometry, SessionEvent};
pub use config::Config;
