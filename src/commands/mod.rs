//! CLI subcommand implementations for toolset-attach.
//!
//! Commands are organized into submodules by domain:
//!
//! - [`attach`] - Interactive attachment to an instance
//! - [`toolset`] - Tool listing, launching, logs and signals
//! - [`login`] - Token and configuration management
//!
//! # Usage
//!
//! Commands are invoked from the main CLI dispatcher:
//!
//! ```ignore
//! use toolset_attach::commands;
//!
//! let code = commands::attach::run(&config, "abc123")?;
//! commands::toolset::tools(&client)?;
//! ```

pub mod attach;
pub mod login;
pub mod toolset;

#[doc(inline)]
pub use login::{login, show_config};
