//! Configuration loading and persistence.
//!
//! Handles reading and writing the toolset-attach configuration file. The
//! bearer token is kept in the same file, which is written with owner-only
//! permissions.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::attach::{AttachRequest, CredentialPlacement};
use crate::constants::DEFAULT_SERVER_URL;

const CONFIG_FILE: &str = "config.json";

/// Configuration for the toolset-attach CLI.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the toolset server.
    pub server_url: String,
    /// Bearer token for the admin API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Where the attach handshake carries the token.
    #[serde(default)]
    pub credential_placement: CredentialPlacement,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("server_url", &self.server_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("credential_placement", &self.credential_placement)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            token: None,
            credential_placement: CredentialPlacement::default(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `#[cfg(test)]` (unit tests): `tmp/toolset-test`
    /// 2. `TOOLSET_CONFIG_DIR` env var: explicit override
    /// 3. `TOOLSET_ENV=test`: `tmp/toolset-test` (integration tests)
    /// 4. Default: platform config dir (Linux: ~/.config/toolset-attach)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = {
            #[cfg(test)]
            {
                PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/toolset-test")
            }

            #[cfg(not(test))]
            {
                if let Ok(dir) = std::env::var("TOOLSET_CONFIG_DIR") {
                    PathBuf::from(dir)
                } else if crate::env::is_test_mode() {
                    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/toolset-test")
                } else {
                    dirs::config_dir()
                        .context("Could not determine config directory")?
                        .join("toolset-attach")
                }
            }
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Path of the configuration file.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Reads a configuration file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Applies `TOOLSET_*` overrides looked up through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(server_url) = lookup("TOOLSET_SERVER_URL") {
            self.server_url = server_url;
        }

        // Token from env var (for CI/CD)
        if let Some(token) = lookup("TOOLSET_TOKEN").filter(|t| !t.is_empty()) {
            self.token = Some(token);
        }

        if let Some(placement) = lookup("TOOLSET_CREDENTIAL_PLACEMENT") {
            match placement.parse() {
                Ok(placement) => self.credential_placement = placement,
                Err(e) => log::warn!("Ignoring TOOLSET_CREDENTIAL_PLACEMENT: {}", e),
            }
        }
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Writes the configuration to `path` with owner-only permissions.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Check if a token is configured.
    pub fn has_token(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Store a new token and persist the configuration.
    pub fn save_token(&mut self, token: &str) -> Result<()> {
        self.token = Some(token.trim().to_string()).filter(|t| !t.is_empty());
        self.save()
    }

    /// Copy of this configuration safe to print.
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self {
            token: self.token.as_ref().map(|_| "<redacted>".to_string()),
            ..self.clone()
        }
    }

    /// Attach request for `instance_id` using this configuration's
    /// server, token and credential placement.
    pub fn attach_request(&self, instance_id: &str) -> AttachRequest {
        let request = AttachRequest::new(&self.server_url, instance_id);
        match &self.token {
            Some(token) => request.with_token(token, self.credential_placement),
            None => request,
        }
    }
}
