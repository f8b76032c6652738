//! Credential and configuration commands.

use anyhow::Result;

use crate::Config;

/// Stores `token` in the config file.
pub fn login(token: &str) -> Result<()> {
    let mut config = Config::load()?;
    config.save_token(token)?;
    if config.has_token() {
        println!("Token saved to {}", Config::config_path()?.display());
    } else {
        println!("Token cleared.");
    }
    Ok(())
}

/// Prints the effective configuration with the token redacted.
pub fn show_config() -> Result<()> {
    let config = Config::load()?;
    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    println!("# file: {}", Config::config_path()?.display());
    Ok(())
}
