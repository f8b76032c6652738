//! Runtime environment detection.
//!
//! `TOOLSET_ENV=test` selects test mode, where the config lives under the
//! crate's `tmp/` directory. Anything else, or unset, is production.

/// Runtime environment for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Test environment.
    Test,
}

impl Environment {
    /// Detect current environment from `TOOLSET_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::parse(std::env::var("TOOLSET_ENV").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("test") => Self::Test,
            _ => Self::Production,
        }
    }
}

/// Convenience function to check if running in test mode.
#[must_use]
pub fn is_test_mode() -> bool {
    Environment::current() == Environment::Test
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parse() {
        assert_eq!(Environment::parse(Some("test")), Environment::Test);
        assert_eq!(Environment::parse(Some("dev")), Environment::Production);
        assert_eq!(Environment::parse(Some("staging")), Environment::Production);
        assert_eq!(Environment::parse(None), Environment::Production);
    }
}
