//! Configuration management for the server.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Bearer token clients must present; anonymous access when unset
    pub auth_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            auth_secret: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let auth_secret = env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty());

        Ok(Self {
            host,
            port,
            auth_secret,
        })
    }

    /// Require `secret` as the bearer token.
    pub fn with_auth_secret(mut self, secret: impl Into<String>) -> Self {
        self.auth_secret = Some(secret.into());
        self
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allows_anonymous_access() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert!(config.auth_secret.is_none());
        assert_eq!(
            config.with_auth_secret("s3cret").auth_secret.as_deref(),
            Some("s3cret")
        );
    }
}
