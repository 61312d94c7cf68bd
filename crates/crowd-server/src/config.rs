use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Secrets that ship in examples and must not guard a real deployment.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Unset means the presence cache lives in process memory.
    pub redis_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("CROWD_JWT_SECRET").unwrap_or_else(|| "dev-secret-change-me".into());
        let db_path = lookup("CROWD_DB_PATH").unwrap_or_else(|| "crowd.db".into()).into();
        let host = lookup("CROWD_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = match lookup("CROWD_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("CROWD_PORT is not a port number: {}", raw))?,
            None => 3000,
        };
        let redis_url = lookup("CROWD_REDIS_URL").filter(|url| !url.trim().is_empty());

        Ok(Self {
            jwt_secret,
            db_path,
            host,
            port,
            redis_url,
        })
    }

    pub fn uses_placeholder_secret(&self) -> bool {
        self.jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&self.jwt_secret.as_str())
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))?;
        Ok(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("crowd.db"));
        assert!(config.redis_url.is_none());
        assert!(config.uses_placeholder_secret());
        assert_eq!(config.addr().unwrap().port(), 3000);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("CROWD_JWT_SECRET", "s3cret-value"),
            ("CROWD_PORT", "8080"),
            ("CROWD_HOST", "127.0.0.1"),
            ("CROWD_REDIS_URL", "redis://localhost:6379"),
        ])
        .unwrap();
        assert!(!config.uses_placeholder_secret());
        assert_eq!(config.addr().unwrap().to_string(), "127.0.0.1:8080");
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
    }

    #[test]
    fn test_blank_redis_url_means_memory() {
        let config = config(&[("CROWD_REDIS_URL", "  ")]).unwrap();
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_bad_port_rejected() {
        assert!(config(&[("CROWD_PORT", "http")]).is_err());
    }
}
