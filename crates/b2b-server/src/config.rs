use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// JWT secrets that must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me",
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    /// Base URL attachment links are built from.
    pub public_url: String,
    pub jwt_secret: String,
    pub max_body_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = lookup("B2B_JWT_SECRET").unwrap_or_default();
        if jwt_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("B2B_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let port: u16 = var("B2B_PORT", "3000")
            .parse()
            .context("B2B_PORT must be a port number")?;
        let max_body_mb: usize = var("B2B_MAX_BODY_MB", "100")
            .parse()
            .context("B2B_MAX_BODY_MB must be a whole number of megabytes")?;

        Ok(Self {
            host: var("B2B_HOST", "0.0.0.0"),
            port,
            db_path: var("B2B_DB_PATH", "b2b.db").into(),
            storage_dir: var("B2B_STORAGE_DIR", "./uploads").into(),
            public_url: lookup("B2B_PUBLIC_URL")
                .unwrap_or_else(|| format!("http://localhost:{}", port)),
            jwt_secret,
            max_body_bytes: max_body_mb * 1024 * 1024,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}
