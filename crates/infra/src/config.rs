//! Process configuration, read once at startup from the environment.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail};
use tracing::warn;

/// Credentials for the administrator created at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapAdmin {
    pub username: String,
    pub password: String,
    pub email: String,
}

impl std::fmt::Debug for BootstrapAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAdmin")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("email", &self.email)
            .finish()
    }
}

/// Upper bound for `TOKEN_TTL_DAYS` (ten years).
pub const MAX_TOKEN_TTL_DAYS: i64 = 3650;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: String,
    /// `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub public_base_url: String,
    pub avatar_dir: PathBuf,
    pub token_ttl_days: i64,
    pub default_role: String,
    pub asset_job_max_attempts: u32,
    pub asset_job_timeout: Duration,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_owned(),
            database_url: None,
            public_base_url: "http://localhost:8080".to_owned(),
            avatar_dir: PathBuf::from("./uploads"),
            token_ttl_days: 30,
            default_role: "USER".to_owned(),
            asset_job_max_attempts: 3,
            asset_job_timeout: Duration::from_secs(30),
            bootstrap_admin: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as absent.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let database_url = get("DATABASE_URL");
        if database_url.is_none() {
            warn!("DATABASE_URL not set; using the in-memory store (data is lost on restart)");
        }

        let token_ttl_days: i64 = parsed(&get, "TOKEN_TTL_DAYS", defaults.token_ttl_days)?;
        if !(1..=MAX_TOKEN_TTL_DAYS).contains(&token_ttl_days) {
            bail!("TOKEN_TTL_DAYS must be between 1 and {MAX_TOKEN_TTL_DAYS}, got {token_ttl_days}");
        }
        let asset_job_max_attempts: u32 = parsed(&get, "ASSET_JOB_MAX_ATTEMPTS", defaults.asset_job_max_attempts)?;
        if asset_job_max_attempts == 0 {
            bail!("ASSET_JOB_MAX_ATTEMPTS must be at least 1");
        }
        let timeout_secs: u64 = parsed(&get, "ASSET_JOB_TIMEOUT_SECS", defaults.asset_job_timeout.as_secs())?;
        if timeout_secs == 0 {
            bail!("ASSET_JOB_TIMEOUT_SECS must be at least 1");
        }

        let bootstrap_admin = match (get("BOOTSTRAP_ADMIN_USERNAME"), get("BOOTSTRAP_ADMIN_PASSWORD")) {
            (Some(username), Some(password)) => Some(BootstrapAdmin {
                email: get("BOOTSTRAP_ADMIN_EMAIL").unwrap_or_else(|| format!("{username}@example.com")),
                username,
                password,
            }),
            (None, None) => None,
            _ => bail!("BOOTSTRAP_ADMIN_USERNAME and BOOTSTRAP_ADMIN_PASSWORD must be set together"),
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url,
            public_base_url: get("PUBLIC_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_owned())
                .unwrap_or(defaults.public_base_url),
            avatar_dir: get("AVATAR_DIR").map(PathBuf::from).unwrap_or(defaults.avatar_dir),
            token_ttl_days,
            default_role: get("DEFAULT_ROLE").unwrap_or(defaults.default_role),
            asset_job_max_attempts,
            asset_job_timeout: Duration::from_secs(timeout_secs),
            bootstrap_admin,
        })
    }
}

fn parsed<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|e| anyhow!("{key}: invalid value {raw:?}: {e}")),
        None => Ok(default),
    }
}
