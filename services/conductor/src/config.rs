use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use oasis_reconcile::{PollSettings, DEFAULT_MAX_ATTEMPTS, DEFAULT_WAIT_INTERVAL};

use crate::store::DbConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub store: StoreBackend,
    pub database: DbConfig,
    pub heat: HeatConfig,
    pub trust: TrustConfig,
}

/// Orchestrator endpoint and polling behaviour.
#[derive(Debug, Clone)]
pub struct HeatConfig {
    pub url: String,
    pub poll: PollSettings,
    /// Default create timeout in minutes; `None` means no timeout.
    pub create_timeout: Option<u32>,
}

/// Identity endpoint and delegated-identity settings.
#[derive(Clone)]
pub struct TrustConfig {
    pub keystone_url: String,
    pub keystone_token: String,
    pub trustee_domain_id: String,
    pub roles: Vec<String>,
}

impl std::fmt::Debug for TrustConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustConfig")
            .field("keystone_url", &self.keystone_url)
            .field("keystone_token", &"<redacted>")
            .field("trustee_domain_id", &self.trustee_domain_id)
            .field("roles", &self.roles)
            .finish()
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = env_or("OASIS_LISTEN_ADDR", "127.0.0.1:9511")
            .parse()
            .context("invalid OASIS_LISTEN_ADDR")?;

        let log_level = env_or("OASIS_LOG_LEVEL", "info");

        let dev_mode = std::env::var("OASIS_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let store = match std::env::var("OASIS_STORE").ok().as_deref() {
            Some("memory") => StoreBackend::Memory,
            Some("postgres") => StoreBackend::Postgres,
            Some(other) => anyhow::bail!("unknown OASIS_STORE backend: {}", other),
            None if dev_mode => StoreBackend::Memory,
            None => StoreBackend::Postgres,
        };

        let database = DbConfig::from_env();

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            store,
            database,
            heat: HeatConfig::from_env()?,
            trust: TrustConfig::from_env(),
        })
    }
}

impl HeatConfig {
    pub fn from_env() -> Result<Self> {
        let wait_interval = match std::env::var("OASIS_HEAT_WAIT_INTERVAL") {
            Ok(v) => Duration::from_secs(
                v.parse()
                    .context("OASIS_HEAT_WAIT_INTERVAL must be a number of seconds")?,
            ),
            Err(_) => DEFAULT_WAIT_INTERVAL,
        };

        let max_attempts = match std::env::var("OASIS_HEAT_MAX_ATTEMPTS") {
            Ok(v) => v
                .parse()
                .context("OASIS_HEAT_MAX_ATTEMPTS must be a positive integer")?,
            Err(_) => DEFAULT_MAX_ATTEMPTS,
        };

        let create_timeout = match std::env::var("OASIS_HEAT_CREATE_TIMEOUT") {
            Ok(v) if !v.trim().is_empty() => Some(
                v.trim()
                    .parse::<u32>()
                    .context("OASIS_HEAT_CREATE_TIMEOUT must be a number of minutes")?,
            )
            .filter(|minutes| *minutes > 0),
            _ => None,
        };

        Ok(Self {
            url: env_or("OASIS_HEAT_URL", "http://127.0.0.1:8004"),
            poll: PollSettings {
                wait_interval,
                max_attempts,
            },
            create_timeout,
        })
    }
}

impl TrustConfig {
    pub fn from_env() -> Self {
        let roles = env_or("OASIS_TRUST_ROLES", "member")
            .split(',')
            .map(str::trim)
            .filter(|role| !role.is_empty())
            .map(String::from)
            .collect();

        Self {
            keystone_url: env_or("OASIS_KEYSTONE_URL", "http://127.0.0.1:5000"),
            keystone_token: env_or("OASIS_KEYSTONE_TOKEN", ""),
            trustee_domain_id: env_or("OASIS_TRUSTEE_DOMAIN_ID", "default"),
            roles,
        }
    }

    /// Identity endpoint handed to provisioned stacks.
    pub fn auth_url(&self) -> String {
        format!("{}/v3", self.keystone_url.trim_end_matches('/'))
    }
}
