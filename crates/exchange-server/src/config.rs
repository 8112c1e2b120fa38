//! Configuration for the exchange TCP server.
//!
//! Values come from, in increasing priority:
//! 1. built-in defaults,
//! 2. an optional TOML file (`--config`),
//! 3. environment variables:
//!
//! - `EXCHANGE_BIND_ADDR`           (default: "0.0.0.0")
//! - `EXCHANGE_PORT`                (default: "9000")
//! - `EXCHANGE_MAX_CLIENTS`         (default: "1024")
//! - `EXCHANGE_SWEEP_INTERVAL_SECS` (default: "5")
//! - `EXCHANGE_ALLOW_ADMIN`         (default: "true")
//! - `EXCHANGE_PLATFORM_FEE_BPS`    (default: "100")
//! - `EXCHANGE_NETWORK_FEE`         (default: "25")

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use exchange_core::EngineConfig;
use serde::Deserialize;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IP address / interface to bind to (e.g. "0.0.0.0" or "127.0.0.1").
    pub bind_addr: String,

    /// TCP port to listen on.
    pub port: u16,

    /// Maximum number of simultaneously connected clients.
    pub max_clients: usize,

    /// Seconds between expiry sweeps.
    pub sweep_interval_secs: u64,

    /// Accept `D` (deposit) and `I` (issue) lines from sessions.
    pub allow_admin_commands: bool,

    /// Accounts whose sessions are not allowed to trade.
    pub restricted_accounts: Vec<u64>,

    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "0.0.0.0".to_string(),
            port: 9000,
            max_clients: 1024,
            sweep_interval_secs: 5,
            allow_admin_commands: true,
            restricted_accounts: Vec::new(),
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Load the optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                Self::from_toml(&text)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Config::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Override fields from `lookup` (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("EXCHANGE_BIND_ADDR") {
            self.bind_addr = addr;
        }
        self.port = read_or(&lookup, "EXCHANGE_PORT", self.port)?;
        self.max_clients = read_or(&lookup, "EXCHANGE_MAX_CLIENTS", self.max_clients)?;
        self.sweep_interval_secs =
            read_or(&lookup, "EXCHANGE_SWEEP_INTERVAL_SECS", self.sweep_interval_secs)?;
        self.allow_admin_commands =
            read_or(&lookup, "EXCHANGE_ALLOW_ADMIN", self.allow_admin_commands)?;
        self.engine.fees.platform_fee_bps = read_or(
            &lookup,
            "EXCHANGE_PLATFORM_FEE_BPS",
            self.engine.fees.platform_fee_bps,
        )?;
        self.engine.fees.network_fee =
            read_or(&lookup, "EXCHANGE_NETWORK_FEE", self.engine.fees.network_fee)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.max_clients > 0, "max_clients must be positive");
        anyhow::ensure!(self.sweep_interval_secs > 0, "sweep_interval_secs must be positive");
        self.engine.validate()?;
        Ok(())
    }

    /// Convenience: `addr:port` socket string.
    pub fn socket_addr_string(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn read_or<T, F>(lookup: &F, key: &str, current: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(val) => val
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value {:?} for {}", val, key)),
        None => Ok(current),
    }
}
