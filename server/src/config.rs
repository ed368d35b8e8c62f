use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LedgerCfg {
    #[serde(default)]
    pub server: ServerCfg,
    #[serde(default)]
    pub database: DatabaseCfg,
    pub ledger: CoreCfg,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerCfg {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerCfg {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:6379".into()
}

/// Without an `address` the ledger runs on the embedded in-memory engine.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseCfg {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_database")]
    pub name: String,
    #[serde(default = "default_root")]
    pub username: String,
    #[serde(default = "default_root")]
    pub password: String,
}

impl Default for DatabaseCfg {
    fn default() -> Self {
        Self {
            address: None,
            namespace: default_namespace(),
            name: default_database(),
            username: default_root(),
            password: default_root(),
        }
    }
}

fn default_namespace() -> String {
    "ledger".into()
}
fn default_database() -> String {
    "pool_ledger".into()
}
fn default_root() -> String {
    "root".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CoreCfg {
    pub owner: String,
    /// Listing flag assumed for pools whose status was never set.
    #[serde(default = "default_pool_active")]
    pub default_pool_active: bool,
}

impl Default for CoreCfg {
    fn default() -> Self {
        Self {
            owner: String::new(),
            default_pool_active: default_pool_active(),
        }
    }
}

fn default_pool_active() -> bool {
    true
}

/// Overrides such as `LEDGER_LEDGER__OWNER` or `LEDGER_SERVER__LISTEN_ADDR`.
fn environment() -> Environment {
    Environment::with_prefix("LEDGER")
        .prefix_separator("_")
        .separator("__")
}

impl LedgerCfg {
    pub fn load(path: &str) -> Result<Self> {
        let cfg = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(environment())
            .build()
            .context("building config")?;

        let ledger: LedgerCfg = cfg.try_deserialize().context("deserializing config")?;
        ledger.validate()?;
        Ok(ledger)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.ledger.owner.trim().is_empty(), "ledger.owner missing");
        anyhow::ensure!(
            !self.server.listen_addr.is_empty(),
            "server.listen_addr must not be empty"
        );
        if let Some(address) = &self.database.address {
            anyhow::ensure!(!address.is_empty(), "database.address must not be empty when set");
        }
        Ok(())
    }
}
