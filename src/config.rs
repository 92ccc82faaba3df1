use anyhow::{anyhow, Context, Result};
use std::env;

/// Credentials for one terminal bridge session.
#[derive(Clone, Debug)]
pub struct AccountConfig {
    pub login: u64,
    pub password: String,
    pub server: String,
    pub label: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub master_api_base: String,
    pub slave_api_base: String,
    pub master: AccountConfig,
    pub slave: AccountConfig,

    /// Master poll cadence in milliseconds.
    pub poll_interval_ms: u64,
    /// Deviation tolerance passed to every order call.
    pub max_slippage_points: i32,
    /// Mapping store backup path.
    pub map_file: String,
}

fn load_account(prefix: &str, default_label: &str) -> Result<AccountConfig> {
    let login_raw = env::var(format!("{prefix}_LOGIN"))
        .map_err(|_| anyhow!("{prefix}_LOGIN not set"))?;
    let login = login_raw
        .parse::<u64>()
        .with_context(|| format!("{prefix}_LOGIN is not a number: {login_raw}"))?;
    Ok(AccountConfig {
        login,
        password: env::var(format!("{prefix}_PASSWORD"))
            .map_err(|_| anyhow!("{prefix}_PASSWORD not set"))?,
        server: env::var(format!("{prefix}_SERVER"))
            .map_err(|_| anyhow!("{prefix}_SERVER not set"))?,
        label: env::var(format!("{prefix}_LABEL")).unwrap_or_else(|_| default_label.to_string()),
    })
}

fn parsed_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| anyhow!("{name} is not a valid value: {raw}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let master_api_base =
            env::var("MASTER_API_BASE").map_err(|_| anyhow!("MASTER_API_BASE not set"))?;
        let slave_api_base =
            env::var("SLAVE_API_BASE").map_err(|_| anyhow!("SLAVE_API_BASE not set"))?;

        Ok(Self {
            master_api_base,
            slave_api_base,
            master: load_account("MASTER", "Master")?,
            slave: load_account("SLAVE", "Slave")?,
            poll_interval_ms: parsed_or("POLL_INTERVAL_MS", 500)?,
            max_slippage_points: parsed_or("MAX_SLIPPAGE_POINTS", 20)?,
            map_file: env::var("MAP_FILE").unwrap_or_else(|_| "position_map.json".to_string()),
        })
    }
}
