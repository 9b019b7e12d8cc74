use std::path::PathBuf;

use anyhow::bail;

/// Runtime configuration, read once at startup. Handlers receive it through
/// `AppState` instead of consulting the environment themselves.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub secret: String,
    pub token_ttl_hours: i64,
    pub port: Option<u16>,
    #[cfg(feature = "dev-bypass")]
    pub dev_bypass: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        let secret = match std::env::var("PORTAL_SECRET") {
            Ok(s) if !s.trim().is_empty() => s,
            _ => bail!("PORTAL_SECRET must be set to a non-empty signing secret"),
        };

        let db_path = std::env::var("PORTAL_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("portal.sqlite3"));

        // Negative TTLs are allowed so tests can mint already-expired tokens.
        let token_ttl_hours = match std::env::var("PORTAL_TOKEN_TTL_HOURS") {
            Ok(raw) => match raw.trim().parse::<i64>() {
                Ok(v) => v,
                Err(_) => bail!("PORTAL_TOKEN_TTL_HOURS must be an integer, got {:?}", raw),
            },
            Err(_) => 24,
        };

        let port = match std::env::var("PORTAL_PORT") {
            Ok(raw) => match raw.trim().parse::<u16>() {
                Ok(v) => Some(v),
                Err(_) => bail!("PORTAL_PORT must be a port number, got {:?}", raw),
            },
            Err(_) => None,
        };

        Ok(Config {
            db_path,
            secret,
            token_ttl_hours,
            port,
            #[cfg(feature = "dev-bypass")]
            dev_bypass: std::env::var("PORTAL_DEV_BYPASS").map(|v| v == "1").unwrap_or(false),
        })
    }
}
