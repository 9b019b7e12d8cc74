use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Config;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Signed identity token; absent on public methods.
    #[serde(default)]
    pub token: Option<String>,
}

pub struct AppState {
    pub cfg: Config,
    pub db: Connection,
}
