use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Options handed to a driver factory. The selector never looks inside.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ClientOptions {
    pub url: String,

    pub min_connections: u32,

    pub max_connections: u32,

    pub acquire_timeout_secs: u64,

    pub idle_timeout_secs: Option<u64>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            url: "".to_string(),
            min_connections: 0,
            max_connections: 10,
            acquire_timeout_secs: 30,
            idle_timeout_secs: Some(600),
        }
    }
}

impl ClientOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SelectorConf {
    /// alias -> options
    pub connections: HashMap<String, ClientOptions>,

    pub log_init: bool,
}

impl SelectorConf {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        #[cfg(test)]
        {
            dotenvy::from_filename_override(".env.test").ok();
        }

        #[cfg(all(debug_assertions, not(test)))]
        {
            dotenvy::from_filename_override(".env.dev").ok();
        }

        #[cfg(not(any(debug_assertions, test)))]
        {
            dotenvy::from_filename_override(".env.prod").ok();
        }

        let mut connections = HashMap::new();
        let master =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres:///relmap".to_string());
        connections.insert("master".to_string(), ClientOptions::new(master));

        if let Ok(replica) = std::env::var("DATABASE_REPLICA_URL") {
            connections.insert("replica".to_string(), ClientOptions::new(replica));
        }

        let log_init = std::env::var("RELMAP_LOG_INIT")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            connections,
            log_init,
        }
    }
}

/// Installs a fmt subscriber filtered by `RUST_LOG`. A subscriber that is
/// already installed wins.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
