use std::time::Duration;

use crate::session::CoordinatorConfig;

/// Server configuration, read from the environment with defaults.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub jwt_secret: String,
    /// Hours an issued dev token stays valid.
    pub token_expiration_hours: i64,
    /// In-memory backend when absent.
    pub database_url: Option<String>,
    pub score_debounce: Duration,
    pub score_retry_delay: Duration,
    pub kit_unlock_chance: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            jwt_secret: "your-secret-key-change-in-production".to_string(),
            token_expiration_hours: 24,
            database_url: None,
            score_debounce: Duration::from_millis(500),
            score_retry_delay: Duration::from_millis(1000),
            kit_unlock_chance: 0.05,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unparseable values fall back
    /// to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|value| value.trim().parse::<u64>().ok());

        Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            jwt_secret: lookup("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            token_expiration_hours: lookup("TOKEN_EXPIRATION_HOURS")
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(defaults.token_expiration_hours),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            score_debounce: parsed("SCORE_DEBOUNCE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.score_debounce),
            score_retry_delay: parsed("SCORE_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.score_retry_delay),
            kit_unlock_chance: lookup("KIT_UNLOCK_CHANCE")
                .and_then(|value| value.trim().parse::<f64>().ok())
                .filter(|chance| (0.0..=1.0).contains(chance))
                .unwrap_or(defaults.kit_unlock_chance),
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            debounce_window: self.score_debounce,
            retry_delay: self.score_retry_delay,
        }
    }
}
