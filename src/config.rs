use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Access control device
    pub access_control_host: String,
    pub access_control_timeout: Duration,

    // Swipe archive (disabled without a host)
    pub postgres_host: Option<String>,
    pub postgres_port: u16,
    pub postgres_user: String,
    pub postgres_password: Option<Secret<String>>,
    pub postgres_db: String,

    // Keycloak (reconciliation disabled without a URL)
    pub keycloak_url: Option<String>,
    pub keycloak_realm: String,
    pub keycloak_user: String,
    pub keycloak_password: Secret<String>,
    pub authorized_group_id: String,

    // Reconciliation scheduling
    pub resync_interval: Duration,
    pub callback_url: Option<String>,
    pub webhook_addr: Option<String>,

    pub probe_addr: String,
    pub swipe_scrape_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        Ok(Self {
            access_control_host: config.get("access_control_host")?,
            access_control_timeout: secs_or(&config, "access_control_timeout_secs", 5)?,

            postgres_host: config.get("postgres_host").ok(),
            postgres_port: config.get("postgres_port").unwrap_or(5432),
            postgres_user: config
                .get("postgres_user")
                .unwrap_or_else(|_| "postgres".to_string()),
            postgres_password: config
                .get::<String>("postgres_password")
                .ok()
                .map(Secret::new),
            postgres_db: config
                .get("postgres_db")
                .unwrap_or_else(|_| "postgres".to_string()),

            keycloak_url: config.get("keycloak_url").ok(),
            keycloak_realm: config
                .get("keycloak_realm")
                .unwrap_or_else(|_| "master".to_string()),
            keycloak_user: config.get("keycloak_user").unwrap_or_default(),
            keycloak_password: Secret::new(config.get("keycloak_password").unwrap_or_default()),
            authorized_group_id: config.get("authorized_group_id").unwrap_or_default(),

            resync_interval: secs_or(&config, "resync_interval_secs", 3600)?,
            callback_url: config.get("callback_url").ok(),
            webhook_addr: config.get("webhook_addr").ok(),

            probe_addr: config
                .get("probe_addr")
                .unwrap_or_else(|_| "0.0.0.0:8888".to_string()),
            swipe_scrape_interval: secs_or(&config, "swipe_scrape_interval_secs", 7200)?,
        })
    }

    /// Connection options for the swipe archive, if one is configured.
    pub fn postgres_options(&self) -> Option<PgConnectOptions> {
        let host = self.postgres_host.as_deref()?;

        let mut options = PgConnectOptions::new()
            .host(host)
            .port(self.postgres_port)
            .username(&self.postgres_user)
            .database(&self.postgres_db);
        if let Some(password) = &self.postgres_password {
            options = options.password(password.expose_secret());
        }
        Some(options)
    }
}

/// Reads a whole number of seconds, using `default` only when the key is unset.
fn secs_or(config: &config::Config, key: &str, default: u64) -> Result<Duration, config::ConfigError> {
    match config.get::<u64>(key) {
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(config::ConfigError::NotFound(_)) => Ok(Duration::from_secs(default)),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        access_control_host: "127.0.0.1:80".to_string(),
        access_control_timeout: Duration::from_secs(5),
        postgres_host: None,
        postgres_port: 5432,
        postgres_user: "postgres".to_string(),
        postgres_password: None,
        postgres_db: "postgres".to_string(),
        keycloak_url: None,
        keycloak_realm: "master".to_string(),
        keycloak_user: String::new(),
        keycloak_password: Secret::new(String::new()),
        authorized_group_id: String::new(),
        resync_interval: Duration::from_secs(3600),
        callback_url: None,
        webhook_addr: None,
        probe_addr: "0.0.0.0:8888".to_string(),
        swipe_scrape_interval: Duration::from_secs(7200),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durations_fall_back_only_when_unset() {
        let config = config::Config::builder()
            .set_override("resync_interval_secs", "30")
            .unwrap()
            .set_override("swipe_scrape_interval_secs", "1h")
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(
            secs_or(&config, "resync_interval_secs", 3600).unwrap(),
            Duration::from_secs(30)
        );
        assert_eq!(
            secs_or(&config, "access_control_timeout_secs", 5).unwrap(),
            Duration::from_secs(5)
        );
        assert!(secs_or(&config, "swipe_scrape_interval_secs", 7200).is_err());
    }

    #[test]
    fn test_postgres_options_require_host() {
        let mut config = test_config();
        assert!(config.postgres_options().is_none());

        config.postgres_host = Some("db.internal".to_string());
        config.postgres_password = Some(Secret::new("hunter2".to_string()));
        let options = config.postgres_options().unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 5432);
        assert_eq!(options.get_username(), "postgres");
        assert_eq!(options.get_database(), Some("postgres"));
    }
}
