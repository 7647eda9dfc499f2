use std::{path::PathBuf, time::Duration};

use config::{builder::DefaultState, ConfigBuilder, ConfigError};
use secrecy::{ExposeSecret, Secret};

use crate::db::PoolConfig;

pub const DEFAULT_SECRET_KEY: &str = "default-secret-key-for-development-12345";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    // MySQL connection pool
    pub database: PoolConfig,

    // Security
    pub session_secret: Secret<String>,

    // Filesystem
    pub static_dir: PathBuf,
    pub upload_dir: PathBuf,

    pub shutdown_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        Self::from_builder(
            config::Config::builder().add_source(config::Environment::default().separator("__")),
        )
    }

    /// Applies the fallback defaults underneath whatever sources the builder already has.
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config = builder
            .set_default("host", "127.0.0.1")?
            .set_default("port", 5000_i64)?
            .set_default("db_host", "localhost")?
            .set_default("db_port", 3306_i64)?
            .set_default("db_user", "root")?
            .set_default("db_password", "")?
            .set_default("db_name", "Ngo_website")?
            .set_default("db_max_connections", 10_i64)?
            .set_default("db_queue_unbounded", true)?
            .set_default("db_connect_timeout_secs", 5_i64)?
            .set_default("db_acquire_timeout_secs", 30_i64)?
            .set_default("secret_key", DEFAULT_SECRET_KEY)?
            .set_default("static_dir", "public")?
            .set_default("upload_dir", "upload")?
            .set_default("shutdown_timeout_secs", 30_i64)?
            .build()?;

        Ok(Self {
            host: config.get("host")?,
            port: config.get("port")?,

            database: PoolConfig {
                host: config.get("db_host")?,
                port: config.get("db_port")?,
                user: config.get("db_user")?,
                password: Secret::new(config.get("db_password")?),
                database: config.get("db_name")?,
                max_connections: config.get("db_max_connections")?,
                queue_unbounded: config.get("db_queue_unbounded")?,
                connect_timeout: Duration::from_secs(
                    config.get("db_connect_timeout_secs")?,
                ),
                acquire_timeout: Duration::from_secs(
                    config.get("db_acquire_timeout_secs")?,
                ),
            },

            session_secret: Secret::new(config.get("secret_key")?),

            static_dir: config.get::<String>("static_dir")?.into(),
            upload_dir: config.get::<String>("upload_dir")?.into(),

            shutdown_timeout: Duration::from_secs(config.get("shutdown_timeout_secs")?),
        })
    }

    pub fn uses_default_secret(&self) -> bool {
        self.session_secret.expose_secret() == DEFAULT_SECRET_KEY
    }
}
