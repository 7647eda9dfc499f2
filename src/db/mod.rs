use secrecy::{ExposeSecret, Secret};
use sqlx::{
    mysql::{MySqlConnectOptions, MySqlPoolOptions},
    MySqlPool,
};
use std::time::Duration;
use thiserror::Error;

pub mod schema;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub database: String,
    pub max_connections: u32,
    pub queue_unbounded: bool,
    /// Bounds the boot reachability check, each catalog step and health pings.
    pub connect_timeout: Duration,
    /// Longest a query waits for a connection while the pool is exhausted.
    /// Also caps sqlx's reconnect loop, so it must stay finite.
    pub acquire_timeout: Duration,
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), DbError> {
        if self.host.trim().is_empty() {
            return Err(DbError::InvalidConfig("host must not be empty".to_string()));
        }
        if self.user.trim().is_empty() {
            return Err(DbError::InvalidConfig("user must not be empty".to_string()));
        }
        if self.database.trim().is_empty() {
            return Err(DbError::InvalidConfig(
                "database name must not be empty".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(DbError::InvalidConfig(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(DbError::InvalidConfig(
                "connect_timeout must be greater than zero".to_string(),
            ));
        }
        if self.acquire_timeout.is_zero() {
            return Err(DbError::InvalidConfig(
                "acquire_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(self.password.expose_secret())
            .database(&self.database)
    }

    /// Queued waiters get the longer acquire deadline; otherwise an exhausted
    /// pool fails as fast as a refused connection.
    fn effective_acquire_timeout(&self) -> Duration {
        if self.queue_unbounded {
            self.acquire_timeout
        } else {
            self.connect_timeout
        }
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("invalid database configuration: {0}")]
    InvalidConfig(String),

    #[error("database unreachable: {0}")]
    Unreachable(#[from] sqlx::Error),

    #[error("timed out after {0:?} waiting for a database connection")]
    Timeout(Duration),
}

/// Owned handle to the MySQL connection pool.
///
/// Constructed once in `main` and passed to everything that needs the
/// database. Cloning is cheap and shares the same pool.
#[derive(Debug, Clone)]
pub struct DbPool {
    pool: MySqlPool,
    check_timeout: Duration,
}

impl DbPool {
    /// Builds a lazy pool. No connection is opened until first use.
    pub fn configure(config: &PoolConfig) -> Result<Self, DbError> {
        config.validate()?;

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.effective_acquire_timeout())
            .connect_lazy_with(config.connect_options());

        tracing::debug!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            max_connections = config.max_connections,
            queue_unbounded = config.queue_unbounded,
            acquire_timeout_ms = config.effective_acquire_timeout().as_millis() as u64,
            "Database pool configured"
        );

        Ok(Self {
            pool,
            check_timeout: config.connect_timeout,
        })
    }

    /// Verifies reachability by checking out one connection and handing it straight back.
    pub async fn connect(&self) -> Result<(), DbError> {
        match tokio::time::timeout(self.check_timeout, self.pool.acquire()).await {
            Ok(Ok(connection)) => {
                drop(connection);
                tracing::info!("Connected to the database");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Error connecting to the database");
                Err(DbError::Unreachable(e))
            }
            Err(_) => {
                tracing::error!(
                    timeout_ms = self.check_timeout.as_millis() as u64,
                    "Timed out connecting to the database"
                );
                Err(DbError::Timeout(self.check_timeout))
            }
        }
    }

    /// Closes the pool, waiting up to `drain_timeout` for checked-out
    /// connections to come back. Safe to call more than once.
    pub async fn disconnect(&self, drain_timeout: Duration) {
        if self.pool.is_closed() {
            tracing::debug!("Database pool already closed");
            return;
        }

        let outstanding = self.checked_out();
        if outstanding > 0 {
            tracing::info!(
                outstanding,
                "Waiting for checked-out connections to be released"
            );
        }

        match tokio::time::timeout(drain_timeout, self.pool.close()).await {
            Ok(()) => tracing::info!("Disconnected from the database"),
            Err(_) => tracing::warn!(
                timeout_secs = drain_timeout.as_secs(),
                outstanding = self.checked_out(),
                "Error disconnecting from the database: drain timed out"
            ),
        }
    }

    /// Round-trips `SELECT 1`, bounded by the configured check timeout.
    pub async fn ping(&self) -> Result<(), DbError> {
        let query = sqlx::query("SELECT 1").execute(&self.pool);
        match tokio::time::timeout(self.check_timeout, query).await {
            Ok(result) => result.map(|_| ()).map_err(DbError::from),
            Err(_) => Err(DbError::Timeout(self.check_timeout)),
        }
    }

    /// Connections currently lent out to callers.
    pub fn checked_out(&self) -> u32 {
        self.pool.size().saturating_sub(self.pool.num_idle() as u32)
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    pub fn check_timeout(&self) -> Duration {
        self.check_timeout
    }

    /// Shared handle for issuing queries.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    /// Points at a local port nothing listens on.
    pub(crate) fn unreachable_config() -> PoolConfig {
        PoolConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            user: "root".to_string(),
            password: Secret::new(String::new()),
            database: "Ngo_website".to_string(),
            max_connections: 2,
            queue_unbounded: true,
            connect_timeout: Duration::from_millis(200),
            acquire_timeout: Duration::from_millis(500),
        }
    }

    fn live_config() -> PoolConfig {
        let var = |key: &str, default: &str| {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };
        PoolConfig {
            host: var("DB_HOST", "localhost"),
            port: var("DB_PORT", "3306").parse().unwrap(),
            user: var("DB_USER", "root"),
            password: Secret::new(var("DB_PASSWORD", "")),
            database: var("DB_NAME", "Ngo_website"),
            max_connections: 3,
            queue_unbounded: true,
            connect_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_validate_rejects_malformed_config() {
        let mut config = unreachable_config();
        config.max_connections = 0;
        assert!(matches!(config.validate(), Err(DbError::InvalidConfig(_))));

        let mut config = unreachable_config();
        config.host = "  ".to_string();
        assert!(matches!(config.validate(), Err(DbError::InvalidConfig(_))));

        let mut config = unreachable_config();
        config.database = String::new();
        assert!(matches!(config.validate(), Err(DbError::InvalidConfig(_))));

        let mut config = unreachable_config();
        config.connect_timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(DbError::InvalidConfig(_))));

        let mut config = unreachable_config();
        config.acquire_timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(DbError::InvalidConfig(_))));

        assert!(unreachable_config().validate().is_ok());
    }

    #[test]
    fn test_acquire_timeout_follows_queue_policy() {
        let mut config = unreachable_config();
        assert_eq!(config.effective_acquire_timeout(), config.acquire_timeout);

        config.queue_unbounded = false;
        assert_eq!(config.effective_acquire_timeout(), config.connect_timeout);
    }

    #[tokio::test]
    async fn test_raw_query_fails_promptly_while_unreachable() {
        let db = DbPool::configure(&unreachable_config()).unwrap();

        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            sqlx::query("SELECT 1").execute(db.pool()),
        )
        .await;

        assert!(matches!(outcome, Ok(Err(_))), "query did not fail: {:?}", outcome);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_configure_does_not_touch_the_network() {
        let db = DbPool::configure(&unreachable_config()).unwrap();

        assert!(!db.is_closed());
        assert_eq!(db.checked_out(), 0);
    }

    #[tokio::test]
    async fn test_configure_fails_fast_on_malformed_config() {
        let mut config = unreachable_config();
        config.user = String::new();

        assert!(matches!(
            DbPool::configure(&config),
            Err(DbError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_reports_error_instead_of_panicking() {
        let db = DbPool::configure(&unreachable_config()).unwrap();

        let result = db.connect().await;

        assert!(result.is_err());
        assert_eq!(db.checked_out(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let db = DbPool::configure(&unreachable_config()).unwrap();

        db.disconnect(Duration::from_secs(1)).await;
        assert!(db.is_closed());

        db.disconnect(Duration::from_secs(1)).await;
        assert!(db.is_closed());
    }

    #[tokio::test]
    async fn test_ping_fails_when_unreachable() {
        let db = DbPool::configure(&unreachable_config()).unwrap();

        assert!(db.ping().await.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires a reachable MySQL server (DB_* env vars)
    async fn test_checked_out_never_exceeds_max_connections() {
        let config = live_config();
        let max = config.max_connections;
        let db = DbPool::configure(&config).unwrap();
        let peak = Arc::new(std::sync::atomic::AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..(max * 4) {
            let db = db.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let connection = db.pool().acquire().await.unwrap();
                peak.fetch_max(db.checked_out(), std::sync::atomic::Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                drop(connection);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(std::sync::atomic::Ordering::SeqCst) <= max);
        db.disconnect(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    #[ignore] // Requires a reachable MySQL server (DB_* env vars)
    async fn test_disconnect_waits_for_checked_out_connection() {
        let db = DbPool::configure(&live_config()).unwrap();
        db.connect().await.unwrap();

        let connection = db.pool().acquire().await.unwrap();
        let closing = {
            let db = db.clone();
            tokio::spawn(async move { db.disconnect(Duration::from_secs(10)).await })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!closing.is_finished());

        drop(connection);
        closing.await.unwrap();
        assert!(db.is_closed());
    }
}
