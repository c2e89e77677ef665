//! Database module for embedded SQLite storage backing the durable memory store.
//!
//! This module provides a clean separation between functional core (pure business logic)
//! and imperative shell (I/O operations) for database management.
//!
//! # Architecture
//!
//! - **Functional Core**: Configuration validation, connection string generation
//! - **Imperative Shell**: File system operations, SQLite connections

use crate::domain_types::ConnectionPoolSize;
use nutype::nutype;
use sqlx::{Pool, Sqlite, SqlitePool, migrate::Migrator};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Static migrator for embedded `SQLite` migrations.
static MIGRATOR: Migrator = sqlx::migrate!();

/// Database-specific error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Database error: {message}")]
    Database { message: String },

    #[error("File system error: {message}")]
    FileSystem { message: String },

    #[error("Configuration error: {field} - {reason}")]
    Configuration { field: String, reason: String },

    #[error("Connection pool error: {message}")]
    ConnectionPool { message: String },

    #[error("Migration failed at version {version}: {message}")]
    Migration { version: String, message: String },
}

/// Database error types.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Database result type.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Storage result type for pure functions.
pub type StorageResult<T> = Result<T, StorageError>;

#[nutype(
    sanitize(with = |path: PathBuf| path),
    validate(predicate = |path| !path.as_os_str().is_empty() && path.extension().is_some_and(|ext| ext == "db")),
    derive(Clone, Debug, Eq, PartialEq)
)]
pub struct DatabasePath(PathBuf);

impl DatabasePath {
    /// Creates a new database path with validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is empty or has an invalid extension.
    pub fn new<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        let path_buf = path.as_ref().to_path_buf();
        Self::try_new(path_buf).map_err(|_| {
            DatabaseError::Storage(StorageError::Configuration {
                field: "database_path".to_string(),
                reason: "Path is empty or has invalid extension (must be .db)".to_string(),
            })
        })
    }

    #[must_use]
    pub fn as_path(&self) -> PathBuf {
        self.clone().into_inner()
    }

    /// Generates `SQLite` connection string (functional core).
    #[must_use]
    pub fn to_connection_string(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.as_path().display())
    }

    #[must_use]
    pub fn parent_directory(&self) -> Option<PathBuf> {
        self.as_path().parent().map(std::path::Path::to_path_buf)
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.as_path().exists()
    }
}

impl std::fmt::Display for DatabasePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_path().display())
    }
}

/// Database configuration with connection pool settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    path: DatabasePath,
    pool_size: ConnectionPoolSize,
    enable_wal_mode: bool,
    enable_foreign_keys: bool,
}

impl DatabaseConfig {
    #[must_use]
    pub fn new(path: DatabasePath) -> Self {
        Self {
            path,
            pool_size: ConnectionPoolSize::default(),
            enable_wal_mode: true,
            enable_foreign_keys: true,
        }
    }

    /// Creates config for testing with minimal settings.
    ///
    /// # Panics
    ///
    /// Panics if the default pool size cannot be created (should never happen).
    #[must_use]
    pub fn for_testing(path: DatabasePath) -> Self {
        Self {
            path,
            pool_size: ConnectionPoolSize::try_new(1).expect("Pool size 1 should be valid (range: 1-100)"),
            enable_wal_mode: false,
            enable_foreign_keys: false,
        }
    }

    #[must_use]
    pub fn with_pool_size(mut self, pool_size: ConnectionPoolSize) -> Self {
        self.pool_size = pool_size;
        self
    }

    #[must_use]
    pub fn with_wal_mode(mut self, enable: bool) -> Self {
        self.enable_wal_mode = enable;
        self
    }

    #[must_use]
    pub fn with_foreign_keys(mut self, enable: bool) -> Self {
        self.enable_foreign_keys = enable;
        self
    }

    #[must_use]
    pub fn path(&self) -> &DatabasePath {
        &self.path
    }

    #[must_use]
    pub fn pool_size(&self) -> ConnectionPoolSize {
        self.pool_size
    }

    #[must_use]
    pub fn wal_mode_enabled(&self) -> bool {
        self.enable_wal_mode
    }

    #[must_use]
    pub fn foreign_keys_enabled(&self) -> bool {
        self.enable_foreign_keys
    }

    /// Validates configuration (functional core).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> StorageResult<()> {
        if self.pool_size.as_usize() == 0 {
            return Err(StorageError::Configuration {
                field: "pool_size".to_string(),
                reason: "Pool size must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Database connection with managed pool.
#[derive(Clone)]
pub struct DatabaseConnection {
    pool: Pool<Sqlite>,
    config: DatabaseConfig,
}

// Functional Core: Pure business logic
impl DatabaseConnection {
    fn create_connect_options(config: &DatabaseConfig) -> sqlx::sqlite::SqliteConnectOptions {
        use sqlx::ConnectOptions;
        use sqlx::sqlite::SqliteConnectOptions;

        let mut options = SqliteConnectOptions::new()
            .filename(config.path().as_path())
            .create_if_missing(true);

        if config.wal_mode_enabled() {
            options = options.pragma("journal_mode", "WAL");
        }

        if config.foreign_keys_enabled() {
            options = options.pragma("foreign_keys", "ON");
        }

        options.disable_statement_logging()
    }
}

// Imperative Shell: I/O operations
impl DatabaseConnection {
    /// Initializes database connection (imperative shell).
    ///
    /// # Errors
    ///
    /// Returns an error if database initialization fails.
    pub async fn initialize(config: DatabaseConfig) -> DatabaseResult<Self> {
        config.validate().map_err(DatabaseError::Storage)?;
        Self::ensure_parent_directory_exists(&config).await?;
        let pool = Self::create_connection_pool(&config).await?;
        Self::apply_database_settings(&pool, &config).await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool, config })
    }

    async fn ensure_parent_directory_exists(config: &DatabaseConfig) -> DatabaseResult<()> {
        if let Some(parent) = config.path().parent_directory() {
            tokio::fs::create_dir_all(&parent).await.map_err(|e| {
                DatabaseError::Storage(StorageError::FileSystem {
                    message: format!("Failed to create directory {}: {}", parent.display(), e),
                })
            })?;
        }
        Ok(())
    }

    async fn create_connection_pool(config: &DatabaseConfig) -> DatabaseResult<Pool<Sqlite>> {
        let options = Self::create_connect_options(config);
        SqlitePool::connect_with(options).await.map_err(|e| {
            DatabaseError::Storage(StorageError::ConnectionPool {
                message: format!("Failed to create connection pool: {e}"),
            })
        })
    }

    async fn apply_database_settings(pool: &Pool<Sqlite>, _config: &DatabaseConfig) -> DatabaseResult<()> {
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::Storage(StorageError::Database {
                message: format!("Failed to set synchronous mode: {e}"),
            }))?;

        sqlx::query("PRAGMA cache_size = -65536")
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::Storage(StorageError::Database {
                message: format!("Failed to set cache size: {e}"),
            }))?;

        sqlx::query("PRAGMA temp_store = MEMORY")
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::Storage(StorageError::Database {
                message: format!("Failed to set temp store: {e}"),
            }))?;

        sqlx::query("PRAGMA mmap_size = 268435456")
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::Storage(StorageError::Database {
                message: format!("Failed to set mmap size: {e}"),
            }))?;

        sqlx::query("PRAGMA optimize")
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::Storage(StorageError::Database {
                message: format!("Failed to optimize database: {e}"),
            }))?;

        Ok(())
    }

    async fn run_migrations(pool: &Pool<Sqlite>) -> DatabaseResult<()> {
        info!("Starting database migration process");

        match MIGRATOR.run(pool).await {
            Ok(()) => {
                info!("Database migrations completed successfully");
                Ok(())
            }
            Err(e) => {
                warn!("Migration failed during schema update: {}", e);
                Err(DatabaseError::Storage(StorageError::Migration {
                    version: "unknown".to_string(),
                    message: format!("Schema migration execution failed: {e}"),
                }))
            }
        }
    }

    #[must_use]
    pub fn database_file_exists(&self) -> bool {
        self.config.path().exists()
    }

    /// Tests the database connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection test fails.
    pub async fn test_connection(&self) -> DatabaseResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::Storage(StorageError::Database {
                message: format!("Connection test failed: {e}"),
            }))?;
        Ok(())
    }

    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }
}
