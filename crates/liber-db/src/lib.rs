//! # liber-db
//!
//! PostgreSQL database layer for the Liber recommendation engine.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for the `liber-core` persistence traits
//! - Item feature-vector storage via pgvector
//! - In-memory repository implementations for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use liber_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/liber").await?;
//!     let users = db.profiles.list_active().await?;
//!     println!("{} active users", users.len());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod memory;
pub mod pool;
pub mod profiles;
pub mod recommendations;
pub mod similarity;

// Re-export core types
pub use liber_core::*;

pub use catalog::PgCatalogRepository;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use profiles::PgProfileRepository;
pub use recommendations::PgRecommendationRepository;
pub use similarity::PgSimilarityRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// User profiles and reading history.
    pub profiles: PgProfileRepository,
    /// Catalog items, feature vectors, and popularity signals.
    pub catalog: PgCatalogRepository,
    /// Persisted recommendation sets.
    pub recommendations: PgRecommendationRepository,
    /// Published similarity matrix versions.
    pub similarity: PgSimilarityRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            profiles: PgProfileRepository::new(pool.clone()),
            catalog: PgCatalogRepository::new(pool.clone()),
            recommendations: PgRecommendationRepository::new(pool.clone()),
            similarity: PgSimilarityRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect with default pool configuration.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Connect with custom pool configuration.
    pub async fn connect_with_config(database_url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(database_url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }
}
