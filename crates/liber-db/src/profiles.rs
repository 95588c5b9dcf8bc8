//! User profile and reading history repository.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use liber_core::{
    Error, HybridWeights, ProfileRepository, ReadingRecord, Result, UserProfile,
};

/// PostgreSQL implementation of [`ProfileRepository`].
///
/// The `users` and `reading_history` tables are owned by the platform's
/// user-management service; this repository only reads them.
#[derive(Clone)]
pub struct PgProfileRepository {
    pool: Pool<Postgres>,
}

impl PgProfileRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn row_to_profile(row: &sqlx::postgres::PgRow) -> Result<UserProfile> {
        let weight_overrides: Option<serde_json::Value> = row.try_get("weight_overrides")?;
        let weight_overrides = weight_overrides
            .map(|v| serde_json::from_value::<HybridWeights>(v))
            .transpose()
            .map_err(|e| Error::Serialization(format!("weight_overrides: {e}")))?;

        Ok(UserProfile {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            active: row.try_get("active")?,
            recommendations_enabled: row.try_get("recommendations_enabled")?,
            weight_overrides,
            created_at: row.try_get("created_at")?,
        })
    }

    const SELECT_PROFILE: &'static str = "SELECT id, username, active, \
         recommendations_enabled, weight_overrides, created_at FROM users";
}

#[async_trait]
impl ProfileRepository for PgProfileRepository {
    async fn get(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        let row = sqlx::query(&format!("{} WHERE id = $1", Self::SELECT_PROFILE))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref().map(Self::row_to_profile).transpose()
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<UserProfile>> {
        let row = sqlx::query(&format!("{} WHERE username = $1", Self::SELECT_PROFILE))
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref().map(Self::row_to_profile).transpose()
    }

    async fn list_all(&self) -> Result<Vec<UserProfile>> {
        let rows = sqlx::query(&format!(
            "{} WHERE recommendations_enabled ORDER BY created_at",
            Self::SELECT_PROFILE
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::row_to_profile).collect()
    }

    async fn list_active(&self) -> Result<Vec<UserProfile>> {
        let rows = sqlx::query(&format!(
            "{} WHERE active AND recommendations_enabled ORDER BY created_at",
            Self::SELECT_PROFILE
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::row_to_profile).collect()
    }

    async fn history(&self, user_id: Uuid) -> Result<Vec<ReadingRecord>> {
        let rows = sqlx::query(
            "SELECT user_id, book_id, finished_at, rating
             FROM reading_history
             WHERE user_id = $1
             ORDER BY finished_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter()
            .map(|row| {
                Ok(ReadingRecord {
                    user_id: row.try_get("user_id")?,
                    book_id: row.try_get("book_id")?,
                    finished_at: row.try_get("finished_at")?,
                    rating: row.try_get("rating")?,
                })
            })
            .collect()
    }
}
