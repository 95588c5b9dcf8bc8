//! Recommendation set repository (append-only).

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use liber_core::{
    Algorithm, Error, RecommendationRepository, RecommendationSet, Result, ScoredItem,
};

/// PostgreSQL implementation of [`RecommendationRepository`].
///
/// Sets are immutable once written: there is no update path, only inserts
/// and reads of the most recent set per user.
#[derive(Clone)]
pub struct PgRecommendationRepository {
    pool: Pool<Postgres>,
}

impl PgRecommendationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn row_to_set(row: &sqlx::postgres::PgRow) -> Result<RecommendationSet> {
        let algorithm: String = row.try_get("algorithm")?;
        let entries: serde_json::Value = row.try_get("entries")?;
        let entries: Vec<ScoredItem> = serde_json::from_value(entries)
            .map_err(|e| Error::Serialization(format!("entries: {e}")))?;

        Ok(RecommendationSet {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            algorithm: Algorithm::from_str(&algorithm)?,
            entries,
            context: row.try_get("context")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl RecommendationRepository for PgRecommendationRepository {
    async fn insert(&self, set: &RecommendationSet) -> Result<()> {
        let entries = serde_json::to_value(&set.entries)
            .map_err(|e| Error::Serialization(format!("entries: {e}")))?;

        sqlx::query(
            "INSERT INTO recommendation_sets (id, user_id, algorithm, entries, context, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(set.id)
        .bind(set.user_id)
        .bind(set.algorithm.as_str())
        .bind(entries)
        .bind(&set.context)
        .bind(set.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn latest_created_at(&self, user_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let created_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT created_at FROM recommendation_sets
             WHERE user_id = $1
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(created_at)
    }

    async fn latest(&self, user_id: Uuid) -> Result<Option<RecommendationSet>> {
        let row = sqlx::query(
            "SELECT id, user_id, algorithm, entries, context, created_at
             FROM recommendation_sets
             WHERE user_id = $1
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::row_to_set).transpose()
    }
}
