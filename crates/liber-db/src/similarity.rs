//! Similarity matrix repository (one row per published version).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use liber_core::{Error, Result, SimilarityMatrix, SimilarityRepository};

/// JSONB shape of one stored pair.
#[derive(Serialize, Deserialize)]
struct StoredPair {
    a: Uuid,
    b: Uuid,
    score: f32,
}

/// PostgreSQL implementation of [`SimilarityRepository`].
///
/// Each published version is stored whole, so a load always yields a
/// complete matrix. Old versions are kept; readers only consult the latest.
#[derive(Clone)]
pub struct PgSimilarityRepository {
    pool: Pool<Postgres>,
}

impl PgSimilarityRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SimilarityRepository for PgSimilarityRepository {
    async fn save(&self, matrix: &SimilarityMatrix) -> Result<()> {
        let pairs: Vec<StoredPair> = matrix
            .iter()
            .map(|(a, b, score)| StoredPair { a, b, score })
            .collect();
        let entries = serde_json::to_value(&pairs)
            .map_err(|e| Error::Serialization(format!("similarity entries: {e}")))?;

        sqlx::query(
            "INSERT INTO similarity_matrices (version, built_at, entries)
             VALUES ($1, $2, $3)
             ON CONFLICT (version) DO NOTHING",
        )
        .bind(matrix.version as i64)
        .bind(matrix.built_at.unwrap_or_else(Utc::now))
        .bind(entries)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn load_latest(&self) -> Result<Option<SimilarityMatrix>> {
        let row = sqlx::query(
            "SELECT version, built_at, entries FROM similarity_matrices
             ORDER BY version DESC
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let version: i64 = row.try_get("version")?;
        let built_at: DateTime<Utc> = row.try_get("built_at")?;
        let entries: serde_json::Value = row.try_get("entries")?;
        let pairs: Vec<StoredPair> = serde_json::from_value(entries)
            .map_err(|e| Error::Serialization(format!("similarity entries: {e}")))?;

        let mut matrix = SimilarityMatrix::new();
        matrix.version = version as u64;
        matrix.built_at = Some(built_at);
        for pair in pairs {
            matrix.insert(pair.a, pair.b, pair.score);
        }
        Ok(Some(matrix))
    }
}
