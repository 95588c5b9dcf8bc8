//! Catalog, item feature vector, and popularity repository.

use async_trait::async_trait;
use chrono::Utc;
use pgvector::Vector;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use liber_core::{Book, CatalogRepository, Error, ItemVector, PopularityScore, Result};

/// Window, in days, over which completions count toward popularity.
const POPULARITY_WINDOW_DAYS: i32 = 30;

/// PostgreSQL implementation of [`CatalogRepository`].
///
/// Item vectors live in an `item_vectors` pgvector column and are treated
/// as a replaceable cache: `upsert_vector` overwrites unconditionally.
#[derive(Clone)]
pub struct PgCatalogRepository {
    pool: Pool<Postgres>,
}

impl PgCatalogRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogRepository for PgCatalogRepository {
    async fn list_books(&self) -> Result<Vec<Book>> {
        let rows = sqlx::query(
            "SELECT id, title, subjects, published_at FROM books ORDER BY published_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter()
            .map(|row| {
                Ok(Book {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    subjects: row.try_get("subjects")?,
                    published_at: row.try_get("published_at")?,
                })
            })
            .collect()
    }

    async fn item_vector(&self, book_id: Uuid) -> Result<Option<ItemVector>> {
        let row = sqlx::query(
            "SELECT book_id, vector, updated_at FROM item_vectors WHERE book_id = $1",
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(|row| {
            let vector: Vector = row.try_get("vector")?;
            Ok(ItemVector {
                book_id: row.try_get("book_id")?,
                vector: vector.as_slice().to_vec(),
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn all_vectors(&self) -> Result<Vec<ItemVector>> {
        let rows =
            sqlx::query("SELECT book_id, vector, updated_at FROM item_vectors ORDER BY book_id")
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?;

        rows.iter()
            .map(|row| {
                let vector: Vector = row.try_get("vector")?;
                Ok(ItemVector {
                    book_id: row.try_get("book_id")?,
                    vector: vector.as_slice().to_vec(),
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }

    async fn upsert_vector(&self, vector: &ItemVector) -> Result<()> {
        sqlx::query(
            "INSERT INTO item_vectors (book_id, vector, updated_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (book_id) DO UPDATE
             SET vector = EXCLUDED.vector, updated_at = EXCLUDED.updated_at",
        )
        .bind(vector.book_id)
        .bind(Vector::from(vector.vector.clone()))
        .bind(vector.updated_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn popularity(&self) -> Result<Vec<PopularityScore>> {
        let cutoff = Utc::now() - chrono::Duration::days(POPULARITY_WINDOW_DAYS as i64);
        let rows = sqlx::query(
            "SELECT book_id, COUNT(*) AS completions
             FROM reading_history
             WHERE finished_at > $1
             GROUP BY book_id
             ORDER BY completions DESC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let counts: Vec<(Uuid, i64)> = rows
            .iter()
            .map(|row| Ok((row.try_get("book_id")?, row.try_get("completions")?)))
            .collect::<Result<_>>()?;

        // Normalize against the most popular item so scores land in [0,1].
        let max = counts.first().map(|(_, c)| *c).unwrap_or(0);
        if max == 0 {
            return Ok(Vec::new());
        }
        Ok(counts
            .into_iter()
            .map(|(book_id, c)| PopularityScore {
                book_id,
                score: c as f32 / max as f32,
            })
            .collect())
    }
}
