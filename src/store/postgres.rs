//! Postgres-backed article store.

use super::{
    ArticlePredicate, ArticleRecord, ArticleStore, EncodedVector, NewArticle, RowOutcome,
    StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS articles (
        id             BIGSERIAL PRIMARY KEY,
        title          TEXT NOT NULL,
        link           TEXT NOT NULL UNIQUE,
        published_at   TIMESTAMPTZ NOT NULL,
        category       TEXT NOT NULL,
        guid           TEXT NOT NULL,
        description    TEXT,
        image_url      TEXT,
        summary        TEXT,
        summary_vector TEXT,
        created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
        indexed_at     TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS articles_missing_summary_idx ON articles (id) WHERE summary IS NULL",
    "CREATE INDEX IF NOT EXISTS articles_missing_vector_idx ON articles (id) \
     WHERE summary IS NOT NULL AND summary_vector IS NULL",
    "CREATE INDEX IF NOT EXISTS articles_pending_index_idx ON articles (id) \
     WHERE summary_vector IS NOT NULL AND indexed_at IS NULL",
];

const COLUMNS: &str = "id, title, link, published_at, category, guid, description, image_url, \
                       summary, summary_vector, created_at, indexed_at";

/// Article store over a `sqlx` Postgres pool.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect a pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Create the `articles` table and its partial indexes if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("Article schema ready");
        Ok(())
    }
}

fn row_to_record(row: &PgRow) -> Result<ArticleRecord, sqlx::Error> {
    Ok(ArticleRecord {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        link: row.try_get("link")?,
        published_at: row.try_get("published_at")?,
        category: row.try_get("category")?,
        guid: row.try_get("guid")?,
        description: row.try_get("description")?,
        image_url: row.try_get("image_url")?,
        summary: row.try_get("summary")?,
        summary_vector: row
            .try_get::<Option<String>, _>("summary_vector")?
            .map(EncodedVector::from_raw),
        created_at: row.try_get("created_at")?,
        indexed_at: row.try_get("indexed_at")?,
    })
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl ArticleStore for PostgresStore {
    async fn exists_by_link(&self, link: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM articles WHERE link = $1)")
                .bind(link)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn insert_batch(&self, articles: &[NewArticle]) -> Result<Vec<RowOutcome>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut outcomes = Vec::with_capacity(articles.len());

        for article in articles {
            sqlx::query("SAVEPOINT article_row").execute(&mut *tx).await?;
            let inserted = sqlx::query_scalar::<_, i64>(
                "INSERT INTO articles
                    (title, link, published_at, category, guid, description, image_url)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 RETURNING id",
            )
            .bind(&article.title)
            .bind(&article.link)
            .bind(article.published_at)
            .bind(&article.category)
            .bind(&article.guid)
            .bind(&article.description)
            .bind(&article.image_url)
            .fetch_one(&mut *tx)
            .await;

            match inserted {
                Ok(id) => {
                    sqlx::query("RELEASE SAVEPOINT article_row")
                        .execute(&mut *tx)
                        .await?;
                    outcomes.push(Ok(id));
                }
                Err(error) if is_unique_violation(&error) => {
                    sqlx::query("ROLLBACK TO SAVEPOINT article_row")
                        .execute(&mut *tx)
                        .await?;
                    outcomes.push(Err(StoreError::UniqueViolation {
                        link: article.link.clone(),
                    }));
                }
                Err(error) => return Err(error.into()),
            }
        }

        tx.commit().await?;
        Ok(outcomes)
    }

    async fn id_bounds(
        &self,
        predicate: ArticlePredicate,
    ) -> Result<Option<(i64, i64)>, StoreError> {
        let sql = format!(
            "SELECT MIN(id), MAX(id) FROM articles WHERE {}",
            predicate.sql_condition()
        );
        let (min, max): (Option<i64>, Option<i64>) =
            sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(min.zip(max))
    }

    async fn fetch_range(
        &self,
        predicate: ArticlePredicate,
        after_id: i64,
        end: i64,
        limit: usize,
    ) -> Result<Vec<ArticleRecord>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM articles
             WHERE id > $1 AND id <= $2 AND {}
             ORDER BY id
             LIMIT $3",
            predicate.sql_condition()
        );
        let rows = sqlx::query(&sql)
            .bind(after_id)
            .bind(end)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row_to_record(row).map_err(StoreError::from))
            .collect()
    }

    async fn update_summaries(&self, updates: &[(i64, String)]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut changed = 0;
        for (id, summary) in updates {
            let result =
                sqlx::query("UPDATE articles SET summary = $2 WHERE id = $1 AND summary IS NULL")
                    .bind(id)
                    .bind(summary)
                    .execute(&mut *tx)
                    .await?;
            changed += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(changed)
    }

    async fn update_vectors(&self, updates: &[(i64, EncodedVector)]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut changed = 0;
        for (id, vector) in updates {
            let result = sqlx::query(
                "UPDATE articles SET summary_vector = $2 WHERE id = $1 AND summary_vector IS NULL",
            )
            .bind(id)
            .bind(vector.as_str())
            .execute(&mut *tx)
            .await?;
            changed += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(changed)
    }

    async fn mark_indexed(&self, ids: &[i64], at: DateTime<Utc>) -> Result<usize, StoreError> {
        let result = sqlx::query("UPDATE articles SET indexed_at = $2 WHERE id = ANY($1)")
            .bind(ids)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}
