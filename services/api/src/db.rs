//! Data Access Layer
//!
//! All Postgres access lives here. Sessions are persisted as one row each
//! with the full typed state serialized to JSONB; topic content lives in two
//! tables mirroring the two lookup paths of the content repository.

use anyhow::{Context, Result};
use async_trait::async_trait;
use revise_core::content::ContentRepository;
use revise_core::session::{ConceptChunk, Session};
use revise_core::store::SessionStore;
use sqlx::{PgPool, Row};

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Lists all topics available for revision, in presentation order.
    pub async fn list_topics(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT title FROM topics ORDER BY title")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("title").map_err(Into::into))
            .collect()
    }

    fn chunk_from_row(row: &sqlx::postgres::PgRow) -> Result<ConceptChunk> {
        Ok(ConceptChunk {
            number: row.try_get("number")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
        })
    }
}

#[async_trait]
impl SessionStore for Db {
    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT state_json FROM sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let state: serde_json::Value = row.try_get("state_json")?;
                let session = serde_json::from_value(state)
                    .context("stored session state failed to deserialize")?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let state_json = serde_json::to_value(session)?;
        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, student_id, topic, state_json)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (session_id)
            DO UPDATE SET state_json = EXCLUDED.state_json, updated_at = now()
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.student_id)
        .bind(&session.topic)
        .bind(state_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ContentRepository for Db {
    async fn concept_chunks(&self, topic_title: &str) -> Result<Vec<ConceptChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT number, title, content
            FROM concept_chunks
            WHERE topic_title = $1
            ORDER BY number ASC
            "#,
        )
        .bind(topic_title)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::chunk_from_row).collect()
    }

    async fn flat_content(&self, topic: &str) -> Result<Vec<ConceptChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT number, title, content
            FROM topic_content
            WHERE topic = $1
            ORDER BY number ASC
            "#,
        )
        .bind(topic)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::chunk_from_row).collect()
    }
}
