use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    CommitReceipt, Document, Result, SagaId, StoreError, Version, WriteBatch, WriteOp,
    batch::validate_batch, store::DocumentStore,
};

const PRIMARY_KEY_CONSTRAINT: &str = "saga_documents_pkey";

/// PostgreSQL-backed document store.
///
/// Documents live in the `saga_documents` table as `jsonb`. A batch commits
/// inside a single transaction; dropping the transaction on error rolls back
/// every op already executed.
#[derive(Clone)]
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    /// Creates a new PostgreSQL document store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool to `database_url` and wraps it.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_document(row: PgRow) -> Result<Document> {
        Ok(Document {
            collection: row.try_get("collection")?,
            id: SagaId::from_uuid(row.try_get::<Uuid, _>("id")?),
            version: Version::new(row.try_get("version")?),
            body: row.try_get("body")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn current_version(
        tx: &mut Transaction<'_, Postgres>,
        collection: &str,
        id: SagaId,
    ) -> Result<Option<Version>> {
        let version: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM saga_documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await?;

        Ok(version.map(Version::new))
    }

    async fn apply(tx: &mut Transaction<'_, Postgres>, op: &WriteOp) -> Result<()> {
        match op {
            WriteOp::Insert {
                collection,
                id,
                body,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO saga_documents (collection, id, version, body)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(collection)
                .bind(id.as_uuid())
                .bind(Version::first().as_i64())
                .bind(body)
                .execute(&mut **tx)
                .await
                .map_err(|e| {
                    if let sqlx::Error::Database(ref db_err) = e
                        && db_err.constraint() == Some(PRIMARY_KEY_CONSTRAINT)
                    {
                        return StoreError::DuplicateDocument {
                            collection: collection.clone(),
                            id: *id,
                        };
                    }
                    StoreError::Database(e)
                })?;
            }
            WriteOp::Update {
                collection,
                id,
                expected,
                body,
            } => {
                let result = sqlx::query(
                    r#"
                    UPDATE saga_documents
                    SET body = $4, version = version + 1, updated_at = now()
                    WHERE collection = $1 AND id = $2 AND version = $3
                    "#,
                )
                .bind(collection)
                .bind(id.as_uuid())
                .bind(expected.as_i64())
                .bind(body)
                .execute(&mut **tx)
                .await?;

                if result.rows_affected() != 1 {
                    let actual = Self::current_version(tx, collection, *id).await?;
                    return Err(StoreError::ConcurrencyConflict {
                        collection: collection.clone(),
                        id: *id,
                        expected: *expected,
                        actual,
                    });
                }
            }
            WriteOp::Delete {
                collection,
                id,
                expected,
            } => {
                let result = sqlx::query(
                    "DELETE FROM saga_documents WHERE collection = $1 AND id = $2 AND version = $3",
                )
                .bind(collection)
                .bind(id.as_uuid())
                .bind(expected.as_i64())
                .execute(&mut **tx)
                .await?;

                if result.rows_affected() != 1 {
                    let actual = Self::current_version(tx, collection, *id).await?;
                    return Err(StoreError::ConcurrencyConflict {
                        collection: collection.clone(),
                        id: *id,
                        expected: *expected,
                        actual,
                    });
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn load(&self, collection: &str, id: SagaId) -> Result<Option<Document>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT collection, id, version, body, created_at, updated_at
            FROM saga_documents
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(collection)
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_document).transpose()
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt> {
        validate_batch(&batch)?;

        let mut tx = self.pool.begin().await?;
        for op in batch.ops() {
            // An early return drops `tx`, which rolls the transaction back
            Self::apply(&mut tx, op).await?;
        }
        tx.commit().await?;

        metrics::counter!("document_store_commits_total", "backend" => "postgres").increment(1);
        Ok(CommitReceipt::for_batch(&batch))
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM saga_documents WHERE collection = $1")
                .bind(collection)
                .fetch_one(&self.pool)
                .await?;

        Ok(count as usize)
    }
}
