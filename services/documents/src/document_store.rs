use crate::classifier::Classification;
use crate::config::DatabaseConfig;
use crate::error::DocumentError;
use crate::identifier::DocumentCode;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// A stored document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    /// Public identifier
    pub code: DocumentCode,
    pub title: String,
    pub description: Option<String>,
    /// Derived from the file name, never user-chosen
    pub classification: Classification,
    /// Blob key of the uploaded file
    pub file_reference: String,
    /// Name the file was uploaded with
    pub original_file_name: String,
    /// Blob key of the QR image, absent until first generated
    pub code_image_reference: Option<String>,
    /// Administrator who uploaded the document
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub access_count: i64,
}

/// Where a document stands in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    /// Persisted, but no QR image yet
    Created,
    /// QR image present
    Ready,
}

impl Document {
    pub fn state(&self) -> DocumentState {
        if self.code_image_reference.is_some() {
            DocumentState::Ready
        } else {
            DocumentState::Created
        }
    }
}

/// Values needed to insert a document row
#[derive(Debug, Clone)]
pub struct NewDocumentRecord {
    pub code: DocumentCode,
    pub title: String,
    pub description: Option<String>,
    pub classification: Classification,
    pub file_reference: String,
    pub original_file_name: String,
    pub owner: String,
}

/// Query parameters for document listing. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct DocumentQuery {
    /// Filter by classification
    pub classification: Option<Classification>,
    /// Case-insensitive match on title or description
    pub search: Option<String>,
    /// Only documents that have no QR image yet
    pub missing_code_image: bool,
    /// Maximum number of results
    pub limit: Option<i64>,
    /// Offset for pagination
    pub offset: Option<i64>,
}

/// Aggregate numbers for the admin dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize, FromRow)]
pub struct DocumentStats {
    pub total_documents: i64,
    pub total_accesses: i64,
    pub missing_code_images: i64,
}

/// Persistence of document records
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Insert a new record with `access_count = 0`
    async fn insert(&self, record: &NewDocumentRecord) -> Result<Document, DocumentError>;

    async fn find_by_code(&self, code: DocumentCode) -> Result<Option<Document>, DocumentError>;

    async fn code_exists(&self, code: DocumentCode) -> Result<bool, DocumentError>;

    async fn list(&self, query: &DocumentQuery) -> Result<Vec<Document>, DocumentError>;

    /// Set the QR image reference; no other column changes
    async fn set_code_image(
        &self,
        code: DocumentCode,
        reference: &str,
    ) -> Result<Document, DocumentError>;

    /// Atomically add one to the access counter and return the new value
    async fn increment_access(&self, code: DocumentCode) -> Result<i64, DocumentError>;

    /// Remove the record. Returns false when nothing matched.
    async fn delete(&self, code: DocumentCode) -> Result<bool, DocumentError>;

    async fn stats(&self) -> Result<DocumentStats, DocumentError>;

    /// Cheap connectivity check for readiness
    async fn ping(&self) -> Result<(), DocumentError>;
}

/// Row as stored in PostgreSQL
#[derive(Debug, FromRow)]
struct DocumentRow {
    code: Uuid,
    title: String,
    description: Option<String>,
    classification: String,
    file_reference: String,
    original_file_name: String,
    code_image_reference: Option<String>,
    owner: String,
    created_at: DateTime<Utc>,
    access_count: i64,
}

impl DocumentRow {
    fn into_document(self) -> Document {
        Document {
            code: self.code.into(),
            title: self.title,
            description: self.description,
            // Guarded by a CHECK constraint on the column
            classification: self.classification.parse().unwrap_or(Classification::Unknown),
            file_reference: self.file_reference,
            original_file_name: self.original_file_name,
            code_image_reference: self.code_image_reference,
            owner: self.owner,
            created_at: self.created_at,
            access_count: self.access_count,
        }
    }
}

const DOCUMENT_COLUMNS: &str = "code, title, description, classification, file_reference, \
     original_file_name, code_image_reference, owner, created_at, access_count";

/// PostgreSQL-backed document store
pub struct DocumentStore {
    pool: PgPool,
}

impl DocumentStore {
    /// Create a new document store with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool (for health checks)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DocumentRepository for DocumentStore {
    #[instrument(skip(self, record), fields(code = %record.code))]
    async fn insert(&self, record: &NewDocumentRecord) -> Result<Document, DocumentError> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            r#"
            INSERT INTO documents (
                code, title, description, classification,
                file_reference, original_file_name, owner,
                access_count, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, 0, NOW()
            )
            RETURNING {DOCUMENT_COLUMNS}
            "#
        ))
        .bind(record.code.as_uuid())
        .bind(&record.title)
        .bind(&record.description)
        .bind(record.classification.as_str())
        .bind(&record.file_reference)
        .bind(&record.original_file_name)
        .bind(&record.owner)
        .fetch_one(&self.pool)
        .await?;

        debug!(code = %record.code, "Document row inserted");

        Ok(row.into_document())
    }

    async fn find_by_code(&self, code: DocumentCode) -> Result<Option<Document>, DocumentError> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE code = $1"
        ))
        .bind(code.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(DocumentRow::into_document))
    }

    async fn code_exists(&self, code: DocumentCode) -> Result<bool, DocumentError> {
        let exists: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM documents WHERE code = $1)")
                .bind(code.as_uuid())
                .fetch_one(&self.pool)
                .await?;

        Ok(exists.0)
    }

    #[instrument(skip(self))]
    async fn list(&self, query: &DocumentQuery) -> Result<Vec<Document>, DocumentError> {
        let mut sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE 1=1");
        let mut param_count = 0;

        if query.classification.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND classification = ${}", param_count));
        }

        if query.search.is_some() {
            param_count += 1;
            sql.push_str(&format!(
                " AND (title ILIKE ${p} OR description ILIKE ${p})",
                p = param_count
            ));
        }

        if query.missing_code_image {
            sql.push_str(" AND code_image_reference IS NULL");
        }

        sql.push_str(" ORDER BY created_at DESC, id DESC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${}", param_count));
        }

        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${}", param_count));
        }

        let mut query_builder = sqlx::query_as::<_, DocumentRow>(&sql);

        if let Some(classification) = query.classification {
            query_builder = query_builder.bind(classification.as_str());
        }
        if let Some(ref search) = query.search {
            query_builder = query_builder.bind(format!("%{}%", escape_like(search)));
        }
        if let Some(limit) = query.limit {
            query_builder = query_builder.bind(limit);
        }
        if let Some(offset) = query.offset {
            query_builder = query_builder.bind(offset);
        }

        let rows = query_builder.fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(DocumentRow::into_document).collect())
    }

    #[instrument(skip(self))]
    async fn set_code_image(
        &self,
        code: DocumentCode,
        reference: &str,
    ) -> Result<Document, DocumentError> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            r#"
            UPDATE documents
            SET code_image_reference = $2
            WHERE code = $1
            RETURNING {DOCUMENT_COLUMNS}
            "#
        ))
        .bind(code.as_uuid())
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DocumentRow::into_document)
            .ok_or(DocumentError::NotFound(code))
    }

    async fn increment_access(&self, code: DocumentCode) -> Result<i64, DocumentError> {
        let count: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE documents
            SET access_count = access_count + 1
            WHERE code = $1
            RETURNING access_count
            "#,
        )
        .bind(code.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        count.map(|c| c.0).ok_or(DocumentError::NotFound(code))
    }

    #[instrument(skip(self))]
    async fn delete(&self, code: DocumentCode) -> Result<bool, DocumentError> {
        let result = sqlx::query("DELETE FROM documents WHERE code = $1")
            .bind(code.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn stats(&self) -> Result<DocumentStats, DocumentError> {
        let stats: DocumentStats = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) as total_documents,
                COALESCE(SUM(access_count), 0)::BIGINT as total_accesses,
                COUNT(*) FILTER (WHERE code_image_reference IS NULL) as missing_code_images
            FROM documents
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }

    async fn ping(&self) -> Result<(), DocumentError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Escape LIKE wildcards in user search input
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
