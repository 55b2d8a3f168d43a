use crate::auth::{AdminAuthorizer, AdminIdentity, CallerContext};
use crate::blob_store::sanitize_file_name;
use crate::classifier::Classification;
use crate::config::ApiConfig;
use crate::document_store::{Document, DocumentQuery, DocumentState, DocumentStats};
use crate::error::DocumentError;
use crate::identifier::DocumentCode;
use crate::lifecycle::{DocumentLifecycle, NewDocument, RegenerationReport, StoredFile};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<DocumentLifecycle>,
    pub authorizer: Arc<dyn AdminAuthorizer>,
}

impl AppState {
    /// Refuse non-administrators before any lifecycle call is made
    fn require_admin(&self, headers: &HeaderMap) -> Result<AdminIdentity, ApiError> {
        let caller = CallerContext::from_headers(headers);
        self.authorizer
            .authenticate(&caller)
            .ok_or_else(|| DocumentError::Unauthorized.into())
    }
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// An error on its way to becoming an HTTP response
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>, code: &str) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.into(),
                code: code.to_string(),
            },
        }
    }

    fn unknown_code() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Document not found", "NOT_FOUND")
    }
}

fn status_for(error: &DocumentError) -> StatusCode {
    match error {
        DocumentError::NotFound(_) | DocumentError::CodeImageUnavailable(_) => {
            StatusCode::NOT_FOUND
        }
        DocumentError::Unauthorized => StatusCode::UNAUTHORIZED,
        DocumentError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        DocumentError::Encoding(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DocumentError::Storage(_)
        | DocumentError::Database(_)
        | DocumentError::IdentifierExhausted(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<DocumentError> for ApiError {
    fn from(e: DocumentError) -> Self {
        let status = status_for(&e);
        if status.is_server_error() {
            error!(error = %e, code = e.code(), "Request failed");
        }
        Self::new(status, e.to_string(), e.code())
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::new(e.status(), e.body_text(), "INVALID_UPLOAD")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Document as shown to administrators
#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub code: DocumentCode,
    pub title: String,
    pub description: Option<String>,
    pub classification: Classification,
    pub original_file_name: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub access_count: i64,
    pub state: DocumentState,
    /// Where the QR code should point under the current base address
    pub public_url: String,
}

impl DocumentResponse {
    fn new(document: Document, lifecycle: &DocumentLifecycle) -> Self {
        Self {
            public_url: lifecycle.current_public_url(&document.code),
            state: document.state(),
            code: document.code,
            title: document.title,
            description: document.description,
            classification: document.classification,
            original_file_name: document.original_file_name,
            owner: document.owner,
            created_at: document.created_at,
            access_count: document.access_count,
        }
    }
}

/// Document as shown on the public viewing page
#[derive(Debug, Serialize, Deserialize)]
pub struct PublicDocumentResponse {
    pub code: DocumentCode,
    pub title: String,
    pub description: Option<String>,
    pub classification: Classification,
    pub created_at: DateTime<Utc>,
    pub access_count: i64,
    pub download_path: String,
}

impl From<Document> for PublicDocumentResponse {
    fn from(d: Document) -> Self {
        Self {
            download_path: format!("/download/{}", d.code),
            code: d.code,
            title: d.title,
            description: d.description,
            classification: d.classification,
            created_at: d.created_at,
            access_count: d.access_count,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedDocumentResponse {
    pub document: DocumentResponse,
    /// Set when the document was stored but its QR code could not be produced
    pub code_error: Option<String>,
}

/// Query parameters for document list
#[derive(Debug, Deserialize)]
pub struct DocumentListQuery {
    pub classification: Option<Classification>,
    pub search: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentResponse>,
    pub has_more: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegenerateQuery {
    /// Only documents that have no QR code yet
    #[serde(default)]
    pub missing_only: bool,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    let public_route = format!("{}:code", state.lifecycle.public_urls().public_path());

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route(&public_route, get(public_view))
        .route("/download/:code", get(download_file))
        .route(
            "/api/v1/documents",
            get(list_documents).post(upload_document),
        )
        .route("/api/v1/documents/regenerate", post(regenerate_all))
        .route(
            "/api/v1/documents/:code",
            get(admin_view).delete(delete_document),
        )
        .route("/api/v1/documents/:code/qr", get(download_code_image))
        .route("/api/v1/documents/:code/regenerate", post(regenerate_one))
        .route("/api/v1/stats", get(stats))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn parse_code(raw: &str) -> Result<DocumentCode, ApiError> {
    raw.parse().map_err(|_| ApiError::unknown_code())
}

/// Stream bytes as a download with the given file name
fn attachment(file: StoredFile) -> Response {
    let disposition = format!(
        "attachment; filename=\"{}\"",
        sanitize_file_name(&file.file_name)
    );
    (
        [
            (header::CONTENT_TYPE, file.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(file.bytes),
    )
        .into_response()
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "qrdocs-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.lifecycle.check_ready().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Public viewing page: counts one access
#[instrument(skip(state))]
async fn public_view(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<PublicDocumentResponse>, ApiError> {
    let code = parse_code(&code)?;
    state.lifecycle.record_access(code).await?;
    let document = state.lifecycle.get(code).await?;

    Ok(Json(document.into()))
}

/// Public download: counts one access
#[instrument(skip(state))]
async fn download_file(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Response, ApiError> {
    let code = parse_code(&code)?;
    let file = state.lifecycle.file(code).await?;
    state.lifecycle.record_access(code).await?;

    Ok(attachment(file))
}

#[instrument(skip(state, headers))]
async fn list_documents(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<DocumentListQuery>,
) -> Result<Json<DocumentListResponse>, ApiError> {
    state.require_admin(&headers)?;

    let limit = params.limit.clamp(1, 500);
    let query = DocumentQuery {
        classification: params.classification,
        search: params.search.filter(|s| !s.trim().is_empty()),
        missing_code_image: false,
        limit: Some(limit + 1), // Fetch one extra to check has_more
        offset: Some(params.offset.max(0)),
    };

    let mut documents = state.lifecycle.list(&query).await?;

    let has_more = documents.len() > limit as usize;
    if has_more {
        documents.pop();
    }

    Ok(Json(DocumentListResponse {
        documents: documents
            .into_iter()
            .map(|d| DocumentResponse::new(d, &state.lifecycle))
            .collect(),
        has_more,
    }))
}

/// Multipart upload with `title`, optional `description` and `file` parts
#[instrument(skip(state, headers, multipart))]
async fn upload_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<CreatedDocumentResponse>), ApiError> {
    let admin = state.require_admin(&headers)?;

    let mut title = None;
    let mut description = None;
    let mut upload: Option<(String, Bytes)> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => title = Some(field.text().await?),
            "description" => description = Some(field.text().await?),
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                upload = Some((file_name, field.bytes().await?));
            }
            other => warn!(field = %other, "Ignoring unexpected multipart field"),
        }
    }

    let (file_name, bytes) = upload
        .ok_or_else(|| DocumentError::InvalidInput("file is required".to_string()))?;

    let new = NewDocument {
        title: title.unwrap_or_default(),
        description,
        file_name,
        bytes,
    };

    let created = state.lifecycle.create_document(new, &admin).await?;

    info!(
        code = %created.document.code,
        admin = %admin.name,
        "Document uploaded"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreatedDocumentResponse {
            document: DocumentResponse::new(created.document, &state.lifecycle),
            code_error: created.code_error.map(|e| e.to_string()),
        }),
    ))
}

/// Admin detail view: counts one access like the public page
#[instrument(skip(state, headers))]
async fn admin_view(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<DocumentResponse>, ApiError> {
    state.require_admin(&headers)?;
    let code = parse_code(&code)?;

    state.lifecycle.record_access(code).await?;
    let document = state.lifecycle.get(code).await?;

    Ok(Json(DocumentResponse::new(document, &state.lifecycle)))
}

#[instrument(skip(state, headers))]
async fn download_code_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Response, ApiError> {
    state.require_admin(&headers)?;
    let code = parse_code(&code)?;

    Ok(attachment(state.lifecycle.code_image(code).await?))
}

#[instrument(skip(state, headers))]
async fn regenerate_one(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let admin = state.require_admin(&headers)?;
    let code = parse_code(&code)?;

    let document = state.lifecycle.regenerate_code(code).await?;
    info!(code = %code, admin = %admin.name, "QR code regenerated");

    Ok(Json(DocumentResponse::new(document, &state.lifecycle)))
}

#[instrument(skip(state, headers))]
async fn regenerate_all(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<RegenerateQuery>,
) -> Result<Json<RegenerationReport>, ApiError> {
    let admin = state.require_admin(&headers)?;

    let report = if params.missing_only {
        state.lifecycle.regenerate_missing().await?
    } else {
        state.lifecycle.regenerate_all().await?
    };

    info!(
        admin = %admin.name,
        succeeded = report.succeeded,
        total = report.total,
        "Bulk QR regeneration requested"
    );

    Ok(Json(report))
}

#[instrument(skip(state, headers))]
async fn delete_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<StatusCode, ApiError> {
    let admin = state.require_admin(&headers)?;
    let code = parse_code(&code)?;

    state.lifecycle.delete_document(code).await?;
    info!(code = %code, admin = %admin.name, "Document deleted via API");

    Ok(StatusCode::NO_CONTENT)
}

async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DocumentStats>, ApiError> {
    state.require_admin(&headers)?;
    Ok(Json(state.lifecycle.stats().await?))
}

/// Start the document API server, serving until `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting document API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
