use crate::blob_store::StorageError;
use crate::identifier::DocumentCode;
use crate::qr_encoder::EncodingError;
use thiserror::Error;

/// Errors surfaced by document operations
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Document not found: {0}")]
    NotFound(DocumentCode),

    #[error("Administrator credentials required")]
    Unauthorized,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("QR code could not be generated: {0}")]
    Encoding(#[from] EncodingError),

    #[error("QR code not available for document {0}")]
    CodeImageUnavailable(DocumentCode),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Could not issue a unique identifier after {0} attempts")]
    IdentifierExhausted(usize),
}

impl DocumentError {
    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            DocumentError::NotFound(_) => "NOT_FOUND",
            DocumentError::Unauthorized => "UNAUTHORIZED",
            DocumentError::InvalidInput(_) => "INVALID_INPUT",
            DocumentError::Encoding(_) => "ENCODING_ERROR",
            DocumentError::CodeImageUnavailable(_) => "QR_UNAVAILABLE",
            DocumentError::Storage(_) => "STORAGE_ERROR",
            DocumentError::Database(_) => "DATABASE_ERROR",
            DocumentError::IdentifierExhausted(_) => "IDENTIFIER_EXHAUSTED",
        }
    }
}
