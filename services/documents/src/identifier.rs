use crate::document_store::DocumentRepository;
use crate::error::DocumentError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

/// How many candidates `issue_unique` draws before giving up
pub const MAX_ISSUE_ATTEMPTS: usize = 8;

/// Public identifier of a document.
///
/// Opaque: it carries no information about the document and is never
/// derived from user input. It is the only key exposed outside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentCode(Uuid);

impl DocumentCode {
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for DocumentCode {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for DocumentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for DocumentCode {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Source of candidate identifiers
pub trait CodeSource: Send + Sync {
    fn next_code(&self) -> DocumentCode;
}

/// Draws from the uniform random 128-bit space (UUID v4)
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodeSource;

impl CodeSource for RandomCodeSource {
    fn next_code(&self) -> DocumentCode {
        DocumentCode(Uuid::new_v4())
    }
}

/// Issues identifiers for new documents
pub struct IdentifierAuthority {
    source: Box<dyn CodeSource>,
}

impl IdentifierAuthority {
    pub fn new(source: Box<dyn CodeSource>) -> Self {
        Self { source }
    }

    /// Issue a fresh identifier without consulting the store
    pub fn issue(&self) -> DocumentCode {
        self.source.next_code()
    }

    /// Issue an identifier that no stored document uses yet
    pub async fn issue_unique(
        &self,
        store: &dyn DocumentRepository,
    ) -> Result<DocumentCode, DocumentError> {
        for attempt in 1..=MAX_ISSUE_ATTEMPTS {
            let code = self.issue();
            if !store.code_exists(code).await? {
                return Ok(code);
            }
            warn!(code = %code, attempt, "Identifier collision, drawing again");
            metrics::counter!("documents.identifier.collisions").increment(1);
        }

        Err(DocumentError::IdentifierExhausted(MAX_ISSUE_ATTEMPTS))
    }
}

impl Default for IdentifierAuthority {
    fn default() -> Self {
        Self::new(Box::new(RandomCodeSource))
    }
}
