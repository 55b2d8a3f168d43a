//! Document lifecycle: creation, QR regeneration, access accounting, deletion.
//!
//! Creation runs as explicit steps rather than a save hook:
//!
//! ```text
//! classify ─▶ issue code ─▶ store file ─▶ insert row ─▶ build URL ─▶ encode ─▶ store image ─▶ set reference
//!                              │              │                         └──────────┬──────────┘
//!                           fails:         fails:                      fails: document kept in
//!                           nothing kept   file blob removed           Created state, error reported
//! ```

use crate::auth::AdminIdentity;
use crate::blob_store::{self, BlobStore};
use crate::classifier;
use crate::document_store::{
    Document, DocumentQuery, DocumentRepository, DocumentStats, NewDocumentRecord,
};
use crate::error::DocumentError;
use crate::identifier::{DocumentCode, IdentifierAuthority};
use crate::config::Config;
use crate::qr_encoder::{CodeEncoder, QrEncoder, CODE_IMAGE_CONTENT_TYPE};
use crate::site::{BaseAddressProvider, PublicUrls};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Longest accepted title, matching the column width
pub const MAX_TITLE_LEN: usize = 200;

/// An upload submitted by an administrator
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub title: String,
    pub description: Option<String>,
    pub file_name: String,
    pub bytes: Bytes,
}

impl NewDocument {
    fn validate(&self) -> Result<(), DocumentError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(DocumentError::InvalidInput("title is required".to_string()));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(DocumentError::InvalidInput(format!(
                "title is longer than {MAX_TITLE_LEN} characters"
            )));
        }
        if self.file_name.trim().is_empty() {
            return Err(DocumentError::InvalidInput("file name is required".to_string()));
        }
        if self.bytes.is_empty() {
            return Err(DocumentError::InvalidInput("uploaded file is empty".to_string()));
        }
        Ok(())
    }
}

/// Result of a creation: the document always exists, the QR image may not
#[derive(Debug)]
pub struct CreatedDocument {
    pub document: Document,
    /// Why the QR image could not be produced, if it could not
    pub code_error: Option<DocumentError>,
}

/// A stored file ready to be streamed
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub bytes: Bytes,
    pub content_type: String,
    pub file_name: String,
}

/// Outcome of a bulk regeneration run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegenerationReport {
    pub succeeded: usize,
    pub total: usize,
    pub base_address: String,
    pub failures: Vec<RegenerationFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegenerationFailure {
    pub code: DocumentCode,
    pub title: String,
    pub error: String,
}

impl RegenerationReport {
    pub fn is_complete(&self) -> bool {
        self.succeeded == self.total
    }
}

/// Tuning knobs for the lifecycle manager
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub public_urls: PublicUrls,
    pub regeneration_concurrency: usize,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            public_urls: PublicUrls::default(),
            regeneration_concurrency: 4,
        }
    }
}

/// Orchestrates document records, blobs and QR images
pub struct DocumentLifecycle {
    store: Arc<dyn DocumentRepository>,
    blobs: Arc<dyn BlobStore>,
    encoder: Arc<dyn CodeEncoder>,
    base_address: Arc<dyn BaseAddressProvider>,
    identifiers: IdentifierAuthority,
    options: LifecycleOptions,
}

impl DocumentLifecycle {
    pub fn new(
        store: Arc<dyn DocumentRepository>,
        blobs: Arc<dyn BlobStore>,
        encoder: Arc<dyn CodeEncoder>,
        base_address: Arc<dyn BaseAddressProvider>,
        options: LifecycleOptions,
    ) -> Self {
        Self {
            store,
            blobs,
            encoder,
            base_address,
            identifiers: IdentifierAuthority::default(),
            options,
        }
    }

    /// Assemble a lifecycle manager from configuration
    pub fn from_config(
        config: &Config,
        store: Arc<dyn DocumentRepository>,
        blobs: Arc<dyn BlobStore>,
        base_address: Arc<dyn BaseAddressProvider>,
    ) -> Self {
        Self::new(
            store,
            blobs,
            Arc::new(QrEncoder::from_config(&config.qr)),
            base_address,
            LifecycleOptions {
                public_urls: PublicUrls::from_config(&config.site),
                regeneration_concurrency: config.lifecycle.regeneration_concurrency,
            },
        )
    }

    /// Replace the identifier authority (used to inject a custom code source)
    pub fn with_identifiers(mut self, identifiers: IdentifierAuthority) -> Self {
        self.identifiers = identifiers;
        self
    }

    pub fn public_urls(&self) -> &PublicUrls {
        &self.options.public_urls
    }

    /// Public URL a document's QR image should encode right now
    pub fn current_public_url(&self, code: &DocumentCode) -> String {
        let base_address = self.base_address.current_base_address();
        self.options.public_urls.public_url(&base_address, code)
    }

    /// Create a document from an upload.
    ///
    /// A failure to store the file or insert the row fails the whole call and
    /// leaves nothing behind. A failure to produce the QR image does not: the
    /// document is returned in the `Created` state with `code_error` set.
    #[instrument(
        skip(self, new, owner),
        fields(title = %new.title, file_name = %new.file_name, owner = %owner.name)
    )]
    pub async fn create_document(
        &self,
        new: NewDocument,
        owner: &AdminIdentity,
    ) -> Result<CreatedDocument, DocumentError> {
        new.validate()?;

        let classification = classifier::classify(&new.file_name);
        let code = self.identifiers.issue_unique(self.store.as_ref()).await?;
        let file_reference = blob_store::file_key(&code, &new.file_name);

        self.blobs
            .store(
                &file_reference,
                new.bytes,
                &classifier::content_type(&new.file_name),
            )
            .await?;

        let record = NewDocumentRecord {
            code,
            title: new.title.trim().to_string(),
            description: new
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            classification,
            file_reference: file_reference.clone(),
            original_file_name: new.file_name,
            owner: owner.name.clone(),
        };

        let document = match self.store.insert(&record).await {
            Ok(document) => document,
            Err(e) => {
                if let Err(cleanup) = self.blobs.delete(&file_reference).await {
                    error!(
                        code = %code,
                        key = %file_reference,
                        error = %cleanup,
                        "Failed to remove file blob after insert failure"
                    );
                }
                return Err(e);
            }
        };

        metrics::counter!("documents.created").increment(1);
        info!(code = %code, classification = %classification, "Document created");

        let base_address = self.base_address.current_base_address();
        match self.generate_code_image(&document, &base_address).await {
            Ok(document) => Ok(CreatedDocument {
                document,
                code_error: None,
            }),
            Err(e) => {
                warn!(code = %code, error = %e, "Document created without QR code");
                Ok(CreatedDocument {
                    document,
                    code_error: Some(e),
                })
            }
        }
    }

    /// Re-encode a document's QR image against the current base address
    #[instrument(skip(self))]
    pub async fn regenerate_code(&self, code: DocumentCode) -> Result<Document, DocumentError> {
        let document = self.get(code).await?;
        let base_address = self.base_address.current_base_address();
        self.generate_code_image(&document, &base_address).await
    }

    /// Regenerate every document's QR image
    pub async fn regenerate_all(&self) -> Result<RegenerationReport, DocumentError> {
        self.regenerate_matching(DocumentQuery::default()).await
    }

    /// Regenerate only documents that have no QR image yet
    pub async fn regenerate_missing(&self) -> Result<RegenerationReport, DocumentError> {
        self.regenerate_matching(DocumentQuery {
            missing_code_image: true,
            ..Default::default()
        })
        .await
    }

    #[instrument(skip(self))]
    async fn regenerate_matching(
        &self,
        query: DocumentQuery,
    ) -> Result<RegenerationReport, DocumentError> {
        let documents = self.store.list(&query).await?;
        let base_address = self.base_address.current_base_address();
        let total = documents.len();

        info!(total, base_address = %base_address, "Regenerating QR codes");

        let base = base_address.as_str();
        let results: Vec<(Document, Result<Document, DocumentError>)> = stream::iter(documents)
            .map(|document| async move {
                let result = self.generate_code_image(&document, base).await;
                (document, result)
            })
            .buffer_unordered(self.options.regeneration_concurrency.max(1))
            .collect()
            .await;

        let mut report = RegenerationReport {
            total,
            base_address: base_address.clone(),
            ..Default::default()
        };

        for (document, result) in results {
            match result {
                Ok(_) => {
                    debug!(code = %document.code, title = %document.title, "QR code regenerated");
                    report.succeeded += 1;
                }
                Err(e) => {
                    error!(code = %document.code, title = %document.title, error = %e, "QR regeneration failed");
                    report.failures.push(RegenerationFailure {
                        code: document.code,
                        title: document.title,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            succeeded = report.succeeded,
            total = report.total,
            "QR regeneration finished"
        );

        Ok(report)
    }

    /// Encode → store image → set reference. Encoding runs before any write,
    /// so a failed encode leaves the previous image untouched.
    async fn generate_code_image(
        &self,
        document: &Document,
        base_address: &str,
    ) -> Result<Document, DocumentError> {
        let url = self
            .options
            .public_urls
            .public_url(base_address, &document.code);

        let png = match self.encoder.encode(&url) {
            Ok(png) => png,
            Err(e) => {
                metrics::counter!("documents.codes.failed").increment(1);
                return Err(e.into());
            }
        };

        let key = blob_store::code_image_key(&document.code);
        self.blobs
            .store(&key, Bytes::from(png), CODE_IMAGE_CONTENT_TYPE)
            .await?;

        let updated = match self.store.set_code_image(document.code, &key).await {
            Ok(updated) => updated,
            Err(e @ DocumentError::NotFound(_)) => {
                // Deleted while the image was being written
                if let Err(cleanup) = self.blobs.delete(&key).await {
                    error!(
                        code = %document.code,
                        key = %key,
                        error = %cleanup,
                        "Failed to remove QR image of deleted document"
                    );
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        metrics::counter!("documents.codes.generated").increment(1);
        debug!(code = %document.code, url = %url, "QR code stored");

        Ok(updated)
    }

    /// Count one view or download. Returns the new count.
    pub async fn record_access(&self, code: DocumentCode) -> Result<i64, DocumentError> {
        let count = self.store.increment_access(code).await?;
        metrics::counter!("documents.access.recorded").increment(1);
        Ok(count)
    }

    /// Delete a document together with its file and QR image.
    ///
    /// Blobs go first and their deletion is idempotent; the record is removed
    /// last, so a failed attempt can simply be repeated.
    #[instrument(skip(self))]
    pub async fn delete_document(&self, code: DocumentCode) -> Result<(), DocumentError> {
        let document = self.get(code).await?;

        self.blobs.delete(&document.file_reference).await?;

        // The deterministic key also covers an image whose reference was never recorded
        let image_key = blob_store::code_image_key(&code);
        self.blobs.delete(&image_key).await?;
        if let Some(ref reference) = document.code_image_reference {
            if *reference != image_key {
                self.blobs.delete(reference).await?;
            }
        }

        if !self.store.delete(code).await? {
            return Err(DocumentError::NotFound(code));
        }

        metrics::counter!("documents.deleted").increment(1);
        info!(code = %code, "Document deleted");

        Ok(())
    }

    pub async fn get(&self, code: DocumentCode) -> Result<Document, DocumentError> {
        self.store
            .find_by_code(code)
            .await?
            .ok_or(DocumentError::NotFound(code))
    }

    pub async fn list(&self, query: &DocumentQuery) -> Result<Vec<Document>, DocumentError> {
        self.store.list(query).await
    }

    pub async fn stats(&self) -> Result<DocumentStats, DocumentError> {
        self.store.stats().await
    }

    /// Whether the record store answers
    pub async fn check_ready(&self) -> Result<(), DocumentError> {
        self.store.ping().await
    }

    /// The uploaded file with its content type and original name
    pub async fn file(&self, code: DocumentCode) -> Result<StoredFile, DocumentError> {
        let document = self.get(code).await?;
        let bytes = self.blobs.retrieve(&document.file_reference).await?;

        Ok(StoredFile {
            bytes,
            content_type: classifier::content_type(&document.original_file_name),
            file_name: document.original_file_name,
        })
    }

    /// The QR image, named after the document title
    pub async fn code_image(&self, code: DocumentCode) -> Result<StoredFile, DocumentError> {
        let document = self.get(code).await?;
        let reference = document
            .code_image_reference
            .as_deref()
            .ok_or(DocumentError::CodeImageUnavailable(code))?;
        let bytes = self.blobs.retrieve(reference).await?;

        Ok(StoredFile {
            bytes,
            content_type: CODE_IMAGE_CONTENT_TYPE.to_string(),
            file_name: format!("QR_{}.png", blob_store::sanitize_file_name(&document.title)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::{MockBlobStore, StorageError};
    use crate::classifier::Classification;
    use crate::document_store::DocumentState;
    use crate::qr_encoder::EncodingError;
    use crate::site::ReloadableBaseAddress;
    use crate::testing::{MemoryBlobStore, MemoryDocumentStore};

    struct Harness {
        store: Arc<MemoryDocumentStore>,
        blobs: Arc<MemoryBlobStore>,
        base: Arc<ReloadableBaseAddress>,
        lifecycle: DocumentLifecycle,
    }

    fn harness_with_encoder(encoder: Arc<dyn CodeEncoder>) -> Harness {
        let store = Arc::new(MemoryDocumentStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let base = Arc::new(ReloadableBaseAddress::new("https://example.org"));
        let lifecycle = DocumentLifecycle::new(
            store.clone(),
            blobs.clone(),
            encoder,
            base.clone(),
            LifecycleOptions::default(),
        );
        Harness {
            store,
            blobs,
            base,
            lifecycle,
        }
    }

    fn harness() -> Harness {
        harness_with_encoder(Arc::new(QrEncoder::default()))
    }

    fn admin() -> AdminIdentity {
        AdminIdentity {
            name: "ana".to_string(),
        }
    }

    fn upload(title: &str, file_name: &str) -> NewDocument {
        NewDocument {
            title: title.to_string(),
            description: Some("  ".to_string()),
            file_name: file_name.to_string(),
            bytes: Bytes::from_static(b"%PDF-1.7 payload"),
        }
    }

    /// Fails to encode any URL that mentions one of the poisoned codes
    struct PoisonedEncoder {
        inner: QrEncoder,
        poisoned: parking_lot::Mutex<Vec<DocumentCode>>,
    }

    impl PoisonedEncoder {
        fn new() -> Self {
            Self {
                inner: QrEncoder::default(),
                poisoned: parking_lot::Mutex::new(Vec::new()),
            }
        }

        fn poison(&self, code: DocumentCode) {
            self.poisoned.lock().push(code);
        }
    }

    impl CodeEncoder for PoisonedEncoder {
        fn encode(&self, payload: &str) -> Result<Vec<u8>, EncodingError> {
            let poisoned = self
                .poisoned
                .lock()
                .iter()
                .any(|code| payload.contains(&code.to_string()));
            if poisoned {
                return Err(EncodingError::DataTooLong {
                    len: payload.len(),
                    level: 'L',
                });
            }
            self.inner.encode(payload)
        }
    }

    struct AlwaysFailingEncoder;

    impl CodeEncoder for AlwaysFailingEncoder {
        fn encode(&self, payload: &str) -> Result<Vec<u8>, EncodingError> {
            Err(EncodingError::DataTooLong {
                len: payload.len(),
                level: 'L',
            })
        }
    }

    fn expected_image(url: &str) -> Bytes {
        Bytes::from(QrEncoder::default().encode(url).unwrap())
    }

    /// Scan a stored PNG back into the text it carries
    fn decode_image(png: &[u8]) -> String {
        let image = image::load_from_memory(png).unwrap().to_luma8();
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            image.width() as usize,
            image.height() as usize,
            |x, y| image.get_pixel(x as u32, y as u32).0[0],
        );
        let grids = prepared.detect_grids();
        assert_eq!(grids.len(), 1);
        let (_, content) = grids[0].decode().unwrap();
        content
    }

    #[tokio::test]
    async fn test_create_yields_ready_document_with_matching_code() {
        let h = harness();

        let created = h
            .lifecycle
            .create_document(upload("Safety Manual", "manual.pdf"), &admin())
            .await
            .unwrap();
        assert!(created.code_error.is_none());

        let doc = created.document;
        assert_eq!(doc.state(), DocumentState::Ready);
        assert_eq!(doc.classification, Classification::Document);
        assert_eq!(doc.access_count, 0);
        assert_eq!(doc.owner, "ana");
        assert_eq!(doc.description, None);

        let image_key = doc.code_image_reference.clone().unwrap();
        let url = format!("https://example.org/view/{}", doc.code);
        assert_eq!(h.blobs.get(&image_key).unwrap(), expected_image(&url));
        assert_eq!(decode_image(&h.blobs.get(&image_key).unwrap()), url);
        assert_eq!(
            h.blobs.get(&doc.file_reference).unwrap(),
            Bytes::from_static(b"%PDF-1.7 payload")
        );
        assert_eq!(h.blobs.content_type(&image_key).as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_base_address_migration_scenario() {
        let h = harness();

        let doc = h
            .lifecycle
            .create_document(upload("Safety Manual", "manual.pdf"), &admin())
            .await
            .unwrap()
            .document;
        let image_key = doc.code_image_reference.clone().unwrap();
        let old_url = format!("https://example.org/view/{}", doc.code);

        h.base.set("https://new.example.org");

        // Stale until explicitly regenerated
        let fetched = h.lifecycle.get(doc.code).await.unwrap();
        assert_eq!(fetched, doc);
        assert_eq!(h.blobs.get(&image_key).unwrap(), expected_image(&old_url));

        let regenerated = h.lifecycle.regenerate_code(doc.code).await.unwrap();
        assert_eq!(regenerated.code, doc.code);
        assert_eq!(regenerated.file_reference, doc.file_reference);

        let new_url = format!("https://new.example.org/view/{}", doc.code);
        assert_eq!(h.blobs.get(&image_key).unwrap(), expected_image(&new_url));
        assert_eq!(decode_image(&h.blobs.get(&image_key).unwrap()), new_url);
    }

    #[tokio::test]
    async fn test_regenerate_is_idempotent() {
        let h = harness();
        let doc = h
            .lifecycle
            .create_document(upload("Plan", "plan.png"), &admin())
            .await
            .unwrap()
            .document;
        let key = doc.code_image_reference.clone().unwrap();

        h.lifecycle.regenerate_code(doc.code).await.unwrap();
        let first = h.blobs.get(&key).unwrap();
        h.lifecycle.regenerate_code(doc.code).await.unwrap();
        let second = h.blobs.get(&key).unwrap();

        assert_eq!(first, second);
        assert_eq!(h.lifecycle.get(doc.code).await.unwrap(), doc);
    }

    #[tokio::test]
    async fn test_encoding_failure_keeps_document_without_image() {
        let h = harness_with_encoder(Arc::new(AlwaysFailingEncoder));

        let created = h
            .lifecycle
            .create_document(upload("Video", "clip.mp4"), &admin())
            .await
            .unwrap();

        assert!(matches!(created.code_error, Some(DocumentError::Encoding(_))));
        let doc = created.document;
        assert_eq!(doc.state(), DocumentState::Created);
        assert_eq!(doc.classification, Classification::Video);
        assert!(h.blobs.get(&doc.file_reference).is_some());
        assert!(h.blobs.get(&blob_store::code_image_key(&doc.code)).is_none());

        // Viewing does not repair it
        h.lifecycle.record_access(doc.code).await.unwrap();
        assert_eq!(
            h.lifecycle.get(doc.code).await.unwrap().state(),
            DocumentState::Created
        );

        // Explicit repair with a working encoder
        let repaired = DocumentLifecycle::new(
            h.store.clone(),
            h.blobs.clone(),
            Arc::new(QrEncoder::default()),
            h.base.clone(),
            LifecycleOptions::default(),
        );
        let report = repaired.regenerate_missing().await.unwrap();
        assert_eq!((report.succeeded, report.total), (1, 1));
        assert_eq!(
            repaired.get(doc.code).await.unwrap().state(),
            DocumentState::Ready
        );
    }

    #[tokio::test]
    async fn test_bulk_regeneration_reports_and_isolates_failures() {
        let encoder = Arc::new(PoisonedEncoder::new());
        let h = harness_with_encoder(encoder.clone());

        let mut docs = Vec::new();
        for i in 1..=5 {
            let doc = h
                .lifecycle
                .create_document(upload(&format!("Doc {i}"), "a.pdf"), &admin())
                .await
                .unwrap()
                .document;
            docs.push(doc);
        }

        let third = &docs[2];
        let third_key = third.code_image_reference.clone().unwrap();
        let third_before = h.blobs.get(&third_key).unwrap();

        encoder.poison(third.code);
        h.base.set("https://new.example.org");

        let report = h.lifecycle.regenerate_all().await.unwrap();
        assert_eq!((report.succeeded, report.total), (4, 5));
        assert!(!report.is_complete());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].code, third.code);
        assert_eq!(report.failures[0].title, "Doc 3");
        assert_eq!(report.base_address, "https://new.example.org");

        // The failed document keeps its previous image
        assert_eq!(h.blobs.get(&third_key).unwrap(), third_before);

        for doc in docs.iter().filter(|d| d.code != third.code) {
            let url = format!("https://new.example.org/view/{}", doc.code);
            let key = doc.code_image_reference.clone().unwrap();
            assert_eq!(h.blobs.get(&key).unwrap(), expected_image(&url));
        }
    }

    #[tokio::test]
    async fn test_single_regeneration_failure_leaves_image() {
        let encoder = Arc::new(PoisonedEncoder::new());
        let h = harness_with_encoder(encoder.clone());
        let doc = h
            .lifecycle
            .create_document(upload("Doc", "a.pdf"), &admin())
            .await
            .unwrap()
            .document;
        let key = doc.code_image_reference.clone().unwrap();
        let before = h.blobs.get(&key).unwrap();

        encoder.poison(doc.code);
        let err = h.lifecycle.regenerate_code(doc.code).await.unwrap_err();

        assert!(matches!(err, DocumentError::Encoding(_)));
        assert_eq!(h.blobs.get(&key).unwrap(), before);
    }

    /// Holds QR image writes until released, so a delete can slip in between
    struct GatedBlobStore {
        inner: MemoryBlobStore,
        armed: std::sync::atomic::AtomicBool,
        reached: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    impl GatedBlobStore {
        fn new() -> Self {
            Self {
                inner: MemoryBlobStore::new(),
                armed: std::sync::atomic::AtomicBool::new(false),
                reached: tokio::sync::Notify::new(),
                release: tokio::sync::Notify::new(),
            }
        }

        fn arm(&self) {
            self.armed.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl BlobStore for GatedBlobStore {
        async fn store(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), StorageError> {
            if key.starts_with("qr_codes/")
                && self.armed.swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                self.reached.notify_one();
                self.release.notified().await;
            }
            self.inner.store(key, bytes, content_type).await
        }

        async fn retrieve(&self, key: &str) -> Result<Bytes, StorageError> {
            self.inner.retrieve(key).await
        }

        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.inner.delete(key).await
        }

        async fn exists(&self, key: &str) -> Result<bool, StorageError> {
            self.inner.exists(key).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_regeneration_racing_delete_leaves_no_image() {
        let blobs = Arc::new(GatedBlobStore::new());
        let lifecycle = Arc::new(DocumentLifecycle::new(
            Arc::new(MemoryDocumentStore::new()),
            blobs.clone(),
            Arc::new(QrEncoder::default()),
            Arc::new(ReloadableBaseAddress::new("https://example.org")),
            LifecycleOptions::default(),
        ));
        let doc = lifecycle
            .create_document(upload("Doc", "a.pdf"), &admin())
            .await
            .unwrap()
            .document;
        let image_key = blob_store::code_image_key(&doc.code);

        blobs.arm();
        let regeneration = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.regenerate_code(doc.code).await })
        };

        // Image write is parked; delete the document underneath it
        blobs.reached.notified().await;
        lifecycle.delete_document(doc.code).await.unwrap();
        blobs.release.notify_one();

        let result = regeneration.await.unwrap();
        assert!(matches!(result, Err(DocumentError::NotFound(_))));
        assert!(blobs.inner.get(&image_key).is_none());
        assert!(blobs.inner.is_empty());
    }

    #[tokio::test]
    async fn test_record_access_sequential() {
        let h = harness();
        let doc = h
            .lifecycle
            .create_document(upload("Doc", "a.pdf"), &admin())
            .await
            .unwrap()
            .document;

        for expected in 1..=7 {
            assert_eq!(h.lifecycle.record_access(doc.code).await.unwrap(), expected);
        }

        let after = h.lifecycle.get(doc.code).await.unwrap();
        assert_eq!(after.access_count, 7);
        assert_eq!(after.title, doc.title);
        assert_eq!(after.code_image_reference, doc.code_image_reference);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_record_access_concurrent_loses_nothing() {
        let h = harness();
        let doc = h
            .lifecycle
            .create_document(upload("Doc", "a.pdf"), &admin())
            .await
            .unwrap()
            .document;
        let lifecycle = Arc::new(h.lifecycle);

        let handles: Vec<_> = (0..200)
            .map(|_| {
                let lifecycle = lifecycle.clone();
                tokio::spawn(async move { lifecycle.record_access(doc.code).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(lifecycle.get(doc.code).await.unwrap().access_count, 200);
    }

    #[tokio::test]
    async fn test_record_access_unknown_code() {
        let h = harness();
        let code = IdentifierAuthority::default().issue();
        assert!(matches!(
            h.lifecycle.record_access(code).await,
            Err(DocumentError::NotFound(c)) if c == code
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_record_and_artifacts() {
        let h = harness();
        let doc = h
            .lifecycle
            .create_document(upload("Doc", "a.pdf"), &admin())
            .await
            .unwrap()
            .document;
        let image_key = doc.code_image_reference.clone().unwrap();

        h.lifecycle.delete_document(doc.code).await.unwrap();

        assert!(matches!(
            h.lifecycle.get(doc.code).await,
            Err(DocumentError::NotFound(_))
        ));
        assert!(h.blobs.get(&doc.file_reference).is_none());
        assert!(h.blobs.get(&image_key).is_none());
        assert!(h.blobs.is_empty());
        assert!(matches!(
            h.lifecycle.file(doc.code).await,
            Err(DocumentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_uploads_rejected_before_storage() {
        let h = harness();

        let mut blank = upload("   ", "a.pdf");
        assert!(matches!(
            h.lifecycle.create_document(blank.clone(), &admin()).await,
            Err(DocumentError::InvalidInput(_))
        ));

        blank.title = "x".repeat(MAX_TITLE_LEN + 1);
        assert!(h.lifecycle.create_document(blank, &admin()).await.is_err());

        let mut empty = upload("Doc", "a.pdf");
        empty.bytes = Bytes::new();
        assert!(h.lifecycle.create_document(empty, &admin()).await.is_err());

        assert!(h.blobs.is_empty());
        assert_eq!(h.store.len(), 0);
    }

    #[tokio::test]
    async fn test_file_storage_failure_fails_creation_without_record() {
        let mut blobs = MockBlobStore::new();
        blobs.expect_store().returning(|key, _, _| {
            Err(StorageError::Backend {
                key: key.to_string(),
                message: "bucket unavailable".to_string(),
            })
        });

        let store = Arc::new(MemoryDocumentStore::new());
        let lifecycle = DocumentLifecycle::new(
            store.clone(),
            Arc::new(blobs),
            Arc::new(QrEncoder::default()),
            Arc::new(ReloadableBaseAddress::new("https://example.org")),
            LifecycleOptions::default(),
        );

        let err = lifecycle
            .create_document(upload("Doc", "a.pdf"), &admin())
            .await
            .unwrap_err();

        assert!(matches!(err, DocumentError::Storage(_)));
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_image_storage_failure_degrades_creation() {
        let mut blobs = MockBlobStore::new();
        blobs
            .expect_store()
            .withf(|key, _, _| key.starts_with("documents/"))
            .times(1)
            .returning(|_, _, _| Ok(()));
        blobs
            .expect_store()
            .withf(|key, _, _| key.starts_with("qr_codes/"))
            .times(1)
            .returning(|key, _, _| {
                Err(StorageError::Backend {
                    key: key.to_string(),
                    message: "throttled".to_string(),
                })
            });

        let store = Arc::new(MemoryDocumentStore::new());
        let lifecycle = DocumentLifecycle::new(
            store.clone(),
            Arc::new(blobs),
            Arc::new(QrEncoder::default()),
            Arc::new(ReloadableBaseAddress::new("https://example.org")),
            LifecycleOptions::default(),
        );

        let created = lifecycle
            .create_document(upload("Doc", "a.pdf"), &admin())
            .await
            .unwrap();

        assert!(matches!(created.code_error, Some(DocumentError::Storage(_))));
        assert_eq!(created.document.state(), DocumentState::Created);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_blob_delete_keeps_record() {
        let h = harness();
        let doc = h
            .lifecycle
            .create_document(upload("Doc", "a.pdf"), &admin())
            .await
            .unwrap()
            .document;

        let mut blobs = MockBlobStore::new();
        blobs.expect_delete().returning(|key| {
            Err(StorageError::Backend {
                key: key.to_string(),
                message: "access denied".to_string(),
            })
        });
        let lifecycle = DocumentLifecycle::new(
            h.store.clone(),
            Arc::new(blobs),
            Arc::new(QrEncoder::default()),
            h.base.clone(),
            LifecycleOptions::default(),
        );

        assert!(lifecycle.delete_document(doc.code).await.is_err());
        assert!(lifecycle.get(doc.code).await.is_ok());
    }

    #[tokio::test]
    async fn test_file_and_code_image_downloads() {
        let h = harness();
        let doc = h
            .lifecycle
            .create_document(upload("Safety Manual", "manual.pdf"), &admin())
            .await
            .unwrap()
            .document;

        let file = h.lifecycle.file(doc.code).await.unwrap();
        assert_eq!(file.content_type, "application/pdf");
        assert_eq!(file.file_name, "manual.pdf");

        let image = h.lifecycle.code_image(doc.code).await.unwrap();
        assert_eq!(image.content_type, "image/png");
        assert_eq!(image.file_name, "QR_Safety_Manual.png");
    }

    #[tokio::test]
    async fn test_list_newest_first_with_filters() {
        let h = harness();
        for (title, file) in [("Manual", "m.pdf"), ("Photo", "p.jpg"), ("Clip", "c.mov")] {
            h.lifecycle
                .create_document(upload(title, file), &admin())
                .await
                .unwrap();
        }

        let all = h.lifecycle.list(&DocumentQuery::default()).await.unwrap();
        let titles: Vec<_> = all.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, ["Clip", "Photo", "Manual"]);

        let images = h
            .lifecycle
            .list(&DocumentQuery {
                classification: Some(Classification::Image),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].title, "Photo");

        let searched = h
            .lifecycle
            .list(&DocumentQuery {
                search: Some("manu".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(searched.len(), 1);

        let stats = h.lifecycle.stats().await.unwrap();
        assert_eq!(stats.total_documents, 3);
        assert_eq!(stats.missing_code_images, 0);
    }
}
