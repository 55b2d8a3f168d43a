//! In-memory stand-ins for the database and blob storage

use crate::blob_store::{BlobStore, StorageError};
use crate::classifier::Classification;
use crate::document_store::{
    Document, DocumentQuery, DocumentRepository, DocumentStats, NewDocumentRecord,
};
use crate::error::DocumentError;
use crate::identifier::DocumentCode;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;

pub(crate) fn new_record(code: DocumentCode) -> NewDocumentRecord {
    NewDocumentRecord {
        code,
        title: "Fixture".to_string(),
        description: None,
        classification: Classification::Document,
        file_reference: format!("documents/{code}/fixture.pdf"),
        original_file_name: "fixture.pdf".to_string(),
        owner: "fixture".to_string(),
    }
}

/// Rows keep insertion order so listing can return newest first
#[derive(Default)]
pub(crate) struct MemoryDocumentStore {
    rows: Mutex<Vec<Document>>,
}

impl MemoryDocumentStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn insert_record(&self, record: NewDocumentRecord) -> Document {
        self.insert(&record).await.unwrap()
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.lock().len()
    }

    fn update<T>(
        &self,
        code: DocumentCode,
        f: impl FnOnce(&mut Document) -> T,
    ) -> Result<T, DocumentError> {
        let mut rows = self.rows.lock();
        let row = rows
            .iter_mut()
            .find(|d| d.code == code)
            .ok_or(DocumentError::NotFound(code))?;
        Ok(f(row))
    }
}

fn matches(document: &Document, query: &DocumentQuery) -> bool {
    if let Some(classification) = query.classification {
        if document.classification != classification {
            return false;
        }
    }
    if query.missing_code_image && document.code_image_reference.is_some() {
        return false;
    }
    if let Some(ref search) = query.search {
        let needle = search.to_lowercase();
        let in_title = document.title.to_lowercase().contains(&needle);
        let in_description = document
            .description
            .as_deref()
            .map(|d| d.to_lowercase().contains(&needle))
            .unwrap_or(false);
        if !in_title && !in_description {
            return false;
        }
    }
    true
}

#[async_trait]
impl DocumentRepository for MemoryDocumentStore {
    async fn insert(&self, record: &NewDocumentRecord) -> Result<Document, DocumentError> {
        let mut rows = self.rows.lock();
        if rows.iter().any(|d| d.code == record.code) {
            return Err(DocumentError::InvalidInput(format!(
                "duplicate code {}",
                record.code
            )));
        }

        let document = Document {
            code: record.code,
            title: record.title.clone(),
            description: record.description.clone(),
            classification: record.classification,
            file_reference: record.file_reference.clone(),
            original_file_name: record.original_file_name.clone(),
            code_image_reference: None,
            owner: record.owner.clone(),
            created_at: Utc::now(),
            access_count: 0,
        };
        rows.push(document.clone());
        Ok(document)
    }

    async fn find_by_code(&self, code: DocumentCode) -> Result<Option<Document>, DocumentError> {
        Ok(self.rows.lock().iter().find(|d| d.code == code).cloned())
    }

    async fn code_exists(&self, code: DocumentCode) -> Result<bool, DocumentError> {
        Ok(self.rows.lock().iter().any(|d| d.code == code))
    }

    async fn list(&self, query: &DocumentQuery) -> Result<Vec<Document>, DocumentError> {
        let rows = self.rows.lock();
        let offset = query.offset.unwrap_or(0).max(0) as usize;
        let limit = query.limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);

        Ok(rows
            .iter()
            .rev()
            .filter(|d| matches(d, query))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn set_code_image(
        &self,
        code: DocumentCode,
        reference: &str,
    ) -> Result<Document, DocumentError> {
        self.update(code, |d| {
            d.code_image_reference = Some(reference.to_string());
            d.clone()
        })
    }

    async fn increment_access(&self, code: DocumentCode) -> Result<i64, DocumentError> {
        self.update(code, |d| {
            d.access_count += 1;
            d.access_count
        })
    }

    async fn delete(&self, code: DocumentCode) -> Result<bool, DocumentError> {
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|d| d.code != code);
        Ok(rows.len() != before)
    }

    async fn stats(&self) -> Result<DocumentStats, DocumentError> {
        let rows = self.rows.lock();
        Ok(DocumentStats {
            total_documents: rows.len() as i64,
            total_accesses: rows.iter().map(|d| d.access_count).sum(),
            missing_code_images: rows
                .iter()
                .filter(|d| d.code_image_reference.is_none())
                .count() as i64,
        })
    }

    async fn ping(&self) -> Result<(), DocumentError> {
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, (Bytes, String)>>,
}

impl MemoryBlobStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, key: &str) -> Option<Bytes> {
        self.blobs.lock().get(key).map(|(bytes, _)| bytes.clone())
    }

    pub(crate) fn content_type(&self, key: &str) -> Option<String> {
        self.blobs.lock().get(key).map(|(_, ct)| ct.clone())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn store(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), StorageError> {
        self.blobs
            .lock()
            .insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Bytes, StorageError> {
        self.get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.blobs.lock().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.blobs.lock().contains_key(key))
    }
}
