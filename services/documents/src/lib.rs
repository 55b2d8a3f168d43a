//! QR Docs Service
//!
//! Document upload service for small teams. Administrators upload PDFs, images
//! and videos; every document gets a permanent, unguessable public identifier
//! and a scannable QR code pointing at its public viewing page. Views and
//! downloads are counted.
//!
//! ## Features
//!
//! - **Permanent identifiers**: random UUID v4 codes, never reused or derived
//!   from user input
//! - **Deterministic QR codes**: the same URL always renders to the same PNG,
//!   so regeneration is idempotent
//! - **Base address migration**: codes are bound to the base address in force
//!   when they were generated and are regenerated explicitly, in bulk or one
//!   at a time
//! - **Pluggable storage**: local filesystem or S3-compatible object storage
//! - **Lossless access counting**: atomic increments in PostgreSQL
//!
//! ## Architecture
//!
//! ```text
//!  HTTP (axum)                                      PostgreSQL
//! ┌──────────────┐      ┌──────────────┐           ┌──────────────┐
//! │ Access       │─────▶│ Lifecycle    │──────────▶│ Document     │
//! │ Gateway      │      │ Manager      │           │ Store        │
//! └──────────────┘      └──────────────┘           └──────────────┘
//!        │                │    │    │
//!        ▼                │    │    └──────────────┐
//! ┌──────────────┐        ▼    ▼                   ▼
//! │ Admin        │  ┌──────────┐ ┌──────────┐ ┌──────────────┐
//! │ Authorizer   │  │Classifier│ │QR Encoder│ │ Blob Store   │
//! └──────────────┘  └──────────┘ └──────────┘ │ (local / S3) │
//!                                             └──────────────┘
//! ```

pub mod api;
pub mod auth;
pub mod blob_store;
pub mod classifier;
pub mod config;
pub mod document_store;
pub mod error;
pub mod identifier;
pub mod lifecycle;
pub mod qr_encoder;
pub mod s3_store;
pub mod site;

#[cfg(test)]
mod testing;

pub use api::{create_router, start_api_server, AppState};
pub use auth::{AdminAuthorizer, AdminIdentity, CallerContext, TokenAuthorizer};
pub use blob_store::{BlobStore, LocalBlobStore, StorageError};
pub use classifier::{classify, Classification};
pub use config::Config;
pub use document_store::{Document, DocumentQuery, DocumentRepository, DocumentState, DocumentStore};
pub use error::DocumentError;
pub use identifier::{DocumentCode, IdentifierAuthority};
pub use lifecycle::{CreatedDocument, DocumentLifecycle, NewDocument, RegenerationReport};
pub use qr_encoder::{CodeEncoder, EncodingError, QrEncoder};
pub use s3_store::S3BlobStore;
pub use site::{BaseAddressProvider, PublicUrls, ReloadableBaseAddress, StaticBaseAddress};
