//! Object store adapter (cAdapter)
//!
//! Submodules:
//! - `client`: backend trait, `ObjectClient` and the buffered `ObjectWriter`
//! - `memory`: in-memory store for tests
//! - `localfs`: local directory that behaves like a flat object store
//! - `s3`: S3-compatible adapter built on `aws-sdk-s3`
//!
//! Backends only move whole objects and byte ranges around; all file
//! semantics live in `vfs`.
pub mod client;
pub mod localfs;
pub mod memory;
pub mod s3;

pub use client::{
    ListEntry, ObjectAttrs, ObjectBackend, ObjectClient, ObjectReader, ObjectWriter, StoreError,
    StoreResult,
};
