//! S3-compatible object store delivery.
//!
//! This crate provides:
//! - An S3-compatible client (any endpoint, path-style addressing)
//! - The `ObjectStore` seam delivery is written against
//! - Idempotent delete + overwrite upload with conflict classification

pub mod client;
pub mod delivery;
pub mod error;
pub mod store;

pub use client::{S3Client, S3Config};
pub use delivery::{deliver, unique_destination_key, VIDEO_CONTENT_TYPE};
pub use error::{StorageError, StorageResult};
pub use store::ObjectStore;
