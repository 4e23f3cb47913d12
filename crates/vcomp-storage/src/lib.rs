//! Artifact storage for pipeline outputs.
//!
//! This crate provides:
//! - Job-id-addressed object keys for stage-1 and final renders
//! - The [`ArtifactStore`] trait
//! - A Cloudflare R2 (S3 API) backend and an in-memory backend

pub mod error;
pub mod keys;
pub mod memory;
pub mod r2;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use keys::{final_key, stage1_key, VIDEO_CONTENT_TYPE};
pub use memory::MemoryArtifactStore;
pub use r2::{R2Client, R2Config};
pub use store::ArtifactStore;
