//! Storage backends for staysearch: snapshots of the in-memory store and a
//! Qdrant-compatible remote vector store.

pub mod qdrant;
pub mod snapshot;

pub use qdrant::{QdrantConfig, QdrantStore};
pub use snapshot::{SnapshotData, SnapshotDescription, SnapshotManager, SpaceSignature};
