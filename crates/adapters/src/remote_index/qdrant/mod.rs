//! Qdrant vector store adapter (REST transport).

mod error;
#[cfg(feature = "qdrant-rest")]
mod rest;

pub use error::{QDRANT_PROVIDER_ID, QdrantErrorContext};

#[cfg(feature = "qdrant-rest")]
pub use rest::{QdrantRestConfig, QdrantRestIndex};
