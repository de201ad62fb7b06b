//! Remote vector index adapters.

pub mod qdrant;
