//! Embedding provider adapters.

#[cfg(feature = "openai")]
pub mod openai;
