//! Domain primitives with validated constructors.

use kb_sync_shared::{ErrorCode, ErrorEnvelope};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Longest collection name accepted by the vector store.
const MAX_COLLECTION_NAME_LEN: usize = 255;

/// Validation failures for domain primitives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveError {
    /// `DocumentId` is empty after trimming.
    InvalidDocumentId {
        /// Length of the raw input before trimming.
        input_length: usize,
    },
    /// `CollectionName` is empty after trimming.
    EmptyCollectionName {
        /// Length of the raw input before trimming.
        input_length: usize,
    },
    /// `CollectionName` contains forbidden characters or is too long.
    InvalidCollectionName {
        /// Trimmed collection name that failed validation.
        input: String,
    },
    /// `SourcePath` is empty.
    EmptySourcePath,
}

impl PrimitiveError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidDocumentId { .. } => ErrorCode::new("domain", "invalid_document_id"),
            Self::EmptyCollectionName { .. } | Self::InvalidCollectionName { .. } => {
                ErrorCode::new("domain", "invalid_collection_name")
            },
            Self::EmptySourcePath => ErrorCode::new("domain", "invalid_source_path"),
        }
    }
}

impl fmt::Display for PrimitiveError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDocumentId { .. } => formatter.write_str("DocumentId must be non-empty"),
            Self::EmptyCollectionName { .. } => {
                formatter.write_str("CollectionName must be non-empty")
            },
            Self::InvalidCollectionName { .. } => formatter.write_str(
                "CollectionName must be at most 255 characters of [A-Za-z0-9_.-]",
            ),
            Self::EmptySourcePath => formatter.write_str("SourcePath must be non-empty"),
        }
    }
}

impl std::error::Error for PrimitiveError {}

impl From<PrimitiveError> for ErrorEnvelope {
    fn from(error: PrimitiveError) -> Self {
        let envelope = Self::expected(error.error_code(), error.to_string());
        match error {
            PrimitiveError::InvalidDocumentId { input_length }
            | PrimitiveError::EmptyCollectionName { input_length } => {
                envelope.with_metadata("input_length", input_length.to_string())
            },
            PrimitiveError::InvalidCollectionName { input } => {
                envelope.with_metadata("input", input)
            },
            PrimitiveError::EmptySourcePath => envelope,
        }
    }
}

/// Stable identifier of a remote record.
///
/// Freshly minted ids are UUID v4 strings. Ids read back from the store are
/// accepted as-is, since the store may also hold integer ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Box<str>);

impl DocumentId {
    /// Mint a new random (v4) identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string().into_boxed_str())
    }

    /// Parse a `DocumentId` from a stored or user-supplied value.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, PrimitiveError> {
        let raw = input.as_ref();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PrimitiveError::InvalidDocumentId {
                input_length: raw.len(),
            });
        }
        Ok(Self(trimmed.into()))
    }

    /// Access the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Name of the vector collection that holds the knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionName(Box<str>);

impl CollectionName {
    /// Parse a collection name.
    ///
    /// The name is used as a URL path segment, so only `[A-Za-z0-9_.-]` is
    /// accepted.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, PrimitiveError> {
        let raw = input.as_ref();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PrimitiveError::EmptyCollectionName {
                input_length: raw.len(),
            });
        }

        let allowed = trimmed
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'));
        if !allowed || trimmed.len() > MAX_COLLECTION_NAME_LEN || trimmed.starts_with('.') {
            return Err(PrimitiveError::InvalidCollectionName {
                input: trimmed.to_owned(),
            });
        }

        Ok(Self(trimmed.into()))
    }

    /// Access the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CollectionName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Canonical path string of a source file; the natural key of a remote record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourcePath(Box<str>);

impl SourcePath {
    /// Parse a source path string.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, PrimitiveError> {
        let raw = input.as_ref();
        if raw.is_empty() {
            return Err(PrimitiveError::EmptySourcePath);
        }
        Ok(Self(raw.into()))
    }

    /// Build a source path from a filesystem path (lossy for non-UTF-8 names).
    pub fn from_path(path: &Path) -> Result<Self, PrimitiveError> {
        Self::parse(path.to_string_lossy())
    }

    /// Access the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SourcePath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for SourcePath {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}
