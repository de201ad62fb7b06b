//! The unit of synchronization.

use crate::{ContentHash, DocumentId, SourcePath, fingerprint};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Fixed-width embedding vector. Empty means "not computed" or "failed".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Embedding(Arc<[f32]>);

impl Embedding {
    /// The empty embedding.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of dimensions.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    /// True when no vector is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the vector components.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values.into())
    }
}

/// UTC instant rendered as RFC 3339 with millisecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Wrap an explicit instant.
    #[must_use]
    pub const fn from_datetime(value: DateTime<Utc>) -> Self {
        Self(value)
    }

    /// Render as `2024-01-02T03:04:05.678Z`.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.to_rfc3339())
    }
}

/// Display title for a source file: its file name, or the full path when it
/// has none.
#[must_use]
pub fn title_from_path(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.to_string_lossy().into_owned(),
        |name| name.to_string_lossy().into_owned(),
    )
}

/// A document built for one pass and never persisted locally.
///
/// `content` is always the full original text, even when the text sent for
/// embedding was truncated.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Stable record id, reused across updates of the same `source_path`.
    pub id: DocumentId,
    /// Display name derived from the file name.
    pub title: String,
    /// Full text payload.
    pub content: Arc<str>,
    /// Natural key used to find a prior remote record.
    pub source_path: SourcePath,
    /// Fingerprint of `content`.
    pub content_hash: ContentHash,
    /// Vector for `content`; empty until embedded.
    pub embedding: Embedding,
    /// When this record was produced locally.
    pub last_modified: Timestamp,
}

impl Document {
    /// Build a document whose hash is computed from `content`.
    #[must_use]
    pub fn new(
        id: DocumentId,
        source_path: SourcePath,
        title: impl Into<String>,
        content: impl Into<Arc<str>>,
    ) -> Self {
        let content = content.into();
        let content_hash = fingerprint(content.as_bytes());
        Self::with_hash(id, source_path, title, content, content_hash)
    }

    /// Build a document with a precomputed hash.
    #[must_use]
    pub fn with_hash(
        id: DocumentId,
        source_path: SourcePath,
        title: impl Into<String>,
        content: impl Into<Arc<str>>,
        content_hash: ContentHash,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            content: content.into(),
            source_path,
            content_hash,
            embedding: Embedding::empty(),
            last_modified: Timestamp::now(),
        }
    }

    /// True once a non-empty vector has been attached.
    #[must_use]
    pub fn is_embedded(&self) -> bool {
        !self.embedding.is_empty()
    }

    /// True when the content has nothing to embed.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn path(raw: &str) -> SourcePath {
        SourcePath::parse(raw).unwrap_or_else(|_| unreachable!("non-empty literal"))
    }

    #[test]
    fn new_document_hashes_content_and_starts_unembedded() {
        let doc = Document::new(DocumentId::generate(), path("/kb/a.md"), "a.md", "hello");
        assert_eq!(doc.content_hash, fingerprint(b"hello"));
        assert!(!doc.is_embedded());
        assert!(!doc.is_blank());
    }

    #[test]
    fn blank_detection_ignores_whitespace() {
        let doc = Document::new(DocumentId::generate(), path("/kb/b.md"), "b.md", " \n\t ");
        assert!(doc.is_blank());
    }

    #[test]
    fn timestamp_renders_with_millis_and_z() {
        let instant = Utc
            .with_ymd_and_hms(2024, 1, 2, 3, 4, 5)
            .single()
            .map(Timestamp::from_datetime);
        assert_eq!(
            instant.map(|ts| ts.to_rfc3339()).as_deref(),
            Some("2024-01-02T03:04:05.000Z")
        );
    }

    #[test]
    fn title_is_file_name() {
        assert_eq!(title_from_path(Path::new("/kb/notes/a.md")), "a.md");
        assert_eq!(title_from_path(Path::new("/")), "/");
    }

    #[test]
    fn embedding_reports_dimension() {
        let embedding = Embedding::from(vec![0.1, 0.2, 0.3]);
        assert_eq!(embedding.dimension(), 3);
        assert!(Embedding::empty().is_empty());
    }
}
