//! Result alias and error-context helpers.

use crate::errors::ErrorEnvelope;

/// Shared result type used across the workspace.
pub type Result<T, E = ErrorEnvelope> = std::result::Result<T, E>;

/// Extension helpers for enriching envelope errors on the way up.
pub trait ResultExt<T> {
    /// Attach a metadata entry to the error, if any.
    fn with_field(self, key: &str, value: impl Into<String>) -> Result<T>;

    /// Attach metadata computed lazily, only on the error path.
    fn with_field_lazy<F>(self, key: &str, value: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_field(self, key: &str, value: impl Into<String>) -> Self {
        self.map_err(|error| error.with_metadata(key, value))
    }

    fn with_field_lazy<F>(self, key: &str, value: F) -> Self
    where
        F: FnOnce() -> String,
    {
        self.map_err(|error| error.with_metadata(key, value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    #[test]
    fn with_field_only_touches_errors() {
        let ok: Result<u8> = Ok(1);
        assert!(matches!(ok.with_field("path", "a.md"), Ok(1)));

        let err: Result<u8> = Err(ErrorEnvelope::expected(ErrorCode::not_found(), "missing"));
        let err = err.with_field("path", "a.md");
        assert!(
            matches!(err, Err(ref e) if e.metadata.get("path").map(String::as_str) == Some("a.md"))
        );
    }

    #[test]
    fn lazy_field_is_not_evaluated_on_success() {
        let evaluated = std::cell::Cell::new(false);
        let ok: Result<u8> = Ok(2);
        let out = ok.with_field_lazy("x", || {
            evaluated.set(true);
            String::new()
        });
        assert!(matches!(out, Ok(2)));
        assert!(!evaluated.get());
    }
}
