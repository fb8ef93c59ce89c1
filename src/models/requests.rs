//! Request DTOs for the admin API
//!
//! Defines the structure of incoming admin request bodies.

use serde::Deserialize;

/// Request body for `POST {prefix}/invalidate`
///
/// # Fields
/// - `path`: Request path whose cache entry should go
/// - `all`: Purge the whole cache instead
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvalidateRequest {
    /// Path to invalidate
    #[serde(default)]
    pub path: Option<String>,
    /// Purge every entry
    #[serde(default)]
    pub all: bool,
}

impl InvalidateRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        match (&self.path, self.all) {
            (Some(_), true) => Some("Give either 'path' or 'all', not both".to_string()),
            (None, false) => Some("Give 'path' or 'all: true'".to_string()),
            (Some(path), false) if path.is_empty() => Some("Path cannot be empty".to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidate_request_deserialize() {
        let req: InvalidateRequest = serde_json::from_str(r#"{"path": "/a.html"}"#).unwrap();
        assert_eq!(req.path.as_deref(), Some("/a.html"));
        assert!(!req.all);
        assert!(req.validate().is_none());
    }

    #[test]
    fn test_invalidate_all() {
        let req: InvalidateRequest = serde_json::from_str(r#"{"all": true}"#).unwrap();
        assert!(req.all);
        assert!(req.validate().is_none());
    }

    #[test]
    fn test_validate_rejects_ambiguous_or_empty() {
        let both: InvalidateRequest =
            serde_json::from_str(r#"{"path": "/a", "all": true}"#).unwrap();
        assert!(both.validate().is_some());
        assert!(InvalidateRequest::default().validate().is_some());

        let empty = InvalidateRequest {
            path: Some(String::new()),
            all: false,
        };
        assert!(empty.validate().is_some());
    }
}
