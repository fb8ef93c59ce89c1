//! Route Key Module
//!
//! Normalized request path plus the file-type classifier derived from it.

use std::collections::HashMap;
use std::fmt;

// == Normalize ==
/// Normalizes a request path.
///
/// Query and fragment are dropped, repeated slashes collapse, `.` segments
/// vanish and `..` pops a segment without ever climbing above the root. A
/// trailing slash survives because it marks a directory request.
/// Normalizing an already normalized path returns it unchanged.
pub fn normalize(raw: &str) -> String {
    let path = raw.split(['?', '#']).next().unwrap_or("");

    let mut segments: Vec<&str> = Vec::new();
    let mut trailing = false;
    for segment in path.split('/') {
        match segment {
            "" | "." => trailing = true,
            ".." => {
                segments.pop();
                trailing = true;
            }
            s => {
                segments.push(s);
                trailing = false;
            }
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in &segments {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if trailing {
        normalized.push('/');
    }
    normalized
}

// == Classify ==
/// Derives the file type of a normalized path from its final segment.
///
/// Extensions are lower-cased and then passed through `aliases`. Directory
/// paths and names without an extension have no type.
pub fn classify(path: &str, aliases: &HashMap<String, String>) -> Option<String> {
    if path.ends_with('/') {
        return None;
    }
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    let ext = ext.to_ascii_lowercase();
    Some(aliases.get(&ext).cloned().unwrap_or(ext))
}

// == Route Key ==
/// Identity of a request target, shared by the cache store and the trigger table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    path: String,
    file_type: Option<String>,
}

impl RouteKey {
    /// Builds a key from a raw (already percent-decoded) request path.
    pub fn new(raw: &str, aliases: &HashMap<String, String>) -> Self {
        let path = normalize(raw);
        let file_type = classify(&path, aliases);
        Self { path, file_type }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn file_type(&self) -> Option<&str> {
        self.file_type.as_deref()
    }

    /// True for `/` and any path ending in `/`.
    pub fn is_directory(&self) -> bool {
        self.path.ends_with('/')
    }

    /// Path below the site root, without the leading slash.
    pub fn relative_path(&self) -> &str {
        self.path.trim_start_matches('/')
    }

    /// Final path segment.
    pub fn file_name(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("")
    }

    /// Key of `name` inside this directory key.
    pub fn join(&self, name: &str, aliases: &HashMap<String, String>) -> Self {
        let base = if self.is_directory() {
            self.path.clone()
        } else {
            format!("{}/", self.path)
        };
        Self::new(&format!("{}{}", base, name), aliases)
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}
