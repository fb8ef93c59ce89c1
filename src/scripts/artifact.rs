//! Compiled Artifact Format
//!
//! A compiled script is a small binary header followed by a JSON manifest:
//!
//! ```text
//! offset 0   4 bytes   magic  b"TGRB"
//! offset 4   u16 LE    format version
//! offset 6   u32 LE    manifest length N
//! offset 10  N bytes   manifest (UTF-8 JSON)
//! ```
//!
//! Source files, truncated files and unknown versions are rejected before
//! anything in them is interpreted.

use std::path::PathBuf;

use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::Fingerprint;
use crate::error::{Result, TigerError};
use crate::routing::TriggerSpec;

// == Format Constants ==
/// Marker every compiled artifact starts with.
pub const MAGIC: &[u8; 4] = b"TGRB";

/// Current artifact format version.
pub const FORMAT_VERSION: u16 = 1;

/// File extension of compiled artifacts in the scripts directory.
pub const ARTIFACT_EXTENSION: &str = "bns";

const HEADER_LEN: usize = 10;

// == Program Operations ==
/// One interpreted operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// Emit literal text
    Text { value: String },
    /// Emit the request method
    Method,
    /// Emit the normalized request path
    Path,
    /// Emit a query parameter, nothing if absent
    Query { name: String },
    /// Emit a request header, nothing if absent
    Header { name: String },
    /// Emit the request body
    Body,
    Status { code: u16 },
    SetHeader { name: String, value: String },
    ContentType { value: String },
    Cacheable { value: bool },
    Sleep { millis: u64 },
    Repeat { times: u32, ops: Vec<Op> },
    /// Abort the run with a fault
    Fault { message: String },
}

// == Manifest ==
/// Trigger rule declared by an artifact; the artifact id is implied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclaredTrigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

/// Decoded artifact manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub triggers: Vec<DeclaredTrigger>,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    /// Initial cacheability of the output; the program may change it
    #[serde(default)]
    pub cacheable: bool,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub program: Vec<Op>,
}

fn default_methods() -> Vec<String> {
    vec!["GET".to_string(), "HEAD".to_string()]
}

fn default_content_type() -> String {
    "text/html; charset=utf-8".to_string()
}

impl Manifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            triggers: Vec::new(),
            methods: default_methods(),
            cacheable: false,
            content_type: default_content_type(),
            program: Vec::new(),
        }
    }

    pub fn with_trigger(mut self, pattern: Option<&str>, file_type: Option<&str>) -> Self {
        self.triggers.push(DeclaredTrigger {
            pattern: pattern.map(str::to_string),
            file_type: file_type.map(str::to_string),
        });
        self
    }

    pub fn with_methods(mut self, methods: &[&str]) -> Self {
        self.methods = methods.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_program(mut self, program: Vec<Op>) -> Self {
        self.program = program;
        self
    }

    /// Trigger specs for registration under `artifact`.
    pub fn trigger_specs(&self, artifact: &str) -> Vec<TriggerSpec> {
        self.triggers
            .iter()
            .map(|t| TriggerSpec::new(t.pattern.as_deref(), t.file_type.as_deref(), artifact))
            .collect()
    }

    /// Rejects manifests the executor could not honor.
    pub fn validate(&self) -> Result<()> {
        if self.methods.is_empty() {
            return Err(invalid("declares no methods"));
        }
        for method in &self.methods {
            Method::from_bytes(method.as_bytes())
                .map_err(|_| invalid(format!("unknown method '{}'", method)))?;
        }
        HeaderValue::from_str(&self.content_type)
            .map_err(|_| invalid(format!("bad content type '{}'", self.content_type)))?;
        validate_ops(&self.program)
    }
}

fn validate_ops(ops: &[Op]) -> Result<()> {
    for op in ops {
        match op {
            Op::Status { code } => {
                StatusCode::from_u16(*code)
                    .map_err(|_| invalid(format!("bad status code {}", code)))?;
            }
            Op::SetHeader { name, value } => {
                HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| invalid(format!("bad header name '{}'", name)))?;
                HeaderValue::from_str(value)
                    .map_err(|_| invalid(format!("bad value for header '{}'", name)))?;
            }
            Op::ContentType { value } => {
                HeaderValue::from_str(value)
                    .map_err(|_| invalid(format!("bad content type '{}'", value)))?;
            }
            Op::Repeat { ops, .. } => validate_ops(ops)?,
            _ => {}
        }
    }
    Ok(())
}

fn invalid(reason: impl Into<String>) -> TigerError {
    TigerError::InvalidArtifact(reason.into())
}

// == Codec ==
/// True when `bytes` begin with the compiled-artifact marker.
pub fn has_marker(bytes: &[u8]) -> bool {
    bytes.starts_with(MAGIC)
}

/// Decodes and validates an artifact.
pub fn decode(bytes: &[u8]) -> Result<Manifest> {
    if !has_marker(bytes) {
        return Err(invalid("missing compiled-artifact marker"));
    }
    if bytes.len() < HEADER_LEN {
        return Err(invalid("truncated header"));
    }

    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(invalid(format!("unsupported format version {}", version)));
    }

    let len = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
    let body = bytes
        .get(HEADER_LEN..)
        .filter(|b| b.len() == len)
        .ok_or_else(|| invalid(format!("manifest length {} does not match file", len)))?;

    let manifest: Manifest = serde_json::from_slice(body)
        .map_err(|e| invalid(format!("undecodable manifest: {}", e)))?;
    manifest.validate()?;
    Ok(manifest)
}

/// Encodes a manifest into artifact bytes.
pub fn encode(manifest: &Manifest) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(manifest)
        .map_err(|e| TigerError::Internal(format!("encoding manifest: {}", e)))?;
    let len = u32::try_from(body.len())
        .map_err(|_| TigerError::Internal("manifest too large".to_string()))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&len.to_le_bytes());
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

// == Compiled Script ==
/// A loaded artifact. Immutable; a reload builds a new one.
#[derive(Debug, Clone)]
pub struct CompiledScript {
    pub id: String,
    pub path: PathBuf,
    /// Fingerprint of `path` when it was read
    pub fingerprint: Fingerprint,
    pub manifest: Manifest,
    pub loaded_at: DateTime<Utc>,
}

impl CompiledScript {
    pub fn new(id: impl Into<String>, path: PathBuf, fingerprint: Fingerprint, manifest: Manifest) -> Self {
        Self {
            id: id.into(),
            path,
            fingerprint,
            manifest,
            loaded_at: Utc::now(),
        }
    }

    /// Whether the artifact declares `method`. HEAD is implied by GET.
    pub fn allows(&self, method: &str) -> bool {
        let declared = |m: &str| self.manifest.methods.iter().any(|d| d.eq_ignore_ascii_case(m));
        declared(method) || (method.eq_ignore_ascii_case("HEAD") && declared("GET"))
    }

    /// `Allow` header value for this script route.
    pub fn allow_header(&self) -> String {
        let mut methods = vec!["OPTIONS".to_string()];
        for method in &self.manifest.methods {
            let method = method.to_ascii_uppercase();
            if !methods.contains(&method) {
                methods.push(method);
            }
        }
        methods.join(", ")
    }
}
