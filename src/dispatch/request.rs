//! Request and reply types of the dispatcher.
//!
//! The dispatcher works on these instead of axum types; conversion happens
//! once at the HTTP edge.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use percent_encoding::percent_decode_str;

use crate::cache::CacheEntry;
use crate::error::{Result, TigerError};

/// `Server` header value.
pub const SERVER_HEADER: &str = concat!("Tiger/", env!("CARGO_PKG_VERSION"));

/// Header telling clients how the cache took part in a reply.
pub const CACHE_STATUS_HEADER: &str = "x-tiger-cache";

/// Methods the server understands at all.
pub const SUPPORTED_METHODS: [Method; 7] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

// == Incoming Request ==
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub method: Method,
    /// Percent-decoded path, not yet normalized
    pub path: String,
    /// Raw query string without the `?`
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl IncomingRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Builds a request from HTTP parts, decoding the path once.
    ///
    /// # Errors
    /// `BadRequest` when the decoded path is not UTF-8 or contains NUL.
    pub fn from_parts(method: Method, uri: &Uri, headers: &HeaderMap, body: Bytes) -> Result<Self> {
        let path = percent_decode_str(uri.path())
            .decode_utf8()
            .map_err(|_| TigerError::BadRequest("path is not valid UTF-8".to_string()))?;
        if path.contains('\0') {
            return Err(TigerError::BadRequest("path contains NUL".to_string()));
        }

        let headers = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Ok(Self {
            method,
            path: path.into_owned(),
            query: uri.query().map(str::to_string),
            headers,
            body,
        })
    }

    pub fn is_supported(&self) -> bool {
        SUPPORTED_METHODS.contains(&self.method)
    }
}

// == Cache Status ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

// == Reply ==
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub cache: CacheStatus,
    /// Keep `Content-Length` of the full body but send none (HEAD)
    pub omit_body: bool,
}

impl Reply {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            content_type: None,
            headers: Vec::new(),
            body: Bytes::new(),
            cache: CacheStatus::Bypass,
            omit_body: false,
        }
    }

    pub fn with_body(mut self, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.content_type = Some(content_type.into());
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_cache_status(mut self, cache: CacheStatus) -> Self {
        self.cache = cache;
        self
    }

    /// Replays a cache entry.
    pub fn from_entry(entry: CacheEntry, cache: CacheStatus) -> Self {
        let status = StatusCode::from_u16(entry.meta.status).unwrap_or(StatusCode::OK);
        let mut reply = Reply::new(status)
            .with_body(entry.meta.content_type.clone(), entry.payload.clone())
            .with_cache_status(cache);
        reply.headers = entry.meta.headers.clone();
        if cache == CacheStatus::Hit {
            reply = reply.with_header("age", (entry.age_ms() / 1000).to_string());
        }
        reply
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let length = self.body.len();
        let body = if self.omit_body {
            Body::empty()
        } else {
            Body::from(self.body)
        };

        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        let headers = response.headers_mut();

        for (name, value) in &self.headers {
            let (Ok(name), Ok(value)) = (
                header::HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                continue;
            };
            headers.insert(name, value);
        }
        if let Some(value) = self
            .content_type
            .as_deref()
            .and_then(|ct| HeaderValue::from_str(ct).ok())
        {
            headers.insert(header::CONTENT_TYPE, value);
        }
        headers.insert(header::SERVER, HeaderValue::from_static(SERVER_HEADER));
        headers.insert(
            CACHE_STATUS_HEADER,
            HeaderValue::from_static(self.cache.as_str()),
        );
        if self.omit_body {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        }
        response
    }
}
