//! Per-request data handed to a running script.

use bytes::Bytes;
use percent_encoding::percent_decode_str;

use crate::routing::RouteKey;

/// What a script can see of the request it serves.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub method: String,
    /// Decoded request path as received
    pub raw_path: String,
    /// Raw query string without the `?`
    pub query: Option<String>,
    /// Header pairs with lower-cased names
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub key: RouteKey,
    pub artifact: String,
    params: Vec<(String, String)>,
}

impl ExecutionContext {
    pub fn new(
        method: impl Into<String>,
        raw_path: impl Into<String>,
        query: Option<String>,
        headers: Vec<(String, String)>,
        body: Bytes,
        key: RouteKey,
        artifact: impl Into<String>,
    ) -> Self {
        let params = query.as_deref().map(parse_query).unwrap_or_default();
        let headers = headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        Self {
            method: method.into(),
            raw_path: raw_path.into(),
            query,
            headers,
            body,
            key,
            artifact: artifact.into(),
            params,
        }
    }

    /// First value of query parameter `name`.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First value of header `name`, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Splits `a=1&b=two+words` into decoded pairs.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(k), decode_component(v))
        })
        .collect()
}

fn decode_component(s: &str) -> String {
    let spaced = s.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}
