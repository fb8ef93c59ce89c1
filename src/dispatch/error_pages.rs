//! Error responses.
//!
//! A site can supply `public/<status>.html` for any status; otherwise a
//! small built-in page with a generic message is sent. Diagnostics go to
//! the log and only reach the client in debug mode.

use std::path::PathBuf;

use axum::http::{header, StatusCode};
use tracing::{debug, error, warn, Level};

use crate::config::Config;
use crate::dispatch::{CacheStatus, Reply};
use crate::error::{public_message_for, TigerError};

const HTML: &str = "text/html; charset=utf-8";

#[derive(Debug, Clone)]
pub struct ErrorPages {
    public_dir: PathBuf,
    custom_pages: bool,
    debug: bool,
}

impl ErrorPages {
    pub fn new(public_dir: impl Into<PathBuf>, custom_pages: bool, debug: bool) -> Self {
        Self {
            public_dir: public_dir.into(),
            custom_pages,
            debug,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.public_dir(), config.custom_error_pages, config.debug)
    }

    /// Turns an error into the reply sent to the client.
    pub async fn render(&self, err: &TigerError) -> Reply {
        let status = err.status_code();
        let level = log_level(status);
        if level == Level::ERROR {
            error!("{} -> {}", err, status);
        } else if level == Level::WARN {
            warn!("{} -> {}", err, status);
        } else {
            debug!("{} -> {}", err, status);
        }

        let mut page = match self.custom_page(status).await {
            Some(page) => page,
            None => builtin_page(status),
        };
        if self.debug {
            page.push_str(&format!("\n<pre>{}</pre>", escape_html(&err.to_string())));
        }

        let mut reply = Reply::new(status)
            .with_body(HTML, page)
            .with_cache_status(CacheStatus::Bypass);
        if let TigerError::MethodNotAllowed(allow) = err {
            reply = reply.with_header(header::ALLOW.as_str(), allow.clone());
        }
        reply
    }

    async fn custom_page(&self, status: StatusCode) -> Option<String> {
        if !self.custom_pages {
            return None;
        }
        let path = self.public_dir.join(format!("{:03}.html", status.as_u16()));
        let bytes = tokio::fs::read(&path).await.ok()?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Method problems are the client's doing but worth noticing; other 5xx are ours.
fn log_level(status: StatusCode) -> Level {
    match status.as_u16() {
        405 | 501 => Level::WARN,
        500..=599 => Level::ERROR,
        _ => Level::DEBUG,
    }
}

fn builtin_page(status: StatusCode) -> String {
    format!(
        "<html><body><h1>Error {:03}</h1><p>{}</p></body></html>",
        status.as_u16(),
        public_message_for(status)
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(reply: &Reply) -> String {
        String::from_utf8(reply.body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_builtin_page_hides_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let pages = ErrorPages::new(dir.path(), true, false);

        let reply = pages
            .render(&TigerError::ExecutionFault("secret stack".into()))
            .await;

        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body(&reply).contains("Error 500"));
        assert!(!body(&reply).contains("secret stack"));
        assert_eq!(reply.cache, CacheStatus::Bypass);
    }

    #[tokio::test]
    async fn test_debug_appends_escaped_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let pages = ErrorPages::new(dir.path(), true, true);

        let reply = pages
            .render(&TigerError::ExecutionFault("<bad>".into()))
            .await;

        assert!(body(&reply).contains("Execution fault: &lt;bad&gt;"));
    }

    #[tokio::test]
    async fn test_custom_page() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("404.html"), "<h1>lost?</h1>").unwrap();

        let reply = ErrorPages::new(dir.path(), true, false)
            .render(&TigerError::NotFound("/x".into()))
            .await;
        assert_eq!(body(&reply), "<h1>lost?</h1>");

        let reply = ErrorPages::new(dir.path(), false, false)
            .render(&TigerError::NotFound("/x".into()))
            .await;
        assert!(body(&reply).contains("Error 404"));
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(log_level(StatusCode::NOT_IMPLEMENTED), Level::WARN);
        assert_eq!(log_level(StatusCode::METHOD_NOT_ALLOWED), Level::WARN);
        assert_eq!(log_level(StatusCode::INTERNAL_SERVER_ERROR), Level::ERROR);
        assert_eq!(log_level(StatusCode::SERVICE_UNAVAILABLE), Level::ERROR);
        assert_eq!(log_level(StatusCode::NOT_FOUND), Level::DEBUG);
    }

    #[tokio::test]
    async fn test_method_not_allowed_sets_allow() {
        let dir = tempfile::tempdir().unwrap();
        let reply = ErrorPages::new(dir.path(), true, false)
            .render(&TigerError::MethodNotAllowed("OPTIONS, GET, HEAD".into()))
            .await;

        assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(reply.header("allow"), Some("OPTIONS, GET, HEAD"));
    }
}
