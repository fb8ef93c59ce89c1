//! Router/Dispatcher
//!
//! Per-request state machine:
//!
//! ```text
//! Received -> CacheLookup -> hit ----------------------------------> Respond
//!                         -> miss -> Classify -> StaticAsset -> Read -> MaybeCache -> Respond
//!                                             -> CompiledScript -> Load -> Execute -> MaybeCache -> Respond
//!                                             -> Unmatched -> NotFound
//! ```
//!
//! Every failure is turned into an error reply here; nothing escapes to
//! the HTTP layer.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{header, Method, StatusCode};
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheStore};
use crate::config::{ClassifyOrder, Config};
use crate::dispatch::{
    CacheStatus, ErrorPages, IncomingRequest, Reply, StaticFile, StaticFiles,
};
use crate::error::{Result, TigerError};
use crate::routing::RouteKey;
use crate::scripts::{ExecutionContext, ScanReport, ScriptExecutor, ScriptLoader};

/// `Allow` value for static files and unmatched paths.
pub const STATIC_ALLOW: &str = "OPTIONS, GET, HEAD";

// == Target ==
/// What a request resolves to, decided once per request.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    StaticAsset(StaticFile),
    /// Artifact id selected by the trigger table
    CompiledScript(String),
    Unmatched,
}

// == Dispatcher ==
#[derive(Debug)]
pub struct Dispatcher {
    cache: Arc<CacheStore>,
    loader: Arc<ScriptLoader>,
    executor: Arc<ScriptExecutor>,
    statics: StaticFiles,
    errors: ErrorPages,
    classify_order: ClassifyOrder,
    aliases: HashMap<String, String>,
    index_files: Vec<String>,
    index_redirect: bool,
}

impl Dispatcher {
    pub fn new(
        config: &Config,
        cache: Arc<CacheStore>,
        loader: Arc<ScriptLoader>,
        executor: Arc<ScriptExecutor>,
    ) -> Self {
        Self {
            cache,
            loader,
            executor,
            statics: StaticFiles::from_config(config),
            errors: ErrorPages::from_config(config),
            classify_order: config.classify_order,
            aliases: config.type_aliases.clone(),
            index_files: config.index_files.clone(),
            index_redirect: config.index_redirect,
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn loader(&self) -> &Arc<ScriptLoader> {
        &self.loader
    }

    pub fn executor(&self) -> &Arc<ScriptExecutor> {
        &self.executor
    }

    // == Reload ==
    /// Rescans compiled scripts. When the trigger table changed, every
    /// cached response is dropped: a path cached as a static file may now
    /// belong to a script, or the reverse, while its origin is untouched.
    pub async fn reload_scripts(&self) -> Result<ScanReport> {
        let report = self.loader.rescan().await?;
        if report.routes_changed {
            let purged = self.cache.purge().await;
            info!("Trigger table changed, dropped {} cached responses", purged);
        }
        Ok(report)
    }

    /// Route key for a decoded path, as used by the cache and trigger table.
    pub fn route_key(&self, path: &str) -> RouteKey {
        RouteKey::new(path, &self.aliases)
    }

    // == Dispatch ==
    /// Handles one request. Always produces a reply.
    pub async fn dispatch(&self, request: IncomingRequest) -> Reply {
        let head = request.method == Method::HEAD;
        let mut reply = match self.handle(&request).await {
            Ok(reply) => reply,
            Err(e) => self.errors.render(&e).await,
        };
        reply.omit_body = head;
        reply
    }

    /// Turns a decode failure at the HTTP edge into an error reply.
    pub async fn reject(&self, err: TigerError) -> Reply {
        self.errors.render(&err).await
    }

    async fn handle(&self, request: &IncomingRequest) -> Result<Reply> {
        if !request.is_supported() {
            return Err(TigerError::NotImplemented(request.method.to_string()));
        }

        let key = self.resolve_index(self.route_key(&request.path)).await;
        let method = &request.method;

        if *method == Method::GET || *method == Method::HEAD {
            if let Some(entry) = self.cache.get(&key).await {
                debug!("{} {}: cache hit", method, key);
                return Ok(Reply::from_entry(entry, CacheStatus::Hit));
            }
        }

        match self.classify(&key).await {
            Target::StaticAsset(file) => self.serve_static(request, &key, file).await,
            Target::CompiledScript(id) => self.serve_script(request, key, id).await,
            Target::Unmatched if *method == Method::OPTIONS => Ok(options_reply(STATIC_ALLOW)),
            Target::Unmatched => {
                debug!("{} {}: not found", method, key);
                Err(TigerError::NotFound(key.to_string()))
            }
        }
    }

    // == Index Redirect ==
    /// Replaces a directory key with its first index file that is either a
    /// static file or routed to a script.
    async fn resolve_index(&self, key: RouteKey) -> RouteKey {
        if !key.is_directory() || !self.index_redirect {
            return key;
        }
        for name in &self.index_files {
            let candidate = key.join(name, &self.aliases);
            if self.statics.exists(&candidate).await || self.loader.resolve(&candidate).is_ok() {
                return candidate;
            }
        }
        key
    }

    // == Classify ==
    pub async fn classify(&self, key: &RouteKey) -> Target {
        let script = || self.loader.resolve(key).ok().map(Target::CompiledScript);
        match self.classify_order {
            ClassifyOrder::ScriptFirst => match script() {
                Some(target) => target,
                None => self.static_target(key).await,
            },
            ClassifyOrder::StaticFirst => match self.static_target(key).await {
                Target::Unmatched => script().unwrap_or(Target::Unmatched),
                target => target,
            },
        }
    }

    async fn static_target(&self, key: &RouteKey) -> Target {
        match self.statics.locate(key).await {
            Some(file) => Target::StaticAsset(file),
            None => Target::Unmatched,
        }
    }

    // == Static ==
    async fn serve_static(
        &self,
        request: &IncomingRequest,
        key: &RouteKey,
        file: StaticFile,
    ) -> Result<Reply> {
        match request.method {
            Method::OPTIONS => return Ok(options_reply(STATIC_ALLOW)),
            Method::GET | Method::HEAD => {}
            _ => return Err(TigerError::MethodNotAllowed(STATIC_ALLOW.to_string())),
        }

        let payload = self.statics.read(&file).await?;
        let entry = file.entry(payload);
        let cache = if request.method == Method::GET {
            self.store(key.clone(), entry.clone()).await
        } else {
            CacheStatus::Bypass
        };
        debug!("{} {}: static {}", request.method, key, file.path.display());
        Ok(Reply::from_entry(entry, cache))
    }

    // == Script ==
    async fn serve_script(
        &self,
        request: &IncomingRequest,
        key: RouteKey,
        artifact: String,
    ) -> Result<Reply> {
        let script = self.loader.load(&artifact).await?;
        if request.method == Method::OPTIONS {
            return Ok(options_reply(&script.allow_header()));
        }
        if !script.allows(request.method.as_str()) {
            return Err(TigerError::MethodNotAllowed(script.allow_header()));
        }

        let context = ExecutionContext::new(
            request.method.as_str(),
            request.path.clone(),
            request.query.clone(),
            request.headers.clone(),
            request.body.clone(),
            key.clone(),
            artifact.clone(),
        );
        let output = self.executor.execute(Arc::clone(&script), context).await?;

        let status = StatusCode::from_u16(output.status).unwrap_or(StatusCode::OK);
        let entry = CacheEntry::new(
            output.body,
            output.content_type,
            script.path.clone(),
            script.fingerprint,
        )
        .with_status(status.as_u16())
        .with_headers(output.headers)
        .with_cacheable(output.cacheable);

        let cache = if request.method == Method::GET && output.cacheable {
            self.store(key.clone(), entry.clone()).await
        } else {
            CacheStatus::Bypass
        };
        debug!("{} {}: script {}", request.method, key, artifact);
        Ok(Reply::from_entry(entry, cache))
    }

    /// Offers an entry to the cache. Failures only cost the cache write.
    async fn store(&self, key: RouteKey, entry: CacheEntry) -> CacheStatus {
        match self.cache.put(key.clone(), entry).await {
            Ok(true) => CacheStatus::Miss,
            Ok(false) => CacheStatus::Bypass,
            Err(e) => {
                warn!("Serving {} uncached: {}", key, e);
                CacheStatus::Bypass
            }
        }
    }
}

fn options_reply(allow: &str) -> Reply {
    Reply::new(StatusCode::OK).with_header(header::ALLOW.as_str(), allow)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::{encode, Manifest, Op};
    use bytes::Bytes;
    use std::path::Path;
    use std::time::Duration;

    struct Site {
        root: tempfile::TempDir,
    }

    impl Site {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            for dir in ["public", "scripts", "cache"] {
                std::fs::create_dir(root.path().join(dir)).unwrap();
            }
            Self { root }
        }

        fn path(&self) -> &Path {
            self.root.path()
        }

        fn public(&self, name: &str, body: &str) {
            let path = self.path().join("public").join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, body).unwrap();
        }

        fn script(&self, id: &str, manifest: Manifest) {
            let path = self.path().join("scripts").join(format!("{}.bns", id));
            std::fs::write(path, encode(&manifest).unwrap()).unwrap();
        }

        fn config(&self) -> Config {
            Config {
                root: self.path().to_path_buf(),
                exec_timeout: Duration::from_millis(200),
                ..Config::default()
            }
        }

        async fn dispatcher(&self, config: Config) -> Dispatcher {
            let cache = Arc::new(CacheStore::from_config(&config));
            let loader = Arc::new(ScriptLoader::from_config(&config));
            loader.rescan().await.unwrap();
            let executor = Arc::new(ScriptExecutor::from_config(&config));
            Dispatcher::new(&config, cache, loader, executor)
        }
    }

    fn get(path: &str) -> IncomingRequest {
        IncomingRequest::new(Method::GET, path)
    }

    #[tokio::test]
    async fn test_static_then_cache_hit() {
        let site = Site::new();
        site.public("index.html", "<h1>home</h1>");
        let dispatcher = site.dispatcher(site.config()).await;

        let first = dispatcher.dispatch(get("/index.html")).await;
        assert_eq!(first.status, StatusCode::OK);
        assert_eq!(first.cache, CacheStatus::Miss);
        assert_eq!(first.content_type.as_deref(), Some("text/html"));
        assert!(first.header("etag").is_some());

        let second = dispatcher.dispatch(get("/index.html")).await;
        assert_eq!(second.cache, CacheStatus::Hit);
        assert_eq!(second.body, Bytes::from("<h1>home</h1>"));
    }

    #[tokio::test]
    async fn test_directory_serves_index() {
        let site = Site::new();
        site.public("docs/index.html", "docs home");
        let dispatcher = site.dispatcher(site.config()).await;

        let reply = dispatcher.dispatch(get("/docs/")).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body, Bytes::from("docs home"));

        let config = Config {
            index_redirect: false,
            ..site.config()
        };
        let dispatcher = site.dispatcher(config).await;
        assert_eq!(dispatcher.dispatch(get("/docs/")).await.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_script_first_and_static_first() {
        let site = Site::new();
        site.public("page.tiger", "static copy");
        site.script(
            "render",
            Manifest::new("render")
                .with_trigger(None, Some("tiger"))
                .with_program(vec![Op::Text { value: "rendered".into() }]),
        );

        let dispatcher = site.dispatcher(site.config()).await;
        assert_eq!(
            dispatcher.dispatch(get("/page.tiger")).await.body,
            Bytes::from("rendered")
        );

        let config = Config {
            classify_order: ClassifyOrder::StaticFirst,
            ..site.config()
        };
        let dispatcher = site.dispatcher(config).await;
        assert_eq!(
            dispatcher.dispatch(get("/page.tiger")).await.body,
            Bytes::from("static copy")
        );
        assert!(matches!(
            dispatcher.classify(&dispatcher.route_key("/other.tiger")).await,
            Target::CompiledScript(id) if id == "render"
        ));
    }

    #[tokio::test]
    async fn test_script_cacheability() {
        let site = Site::new();
        site.script(
            "cached",
            Manifest::new("cached")
                .with_trigger(Some("/cached"), None)
                .with_cacheable(true)
                .with_program(vec![Op::Text { value: "c".into() }]),
        );
        site.script(
            "fresh",
            Manifest::new("fresh")
                .with_trigger(Some("/fresh"), None)
                .with_program(vec![Op::Text { value: "f".into() }]),
        );
        let dispatcher = site.dispatcher(site.config()).await;

        assert_eq!(dispatcher.dispatch(get("/cached")).await.cache, CacheStatus::Miss);
        assert_eq!(dispatcher.dispatch(get("/cached")).await.cache, CacheStatus::Hit);
        assert_eq!(dispatcher.dispatch(get("/fresh")).await.cache, CacheStatus::Bypass);
        assert_eq!(dispatcher.dispatch(get("/fresh")).await.cache, CacheStatus::Bypass);
        assert_eq!(dispatcher.executor().stats().runs, 3);
    }

    #[tokio::test]
    async fn test_timeout_is_500_and_not_cached() {
        let site = Site::new();
        site.script(
            "slow",
            Manifest::new("slow")
                .with_trigger(Some("/slow"), None)
                .with_cacheable(true)
                .with_program(vec![Op::Sleep { millis: 5_000 }]),
        );
        let dispatcher = site.dispatcher(site.config()).await;

        let reply = dispatcher.dispatch(get("/slow")).await;

        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(dispatcher.cache().is_empty());
        assert_eq!(dispatcher.executor().stats().timeouts, 1);
    }

    #[tokio::test]
    async fn test_methods() {
        let site = Site::new();
        site.public("a.html", "a");
        let dispatcher = site.dispatcher(site.config()).await;

        let post = dispatcher.dispatch(IncomingRequest::new(Method::POST, "/a.html")).await;
        assert_eq!(post.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(post.header("allow"), Some(STATIC_ALLOW));

        let options = dispatcher.dispatch(IncomingRequest::new(Method::OPTIONS, "/a.html")).await;
        assert_eq!(options.status, StatusCode::OK);
        assert_eq!(options.header("allow"), Some(STATIC_ALLOW));

        let trace = dispatcher.dispatch(IncomingRequest::new(Method::TRACE, "/a.html")).await;
        assert_eq!(trace.status, StatusCode::NOT_IMPLEMENTED);

        let head = dispatcher.dispatch(IncomingRequest::new(Method::HEAD, "/a.html")).await;
        assert_eq!(head.status, StatusCode::OK);
        assert!(head.omit_body);
        assert!(dispatcher.cache().is_empty(), "HEAD does not fill the cache");
    }

    #[tokio::test]
    async fn test_reload_reroutes_cached_static_path() {
        let site = Site::new();
        site.public("index.html", "static");
        let dispatcher = site.dispatcher(site.config()).await;
        dispatcher.dispatch(get("/index.html")).await;
        assert_eq!(dispatcher.dispatch(get("/index.html")).await.cache, CacheStatus::Hit);

        site.script(
            "pages",
            Manifest::new("pages")
                .with_trigger(None, Some("html"))
                .with_program(vec![Op::Text { value: "script".into() }]),
        );
        let report = dispatcher.reload_scripts().await.unwrap();
        assert!(report.routes_changed);

        let reply = dispatcher.dispatch(get("/index.html")).await;
        assert_eq!(reply.body, Bytes::from("script"));
        assert_eq!(reply.cache, CacheStatus::Bypass);
    }

    #[tokio::test]
    async fn test_unchanged_reload_keeps_cache() {
        let site = Site::new();
        site.public("a.html", "a");
        let dispatcher = site.dispatcher(site.config()).await;
        dispatcher.dispatch(get("/a.html")).await;

        assert!(!dispatcher.reload_scripts().await.unwrap().routes_changed);
        assert_eq!(dispatcher.dispatch(get("/a.html")).await.cache, CacheStatus::Hit);
    }

    #[tokio::test]
    async fn test_head_on_get_only_script_cached_or_not() {
        let site = Site::new();
        site.script(
            "report",
            Manifest::new("report")
                .with_trigger(Some("/report"), None)
                .with_methods(&["GET"])
                .with_cacheable(true)
                .with_program(vec![Op::Text { value: "r".into() }]),
        );
        let dispatcher = site.dispatcher(site.config()).await;
        let head = || IncomingRequest::new(Method::HEAD, "/report");

        let uncached = dispatcher.dispatch(head()).await;
        assert_eq!(uncached.status, StatusCode::OK);
        assert_eq!(uncached.cache, CacheStatus::Bypass);

        assert_eq!(dispatcher.dispatch(get("/report")).await.cache, CacheStatus::Miss);
        let cached = dispatcher.dispatch(head()).await;
        assert_eq!(cached.status, StatusCode::OK);
        assert_eq!(cached.cache, CacheStatus::Hit);
        assert!(cached.omit_body);

        let post = dispatcher.dispatch(IncomingRequest::new(Method::POST, "/report")).await;
        assert_eq!(post.status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_unmatched_is_404() {
        let site = Site::new();
        let dispatcher = site.dispatcher(site.config()).await;
        let reply = dispatcher.dispatch(get("/missing.html")).await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
        assert_eq!(reply.cache, CacheStatus::Bypass);
    }
}
