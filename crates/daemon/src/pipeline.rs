//! Request pipeline in front of the protocol engine.
//!
//! [`AccessLayer::handle`] takes one request through CORS preflight,
//! authentication, the method gate and finally the [`ProtocolEngine`]. The
//! engine's result is caught at the end: an engine failure becomes a 500
//! response and never reaches the listener.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use policy::{Denial, Identity, Method, ALLOWED_METHODS, DAV_COMPLIANCE};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::auth::{authenticate, parse_basic_auth};
use crate::config::{CorsConfig, ServerConfig};
use crate::context::RequestContext;
use crate::fs::{FsError, JailedFs};
use crate::gate::{self, GateDecision};
use crate::store::ConfigStore;

/// Status codes produced by the access layer.
pub mod status {
    pub const OK: u16 = 200;
    pub const NO_CONTENT: u16 = 204;
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const METHOD_NOT_ALLOWED: u16 = 405;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const NOT_IMPLEMENTED: u16 = 501;
}

/// Error returned by a protocol engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A filesystem call failed.
    #[error("filesystem error: {0}")]
    Fs(#[from] FsError),

    /// Any other engine failure.
    #[error("protocol engine failure: {0}")]
    Failed(String),
}

/// The wire-level protocol engine the access layer delegates to.
///
/// The engine receives the request with its virtual path and must do all of
/// its file access through the given [`JailedFs`] with the given context.
/// Implementations may use `async fn`; the returned future must be `Send` so
/// requests can be served from any runtime worker.
pub trait ProtocolEngine: Send + Sync {
    fn serve(
        &self,
        ctx: &RequestContext,
        request: &RequestHead,
        fs: &JailedFs,
    ) -> impl Future<Output = Result<Response, EngineError>> + Send;
}

/// Header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the first value of a header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set a header, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.0.push((name, value.into()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The parts of an inbound request the access layer looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    /// Request path. Handed to the engine with the URL prefix stripped.
    pub path: String,
    pub headers: Headers,
    pub remote_addr: Option<SocketAddr>,
}

impl RequestHead {
    pub fn new(method: impl Into<Method>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: Headers::new(),
            remote_addr: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Address of the caller: `X-Forwarded-For` if present, else the peer IP.
    pub fn client_address(&self) -> String {
        match self.header("X-Forwarded-For") {
            Some(forwarded) if !forwarded.trim().is_empty() => forwarded.trim().to_string(),
            _ => self
                .remote_addr
                .map(|addr| addr.ip().to_string())
                .unwrap_or_default(),
        }
    }
}

/// A response produced by the access layer or the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// 401 with a Basic authentication challenge.
    pub fn unauthorized(realm: &str) -> Self {
        Self::new(status::UNAUTHORIZED)
            .with_header("WWW-Authenticate", format!("Basic realm=\"{realm}\""))
            .with_body("401 Unauthorized")
    }

    /// Capability discovery answer.
    pub fn discovery() -> Self {
        Self::new(status::OK)
            .with_header("Allow", ALLOWED_METHODS.join(", "))
            .with_header("DAV", DAV_COMPLIANCE)
    }

    pub fn no_content() -> Self {
        Self::new(status::NO_CONTENT)
    }

    pub fn not_found() -> Self {
        Self::new(status::NOT_FOUND).with_body("404 page not found")
    }

    pub fn method_not_allowed() -> Self {
        Self::new(status::METHOD_NOT_ALLOWED).with_body("Method not allowed")
    }

    pub fn not_implemented() -> Self {
        Self::new(status::NOT_IMPLEMENTED)
    }

    pub fn internal_error() -> Self {
        Self::new(status::INTERNAL_SERVER_ERROR).with_body("500 Internal Server Error")
    }

    fn denied(denial: Denial) -> Self {
        match denial {
            Denial::Unauthorized => Self::new(status::UNAUTHORIZED),
            Denial::Forbidden => Self::new(status::FORBIDDEN),
        }
    }
}

/// Strip the configured URL prefix from a request path.
///
/// Returns `None` when the path lies outside the prefix.
pub fn strip_prefix(prefix: &str, path: &str) -> Option<String> {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return Some(path.to_string());
    }
    match path.strip_prefix(prefix) {
        Some("") => Some("/".to_string()),
        Some(rest) if rest.starts_with('/') => Some(rest.to_string()),
        _ => None,
    }
}

fn is_preflight(cors: &CorsConfig, request: &RequestHead) -> bool {
    request.method == Method::Options
        && request.header("Origin") == Some(cors.origin.as_str())
        && request
            .header("Access-Control-Request-Method")
            .is_some_and(|v| !v.is_empty())
        && request
            .header("Access-Control-Request-Headers")
            .is_some_and(|v| !v.is_empty())
}

fn apply_cors(cors: &CorsConfig, response: &mut Response) {
    if cors.origin.is_empty() {
        return;
    }
    response
        .headers
        .insert("Access-Control-Allow-Origin", cors.origin.clone());
    response.headers.insert("Access-Control-Allow-Headers", "*");
    response.headers.insert("Access-Control-Allow-Methods", "*");
    if cors.credentials {
        response
            .headers
            .insert("Access-Control-Allow-Credentials", "true");
    }
}

/// Access control in front of a [`ProtocolEngine`].
pub struct AccessLayer<E: ProtocolEngine> {
    store: Arc<ConfigStore>,
    engine: E,
    fs: JailedFs,
}

impl<E: ProtocolEngine> AccessLayer<E> {
    pub fn new(store: Arc<ConfigStore>, engine: E) -> Self {
        Self {
            store,
            engine,
            fs: JailedFs::new(),
        }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Handle one request. Always produces a response.
    pub async fn handle(&self, request: RequestHead) -> Response {
        let config = self.store.snapshot();
        let mut response = self.process(&config, request).await;
        apply_cors(&config.cors, &mut response);
        response
    }

    async fn process(&self, config: &Arc<ServerConfig>, mut request: RequestHead) -> Response {
        if is_preflight(&config.cors, &request) {
            return Response::no_content();
        }

        let identity = match self.identify(config, &request).await {
            Ok(identity) => identity,
            Err(response) => return response,
        };

        let Some(virtual_path) = strip_prefix(&config.prefix, &request.path) else {
            debug!(path = %request.path, prefix = %config.prefix, "Request outside of prefix");
            return Response::not_found();
        };
        request.path = virtual_path;

        let ctx = RequestContext::new(identity, Arc::clone(config))
            .with_address(request.client_address());
        match gate::authorize(&ctx, &request.method, &request.path) {
            GateDecision::Delegate => self.delegate(&ctx, &request).await,
            GateDecision::Deny(denial) => Response::denied(denial),
            GateDecision::Discovery => Response::discovery(),
            GateDecision::MethodNotAllowed => Response::method_not_allowed(),
            GateDecision::NotImplemented => Response::not_implemented(),
        }
    }

    /// Authenticate the caller, or produce the response that rejects it.
    async fn identify(
        &self,
        config: &Arc<ServerConfig>,
        request: &RequestHead,
    ) -> Result<Identity, Response> {
        if !config.authentication_needed() {
            return Ok(Identity::anonymous());
        }

        let Some(credentials) = request.header("Authorization").and_then(parse_basic_auth) else {
            return Err(Response::unauthorized(&config.realm));
        };

        let username = credentials.username.clone();
        let snapshot = Arc::clone(config);
        let result = tokio::task::spawn_blocking(move || {
            authenticate(&snapshot, &credentials.username, &credentials.password)
        })
        .await;

        let identity = match result {
            Ok(Ok(identity)) => identity,
            Ok(Err(failure)) => {
                if config.log.error {
                    warn!(
                        user = %username,
                        address = %request.client_address(),
                        error = %failure.reason,
                        "User failed to login"
                    );
                }
                failure.identity
            }
            Err(e) => {
                error!(error = %e, "Authentication task failed");
                return Err(Response::internal_error());
            }
        };

        if !identity.is_authenticated() || !identity.permissions().can_read() {
            return Err(Response::unauthorized(&config.realm));
        }
        Ok(identity)
    }

    async fn delegate(&self, ctx: &RequestContext, request: &RequestHead) -> Response {
        match self.engine.serve(ctx, request, &self.fs).await {
            Ok(response) => response,
            Err(e) => {
                if ctx.config().log.error {
                    error!(
                        user = %ctx.username(),
                        method = %request.method,
                        path = %request.path,
                        error = %e,
                        "Error handling request"
                    );
                }
                Response::internal_error()
            }
        }
    }
}
