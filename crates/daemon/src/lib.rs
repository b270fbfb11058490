//! # davgate Daemon Library
//!
//! This crate provides the access-control layer that sits in front of a
//! file-serving protocol engine (WebDAV-style).
//!
//! ## Overview
//!
//! For each incoming request the daemon:
//!
//! - **Authenticates** the caller from HTTP Basic credentials
//! - **Authorizes** the protocol method against the caller's CRUD permissions
//! - **Jails** every filesystem call inside the caller's directory
//! - **Hot reloads** users, permissions and logging toggles from the config file
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         AccessLayer                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────┐  │
//! │  │ Credential   │─▶│ Method Gate  │─▶│   ProtocolEngine     │  │
//! │  │ Verifier     │  │              │  │   (external)         │  │
//! │  └──────────────┘  └──────────────┘  └──────────┬───────────┘  │
//! │                                                  │              │
//! │  ┌────────────────────────────────────────────────▼───────────┐ │
//! │  │          JailedFs (filesystem gate + path jail)            │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! │                                                                  │
//! │  ┌───────────────────┐  ┌───────────────────────────────────┐  │
//! │  │   ConfigStore     │◀─│        ConfigWatcher              │  │
//! │  └───────────────────┘  └───────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use daemon::{
//!     AccessLayer, ConfigStore, ConfigWatcher, EngineError, JailedFs, ProtocolEngine,
//!     RequestContext, RequestHead, Response,
//! };
//!
//! struct Engine;
//!
//! impl ProtocolEngine for Engine {
//!     async fn serve(
//!         &self,
//!         ctx: &RequestContext,
//!         request: &RequestHead,
//!         fs: &JailedFs,
//!     ) -> Result<Response, EngineError> {
//!         let found = fs.stat(ctx, &request.path)?.is_some();
//!         Ok(Response::new(if found { 207 } else { 404 }))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(ConfigStore::load("/etc/davgate/config.toml")?);
//!     let _watcher = ConfigWatcher::spawn(Arc::clone(&store))?;
//!
//!     let layer = AccessLayer::new(store, Engine);
//!     let response = layer.handle(RequestHead::new("PROPFIND", "/")).await;
//!     println!("{}", response.status);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration file model, validation and discovery
//! - [`store`]: Live configuration with atomic hot reload
//! - [`watcher`]: Background reload on config file changes
//! - [`auth`]: Credential verification
//! - [`context`]: Per-request identity and configuration snapshot
//! - [`gate`]: Protocol method gate
//! - [`fs`]: Jailed filesystem gate
//! - [`pipeline`]: The request pipeline and engine seam

pub mod auth;
pub mod config;
pub mod context;
pub mod fs;
pub mod gate;
pub mod pipeline;
pub mod store;
pub mod watcher;

// Re-export policy for convenience
pub use policy;

// Re-export config types for convenience
pub use config::{ConfigError, ConfigFile, ServerConfig, UserRecord};

// Re-export store types for convenience
pub use store::{ConfigStore, ReloadError, ReloadSummary};
pub use watcher::ConfigWatcher;

// Re-export request handling types for convenience
pub use auth::{authenticate, parse_basic_auth, AuthFailure, Credentials};
pub use context::RequestContext;
pub use fs::{FsError, JailedFs, OpenFlags};
pub use gate::GateDecision;
pub use pipeline::{AccessLayer, EngineError, Headers, ProtocolEngine, RequestHead, Response};
