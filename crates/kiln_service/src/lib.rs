//! The plugin and hook orchestration engine behind Kiln.
//!
//! `kiln_service` provides the registry that loads presets and plugins, lets
//! each of them contribute configuration, commands and hooks, and then drives
//! those contributions through a staged startup lifecycle:
//!
//! - [`api`] - The [`PluginApi`](api::PluginApi) handed to every entry function
//! - [`command`] - Command descriptors and parsed command-line arguments
//! - [`config`] - User configuration loading and merging
//! - [`enable`] - Per-dispatch enablement decisions
//! - [`hook`] - Hook records, the hook table and the dispatch engine
//! - [`paths`] - Derived project paths
//! - [`plugin`] - Plugin descriptors, entry functions and module loading
//! - [`service`] - The lifecycle orchestrator
//! - [`stage`] - The monotonic lifecycle stage
//!
//! # Architecture
//!
//! - **Layer 1** (`kiln_service`): orchestration primitives (this crate)
//! - **Layer 2** (`kiln_core_plugins`): the built-in preset, commands and tracing
//! - **Layer 3** (`kiln_cli`): the `kiln` binary
//!
//! # Example
//!
//! ```
//! use kiln_service::plugin::{ApplyOutput, PluginDescriptor, apply_sync};
//! use kiln_service::hook::{ApplyPlugins, Handler};
//! use kiln_service::service::{Service, ServiceOptions};
//! use serde_json::json;
//!
//! # tokio_test();
//! # fn tokio_test() {
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//! let doubler = PluginDescriptor::plugin(
//!     "doubler",
//!     apply_sync(|api| {
//!         api.call("modifyConfig", Handler::sync(|input| {
//!             let n = input.memo["n"].as_i64().unwrap_or_default();
//!             Ok(json!({ "n": n * 2 }))
//!         }))?;
//!         Ok(ApplyOutput::default())
//!     }),
//! );
//!
//! let cwd = std::env::current_dir().unwrap();
//! let service = Service::new(ServiceOptions::new(cwd).with_plugin(doubler)).unwrap();
//! service.init().await.unwrap();
//!
//! let value = service
//!     .apply_plugins(ApplyPlugins::modify("modifyConfig").initial_value(json!({ "n": 21 })))
//!     .await
//!     .unwrap();
//! assert_eq!(value["n"], 42);
//! # });
//! # }
//! ```

/// The facade handed to every preset and plugin.
pub mod api;

/// Commands and parsed arguments.
pub mod command;

/// User configuration loading and merging.
pub mod config;

/// Enablement decisions.
pub mod enable;

/// Error types.
pub mod error;

/// Hook records, the hook table and the dispatch engine.
pub mod hook;

/// Derived project paths.
pub mod paths;

/// Plugin descriptors and module loading.
pub mod plugin;

/// The lifecycle orchestrator.
pub mod service;

/// Lifecycle stages.
pub mod stage;

use core::future::Future;
use core::pin::Pin;

/// A boxed future that is Send.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use error::{BoxError, ServiceError};

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::api::*;
    pub use crate::command::*;
    pub use crate::config::*;
    pub use crate::error::*;
    pub use crate::hook::*;
    pub use crate::paths::*;
    pub use crate::plugin::*;
    pub use crate::service::*;
    pub use crate::stage::*;
    pub use crate::BoxFuture;
}
