//! Hooks: registration records, the hook table and the dispatch engine.
//!
//! Plugins register hooks on named extension points (`modifyConfig`,
//! `onStart`, `addRuntimePlugin`, ...). During registration every hook is
//! staged under the plugin that registered it; once all plugins have run, the
//! staging lists are compiled into a table indexed by extension-point key. The
//! table is immutable from then on.
//!
//! # Composition kinds
//!
//! | Kind | Handler receives | Result |
//! |------|------------------|--------|
//! | [`Add`](ApplyKind::Add) | accumulated array, args | items concatenated in order |
//! | [`Modify`](ApplyKind::Modify) | previous value, args | the last handler's output |
//! | [`Event`](ApplyKind::Event) | args | nothing |
//!
//! # Example
//!
//! ```
//! use kiln_service::hook::{Handler, Hook};
//! use serde_json::json;
//!
//! let hook = Hook::new(
//!     "addRuntimePluginKey",
//!     Handler::sync(|_input| Ok(json!(["onRouteChange"]))),
//! )
//! .with_stage(-1);
//!
//! assert_eq!(hook.key(), "addRuntimePluginKey");
//! assert_eq!(hook.stage(), -1);
//! ```

mod dispatch;

pub use dispatch::{ApplyKind, ApplyPlugins, SeedShape};

pub(crate) use dispatch::{compose, order_hooks};

use core::fmt;
use core::future::Future;
use std::sync::Arc;

use hashbrown::HashMap;
use indexmap::IndexMap;
use serde_json::Value;

use crate::BoxFuture;
use crate::error::{BoxError, ServiceError};

// ─────────────────────────────────────────────────────────────────────────────
// Handler
// ─────────────────────────────────────────────────────────────────────────────

/// What a hook handler receives.
#[derive(Debug, Clone, Default)]
pub struct HookInput {
    /// The accumulated (add) or current (modify) value; `null` for events.
    pub memo: Value,
    /// Arguments shared by every handler of one dispatch.
    pub args: Value,
}

/// Type-erased hook function.
pub type HookFn =
    Arc<dyn Fn(HookInput) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

/// A cloneable hook handler.
#[derive(Clone)]
pub struct Handler(HookFn);

impl Handler {
    /// Wraps an async closure.
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(HookInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Self(Arc::new(move |input| Box::pin(handler(input))))
    }

    /// Wraps a synchronous closure.
    pub fn sync<F>(handler: F) -> Self
    where
        F: Fn(HookInput) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self(Arc::new(move |input| {
            let output = handler(input);
            Box::pin(async move { output })
        }))
    }

    /// Invokes the handler.
    pub fn call(&self, input: HookInput) -> BoxFuture<'static, Result<Value, BoxError>> {
        (self.0)(input)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler(..)")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hook
// ─────────────────────────────────────────────────────────────────────────────

/// A hook as submitted to [`PluginApi::register`](crate::api::PluginApi::register).
#[derive(Debug, Clone)]
pub struct Hook {
    key: String,
    handler: Option<Handler>,
    stage: i32,
    before: Option<String>,
}

impl Hook {
    /// Creates a hook on `key`.
    #[must_use]
    pub fn new(key: impl Into<String>, handler: Handler) -> Self {
        Self {
            key: key.into(),
            handler: Some(handler),
            stage: 0,
            before: None,
        }
    }

    /// Creates a hook without a key, for methods that supply the key themselves.
    #[must_use]
    pub fn anonymous(handler: Handler) -> Self {
        Self::new(String::new(), handler)
    }

    /// Creates a hook without a handler.
    ///
    /// Registering it fails; this exists so callers assembling hooks from
    /// optional parts can defer the check to registration.
    #[must_use]
    pub fn unhandled(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            handler: None,
            stage: 0,
            before: None,
        }
    }

    /// Sets the key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Sets the handler.
    #[must_use]
    pub fn with_handler(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Sets the stage. Lower stages run first; the default is 0.
    #[must_use]
    pub fn with_stage(mut self, stage: i32) -> Self {
        self.stage = stage;
        self
    }

    /// Schedules this hook ahead of the hooks owned by `plugin_id`.
    #[must_use]
    pub fn before(mut self, plugin_id: impl Into<String>) -> Self {
        self.before = Some(plugin_id.into());
        self
    }

    /// Returns the extension point key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the stage.
    #[must_use]
    pub fn stage(&self) -> i32 {
        self.stage
    }

    /// Returns the `before` target.
    #[must_use]
    pub fn before_target(&self) -> Option<&str> {
        self.before.as_deref()
    }

    /// Returns the handler, if one was set.
    #[must_use]
    pub fn handler(&self) -> Option<&Handler> {
        self.handler.as_ref()
    }

    /// Validates the hook and stamps it with its owner.
    pub(crate) fn into_record(self, owner: &str) -> Result<HookRecord, ServiceError> {
        if self.key.is_empty() {
            return Err(ServiceError::EmptyHookKey);
        }
        let Some(handler) = self.handler else {
            return Err(ServiceError::MissingHandler(self.key));
        };
        Ok(HookRecord {
            key: self.key,
            handler,
            owner: owner.to_string(),
            stage: self.stage,
            before: self.before,
        })
    }
}

impl From<Handler> for Hook {
    fn from(handler: Handler) -> Self {
        Self::anonymous(handler)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HookRecord
// ─────────────────────────────────────────────────────────────────────────────

/// A validated hook, owned by exactly one plugin.
#[derive(Debug, Clone)]
pub struct HookRecord {
    pub(crate) key: String,
    pub(crate) handler: Handler,
    pub(crate) owner: String,
    pub(crate) stage: i32,
    pub(crate) before: Option<String>,
}

impl HookRecord {
    /// Returns the extension point key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the id of the plugin that registered the hook.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns the stage.
    #[must_use]
    pub fn stage(&self) -> i32 {
        self.stage
    }

    /// Returns the `before` target.
    #[must_use]
    pub fn before(&self) -> Option<&str> {
        self.before.as_deref()
    }

    pub(crate) async fn invoke(&self, input: HookInput) -> Result<Value, ServiceError> {
        self.handler
            .call(input)
            .await
            .map_err(|source| ServiceError::Hook {
                key: self.key.clone(),
                plugin: self.owner.clone(),
                source,
            })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HookTable
// ─────────────────────────────────────────────────────────────────────────────

/// Per-owner staging lists, compiled once into a per-key table.
#[derive(Default)]
pub(crate) struct HookTable {
    /// Hooks by owner, in the order owners first registered.
    staging: IndexMap<String, Vec<HookRecord>>,
    /// Hooks by key; filled by [`compile`](Self::compile).
    compiled: HashMap<String, Vec<HookRecord>>,
    frozen: bool,
}

impl HookTable {
    /// Appends a hook to its owner's staging list.
    pub(crate) fn stage(&mut self, record: HookRecord) -> Result<(), ServiceError> {
        if self.frozen {
            return Err(ServiceError::HooksFrozen {
                key: record.key,
                plugin: record.owner,
            });
        }
        self.staging
            .entry(record.owner.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    /// Moves an owner's staged hooks to a new id, keeping their position.
    pub(crate) fn rename_owner(&mut self, from: &str, to: &str) {
        let Some(index) = self.staging.get_index_of(from) else {
            return;
        };
        if let Some((_, mut records)) = self.staging.shift_remove_index(index) {
            for record in &mut records {
                record.owner = to.to_string();
            }
            self.staging.shift_insert(index, to.to_string(), records);
        }
    }

    /// Builds the per-key table. Later calls are no-ops.
    pub(crate) fn compile(&mut self) {
        if self.frozen {
            return;
        }
        for records in self.staging.values() {
            for record in records {
                self.compiled
                    .entry(record.key.clone())
                    .or_default()
                    .push(record.clone());
            }
        }
        self.frozen = true;
    }

    /// Returns the compiled hooks for `key`, in registration order.
    pub(crate) fn hooks(&self, key: &str) -> Vec<HookRecord> {
        self.compiled.get(key).cloned().unwrap_or_default()
    }

    /// Returns true once the table is compiled.
    pub(crate) fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Returns the number of staged hooks of `owner`.
    pub(crate) fn staged_count(&self, owner: &str) -> usize {
        self.staging.get(owner).map_or(0, Vec::len)
    }
}
