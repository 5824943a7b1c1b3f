//! Shared helpers for `kiln_service` integration tests.
//!
//! Import via `mod common;` in test files.

#![allow(
    dead_code,
    missing_docs,
    reason = "shared test utilities, not all items used in every test binary"
)]

use std::path::Path;
use std::sync::Arc;

use kiln_service::api::PluginApi;
use kiln_service::config::ConfigSource;
use kiln_service::error::{BoxError, ServiceError};
use kiln_service::hook::{Handler, Hook};
use kiln_service::plugin::{ApplyFn, ApplyOutput, PluginDescriptor, apply_sync};
use kiln_service::service::ServiceOptions;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tempfile::TempDir;

// ═══════════════════════════════════════════════════════════════════════════════
// PROJECT SETUP
// ═══════════════════════════════════════════════════════════════════════════════

/// Creates an empty project directory.
pub fn project() -> TempDir {
    tempfile::tempdir().expect("failed to create temp dir")
}

/// Options for a project with no env files and the `development` env.
pub fn options(dir: &Path) -> ServiceOptions {
    ServiceOptions::new(dir)
        .with_env("development")
        .with_env_files(false)
}

/// A [`ConfigSource`] that returns a fixed user configuration.
pub struct StaticConfig(pub Map<String, Value>);

impl StaticConfig {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self(Map::new()),
        }
    }
}

impl ConfigSource for StaticConfig {
    fn load(&self, _cwd: &Path, _env: &str) -> Result<Map<String, Value>, ServiceError> {
        Ok(self.0.clone())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXECUTION LOG
// ═══════════════════════════════════════════════════════════════════════════════

/// Records the order in which entry functions and hooks run.
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DESCRIPTORS
// ═══════════════════════════════════════════════════════════════════════════════

/// An entry function that does nothing.
pub fn noop() -> ApplyFn {
    apply_sync(|_| Ok(ApplyOutput::default()))
}

/// An entry function that logs its descriptor id and returns `output()`.
pub fn logging(log: &Log, output: impl Fn() -> ApplyOutput + Send + Sync + 'static) -> ApplyFn {
    let log = log.clone();
    apply_sync(move |api| {
        log.push(api.id());
        Ok(output())
    })
}

/// A preset that only logs itself.
pub fn logged_preset(log: &Log, id: &str) -> PluginDescriptor {
    PluginDescriptor::preset(id, logging(log, ApplyOutput::default))
}

/// A plugin that only logs itself.
pub fn logged_plugin(log: &Log, id: &str) -> PluginDescriptor {
    PluginDescriptor::plugin(id, logging(log, ApplyOutput::default))
}

/// A plugin whose entry function runs `register` against its facade.
pub fn plugin_with<F>(id: &str, register: F) -> PluginDescriptor
where
    F: Fn(&PluginApi) -> Result<(), BoxError> + Send + Sync + 'static,
{
    PluginDescriptor::plugin(
        id,
        apply_sync(move |api| {
            register(api)?;
            Ok(ApplyOutput::default())
        }),
    )
}

/// A plugin registering one hook on `key` that returns `value`.
pub fn hook_plugin(id: &str, key: &'static str, value: Value) -> PluginDescriptor {
    plugin_with(id, move |api| {
        let value = value.clone();
        api.register(Hook::new(key, Handler::sync(move |_| Ok(value.clone()))))?;
        Ok(())
    })
}
