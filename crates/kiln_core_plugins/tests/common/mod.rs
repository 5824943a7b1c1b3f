//! Shared helpers for `kiln_core_plugins` integration tests.
//!
//! Import via `mod common;` in test files.

#![allow(
    dead_code,
    missing_docs,
    reason = "shared test utilities, not all items used in every test binary"
)]

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use kiln_core_plugins::{BuildRequest, BuildStats, BuiltInPreset, Bundler, DevRequest};
use kiln_service::api::PluginApi;
use kiln_service::error::BoxError;
use kiln_service::plugin::{ApplyOutput, PluginDescriptor, apply_sync};
use kiln_service::service::{Service, ServiceOptions};
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;

// ═══════════════════════════════════════════════════════════════════════════════
// PROJECT SETUP
// ═══════════════════════════════════════════════════════════════════════════════

/// Creates a project with a `src/app.ts` runtime plugin.
pub fn project() -> TempDir {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    std::fs::create_dir(dir.path().join("src")).expect("failed to create src");
    std::fs::write(dir.path().join("src/app.ts"), "export function render() {}")
        .expect("failed to write app.ts");
    dir
}

/// Writes `.kilnrc.json`.
pub fn write_config(dir: &Path, config: &Value) {
    std::fs::write(dir.join(".kilnrc.json"), config.to_string()).expect("failed to write config");
}

/// Builds a development service around the built-in preset and `plugins`.
pub fn service(
    dir: &Path,
    bundler: &RecordingBundler,
    plugins: impl IntoIterator<Item = PluginDescriptor>,
) -> Service {
    service_in_env(dir, "development", bundler, plugins)
}

pub fn service_in_env(
    dir: &Path,
    env: &str,
    bundler: &RecordingBundler,
    plugins: impl IntoIterator<Item = PluginDescriptor>,
) -> Service {
    let preset = BuiltInPreset::default()
        .without_tracing()
        .with_bundler(bundler.clone());
    Service::new(
        ServiceOptions::new(dir)
            .with_env(env)
            .with_env_files(false)
            .with_preset(PluginDescriptor::of(preset))
            .with_plugins(plugins),
    )
    .expect("failed to create service")
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

// ═══════════════════════════════════════════════════════════════════════════════
// BUNDLER
// ═══════════════════════════════════════════════════════════════════════════════

/// A bundler that records every request and can be told to fail.
#[derive(Clone, Default)]
pub struct RecordingBundler {
    builds: Arc<Mutex<Vec<BuildRequest>>>,
    devs: Arc<Mutex<Vec<DevRequest>>>,
    failure: Option<String>,
}

impl RecordingBundler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn builds(&self) -> Vec<BuildRequest> {
        self.builds.lock().clone()
    }

    pub fn devs(&self) -> Vec<DevRequest> {
        self.devs.lock().clone()
    }

    fn stats(&self) -> Result<BuildStats, BoxError> {
        match &self.failure {
            Some(message) => Err(message.clone().into()),
            None => Ok(BuildStats {
                assets: vec!["kiln.js".to_string()],
                errors: Vec::new(),
            }),
        }
    }
}

#[async_trait]
impl Bundler for RecordingBundler {
    async fn build(&self, request: BuildRequest) -> Result<BuildStats, BoxError> {
        self.builds.lock().push(request);
        self.stats()
    }

    async fn dev(&self, request: DevRequest) -> Result<BuildStats, BoxError> {
        self.devs.lock().push(request);
        self.stats()
    }
}
