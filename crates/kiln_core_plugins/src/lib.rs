//! The built-in preset of Kiln.
//!
//! This crate provides the plugins most Kiln projects need:
//!
//! - [`RegisterMethodsPlugin`] - The extension points (`onGenerateFiles`,
//!   `modifyBundleConfig`, ...) and the `writeTmpFile` method
//! - [`RuntimePluginsPlugin`] - Generates the runtime plugin registry
//! - [`PolyfillPlugin`] - Generates the polyfill entry
//! - [`BuildCommand`], [`DevCommand`], [`GenerateCommand`] - The commands
//! - [`TracingPlugin`] - Logging and observability via the `tracing` crate
//! - [`BuiltInPreset`] - Convenient bundle of all of the above
//!
//! # Example
//!
//! ```
//! use kiln_core_plugins::BuiltInPreset;
//! use kiln_service::plugin::PluginDescriptor;
//! use kiln_service::service::{Service, ServiceOptions};
//!
//! let cwd = std::env::current_dir().unwrap();
//! let service = Service::new(
//!     ServiceOptions::new(cwd).with_preset(PluginDescriptor::of(BuiltInPreset::default())),
//! )
//! .unwrap();
//! # let _ = service;
//! ```
//!
//! # Architecture
//!
//! This crate is part of Layer 2:
//!
//! - **Layer 1** (`kiln_service`): orchestration primitives
//! - **Layer 2** (`kiln_core_plugins`): the built-in preset (this crate)
//! - **Layer 3** (`kiln_cli`): the `kiln` binary

mod bundler;
mod commands;
mod error;
mod generate_files;
mod methods;
mod tracing_plugin;

pub use bundler::{BuildRequest, BuildStats, Bundler, DevRequest, DryRunBundler};
pub use commands::{
    BuildCommand, DEFAULT_HOST, DEFAULT_PORT, DevCommand, GenerateCommand, REGISTER_GENERATOR,
    resolve_host, resolve_port,
};
pub use error::BuiltInError;
pub use generate_files::{
    POLYFILL_ENV, PolyfillPlugin, RUNTIME_PATH, RUNTIME_PLUGIN_KEYS, RuntimePluginsPlugin,
    generate_files,
};
pub use methods::{EXTENSION_POINTS, RegisterMethodsPlugin, TmpFile, WRITE_TMP_FILE, write_tmp_file};
pub use tracing_plugin::{LOGGING_KEY, TracingConfig, TracingFormat, TracingPlugin, install_subscriber};

use std::sync::Arc;

use kiln_service::api::PluginApi;
use kiln_service::error::BoxError;
use kiln_service::plugin::{ApplyOutput, Plugin, PluginDescriptor, PluginKind};

/// The preset every Kiln project starts from.
///
/// Returns, in order:
/// - [`RegisterMethodsPlugin`]
/// - [`TracingPlugin`] (unless disabled)
/// - [`RuntimePluginsPlugin`]
/// - [`PolyfillPlugin`]
/// - [`BuildCommand`], [`DevCommand`], [`GenerateCommand`]
///
/// # Example
///
/// ```
/// use kiln_core_plugins::{BuiltInPreset, DryRunBundler, TracingPlugin};
/// use tracing::Level;
///
/// let preset = BuiltInPreset::default()
///     .with_bundler(DryRunBundler)
///     .with_tracing(TracingPlugin::new().with_level(Level::DEBUG));
/// assert_eq!(preset.plugins().len(), 7);
///
/// assert_eq!(BuiltInPreset::default().without_tracing().plugins().len(), 6);
/// ```
#[derive(Clone)]
pub struct BuiltInPreset {
    bundler: Arc<dyn Bundler>,
    tracing: Option<TracingPlugin>,
}

impl Default for BuiltInPreset {
    fn default() -> Self {
        Self {
            bundler: Arc::new(DryRunBundler),
            tracing: Some(TracingPlugin::default()),
        }
    }
}

impl BuiltInPreset {
    /// Sets the bundler `build` and `dev` delegate to.
    #[must_use]
    pub fn with_bundler(mut self, bundler: impl Bundler) -> Self {
        self.bundler = Arc::new(bundler);
        self
    }

    /// Replaces the tracing plugin.
    #[must_use]
    pub fn with_tracing(mut self, tracing: TracingPlugin) -> Self {
        self.tracing = Some(tracing);
        self
    }

    /// Leaves the subscriber to the embedding application.
    #[must_use]
    pub fn without_tracing(mut self) -> Self {
        self.tracing = None;
        self
    }

    /// Returns the descriptors this preset expands to.
    #[must_use]
    pub fn plugins(&self) -> Vec<PluginDescriptor> {
        let mut plugins = vec![PluginDescriptor::of(RegisterMethodsPlugin)];
        if let Some(tracing) = &self.tracing {
            plugins.push(PluginDescriptor::of(tracing.clone()));
        }
        plugins.extend([
            PluginDescriptor::of(RuntimePluginsPlugin),
            PluginDescriptor::of(PolyfillPlugin),
            PluginDescriptor::of(BuildCommand::new(Arc::clone(&self.bundler))),
            PluginDescriptor::of(DevCommand::new(Arc::clone(&self.bundler))),
            PluginDescriptor::of(GenerateCommand),
        ]);
        plugins
    }
}

impl Plugin for BuiltInPreset {
    const ID: &'static str = "kiln:preset-built-in";
    const KIND: PluginKind = PluginKind::Preset;

    fn apply(&self, _api: &PluginApi) -> Result<ApplyOutput, BoxError> {
        Ok(ApplyOutput::new().with_plugins(self.plugins()))
    }
}

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::{
        BuildCommand, BuiltInError, BuiltInPreset, Bundler, DevCommand, DryRunBundler,
        GenerateCommand, PolyfillPlugin, RegisterMethodsPlugin, RuntimePluginsPlugin, TmpFile,
        TracingFormat, TracingPlugin, generate_files, write_tmp_file,
    };
}
