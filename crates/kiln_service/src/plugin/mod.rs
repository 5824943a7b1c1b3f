//! Presets, plugins and their descriptors.
//!
//! Presets and plugins are the fundamental unit of composition in Kiln. Both are
//! described by a [`PluginDescriptor`]: an identity (id, key, origin path), an
//! enablement rule, an optional configuration schema and an entry function.
//!
//! # Presets vs Plugins
//!
//! | Aspect | Preset | Plugin |
//! |--------|--------|--------|
//! | **Purpose** | Declare other presets/plugins and defaults | Contribute commands, hooks, config |
//! | **Expanded** | Eagerly, depth-first | After every preset has settled |
//! | **Returned presets** | Expanded immediately | Ignored |
//! | **Returned plugins** | Queued behind all presets | Ignored |
//!
//! # Example
//!
//! ```
//! use kiln_service::plugin::{ApplyOutput, PluginDescriptor, apply_sync};
//!
//! let preset = PluginDescriptor::preset(
//!     "@acme/preset",
//!     apply_sync(|_api| {
//!         Ok(ApplyOutput::new()
//!             .with_presets(["@acme/preset-react"])
//!             .with_plugins(["@acme/plugin-lint"]))
//!     }),
//! );
//!
//! assert_eq!(preset.id(), "@acme/preset");
//! assert_eq!(preset.key(), "preset");
//! ```

mod resolve;

pub use resolve::{ModuleLoader, ModuleRegistry, id_for_path, key_for_id};

pub(crate) use resolve::path_to_descriptor;

use core::fmt;
use core::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::BoxFuture;
use crate::api::PluginApi;
use crate::error::BoxError;

// ─────────────────────────────────────────────────────────────────────────────
// PluginKind
// ─────────────────────────────────────────────────────────────────────────────

/// Whether a descriptor is a preset or a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    /// Declares other presets/plugins; expanded first.
    Preset,
    /// Contributes commands, hooks and configuration.
    Plugin,
}

impl PluginKind {
    /// Returns `"preset"` or `"plugin"`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preset => "preset",
            Self::Plugin => "plugin",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EnableBy
// ─────────────────────────────────────────────────────────────────────────────

/// Predicate deciding whether a plugin is enabled.
pub type EnablePredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Rule deciding when a plugin's contributions are active.
///
/// See [`is_enabled`](crate::enable::is_enabled) for how the rule combines with
/// the skip set and the user configuration.
#[derive(Clone, Default)]
pub enum EnableBy {
    /// Enabled as soon as it is registered (default).
    #[default]
    Register,
    /// Enabled only when its key is present in the user configuration.
    Config,
    /// Enabled when the predicate returns true.
    Predicate(EnablePredicate),
}

impl EnableBy {
    /// Creates a predicate rule.
    #[must_use]
    pub fn predicate(predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(predicate))
    }
}

impl fmt::Debug for EnableBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register => f.write_str("Register"),
            Self::Config => f.write_str("Config"),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PluginConfig
// ─────────────────────────────────────────────────────────────────────────────

/// What a watcher should do when a plugin's configuration changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigChangeType {
    /// Restart the whole service.
    #[default]
    Reload,
    /// Regenerate temporary files only.
    RegenerateTmpFiles,
}

/// Configuration schema attached to a descriptor through `describe()`.
///
/// The schema itself is opaque to the service; validation belongs to the
/// configuration collaborator.
#[derive(Debug, Clone, Default)]
pub struct PluginConfig {
    /// Default value placed under the plugin's key in the default configuration.
    pub default: Option<Value>,
    /// Opaque schema description.
    pub schema: Option<Value>,
    /// Reaction to changes of this plugin's configuration.
    pub on_change: ConfigChangeType,
}

impl PluginConfig {
    /// Creates an empty configuration description.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Sets the opaque schema.
    #[must_use]
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Sets the change reaction.
    #[must_use]
    pub fn with_on_change(mut self, on_change: ConfigChangeType) -> Self {
        self.on_change = on_change;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry functions
// ─────────────────────────────────────────────────────────────────────────────

/// Type-erased entry function of a preset or plugin.
///
/// Receives the facade bound to the descriptor and may suspend.
pub type ApplyFn =
    Arc<dyn Fn(PluginApi) -> BoxFuture<'static, Result<ApplyOutput, BoxError>> + Send + Sync>;

/// Wraps an async closure as an [`ApplyFn`].
pub fn apply_async<F, Fut>(apply: F) -> ApplyFn
where
    F: Fn(PluginApi) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ApplyOutput, BoxError>> + Send + 'static,
{
    Arc::new(move |api| Box::pin(apply(api)))
}

/// Wraps a synchronous closure as an [`ApplyFn`].
pub fn apply_sync<F>(apply: F) -> ApplyFn
where
    F: Fn(&PluginApi) -> Result<ApplyOutput, BoxError> + Send + Sync + 'static,
{
    Arc::new(move |api| {
        let output = apply(&api);
        Box::pin(async move { output })
    })
}

/// What an entry function hands back to the expansion resolver.
///
/// `presets` and `plugins` are only honored for presets; `config` fragments are
/// forwarded to the default configuration.
#[derive(Debug, Default)]
pub struct ApplyOutput {
    /// Presets to expand before anything queued after the returning preset.
    pub presets: Vec<PluginRef>,
    /// Plugins to expand once every preset has settled.
    pub plugins: Vec<PluginRef>,
    /// Default configuration fragments.
    pub config: Map<String, Value>,
}

impl ApplyOutput {
    /// Creates an empty output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds presets to expand.
    #[must_use]
    pub fn with_presets<I, R>(mut self, presets: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<PluginRef>,
    {
        self.presets.extend(presets.into_iter().map(Into::into));
        self
    }

    /// Adds plugins to expand.
    #[must_use]
    pub fn with_plugins<I, R>(mut self, plugins: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<PluginRef>,
    {
        self.plugins.extend(plugins.into_iter().map(Into::into));
        self
    }

    /// Adds a default configuration fragment.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A preset or plugin defined as a type.
///
/// An alternative to building descriptors from closures. The type is shared
/// behind an [`Arc`], so `apply` takes `&self`.
///
/// # Example
///
/// ```
/// use kiln_service::api::PluginApi;
/// use kiln_service::error::BoxError;
/// use kiln_service::plugin::{ApplyOutput, Plugin, PluginDescriptor};
///
/// struct Banner;
///
/// impl Plugin for Banner {
///     const ID: &'static str = "kiln:banner";
///
///     fn apply(&self, _api: &PluginApi) -> Result<ApplyOutput, BoxError> {
///         Ok(ApplyOutput::default())
///     }
/// }
///
/// let descriptor = PluginDescriptor::of(Banner);
/// assert_eq!(descriptor.key(), "banner");
/// ```
pub trait Plugin: Send + Sync + 'static {
    /// Unique descriptor id.
    const ID: &'static str;

    /// Whether this is a preset or a plugin.
    const KIND: PluginKind = PluginKind::Plugin;

    /// Registers the plugin's contributions.
    ///
    /// # Errors
    ///
    /// Any error aborts the expansion.
    fn apply(&self, api: &PluginApi) -> Result<ApplyOutput, BoxError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// PluginDescriptor
// ─────────────────────────────────────────────────────────────────────────────

/// Identity, metadata and entry function of a preset or plugin.
#[derive(Clone)]
pub struct PluginDescriptor {
    pub(crate) id: String,
    pub(crate) key: String,
    pub(crate) path: String,
    pub(crate) kind: PluginKind,
    pub(crate) enable_by: EnableBy,
    pub(crate) config: Option<PluginConfig>,
    pub(crate) apply: ApplyFn,
}

impl PluginDescriptor {
    /// Creates a descriptor whose path is its id and whose key derives from the id.
    #[must_use]
    pub fn new(kind: PluginKind, id: impl Into<String>, apply: ApplyFn) -> Self {
        let id = id.into();
        Self {
            key: key_for_id(&id),
            path: id.clone(),
            id,
            kind,
            enable_by: EnableBy::Register,
            config: None,
            apply,
        }
    }

    /// Creates a preset descriptor.
    #[must_use]
    pub fn preset(id: impl Into<String>, apply: ApplyFn) -> Self {
        Self::new(PluginKind::Preset, id, apply)
    }

    /// Creates a plugin descriptor.
    #[must_use]
    pub fn plugin(id: impl Into<String>, apply: ApplyFn) -> Self {
        Self::new(PluginKind::Plugin, id, apply)
    }

    /// Creates a descriptor from a [`Plugin`] type.
    #[must_use]
    pub fn of<P: Plugin>(plugin: P) -> Self {
        let plugin = Arc::new(plugin);
        Self::new(
            P::KIND,
            P::ID,
            apply_sync(move |api| plugin.apply(api)),
        )
    }

    /// Overrides the config key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Overrides the origin path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the enablement rule.
    #[must_use]
    pub fn with_enable_by(mut self, enable_by: EnableBy) -> Self {
        self.enable_by = enable_by;
        self
    }

    /// Returns the unique id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the config key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the origin path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns whether this is a preset or a plugin.
    #[must_use]
    pub fn kind(&self) -> PluginKind {
        self.kind
    }

    /// Returns true for presets.
    #[must_use]
    pub fn is_preset(&self) -> bool {
        self.kind == PluginKind::Preset
    }

    /// Returns the enablement rule.
    #[must_use]
    pub fn enable_by(&self) -> &EnableBy {
        &self.enable_by
    }

    /// Returns the configuration description, if any.
    #[must_use]
    pub fn config(&self) -> Option<&PluginConfig> {
        self.config.as_ref()
    }

    pub(crate) fn into_kind(mut self, kind: PluginKind) -> Self {
        self.kind = kind;
        self
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("enable_by", &self.enable_by)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PluginRef
// ─────────────────────────────────────────────────────────────────────────────

/// A reference to a preset or plugin: a bare path resolved through the
/// [`ModuleLoader`], or a ready-made descriptor.
#[derive(Debug, Clone)]
pub enum PluginRef {
    /// A module path.
    Path(String),
    /// A descriptor.
    Descriptor(PluginDescriptor),
}

impl From<&str> for PluginRef {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

impl From<String> for PluginRef {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

impl From<PluginDescriptor> for PluginRef {
    fn from(descriptor: PluginDescriptor) -> Self {
        Self::Descriptor(descriptor)
    }
}
