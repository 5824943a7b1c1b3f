//! The facade handed to every preset and plugin.
//!
//! Each entry function receives a [`PluginApi`] bound to its own descriptor.
//! Everything a plugin contributes (hooks, commands, methods, more presets
//! and plugins) goes through it and is attributed to that descriptor.
//!
//! # Dynamic methods
//!
//! Plugins can publish named methods for other plugins to call. A method
//! registered without a handler is a hook registrar: calling it registers the
//! argument as a hook keyed by the method name, owned by the *caller*. This is
//! how extension points like `modifyConfig` or `addRuntimePlugin` are exposed
//! as verbs:
//!
//! ```
//! use kiln_service::api::Method;
//! use kiln_service::hook::Handler;
//! use kiln_service::plugin::{ApplyOutput, PluginDescriptor, apply_sync};
//! use serde_json::json;
//!
//! let provider = PluginDescriptor::plugin(
//!     "provider",
//!     apply_sync(|api| {
//!         api.register_method(Method::new("addRuntimePluginKey"))?;
//!         Ok(ApplyOutput::default())
//!     }),
//! );
//!
//! let consumer = PluginDescriptor::plugin(
//!     "consumer",
//!     apply_sync(|api| {
//!         api.call("addRuntimePluginKey", Handler::sync(|_| Ok(json!(["rootContainer"]))))?;
//!         Ok(ApplyOutput::default())
//!     }),
//! );
//! # let _ = (provider, consumer);
//! ```

use core::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

use crate::command::{Args, Command};
use crate::error::{BoxError, ServiceError};
use crate::hook::{ApplyPlugins, Handler, Hook};
use crate::paths::Paths;
use crate::plugin::{EnableBy, PluginConfig, PluginKind, PluginRef};
use crate::service::{CommandEntry, Service};
use crate::stage::ServiceStage;

/// Hook-registering methods every facade provides.
pub const BUILT_IN_METHODS: [&str; 5] = [
    "onPluginReady",
    "modifyPaths",
    "onStart",
    "modifyDefaultConfig",
    "modifyConfig",
];

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

/// The descriptor a facade is bound to. Shared with the commands it registers.
#[derive(Debug)]
pub(crate) struct Identity {
    pub(crate) id: String,
    pub(crate) key: String,
}

pub(crate) type IdentityRef = Arc<RwLock<Identity>>;

// ─────────────────────────────────────────────────────────────────────────────
// Describe
// ─────────────────────────────────────────────────────────────────────────────

/// Metadata a plugin declares about itself.
///
/// Unset fields keep the current value, except `enable_by`, which resets to
/// [`EnableBy::Register`].
#[derive(Debug, Clone, Default)]
pub struct Describe {
    /// New id; must not be taken.
    pub id: Option<String>,
    /// New config key.
    pub key: Option<String>,
    /// Configuration description.
    pub config: Option<PluginConfig>,
    /// Enablement rule.
    pub enable_by: Option<EnableBy>,
}

impl Describe {
    /// Creates an empty description.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Renames the descriptor.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Changes the config key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Attaches a configuration description.
    #[must_use]
    pub fn with_config(mut self, config: PluginConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the enablement rule.
    #[must_use]
    pub fn with_enable_by(mut self, enable_by: EnableBy) -> Self {
        self.enable_by = Some(enable_by);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Methods
// ─────────────────────────────────────────────────────────────────────────────

/// Custom method implementation. Receives the calling plugin's facade.
pub type MethodFn = Arc<dyn Fn(&PluginApi, MethodArg) -> Result<Value, BoxError> + Send + Sync>;

/// Argument of a dynamic method call.
#[derive(Debug, Clone)]
pub enum MethodArg {
    /// A hook, for hook-registering methods.
    Hook(Hook),
    /// A plain value, for custom methods.
    Value(Value),
}

impl MethodArg {
    /// Returns the value, if this is one.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Hook(_) => None,
        }
    }

    /// Returns the hook, if this is one.
    #[must_use]
    pub fn into_hook(self) -> Option<Hook> {
        match self {
            Self::Hook(hook) => Some(hook),
            Self::Value(_) => None,
        }
    }
}

impl From<Hook> for MethodArg {
    fn from(hook: Hook) -> Self {
        Self::Hook(hook)
    }
}

impl From<Handler> for MethodArg {
    fn from(handler: Handler) -> Self {
        Self::Hook(Hook::anonymous(handler))
    }
}

impl From<Value> for MethodArg {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// A method registration request.
pub struct Method {
    name: String,
    handler: Option<MethodFn>,
    exits_error: bool,
}

impl Method {
    /// A hook-registering method named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handler: None,
            exits_error: true,
        }
    }

    /// A custom method.
    #[must_use]
    pub fn with_handler<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&PluginApi, MethodArg) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            handler: Some(Arc::new(handler)),
            exits_error: true,
        }
    }

    /// Whether registering over an existing method is an error (default) or a
    /// silent no-op.
    #[must_use]
    pub fn exits_error(mut self, exits_error: bool) -> Self {
        self.exits_error = exits_error;
        self
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("custom", &self.handler.is_some())
            .field("exits_error", &self.exits_error)
            .finish()
    }
}

/// A method in the service-wide method table.
#[derive(Clone)]
pub struct PluginMethod {
    name: String,
    owner: String,
    handler: Option<MethodFn>,
}

impl PluginMethod {
    /// Returns the method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the id of the plugin that registered it.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns true if calling the method registers a hook.
    #[must_use]
    pub fn registers_hook(&self) -> bool {
        self.handler.is_none()
    }
}

impl fmt::Debug for PluginMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginMethod")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("registers_hook", &self.registers_hook())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolved
// ─────────────────────────────────────────────────────────────────────────────

/// Service operations reachable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOperation {
    /// [`PluginApi::apply_plugins`].
    ApplyPlugins,
    /// [`PluginApi::has_plugins`].
    HasPlugins,
    /// [`PluginApi::has_presets`].
    HasPresets,
}

/// What a name resolves to on a facade.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// A dynamic method.
    Method(PluginMethod),
    /// A snapshot of a piece of service state.
    State(Value),
    /// A service operation.
    Operation(ServiceOperation),
}

// ─────────────────────────────────────────────────────────────────────────────
// PluginApi
// ─────────────────────────────────────────────────────────────────────────────

/// The registration and query surface bound to one preset or plugin.
///
/// Cheap to clone; clones share the binding, so a rename through
/// [`describe`](Self::describe) is seen by all of them.
#[derive(Clone)]
pub struct PluginApi {
    identity: IdentityRef,
    service: Service,
}

impl PluginApi {
    /// Creates a facade for a freshly registered descriptor and installs the
    /// built-in methods.
    pub(crate) fn new(service: Service, id: &str, key: &str) -> Self {
        {
            let mut methods = service.state.methods.write();
            for name in BUILT_IN_METHODS {
                methods
                    .entry(name.to_string())
                    .or_insert_with(|| PluginMethod {
                        name: name.to_string(),
                        owner: id.to_string(),
                        handler: None,
                    });
            }
        }
        let identity = Arc::new(RwLock::new(Identity {
            id: id.to_string(),
            key: key.to_string(),
        }));
        Self::from_identity(service, identity)
    }

    pub(crate) fn from_identity(service: Service, identity: IdentityRef) -> Self {
        Self { identity, service }
    }

    /// Returns the bound descriptor's id.
    #[must_use]
    pub fn id(&self) -> String {
        self.identity.read().id.clone()
    }

    /// Returns the bound descriptor's config key.
    #[must_use]
    pub fn key(&self) -> String {
        self.identity.read().key.clone()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────

    /// Declares id, key, configuration and enablement of the bound descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::DescribeConflict`] if the new id is taken.
    pub fn describe(&self, describe: Describe) -> Result<(), ServiceError> {
        let state = &self.service.state;
        let mut identity = self.identity.write();
        let mut plugins = state.plugins.write();

        let current = identity.id.clone();
        let Some(index) = plugins.get_index_of(&current) else {
            return Err(ServiceError::UnknownPlugin(current));
        };

        if let Some(id) = describe.id.filter(|id| *id != current) {
            if let Some(existing) = plugins.get(&id) {
                return Err(ServiceError::DescribeConflict {
                    kind: existing.kind,
                    id,
                    existing: existing.path.clone(),
                });
            }
            if let Some((_, mut descriptor)) = plugins.shift_remove_index(index) {
                descriptor.id.clone_from(&id);
                plugins.shift_insert(index, id.clone(), descriptor);
            }
            state.hooks.write().rename_owner(&current, &id);
            debug!(from = %current, to = %id, "renamed plugin");
            identity.id = id;
        }

        let Some(descriptor) = plugins.get_mut(&identity.id) else {
            return Err(ServiceError::UnknownPlugin(identity.id.clone()));
        };
        if let Some(key) = describe.key {
            identity.key.clone_from(&key);
            descriptor.key = key;
        }
        if let Some(config) = describe.config {
            descriptor.config = Some(config);
        }
        descriptor.enable_by = describe.enable_by.unwrap_or_default();
        Ok(())
    }

    /// Registers a hook owned by the bound descriptor.
    ///
    /// # Errors
    ///
    /// Fails if the key is empty, the handler is missing, or the hook table
    /// has already been compiled.
    pub fn register(&self, hook: Hook) -> Result<(), ServiceError> {
        let identity = self.identity.read();
        let record = hook.into_record(&identity.id)?;
        debug!(plugin = %identity.id, key = %record.key, stage = record.stage, "registered hook");
        self.service.state.hooks.write().stage(record)
    }

    /// Registers a command and, if set, its alias.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::DuplicateCommand`] if the name or the alias is
    /// already a command or an alias.
    pub fn register_command(&self, command: Command) -> Result<(), ServiceError> {
        let owner = self.identity.read().id.clone();
        let mut commands = self.service.state.commands.write();
        let name = command.name().to_string();
        let alias = command.alias().map(str::to_string);

        if commands.contains_key(&name) {
            return Err(ServiceError::DuplicateCommand(name));
        }
        if let Some(alias) = &alias
            && (*alias == name || commands.contains_key(alias))
        {
            return Err(ServiceError::DuplicateCommand(alias.clone()));
        }

        debug!(command = %name, alias = ?alias, plugin = %owner, "registered command");
        commands.insert(
            name.clone(),
            CommandEntry::Command {
                command,
                owner: Arc::clone(&self.identity),
            },
        );
        if let Some(alias) = alias {
            commands.insert(alias, CommandEntry::Alias(name));
        }
        Ok(())
    }

    /// Queues presets to expand right after the current one.
    ///
    /// # Errors
    ///
    /// Only allowed while presets are being expanded. Fails if a path cannot
    /// be resolved.
    pub fn register_presets<I, R>(&self, presets: I) -> Result<(), ServiceError>
    where
        I: IntoIterator<Item = R>,
        R: Into<PluginRef>,
    {
        let current = self.service.stage();
        if current != ServiceStage::InitPresets {
            return Err(ServiceError::WrongStage {
                operation: "register_presets",
                allowed: "initPresets",
                current,
            });
        }
        let presets = self
            .service
            .resolve_refs(PluginKind::Preset, presets.into_iter().map(Into::into))?;
        self.service.queue_presets_front(presets);
        Ok(())
    }

    /// Queues plugins.
    ///
    /// While presets expand, plugins go to the end of the plugin queue; while
    /// plugins expand, they go to its front and run next.
    ///
    /// # Errors
    ///
    /// Only allowed during expansion. Fails if a path cannot be resolved.
    pub fn register_plugins<I, R>(&self, plugins: I) -> Result<(), ServiceError>
    where
        I: IntoIterator<Item = R>,
        R: Into<PluginRef>,
    {
        let current = self.service.stage();
        if !matches!(
            current,
            ServiceStage::InitPresets | ServiceStage::InitPlugins
        ) {
            return Err(ServiceError::WrongStage {
                operation: "register_plugins",
                allowed: "initPresets or initPlugins",
                current,
            });
        }
        let plugins = self
            .service
            .resolve_refs(PluginKind::Plugin, plugins.into_iter().map(Into::into))?;
        if current == ServiceStage::InitPresets {
            self.service.queue_plugins_back(plugins);
        } else {
            self.service.queue_plugins_front(plugins);
        }
        Ok(())
    }

    /// Publishes a method in the service-wide method table.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::DuplicateMethod`] if the name is taken and the
    /// method was not marked `exits_error(false)`.
    pub fn register_method(&self, method: Method) -> Result<(), ServiceError> {
        let owner = self.identity.read().id.clone();
        let mut methods = self.service.state.methods.write();
        if methods.contains_key(&method.name) {
            if method.exits_error {
                return Err(ServiceError::DuplicateMethod(method.name));
            }
            return Ok(());
        }
        debug!(method = %method.name, plugin = %owner, "registered method");
        methods.insert(
            method.name.clone(),
            PluginMethod {
                name: method.name,
                owner,
                handler: method.handler,
            },
        );
        Ok(())
    }

    /// Adds ids to the service-wide skip set.
    pub fn skip_plugins<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut skipped = self.service.state.skip_plugin_ids.write();
        for id in ids {
            skipped.insert(id.into());
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lookup
    // ─────────────────────────────────────────────────────────────────────

    /// Looks a name up in the method table, then in the service state and
    /// operations (`stage`, `paths`, `cwd`, `pkg`, `userConfig`, `config`,
    /// `env`, `args`, `applyPlugins`, `hasPlugins`, `hasPresets`).
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Resolved> {
        if let Some(method) = self.service.state.methods.read().get(name).cloned() {
            return Some(Resolved::Method(method));
        }
        let value = match name {
            "stage" => Value::from(self.stage().ordinal()),
            "paths" => serde_json::to_value(self.paths()).ok()?,
            "cwd" => Value::String(self.cwd().to_string_lossy().into_owned()),
            "pkg" => self.pkg(),
            "userConfig" => Value::Object(self.user_config()),
            "config" => self.config().unwrap_or(Value::Null),
            "env" => Value::String(self.env()),
            "args" => self.args().to_value(),
            "applyPlugins" => return Some(Resolved::Operation(ServiceOperation::ApplyPlugins)),
            "hasPlugins" => return Some(Resolved::Operation(ServiceOperation::HasPlugins)),
            "hasPresets" => return Some(Resolved::Operation(ServiceOperation::HasPresets)),
            _ => return None,
        };
        Some(Resolved::State(value))
    }

    /// Calls a dynamic method on behalf of the bound descriptor.
    ///
    /// # Errors
    ///
    /// Fails with [`ServiceError::UnknownMethod`] for unknown names, with
    /// [`ServiceError::MethodArgument`] when a hook-registering method gets a
    /// plain value, and with whatever the method itself reports.
    pub fn call(&self, name: &str, arg: impl Into<MethodArg>) -> Result<Value, ServiceError> {
        let method = self
            .service
            .state
            .methods
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::UnknownMethod(name.to_string()))?;

        match method.handler {
            None => {
                let hook = arg
                    .into()
                    .into_hook()
                    .ok_or_else(|| ServiceError::MethodArgument(name.to_string()))?;
                self.register(hook.with_key(name))?;
                Ok(Value::Null)
            }
            Some(handler) => handler(self, arg.into()).map_err(|source| ServiceError::Method {
                name: name.to_string(),
                source,
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Service state
    // ─────────────────────────────────────────────────────────────────────

    /// Returns the current lifecycle stage.
    #[must_use]
    pub fn stage(&self) -> ServiceStage {
        self.service.stage()
    }

    /// Returns the project paths.
    #[must_use]
    pub fn paths(&self) -> Paths {
        self.service.paths()
    }

    /// Returns the project root.
    #[must_use]
    pub fn cwd(&self) -> PathBuf {
        self.service.cwd().to_path_buf()
    }

    /// Returns the env name (`development`, `production`, ...).
    #[must_use]
    pub fn env(&self) -> String {
        self.service.env().to_string()
    }

    /// Returns the project's `package.json`, or an empty object when it is
    /// missing or unreadable.
    #[must_use]
    pub fn pkg(&self) -> Value {
        self.service.pkg().clone()
    }

    /// Returns the raw user configuration.
    #[must_use]
    pub fn user_config(&self) -> Map<String, Value> {
        self.service.user_config()
    }

    /// Returns the final configuration once it has been computed.
    #[must_use]
    pub fn config(&self) -> Option<Value> {
        self.service.config()
    }

    /// Returns the arguments of the running command.
    #[must_use]
    pub fn args(&self) -> Args {
        self.service.args()
    }

    /// Dispatches the hooks registered on a key.
    ///
    /// # Errors
    ///
    /// See [`Service::apply_plugins`].
    pub async fn apply_plugins(&self, request: ApplyPlugins) -> Result<Value, ServiceError> {
        self.service.apply_plugins(request).await
    }

    /// Returns true if every id is a registered, enabled plugin.
    #[must_use]
    pub fn has_plugins(&self, ids: &[&str]) -> bool {
        self.service.has_plugins(ids)
    }

    /// Returns true if every id is a registered, enabled preset.
    #[must_use]
    pub fn has_presets(&self, ids: &[&str]) -> bool {
        self.service.has_presets(ids)
    }
}

impl fmt::Debug for PluginApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let identity = self.identity.read();
        f.debug_struct("PluginApi")
            .field("id", &identity.id)
            .field("key", &identity.key)
            .finish_non_exhaustive()
    }
}
