//! The lifecycle orchestrator.
//!
//! A [`Service`] owns the descriptor store, the hook table, the command and
//! method tables and the configuration, and drives them through the startup
//! stages:
//!
//! ```text
//! Service::new ──► init ──► expand presets ──► expand plugins ──► compile hooks
//!                                                                     │
//!      run_command ◄── onStart ◄── modifyPaths ◄── modifyConfig ◄── onPluginReady
//! ```
//!
//! # Example
//!
//! ```
//! use kiln_service::api::PluginApi;
//! use kiln_service::command::{Args, Command};
//! use kiln_service::error::BoxError;
//! use kiln_service::plugin::{ApplyOutput, Plugin, PluginDescriptor};
//! use kiln_service::service::{Service, ServiceOptions};
//! use serde_json::{Value, json};
//!
//! struct Hello;
//!
//! impl Plugin for Hello {
//!     const ID: &'static str = "hello";
//!
//!     fn apply(&self, api: &PluginApi) -> Result<ApplyOutput, BoxError> {
//!         api.register_command(
//!             Command::new("hello", |_api, args: Args| async move {
//!                 Ok(json!({ "greeted": args.positional }))
//!             })
//!             .with_alias("hi"),
//!         )?;
//!         Ok(ApplyOutput::default())
//!     }
//! }
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//! let cwd = std::env::current_dir().unwrap();
//! let service = Service::new(ServiceOptions::new(cwd).with_plugin(PluginDescriptor::of(Hello))).unwrap();
//! let output = service.run("hi", Args::parse(["hi", "world"])).await.unwrap();
//! assert_eq!(output, json!({ "greeted": ["world"] }));
//! # });
//! ```

mod expand;

pub(crate) use expand::ExpansionQueues;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::api::{IdentityRef, PluginApi, PluginMethod};
use crate::command::{Args, Command};
use crate::config::{ConfigSource, JsonConfig};
use crate::enable::is_enabled;
use crate::error::ServiceError;
use crate::hook::{ApplyKind, ApplyPlugins, HookRecord, HookTable, SeedShape, compose, order_hooks};
use crate::paths::Paths;
use crate::plugin::{ModuleLoader, ModuleRegistry, PluginDescriptor, PluginKind, PluginRef};
use crate::stage::ServiceStage;

/// Env files loaded at construction, highest priority first.
const ENV_FILES: [&str; 2] = [".env.local", ".env"];

/// Env var listing extra presets, comma-separated.
pub const PRESETS_ENV: &str = "KILN_PRESETS";

/// Env var listing extra plugins, comma-separated.
pub const PLUGINS_ENV: &str = "KILN_PLUGINS";

/// Env var selecting the env name when the options do not set one.
pub const ENV_NAME_ENV: &str = "KILN_ENV";

// ─────────────────────────────────────────────────────────────────────────────
// ServiceOptions
// ─────────────────────────────────────────────────────────────────────────────

/// Construction options for a [`Service`].
pub struct ServiceOptions {
    cwd: PathBuf,
    env: Option<String>,
    pkg: Option<Value>,
    presets: Vec<PluginRef>,
    plugins: Vec<PluginRef>,
    config_source: Option<Arc<dyn ConfigSource>>,
    loader: Option<Arc<dyn ModuleLoader>>,
    load_env_files: bool,
}

impl ServiceOptions {
    /// Options for a project rooted at `cwd`.
    #[must_use]
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            env: None,
            pkg: None,
            presets: Vec::new(),
            plugins: Vec::new(),
            config_source: None,
            loader: None,
            load_env_files: true,
        }
    }

    /// Sets the env name. Defaults to `$KILN_ENV`, then `development`.
    #[must_use]
    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    /// Uses `pkg` instead of reading `package.json`.
    #[must_use]
    pub fn with_pkg(mut self, pkg: Value) -> Self {
        self.pkg = Some(pkg);
        self
    }

    /// Adds an initial preset.
    #[must_use]
    pub fn with_preset(mut self, preset: impl Into<PluginRef>) -> Self {
        self.presets.push(preset.into());
        self
    }

    /// Adds initial presets.
    #[must_use]
    pub fn with_presets<I, R>(mut self, presets: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<PluginRef>,
    {
        self.presets.extend(presets.into_iter().map(Into::into));
        self
    }

    /// Adds an initial plugin.
    #[must_use]
    pub fn with_plugin(mut self, plugin: impl Into<PluginRef>) -> Self {
        self.plugins.push(plugin.into());
        self
    }

    /// Adds initial plugins.
    #[must_use]
    pub fn with_plugins<I, R>(mut self, plugins: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<PluginRef>,
    {
        self.plugins.extend(plugins.into_iter().map(Into::into));
        self
    }

    /// Reads the user configuration from these files instead of the defaults.
    #[must_use]
    pub fn with_config_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.config_source = Some(Arc::new(JsonConfig::with_files(files)));
        self
    }

    /// Uses a custom configuration source.
    #[must_use]
    pub fn with_config_source(mut self, source: impl ConfigSource) -> Self {
        self.config_source = Some(Arc::new(source));
        self
    }

    /// Uses a custom module loader for bare path references.
    #[must_use]
    pub fn with_loader(mut self, loader: impl ModuleLoader) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Whether `.env` / `.env.local` are loaded (default true).
    #[must_use]
    pub fn with_env_files(mut self, load: bool) -> Self {
        self.load_env_files = load;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

/// A command table entry.
pub(crate) enum CommandEntry {
    Command {
        command: Command,
        owner: IdentityRef,
    },
    /// Points at a canonical command name.
    Alias(String),
}

/// Everything the service owns. Locks are never held across an `.await` or
/// while plugin code runs. When several are taken together the order is
/// identity, plugins, hooks.
pub(crate) struct ServiceState {
    pub(crate) cwd: PathBuf,
    pub(crate) env: String,
    pub(crate) pkg: Value,
    pub(crate) loader: Arc<dyn ModuleLoader>,
    pub(crate) config_source: Arc<dyn ConfigSource>,
    pub(crate) initial_presets: Mutex<Vec<PluginDescriptor>>,
    pub(crate) initial_plugins: Mutex<Vec<PluginDescriptor>>,
    pub(crate) stage: RwLock<ServiceStage>,
    pub(crate) plugins: RwLock<IndexMap<String, PluginDescriptor>>,
    pub(crate) skip_plugin_ids: RwLock<HashSet<String>>,
    pub(crate) commands: RwLock<HashMap<String, CommandEntry>>,
    pub(crate) methods: RwLock<HashMap<String, PluginMethod>>,
    pub(crate) hooks: RwLock<HookTable>,
    /// Kind and seed shape fixed by the first dispatch of each key.
    pub(crate) dispatches: Mutex<HashMap<String, (ApplyKind, SeedShape)>>,
    pub(crate) queues: Mutex<Option<ExpansionQueues>>,
    pub(crate) default_fragments: Mutex<Map<String, Value>>,
    pub(crate) user_config: RwLock<Map<String, Value>>,
    pub(crate) config: RwLock<Option<Value>>,
    pub(crate) paths: RwLock<Paths>,
    pub(crate) args: RwLock<Args>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Service
// ─────────────────────────────────────────────────────────────────────────────

/// The plugin registry and lifecycle driver.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Service {
    pub(crate) state: Arc<ServiceState>,
}

impl Service {
    /// Creates a service: loads env files, `package.json` and the user
    /// configuration, and resolves the initial presets and plugins.
    ///
    /// Initial references come from the options, then `$KILN_PRESETS` /
    /// `$KILN_PLUGINS`, then the `presets` / `plugins` arrays of the user
    /// configuration. Repeated paths are dropped.
    ///
    /// # Errors
    ///
    /// Fails if `cwd` is not a directory, an env or config file is malformed,
    /// or an initial reference cannot be resolved.
    pub fn new(options: ServiceOptions) -> Result<Self, ServiceError> {
        let ServiceOptions {
            cwd,
            env,
            pkg,
            presets,
            plugins,
            config_source,
            loader,
            load_env_files,
        } = options;

        if !cwd.is_dir() {
            return Err(ServiceError::MissingCwd(cwd));
        }
        if load_env_files {
            load_env(&cwd)?;
        }

        let env = env
            .or_else(|| std::env::var(ENV_NAME_ENV).ok())
            .unwrap_or_else(|| "development".to_string());
        let pkg = pkg.unwrap_or_else(|| read_pkg(&cwd));
        let config_source = config_source.unwrap_or_else(|| Arc::new(JsonConfig::new()));
        let loader = loader.unwrap_or_else(|| Arc::new(ModuleRegistry::new()));

        let user_config = config_source.load(&cwd, &env)?;
        let paths = Paths::resolve(&cwd, &Value::Object(user_config.clone()), &env);

        let presets = initial_refs(presets, PRESETS_ENV, user_config.get("presets"));
        let plugins = initial_refs(plugins, PLUGINS_ENV, user_config.get("plugins"));

        let service = Self {
            state: Arc::new(ServiceState {
                cwd,
                env,
                pkg,
                loader,
                config_source,
                initial_presets: Mutex::new(Vec::new()),
                initial_plugins: Mutex::new(Vec::new()),
                stage: RwLock::new(ServiceStage::Uninitialized),
                plugins: RwLock::new(IndexMap::new()),
                skip_plugin_ids: RwLock::new(HashSet::new()),
                commands: RwLock::new(HashMap::new()),
                methods: RwLock::new(HashMap::new()),
                hooks: RwLock::new(HookTable::default()),
                dispatches: Mutex::new(HashMap::new()),
                queues: Mutex::new(None),
                default_fragments: Mutex::new(Map::new()),
                user_config: RwLock::new(user_config),
                config: RwLock::new(None),
                paths: RwLock::new(paths),
                args: RwLock::new(Args::new()),
            }),
        };

        let presets = service.resolve_refs(PluginKind::Preset, presets)?;
        let plugins = service.resolve_refs(PluginKind::Plugin, plugins)?;
        debug!(
            cwd = %service.state.cwd.display(),
            env = %service.state.env,
            presets = presets.len(),
            plugins = plugins.len(),
            "created service"
        );
        *service.state.initial_presets.lock() = presets;
        *service.state.initial_plugins.lock() = plugins;

        Ok(service)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Runs the startup lifecycle up to and including `GetPaths`.
    ///
    /// # Errors
    ///
    /// Fails if called twice, or with the first error of any entry function,
    /// registration or hook.
    pub async fn init(&self) -> Result<(), ServiceError> {
        let current = self.stage();
        if current != ServiceStage::Uninitialized {
            return Err(ServiceError::WrongStage {
                operation: "init",
                allowed: "uninitialized",
                current,
            });
        }
        self.set_stage(ServiceStage::Init);

        self.init_presets_and_plugins().await?;

        self.set_stage(ServiceStage::InitHooks);
        self.state.hooks.write().compile();

        self.set_stage(ServiceStage::PluginReady);
        self.apply_plugins(ApplyPlugins::event("onPluginReady"))
            .await?;

        self.set_stage(ServiceStage::GetConfig);
        let defaults = self.default_config();
        let defaults = self
            .apply_plugins(ApplyPlugins::modify("modifyDefaultConfig").initial_value(defaults))
            .await?;
        let merged = self
            .state
            .config_source
            .merge(&defaults, &self.state.user_config.read());
        let config = self
            .apply_plugins(ApplyPlugins::modify("modifyConfig").initial_value(merged))
            .await?;
        *self.state.config.write() = Some(config.clone());

        self.set_stage(ServiceStage::GetPaths);
        let paths = Paths::resolve(&self.state.cwd, &config, &self.state.env);
        let paths = serde_json::to_value(paths).map_err(ServiceError::InvalidPaths)?;
        let paths = self
            .apply_plugins(ApplyPlugins::modify("modifyPaths").initial_value(paths))
            .await?;
        let paths: Paths = serde_json::from_value(paths).map_err(ServiceError::InvalidPaths)?;
        *self.state.paths.write() = paths;

        Ok(())
    }

    /// Initializes the service and runs a command.
    ///
    /// A leading positional equal to `name` is removed from `args`. `onStart`
    /// fires with `{ "args": ... }` before the command runs.
    ///
    /// # Errors
    ///
    /// Fails with any error of [`init`](Self::init), the `onStart` hooks or
    /// the command.
    pub async fn run(&self, name: &str, mut args: Args) -> Result<Value, ServiceError> {
        args.shift_command(name);
        self.state.args.write().clone_from(&args);

        self.init().await?;
        self.set_stage(ServiceStage::Run);

        self.apply_plugins(ApplyPlugins::event("onStart").args(json!({ "args": args.to_value() })))
            .await?;
        self.execute(name, args).await
    }

    /// Runs a command by name or alias.
    ///
    /// A leading positional equal to `name` is removed from `args`.
    ///
    /// # Errors
    ///
    /// Fails before `init()` has started, for unknown names, or with the
    /// command's own error.
    pub async fn run_command(&self, name: &str, mut args: Args) -> Result<Value, ServiceError> {
        args.shift_command(name);
        self.execute(name, args).await
    }

    /// Runs a command with `args` exactly as given.
    async fn execute(&self, name: &str, args: Args) -> Result<Value, ServiceError> {
        let current = self.stage();
        if current < ServiceStage::Init {
            return Err(ServiceError::StageNotReached {
                operation: "run_command",
                required: ServiceStage::Init,
                current,
            });
        }

        let (command, owner) = self.lookup_command(name)?;
        info!(command = %command.name(), "running command");

        let api = PluginApi::from_identity(self.clone(), owner);
        (command.handler())(api, args)
            .await
            .map_err(|source| ServiceError::Command {
                name: command.name().to_string(),
                source,
            })
    }

    /// Dispatches the hooks registered on a key.
    ///
    /// Only hooks of enabled plugins run. They are ordered by stage, then
    /// `before`, then registration order, and awaited one at a time. Before
    /// the hook table is compiled there is nothing to run and the seed value
    /// is returned as is.
    ///
    /// The first dispatch of a key fixes its kind and seed shape; later
    /// dispatches of that key must match both.
    ///
    /// # Errors
    ///
    /// Fails if an `add` dispatch is seeded with a non-array, if the kind or
    /// seed shape differs from the key's first dispatch, or with the first
    /// error a hook returns.
    pub async fn apply_plugins(&self, request: ApplyPlugins) -> Result<Value, ServiceError> {
        self.check_dispatch(&request)?;
        let hooks = self.state.hooks.read().hooks(request.key());
        let enabled = hooks
            .into_iter()
            .filter(|hook| self.is_plugin_enabled(hook.owner()))
            .collect();
        compose(&request, order_hooks(enabled)).await
    }

    fn check_dispatch(&self, request: &ApplyPlugins) -> Result<(), ServiceError> {
        let requested = (request.kind(), request.seed_shape());
        if requested.0 == ApplyKind::Add && requested.1 != SeedShape::Array {
            return Err(ServiceError::InitialValueNotArray(request.key().to_string()));
        }
        let mut dispatches = self.state.dispatches.lock();
        match dispatches.get(request.key()) {
            Some(&(kind, shape)) if (kind, shape) != requested => Err(ServiceError::ApplyMismatch {
                key: request.key().to_string(),
                kind,
                shape,
                requested_kind: requested.0,
                requested_shape: requested.1,
            }),
            Some(_) => Ok(()),
            None => {
                dispatches.insert(request.key().to_string(), requested);
                Ok(())
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Enablement
    // ─────────────────────────────────────────────────────────────────────

    /// Returns true if the plugin's hooks currently take part in dispatches.
    ///
    /// Unknown ids are disabled.
    #[must_use]
    pub fn is_plugin_enabled(&self, id: &str) -> bool {
        let (key, enable_by) = {
            let plugins = self.state.plugins.read();
            let Some(descriptor) = plugins.get(id) else {
                return false;
            };
            (descriptor.key.clone(), descriptor.enable_by.clone())
        };
        let skipped = self.state.skip_plugin_ids.read().contains(id);
        let configured = self.state.user_config.read().get(&key).cloned();
        is_enabled(skipped, configured.as_ref(), &enable_by)
    }

    /// Returns true if every id is a registered, enabled plugin.
    #[must_use]
    pub fn has_plugins(&self, ids: &[&str]) -> bool {
        self.has_of_kind(ids, PluginKind::Plugin)
    }

    /// Returns true if every id is a registered, enabled preset.
    #[must_use]
    pub fn has_presets(&self, ids: &[&str]) -> bool {
        self.has_of_kind(ids, PluginKind::Preset)
    }

    fn has_of_kind(&self, ids: &[&str], kind: PluginKind) -> bool {
        ids.iter().all(|id| {
            let registered = self
                .state
                .plugins
                .read()
                .get(*id)
                .is_some_and(|descriptor| descriptor.kind == kind);
            registered && self.is_plugin_enabled(id)
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────

    /// Returns the current lifecycle stage.
    #[must_use]
    pub fn stage(&self) -> ServiceStage {
        *self.state.stage.read()
    }

    /// Advances the stage. Requests to move backwards are ignored.
    pub(crate) fn set_stage(&self, stage: ServiceStage) {
        let mut current = self.state.stage.write();
        if stage < *current {
            debug!(current = %*current, requested = %stage, "ignored stage regression");
            return;
        }
        debug!(stage = %stage, "entered stage");
        *current = stage;
    }

    /// Returns the project root.
    #[must_use]
    pub fn cwd(&self) -> &Path {
        &self.state.cwd
    }

    /// Returns the env name.
    #[must_use]
    pub fn env(&self) -> &str {
        &self.state.env
    }

    /// Returns the project's `package.json` (an empty object when absent).
    #[must_use]
    pub fn pkg(&self) -> &Value {
        &self.state.pkg
    }

    /// Returns the project paths.
    #[must_use]
    pub fn paths(&self) -> Paths {
        self.state.paths.read().clone()
    }

    /// Returns the raw user configuration.
    #[must_use]
    pub fn user_config(&self) -> Map<String, Value> {
        self.state.user_config.read().clone()
    }

    /// Returns the final configuration once `init()` has computed it.
    #[must_use]
    pub fn config(&self) -> Option<Value> {
        self.state.config.read().clone()
    }

    /// Returns the arguments of the running command.
    #[must_use]
    pub fn args(&self) -> Args {
        self.state.args.read().clone()
    }

    /// Returns a registered descriptor.
    #[must_use]
    pub fn plugin(&self, id: &str) -> Option<PluginDescriptor> {
        self.state.plugins.read().get(id).cloned()
    }

    /// Returns every registered id in registration order.
    #[must_use]
    pub fn plugin_ids(&self) -> Vec<String> {
        self.state.plugins.read().keys().cloned().collect()
    }

    /// Returns the compiled hooks on `key`, in registration order.
    #[must_use]
    pub fn hooks(&self, key: &str) -> Vec<HookRecord> {
        self.state.hooks.read().hooks(key)
    }

    /// Returns a command by name or alias.
    #[must_use]
    pub fn command(&self, name: &str) -> Option<Command> {
        self.lookup_command(name).ok().map(|(command, _)| command)
    }

    /// Returns the canonical command names, sorted.
    #[must_use]
    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .commands
            .read()
            .iter()
            .filter(|(_, entry)| matches!(entry, CommandEntry::Command { .. }))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn lookup_command(&self, name: &str) -> Result<(Command, IdentityRef), ServiceError> {
        let commands = self.state.commands.read();
        let entry = match commands.get(name) {
            Some(CommandEntry::Alias(target)) => commands.get(target),
            entry => entry,
        };
        match entry {
            Some(CommandEntry::Command { command, owner }) => {
                Ok((command.clone(), Arc::clone(owner)))
            }
            _ => Err(ServiceError::UnknownCommand(name.to_string())),
        }
    }

    /// Builds the default configuration from plugin defaults and the
    /// fragments presets returned.
    fn default_config(&self) -> Value {
        let mut defaults: Vec<(String, Value)> = self
            .state
            .plugins
            .read()
            .values()
            .filter_map(|descriptor| {
                let default = descriptor.config.as_ref()?.default.clone()?;
                Some((descriptor.key.clone(), default))
            })
            .collect();
        defaults.extend(self.state.default_fragments.lock().clone());
        self.state.config_source.default_config(defaults)
    }
}

impl core::fmt::Debug for Service {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Service")
            .field("cwd", &self.state.cwd)
            .field("env", &self.state.env)
            .field("stage", &self.stage())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Construction helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Loads `.env.local` then `.env`; variables already set are kept.
fn load_env(cwd: &Path) -> Result<(), ServiceError> {
    for file in ENV_FILES {
        let path = cwd.join(file);
        if !path.is_file() {
            continue;
        }
        dotenvy::from_path(&path).map_err(|source| ServiceError::Env {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "loaded env file");
    }
    Ok(())
}

/// Reads `package.json`; anything unreadable counts as empty.
fn read_pkg(cwd: &Path) -> Value {
    let path = cwd.join("package.json");
    std::fs::read_to_string(&path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .filter(Value::is_object)
        .unwrap_or_else(|| Value::Object(Map::new()))
}

/// Options first, then the env var, then the config array; repeated paths
/// are dropped.
fn initial_refs(from_options: Vec<PluginRef>, env_var: &str, from_config: Option<&Value>) -> Vec<PluginRef> {
    let from_env = std::env::var(env_var)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|path| !path.is_empty())
                .map(PluginRef::from)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let from_config = from_config
        .and_then(Value::as_array)
        .map(|paths| {
            paths
                .iter()
                .filter_map(Value::as_str)
                .map(PluginRef::from)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let mut seen = HashSet::new();
    from_options
        .into_iter()
        .chain(from_env)
        .chain(from_config)
        .filter(|reference| match reference {
            PluginRef::Path(path) => seen.insert(path.clone()),
            PluginRef::Descriptor(_) => true,
        })
        .collect()
}
