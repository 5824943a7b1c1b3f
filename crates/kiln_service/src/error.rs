//! Error types for the orchestration engine.
//!
//! Every failure is fatal to the call chain that raised it: the service never
//! retries, and startup does not continue after an error. Code supplied by
//! presets and plugins reports failures as [`BoxError`], which the service wraps
//! with the key, plugin or command it was running.

use std::path::PathBuf;

use crate::hook::{ApplyKind, SeedShape};
use crate::plugin::PluginKind;
use crate::stage::ServiceStage;

/// Error type returned by entry functions, hook handlers, commands and methods.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the service and its facade.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// A descriptor was registered with an id that is already taken.
    #[error(
        "{kind} {id} is already registered by {existing}, {kind} from {conflicting} register failed"
    )]
    DuplicatePlugin {
        /// Whether the conflicting descriptor is a preset or a plugin.
        kind: PluginKind,
        /// The contested id.
        id: String,
        /// Path of the descriptor that owns the id.
        existing: String,
        /// Path of the descriptor that tried to claim it.
        conflicting: String,
    },

    /// `describe()` tried to rename a descriptor to an id that is taken.
    #[error("describe() failed, {kind} {id} is already registered by {existing}")]
    DescribeConflict {
        /// Kind of the descriptor that owns the id.
        kind: PluginKind,
        /// The contested id.
        id: String,
        /// Path of the descriptor that owns the id.
        existing: String,
    },

    /// The facade refers to a descriptor that is no longer in the store.
    #[error("plugin {0} is not registered")]
    UnknownPlugin(String),

    /// A hook was registered without a key.
    #[error("register() failed, hook key must be a non-empty string")]
    EmptyHookKey,

    /// A hook was registered without a handler.
    #[error("register() failed, hook '{0}' has no handler")]
    MissingHandler(String),

    /// A hook was registered after the hook table was compiled.
    #[error("register() failed, hook '{key}' of {plugin} arrived after hooks were compiled")]
    HooksFrozen {
        /// The extension point key.
        key: String,
        /// The plugin that tried to register.
        plugin: String,
    },

    /// A command (or alias) with this name already exists.
    #[error("register_command() failed, the command {0} already exists")]
    DuplicateCommand(String),

    /// A method with this name already exists.
    #[error("register_method() failed, method {0} already exists")]
    DuplicateMethod(String),

    /// An operation was called outside the stages it is allowed in.
    #[error("{operation}() failed, it is only allowed during {allowed}, current stage is {current}")]
    WrongStage {
        /// The rejected operation.
        operation: &'static str,
        /// Human-readable list of allowed stages.
        allowed: &'static str,
        /// The stage the service is in.
        current: ServiceStage,
    },

    /// An operation was called before the service reached its minimum stage.
    #[error("{operation}() requires stage {required} or later, current stage is {current}")]
    StageNotReached {
        /// The rejected operation.
        operation: &'static str,
        /// The minimum stage.
        required: ServiceStage,
        /// The stage the service is in.
        current: ServiceStage,
    },

    /// An `add` dispatch was seeded with something other than an array.
    #[error("apply_plugins() failed, initial value of '{0}' must be an array for add hooks")]
    InitialValueNotArray(String),

    /// A key was dispatched with a kind or seed shape other than its first
    /// dispatch used.
    #[error(
        "apply_plugins() failed, '{key}' was first applied as {kind} with {shape} seed, got {requested_kind} with {requested_shape} seed"
    )]
    ApplyMismatch {
        /// The dispatched key.
        key: String,
        /// Kind of the first dispatch.
        kind: ApplyKind,
        /// Seed shape of the first dispatch.
        shape: SeedShape,
        /// Kind of the rejected dispatch.
        requested_kind: ApplyKind,
        /// Seed shape of the rejected dispatch.
        requested_shape: SeedShape,
    },

    /// A composition kind name could not be parsed.
    #[error("apply_plugins() failed, apply kind is not defined or is not matched, got '{0}'")]
    UnknownApplyKind(String),

    /// No command or alias with this name exists.
    #[error("run command failed, command {0} does not exist")]
    UnknownCommand(String),

    /// No dynamic method with this name exists.
    #[error("method {0} is not registered")]
    UnknownMethod(String),

    /// A hook-registering method was called with a plain value.
    #[error("method {0} registers a hook and must be called with a handler")]
    MethodArgument(String),

    /// The working directory does not exist.
    #[error("cwd {} does not exist", .0.display())]
    MissingCwd(PathBuf),

    /// A bare module reference could not be resolved.
    #[error("cannot resolve {kind} '{path}'")]
    ModuleNotFound {
        /// Whether a preset or a plugin was requested.
        kind: PluginKind,
        /// The unresolved reference.
        path: String,
    },

    /// An env file exists but could not be loaded.
    #[error("failed to load env file {}: {source}", .path.display())]
    Env {
        /// The env file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: dotenvy::Error,
    },

    /// A config file could not be read.
    #[error("failed to read config file {}: {source}", .path.display())]
    ConfigIo {
        /// The config file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A config file is not a valid JSON object.
    #[error("invalid config file {}: {source}", .path.display())]
    ConfigParse {
        /// The config file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// `modifyPaths` produced something that is not a paths object.
    #[error("invalid paths returned from modifyPaths: {0}")]
    InvalidPaths(#[source] serde_json::Error),

    /// An entry function failed.
    #[error("{kind} {id} failed to apply: {source}")]
    Apply {
        /// Whether the failing descriptor is a preset or a plugin.
        kind: PluginKind,
        /// The failing descriptor.
        id: String,
        /// The error returned by the entry function.
        source: BoxError,
    },

    /// A hook handler failed.
    #[error("hook '{key}' of {plugin} failed: {source}")]
    Hook {
        /// The extension point key.
        key: String,
        /// The plugin that owns the hook.
        plugin: String,
        /// The error returned by the handler.
        source: BoxError,
    },

    /// A command handler failed.
    #[error("command {name} failed: {source}")]
    Command {
        /// The canonical command name.
        name: String,
        /// The error returned by the handler.
        source: BoxError,
    },

    /// A custom method failed.
    #[error("method {name} failed: {source}")]
    Method {
        /// The method name.
        name: String,
        /// The error returned by the method.
        source: BoxError,
    },
}
