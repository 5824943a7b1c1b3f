//! Argument parsing and startup for the `kiln` binary.
//!
//! ```bash
//! kiln [--cwd <dir>] [--env <name>] [--log-level <level>] [--log-format <format>] <command> [args...]
//! ```
//!
//! Everything after the command name is handed to the command untouched, so
//! `kiln dev --port 3000` runs `dev` with `{ "port": 3000 }`.

use std::path::PathBuf;

use clap::Parser;
use kiln_core_plugins::{BuiltInPreset, TracingFormat, TracingPlugin, install_subscriber};
use kiln_service::command::Args;
use kiln_service::plugin::PluginDescriptor;
use kiln_service::service::{Service, ServiceOptions};
use kiln_service::ServiceError;
use serde_json::Value;
use tracing::Level;

/// Command-line options of the `kiln` binary.
#[derive(Debug, Parser)]
#[command(name = "kiln", version, about = "Runs a command of a Kiln project", long_about = None)]
pub struct Cli {
    /// Project root. Defaults to the current directory.
    #[arg(long, env = "KILN_CWD")]
    pub cwd: Option<PathBuf>,

    /// Env name (`development`, `production`, ...). Overrides `$KILN_ENV`.
    #[arg(long)]
    pub env: Option<String>,

    /// Maximum log level. Takes precedence over the `logging` config.
    #[arg(long)]
    pub log_level: Option<Level>,

    /// Log output format: pretty, compact or json.
    #[arg(long)]
    pub log_format: Option<TracingFormat>,

    /// The command to run.
    pub command: String,

    /// Arguments passed to the command.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl Cli {
    /// The tracing plugin for the flags given.
    ///
    /// `$RUST_LOG`, when set, becomes the filter.
    #[must_use]
    pub fn tracing(&self) -> TracingPlugin {
        let mut plugin = TracingPlugin::new();
        if let Some(level) = self.log_level {
            plugin = plugin.with_level(level);
        }
        if let Some(format) = self.log_format {
            plugin = plugin.with_format(format);
        }
        if let Ok(filter) = std::env::var("RUST_LOG") {
            plugin = plugin.with_env_filter(filter);
        }
        plugin
    }

    /// Whether logging was configured on the command line.
    ///
    /// If so the subscriber is installed right away and the project's
    /// `logging` config is ignored.
    #[must_use]
    pub fn logging_overridden(&self) -> bool {
        self.log_level.is_some() || self.log_format.is_some() || std::env::var_os("RUST_LOG").is_some()
    }

    /// The command's arguments, led by the command name.
    ///
    /// [`Service::run`] strips exactly that leading name, so a positional
    /// repeating it survives.
    #[must_use]
    pub fn command_args(&self) -> Args {
        Args::parse(core::iter::once(self.command.clone()).chain(self.args.iter().cloned()))
    }

    /// Service options for this invocation, with the built-in preset first.
    ///
    /// # Errors
    ///
    /// Fails if the project root does not exist.
    pub fn options(&self) -> Result<ServiceOptions, ServiceError> {
        let cwd = match &self.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir().map_err(|_| ServiceError::MissingCwd(PathBuf::from(".")))?,
        };
        let cwd = cwd.canonicalize().map_err(|_| ServiceError::MissingCwd(cwd.clone()))?;

        let preset = BuiltInPreset::default().with_tracing(self.tracing());
        let mut options = ServiceOptions::new(cwd).with_preset(PluginDescriptor::of(preset));
        if let Some(env) = &self.env {
            options = options.with_env(env.clone());
        }
        Ok(options)
    }
}

/// Runs the command described by `cli`.
///
/// # Errors
///
/// Fails with the first error of the service or the command.
pub async fn run(cli: Cli) -> Result<Value, ServiceError> {
    if cli.logging_overridden() {
        let plugin = cli.tracing();
        install_subscriber(&plugin.resolve(None));
    }
    let service = Service::new(cli.options()?)?;
    service.run(&cli.command, cli.command_args()).await
}
