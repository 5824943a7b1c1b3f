//! Commands and the arguments they run with.

use core::fmt;
use core::future::Future;
use core::iter::Peekable;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::BoxFuture;
use crate::api::PluginApi;
use crate::error::BoxError;

// ─────────────────────────────────────────────────────────────────────────────
// Command
// ─────────────────────────────────────────────────────────────────────────────

/// Type-erased command handler.
///
/// Receives the facade of the plugin that registered the command.
pub type CommandFn =
    Arc<dyn Fn(PluginApi, Args) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

/// A named command contributed by a plugin.
///
/// # Example
///
/// ```
/// use kiln_service::command::Command;
/// use serde_json::Value;
///
/// let build = Command::new("build", |_api, _args| async { Ok(Value::Null) })
///     .with_alias("b")
///     .with_description("build the application for production");
///
/// assert_eq!(build.name(), "build");
/// assert_eq!(build.alias(), Some("b"));
/// ```
#[derive(Clone)]
pub struct Command {
    name: String,
    description: Option<String>,
    alias: Option<String>,
    handler: CommandFn,
}

impl Command {
    /// Creates a command from an async handler.
    #[must_use]
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(PluginApi, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            alias: None,
            handler: Arc::new(move |api, args| Box::pin(handler(api, args))),
        }
    }

    /// Sets the description shown in help output.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets an alternative name.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Returns the canonical name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the alias.
    #[must_use]
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub(crate) fn handler(&self) -> CommandFn {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("alias", &self.alias)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Args
// ─────────────────────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
///
/// Serializes as a flat object with the positional list under `_`.
///
/// ```
/// use kiln_service::command::Args;
/// use serde_json::json;
///
/// let args = Args::parse(["build", "src", "--port=3000", "--no-open", "-v"]);
/// assert_eq!(args.positional, ["build", "src"]);
/// assert_eq!(args.get("port"), Some(&json!(3000)));
/// assert_eq!(args.get("open"), Some(&json!(false)));
/// assert_eq!(args.get("v"), Some(&json!(true)));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Args {
    /// Positional arguments.
    #[serde(rename = "_", default)]
    pub positional: Vec<String>,
    /// Named flags.
    #[serde(flatten)]
    pub flags: Map<String, Value>,
}

impl Args {
    /// Creates empty arguments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses argv (without the program name).
    ///
    /// Accepts `--key=value`, `--key value`, `--flag`, `--no-flag`, `-k value`
    /// and grouped short flags (`-abc`). Everything after `--` is positional.
    /// Numeric and boolean values become JSON numbers and booleans; a
    /// repeated key collects its values into an array.
    #[must_use]
    pub fn parse<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = Self::new();
        let mut tokens = argv.into_iter().map(Into::<String>::into).peekable();

        while let Some(token) = tokens.next() {
            if token == "--" {
                args.positional.extend(tokens.by_ref());
                break;
            }

            if let Some(long) = token.strip_prefix("--") {
                if let Some((key, value)) = long.split_once('=') {
                    args.push_flag(key, coerce(value));
                } else if let Some(negated) = long.strip_prefix("no-") {
                    args.push_flag(negated, Value::Bool(false));
                } else {
                    let value = take_value(&mut tokens);
                    args.push_flag(long, value);
                }
                continue;
            }

            if is_flag(&token) {
                let letters: Vec<char> = token.chars().skip(1).collect();
                if let Some((last, rest)) = letters.split_last() {
                    for letter in rest {
                        args.push_flag(&letter.to_string(), Value::Bool(true));
                    }
                    let value = take_value(&mut tokens);
                    args.push_flag(&last.to_string(), value);
                }
                continue;
            }

            args.positional.push(token);
        }

        args
    }

    /// Returns a flag value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.flags.get(key)
    }

    /// Sets a flag and returns the arguments.
    #[must_use]
    pub fn with_flag(mut self, key: impl Into<String>, value: Value) -> Self {
        self.flags.insert(key.into(), value);
        self
    }

    /// Removes a leading positional equal to `name`.
    ///
    /// Commands are usually invoked as `kiln build ...`; the handler should
    /// not see its own name among the positionals.
    pub fn shift_command(&mut self, name: &str) {
        if self.positional.first().is_some_and(|first| first == name) {
            self.positional.remove(0);
        }
    }

    /// Returns the arguments as a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut object = self.flags.clone();
        object.insert(
            "_".to_string(),
            Value::Array(self.positional.iter().cloned().map(Value::String).collect()),
        );
        Value::Object(object)
    }

    fn push_flag(&mut self, key: &str, value: Value) {
        match self.flags.get_mut(key) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                self.flags.insert(key.to_string(), value);
            }
        }
    }
}

/// Consumes the next token as a flag value unless it is itself a flag.
fn take_value<I: Iterator<Item = String>>(tokens: &mut Peekable<I>) -> Value {
    if tokens.peek().is_some_and(|next| !is_flag(next)) {
        tokens.next().map_or(Value::Bool(true), |raw| coerce(&raw))
    } else {
        Value::Bool(true)
    }
}

/// A token starting with `-` that is not a negative number.
fn is_flag(token: &str) -> bool {
    token.starts_with('-') && token.len() > 1 && token.parse::<f64>().is_err()
}

fn coerce(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(integer) = raw.parse::<i64>() {
                return Value::Number(integer.into());
            }
            raw.parse::<f64>()
                .ok()
                .filter(|float| float.is_finite())
                .and_then(Number::from_f64)
                .map_or_else(|| Value::String(raw.to_string()), Value::Number)
        }
    }
}
