use std::sync::Arc;

use indexmap::IndexMap;
use kiln_service::api::{Method, MethodArg, PluginApi};
use kiln_service::command::{Args, Command};
use kiln_service::error::BoxError;
use kiln_service::hook::{Handler, Hook, HookInput};
use kiln_service::plugin::{ApplyOutput, Plugin};
use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::BuiltInError;
use crate::generate_files::generate_files;

/// Name of the method generators are registered through.
///
/// The argument is a hook whose key names the generator:
///
/// ```ignore
/// api.call(REGISTER_GENERATOR, Hook::new("page", Handler::new(|input| async move {
///     // input.args = { "cwd": ..., "args": { "_": [...], ... } }
///     Ok(Value::Null)
/// })))?;
/// ```
pub const REGISTER_GENERATOR: &str = "registerGenerator";

type Generators = Arc<RwLock<IndexMap<String, Handler>>>;

/// Registers `generate` (alias `g`) and the `registerGenerator` method, and
/// contributes the `tmp` generator which regenerates the tmp files.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateCommand;

async fn generate(api: PluginApi, args: Args, generators: Generators) -> Result<Value, BoxError> {
    let mut positional = args.positional.into_iter();
    let kind = positional.next().unwrap_or_default();
    let generator = generators.read().get(&kind).cloned();
    let Some(generator) = generator else {
        return Err(BuiltInError::UnknownGenerator(kind).into());
    };

    info!(generator = %kind, "running generator");
    let rest = Args {
        positional: positional.collect(),
        flags: args.flags,
    };
    generator
        .call(HookInput {
            memo: Value::Null,
            args: json!({ "cwd": api.cwd(), "args": rest.to_value() }),
        })
        .await
}

fn register_generator(generators: &Generators, arg: MethodArg) -> Result<Value, BoxError> {
    let invalid = |reason: &str| BuiltInError::InvalidArgument {
        method: REGISTER_GENERATOR,
        reason: reason.to_string(),
    };
    let hook = arg.into_hook().ok_or_else(|| invalid("expected a hook"))?;
    if hook.key().is_empty() {
        return Err(invalid("the generator needs a key").into());
    }
    let handler = hook
        .handler()
        .cloned()
        .ok_or_else(|| invalid("the generator needs a handler"))?;
    debug!(generator = %hook.key(), "registered generator");
    generators.write().insert(hook.key().to_string(), handler);
    Ok(Value::Null)
}

impl Plugin for GenerateCommand {
    const ID: &'static str = "kiln:command-generate";

    fn apply(&self, api: &PluginApi) -> Result<ApplyOutput, BoxError> {
        let generators: Generators = Arc::default();

        let registry = Arc::clone(&generators);
        api.register_command(
            Command::new("generate", move |api, args| {
                generate(api, args, Arc::clone(&registry))
            })
            .with_alias("g")
            .with_description("generate code snippets quickly"),
        )?;

        let registry = Arc::clone(&generators);
        api.register_method(Method::with_handler(REGISTER_GENERATOR, move |_, arg| {
            register_generator(&registry, arg)
        }))?;

        let tmp = api.clone();
        api.call(
            REGISTER_GENERATOR,
            Hook::new(
                "tmp",
                Handler::new(move |_| {
                    let api = tmp.clone();
                    async move {
                        generate_files(&api).await?;
                        Ok::<_, BoxError>(Value::Null)
                    }
                }),
            ),
        )?;

        Ok(ApplyOutput::default())
    }
}
