//! Preset and plugin expansion order, registration rules and identity.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::{Log, logged_plugin, logged_preset, logging, noop, options, plugin_with, project};
use kiln_service::api::Describe;
use kiln_service::command::{Args, Command};
use kiln_service::error::{BoxError, ServiceError};
use kiln_service::hook::{Handler, Hook};
use kiln_service::plugin::{ApplyOutput, ModuleRegistry, PluginDescriptor, PluginKind, apply_async, apply_sync};
use kiln_service::service::Service;
use serde_json::{Value, json};

#[tokio::test]
async fn nested_presets_expand_before_later_presets_and_plugins() {
    let log = Log::new();
    let nested = logged_preset(&log, "nested");
    let returning = PluginDescriptor::preset(
        "returning",
        logging(&log, move || ApplyOutput::new().with_presets([nested.clone()])),
    );

    let dir = project();
    let service = Service::new(
        options(dir.path())
            .with_presets([returning, logged_preset(&log, "later")])
            .with_plugin(logged_plugin(&log, "plugin")),
    )
    .unwrap();
    service.init().await.unwrap();

    assert_eq!(log.entries(), ["returning", "nested", "later", "plugin"]);
    assert!(service.has_presets(&["returning", "nested", "later"]));
    assert!(service.has_plugins(&["plugin"]));
}

#[tokio::test]
async fn returned_plugins_wait_for_every_preset() {
    let log = Log::new();
    let declared = logged_plugin(&log, "declared");
    let discovered = logged_preset(&log, "discovered");

    let first = PluginDescriptor::preset(
        "first",
        logging(&log, move || ApplyOutput::new().with_plugins([declared.clone()])),
    );
    let second = PluginDescriptor::preset(
        "second",
        logging(&log, move || ApplyOutput::new().with_presets([discovered.clone()])),
    );

    let dir = project();
    let service = Service::new(
        options(dir.path())
            .with_presets([first, second])
            .with_plugin(logged_plugin(&log, "initial")),
    )
    .unwrap();
    service.init().await.unwrap();

    assert_eq!(
        log.entries(),
        ["first", "second", "discovered", "declared", "initial"]
    );
}

#[tokio::test]
async fn plugins_declared_by_presets_can_contribute_commands() {
    let command_plugin = plugin_with("commands", |api| {
        api.register_command(Command::new("hello", |_api, _args| async {
            Ok(json!("hi"))
        }))?;
        Ok(())
    });
    let preset = PluginDescriptor::preset(
        "preset",
        apply_sync(move |_| Ok(ApplyOutput::new().with_plugins([command_plugin.clone()]))),
    );

    let dir = project();
    let service = Service::new(options(dir.path()).with_preset(preset)).unwrap();
    let output = service.run("hello", Args::new()).await.unwrap();
    assert_eq!(output, json!("hi"));
}

#[tokio::test]
async fn duplicate_ids_name_both_paths() {
    let dir = project();
    let service = Service::new(options(dir.path()).with_plugins([
        PluginDescriptor::plugin("dup", noop()).with_path("/plugins/first.js"),
        PluginDescriptor::plugin("dup", noop()).with_path("/plugins/second.js"),
    ]))
    .unwrap();

    let err = service.init().await.unwrap_err();
    assert!(matches!(
        &err,
        ServiceError::DuplicatePlugin { kind: PluginKind::Plugin, id, .. } if id == "dup"
    ));
    let message = err.to_string();
    assert!(message.contains("/plugins/first.js"), "{message}");
    assert!(message.contains("/plugins/second.js"), "{message}");
}

#[tokio::test]
async fn bare_paths_resolve_through_the_loader() {
    let log = Log::new();
    let dir = project();
    let plugin_path = dir.path().join("plugins/dark-mode.ts");
    let plugin_path = plugin_path.to_string_lossy().into_owned();
    let modules = ModuleRegistry::new()
        .with("@kiln/preset-team", logging(&log, ApplyOutput::default))
        .with(plugin_path.clone(), logging(&log, ApplyOutput::default));

    let service = Service::new(
        options(dir.path())
            .with_loader(modules)
            .with_preset("@kiln/preset-team")
            .with_plugins([plugin_path.clone(), plugin_path]),
    )
    .unwrap();
    service.init().await.unwrap();

    assert_eq!(log.entries(), ["@kiln/preset-team", "./plugins/dark-mode"]);
    let descriptor = service.plugin("./plugins/dark-mode").unwrap();
    assert_eq!(descriptor.key(), "darkMode");
    assert_eq!(service.plugin("@kiln/preset-team").unwrap().key(), "team");
}

#[tokio::test]
async fn unresolvable_paths_fail_at_construction() {
    let dir = project();
    let err = Service::new(options(dir.path()).with_plugin("./plugins/missing")).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::ModuleNotFound { kind: PluginKind::Plugin, path } if path == "./plugins/missing"
    ));
}

#[tokio::test]
async fn config_lists_initial_presets_and_plugins() {
    let log = Log::new();
    let dir = project();
    std::fs::write(
        dir.path().join(".kilnrc.json"),
        r#"{ "presets": ["team-preset"], "plugins": ["team-plugin"] }"#,
    )
    .unwrap();
    let modules = ModuleRegistry::new()
        .with("team-preset", logging(&log, ApplyOutput::default))
        .with("team-plugin", logging(&log, ApplyOutput::default));

    let service = Service::new(options(dir.path()).with_loader(modules)).unwrap();
    service.init().await.unwrap();
    assert_eq!(log.entries(), ["team-preset", "team-plugin"]);
}

#[tokio::test]
async fn register_plugins_appends_during_presets_and_prepends_during_plugins() {
    let log = Log::new();
    let from_preset = logged_plugin(&log, "from-preset");
    let from_plugin = logged_plugin(&log, "from-plugin");

    let preset = PluginDescriptor::preset(
        "preset",
        apply_sync(move |api| {
            api.register_plugins([from_preset.clone()])?;
            Ok(ApplyOutput::default())
        }),
    );
    let registering_log = log.clone();
    let registering = PluginDescriptor::plugin(
        "registering",
        apply_sync(move |api| {
            registering_log.push(api.id());
            api.register_plugins([from_plugin.clone()])?;
            Ok(ApplyOutput::default())
        }),
    );

    let dir = project();
    let service = Service::new(
        options(dir.path())
            .with_preset(preset)
            .with_plugins([registering, logged_plugin(&log, "last")]),
    )
    .unwrap();
    service.init().await.unwrap();

    assert_eq!(
        log.entries(),
        ["from-preset", "registering", "from-plugin", "last"]
    );
}

#[tokio::test]
async fn register_presets_is_rejected_outside_preset_expansion() {
    let rejected = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&rejected);
    let plugin = plugin_with("late-preset", move |api| {
        let result = api.register_presets([PluginDescriptor::preset("x", noop())]);
        flag.store(
            matches!(
                result,
                Err(ServiceError::WrongStage {
                    operation: "register_presets",
                    ..
                })
            ),
            Ordering::SeqCst,
        );
        Ok(())
    });

    let dir = project();
    let service = Service::new(options(dir.path()).with_plugin(plugin)).unwrap();
    service.init().await.unwrap();
    assert!(rejected.load(Ordering::SeqCst));
}

#[tokio::test]
async fn registration_outside_expansion_fails() {
    let dir = project();
    let service = Service::new(options(dir.path()).with_plugin(plugin_with("registrar", |api| {
        api.register_command(Command::new("late", |api, _args| async move {
            api.register_plugins([PluginDescriptor::plugin("too-late", noop())])?;
            Ok::<_, BoxError>(Value::Null)
        }))?;
        Ok(())
    })))
    .unwrap();

    let err = service.run("late", Args::new()).await.unwrap_err();
    let ServiceError::Command { name, source } = err else {
        panic!("expected a command error, got {err:?}");
    };
    assert_eq!(name, "late");
    assert!(source.to_string().contains("register_plugins"));
}

#[tokio::test]
async fn suspending_entry_functions_finish_before_the_next_one_starts() {
    let log = Log::new();
    let dir = project();
    let slow = {
        let log = log.clone();
        PluginDescriptor::preset(
            "slow",
            apply_async(move |api| {
                let log = log.clone();
                async move {
                    tokio::task::yield_now().await;
                    log.push(api.id());
                    Ok(ApplyOutput::new().with_plugins([logged_plugin(&log, "late")]))
                }
            }),
        )
    };
    let service = Service::new(
        options(dir.path())
            .with_presets([slow, logged_preset(&log, "fast")])
            .with_plugin(logged_plugin(&log, "initial")),
    )
    .unwrap();

    service.init().await.unwrap();
    assert_eq!(log.entries(), ["slow", "fast", "late", "initial"]);
}

#[tokio::test]
async fn entry_function_errors_abort_expansion() {
    let log = Log::new();
    let dir = project();
    let service = Service::new(options(dir.path()).with_plugins([
        PluginDescriptor::plugin("broken", apply_sync(|_| Err("cannot apply".into()))),
        logged_plugin(&log, "never"),
    ]))
    .unwrap();

    let err = service.init().await.unwrap_err();
    assert!(matches!(
        &err,
        ServiceError::Apply { kind: PluginKind::Plugin, id, .. } if id == "broken"
    ));
    assert!(log.entries().is_empty());
}

#[tokio::test]
async fn preset_config_fragments_become_defaults() {
    let preset = PluginDescriptor::preset(
        "defaults",
        apply_sync(|_| {
            Ok(ApplyOutput::new()
                .with_config("title", json!("kiln"))
                .with_config("outputPath", json!("www")))
        }),
    );

    let dir = project();
    let service = Service::new(options(dir.path()).with_preset(preset)).unwrap();
    service.init().await.unwrap();

    let config = service.config().unwrap();
    assert_eq!(config["title"], "kiln");
    assert_eq!(service.paths().abs_output_path, dir.path().join("www"));
}

// ─────────────────────────────────────────────────────────────────────────────
// describe()
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn describe_renames_the_descriptor_and_its_hooks() {
    let plugin = plugin_with("./plugins/local", |api| {
        api.register(Hook::new("addThings", Handler::sync(|_| Ok(json!(["x"])))))?;
        api.describe(Describe::new().with_id("local").with_key("localKey"))?;
        Ok(())
    });

    let dir = project();
    let service = Service::new(options(dir.path()).with_plugin(plugin)).unwrap();
    service.init().await.unwrap();

    assert_eq!(service.plugin_ids(), ["local"]);
    assert!(service.plugin("./plugins/local").is_none());
    assert_eq!(service.plugin("local").unwrap().key(), "localKey");
    let owners: Vec<_> = service
        .hooks("addThings")
        .iter()
        .map(|hook| hook.owner().to_string())
        .collect();
    assert_eq!(owners, ["local"]);
}

#[tokio::test]
async fn describe_to_a_taken_id_fails() {
    let dir = project();
    let service = Service::new(options(dir.path()).with_plugins([
        PluginDescriptor::plugin("taken", noop()).with_path("/taken.js"),
        plugin_with("renaming", |api| {
            api.describe(Describe::new().with_id("taken"))?;
            Ok(())
        }),
    ]))
    .unwrap();

    let err = service.init().await.unwrap_err();
    let ServiceError::Apply { id, source, .. } = err else {
        panic!("expected an apply error, got {err:?}");
    };
    assert_eq!(id, "renaming");
    let source = source.to_string();
    assert!(source.contains("taken"), "{source}");
    assert!(source.contains("/taken.js"), "{source}");
}
