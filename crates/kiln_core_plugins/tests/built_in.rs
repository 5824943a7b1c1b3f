//! The built-in preset driven through a real service.

mod common;

use std::sync::Arc;

use common::{RecordingBundler, plugin_with, project, service, service_in_env, write_config};
use kiln_core_plugins::{REGISTER_GENERATOR, TmpFile, resolve_host, resolve_port, write_tmp_file};
use kiln_service::command::{Args, Command};
use kiln_service::error::{BoxError, ServiceError};
use kiln_service::hook::{Handler, Hook};
use kiln_service::plugin::ConfigChangeType;
use parking_lot::Mutex;
use serde_json::{Value, json};

fn read(path: &std::path::Path) -> String {
    std::fs::read_to_string(path).unwrap_or_else(|err| panic!("{}: {err}", path.display()))
}

#[tokio::test]
async fn preset_contributes_commands_and_plugins() {
    let dir = project();
    let service = service(dir.path(), &RecordingBundler::new(), []);
    service.init().await.unwrap();

    assert_eq!(service.command_names(), ["build", "dev", "generate"]);
    assert_eq!(service.command("g").unwrap().name(), "generate");
    assert!(service.has_presets(&["kiln:preset-built-in"]));
    assert!(service.has_plugins(&[
        "kiln:register-methods",
        "kiln:runtime-plugins",
        "kiln:polyfill",
        "kiln:command-build",
    ]));

    let polyfill = service.plugin("kiln:polyfill").unwrap();
    assert_eq!(polyfill.key(), "polyfill");
    assert_eq!(
        polyfill.config().unwrap().on_change,
        ConfigChangeType::RegenerateTmpFiles
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// build
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn build_generates_files_and_hands_the_config_to_the_bundler() {
    let dir = project();
    let bundler = RecordingBundler::new();
    let completions = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&completions);

    let service = service(
        dir.path(),
        &bundler,
        [plugin_with("app-extensions", move |api| {
            api.call("addRuntimePluginKey", Handler::sync(|_| Ok(json!("modifyTheme"))))?;
            api.call(
                "addRuntimePlugin",
                Handler::sync(|_| Ok(json!(["/plugins/runtime.ts"]))),
            )?;
            api.call(
                "modifyBundleConfig",
                Handler::sync(|mut input| {
                    input.memo["devtool"] = json!(false);
                    Ok(input.memo)
                }),
            )?;
            let recorded = Arc::clone(&recorded);
            api.call(
                "onBuildComplete",
                Handler::sync(move |input| {
                    recorded.lock().push(input.args);
                    Ok(Value::Null)
                }),
            )?;
            Ok(())
        })],
    );

    let stats = service.run("build", Args::parse(["build"])).await.unwrap();
    assert_eq!(stats["assets"], json!(["kiln.js"]));

    let tmp = service.paths().abs_tmp_path;
    let plugin = read(&tmp.join("core/plugin.ts"));
    assert!(plugin.starts_with("// @ts-nocheck\n"), "{plugin}");
    assert!(plugin.contains("'onRouteChange', 'modifyTheme'"), "{plugin}");

    let register = read(&tmp.join("core/pluginRegister.ts"));
    let app = dir.path().join("src/app.ts").to_string_lossy().replace('\\', "/");
    assert!(register.contains(&format!("import * as Plugin_0 from '{app}';")), "{register}");
    assert!(register.contains("import * as Plugin_1 from '/plugins/runtime.ts';"), "{register}");

    let builds = bundler.builds();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].config["devtool"], false);
    assert_eq!(builds[0].config["mode"], "development");
    assert_eq!(builds[0].output_path, dir.path().join("dist"));

    assert_eq!(*completions.lock(), [json!({ "stats": stats })]);
}

#[tokio::test]
async fn build_cleans_tmp_but_keeps_the_cache() {
    let dir = project();
    let service = service(dir.path(), &RecordingBundler::new(), []);
    let tmp = dir.path().join("src/.kiln");
    std::fs::create_dir_all(tmp.join(".cache")).unwrap();
    std::fs::write(tmp.join(".cache/keep"), "").unwrap();
    std::fs::write(tmp.join("stale.ts"), "").unwrap();

    service.run("build", Args::new()).await.unwrap();

    assert_eq!(service.paths().abs_tmp_path, tmp);
    assert!(tmp.join(".cache/keep").is_file());
    assert!(!tmp.join("stale.ts").exists());
}

#[tokio::test]
async fn failed_builds_report_the_error_and_fail() {
    let dir = project();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&errors);
    let service = service(
        dir.path(),
        &RecordingBundler::failing("out of memory"),
        [plugin_with("reporter", move |api| {
            let recorded = Arc::clone(&recorded);
            api.call(
                "onBuildComplete",
                Handler::sync(move |input| {
                    recorded.lock().push(input.args["err"].clone());
                    Ok(Value::Null)
                }),
            )?;
            Ok(())
        })],
    );

    let err = service.run("build", Args::new()).await.unwrap_err();
    let ServiceError::Command { name, source } = err else {
        panic!("expected a command error, got {err:?}");
    };
    assert_eq!(name, "build");
    assert_eq!(source.to_string(), "out of memory");
    assert_eq!(*errors.lock(), [json!("out of memory")]);
}

// ─────────────────────────────────────────────────────────────────────────────
// dev
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn dev_resolves_the_address_and_collects_middlewares() {
    let dir = project();
    let bundler = RecordingBundler::new();
    let reported = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&reported);

    let service = service(
        dir.path(),
        &bundler,
        [plugin_with("server-extensions", move |api| {
            api.call("addBeforeMiddlewares", Handler::sync(|_| Ok(json!(["cors"]))))?;
            api.call("addMiddlewares", Handler::sync(|_| Ok(json!(["mock", "proxy"]))))?;
            let recorded = Arc::clone(&recorded);
            let caller = api.clone();
            api.call(
                "onDevCompileDone",
                Handler::sync(move |_| {
                    recorded.lock().push(caller.call("getPort", Value::Null)?);
                    Ok(Value::Null)
                }),
            )?;
            Ok(())
        })],
    );

    let output = service
        .run("dev", Args::parse(["dev", "--port", "3456"]))
        .await
        .unwrap();

    let port = resolve_port(std::env::var("PORT").ok().as_deref(), Some(&json!(3456)), None).unwrap();
    let host = resolve_host(std::env::var("HOST").ok().as_deref(), None);
    assert_eq!(output["port"], port);
    assert_eq!(output["hostname"], host.as_str());
    assert_eq!(*reported.lock(), [json!(port)]);

    let devs = bundler.devs();
    assert_eq!(devs.len(), 1);
    assert_eq!(devs[0].before_middlewares, [json!("cors")]);
    assert_eq!(devs[0].middlewares, [json!("mock"), json!("proxy")]);
    assert_eq!(devs[0].config["mode"], "development");
}

#[tokio::test]
async fn dev_server_methods_are_development_only() {
    let dir = project();
    let service = service_in_env(
        dir.path(),
        "production",
        &RecordingBundler::new(),
        [plugin_with("asker", |api| {
            api.register_command(Command::new("ask", |api, _args| async move {
                Ok::<_, BoxError>(api.call("getHostname", Value::Null)?)
            }))?;
            Ok(())
        })],
    );

    let err = service.run("ask", Args::new()).await.unwrap_err();
    assert!(
        err.to_string().contains("getHostname() is only valid in development."),
        "{err}"
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// generate
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn generate_dispatches_to_registered_generators() {
    let dir = project();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&calls);
    let service = service(
        dir.path(),
        &RecordingBundler::new(),
        [plugin_with("page-generator", move |api| {
            let recorded = Arc::clone(&recorded);
            api.call(
                REGISTER_GENERATOR,
                Hook::new(
                    "page",
                    Handler::sync(move |input| {
                        recorded.lock().push(input.args["args"].clone());
                        Ok(json!("generated"))
                    }),
                ),
            )?;
            Ok(())
        })],
    );

    let output = service
        .run("g", Args::parse(["g", "page", "users", "--typescript"]))
        .await
        .unwrap();
    assert_eq!(output, "generated");
    assert_eq!(*calls.lock(), [json!({ "typescript": true, "_": ["users"] })]);
}

#[tokio::test]
async fn unknown_generators_fail() {
    let dir = project();
    let service = service(dir.path(), &RecordingBundler::new(), []);

    let err = service
        .run("generate", Args::parse(["generate", "nope"]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Generator nope not found."), "{err}");
}

#[tokio::test]
async fn tmp_generator_regenerates_tmp_files() {
    let dir = project();
    let service = service(dir.path(), &RecordingBundler::new(), []);

    service
        .run("generate", Args::parse(["generate", "tmp"]))
        .await
        .unwrap();
    assert!(service.paths().abs_tmp_path.join("core/plugin.ts").is_file());
}

// ─────────────────────────────────────────────────────────────────────────────
// Tmp files and polyfills
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn tmp_files_cannot_be_written_while_registering() {
    let dir = project();
    let service = service(
        dir.path(),
        &RecordingBundler::new(),
        [plugin_with("eager", |api| {
            write_tmp_file(api, &TmpFile::new("eager.ts", ""))?;
            Ok(())
        })],
    );

    let err = service.init().await.unwrap_err();
    assert!(matches!(&err, ServiceError::Apply { id, .. } if id == "eager"));
    assert!(err.to_string().contains("register stage"), "{err}");
}

#[tokio::test]
async fn tmp_files_cannot_escape_the_tmp_dir() {
    let dir = project();
    let service = service(
        dir.path(),
        &RecordingBundler::new(),
        [plugin_with("escaper", |api| {
            let writer = api.clone();
            api.call(
                "onGenerateFiles",
                Handler::sync(move |_| {
                    write_tmp_file(&writer, &TmpFile::new("../../escape.ts", ""))?;
                    Ok(Value::Null)
                }),
            )?;
            Ok(())
        })],
    );

    let err = service
        .run("generate", Args::parse(["generate", "tmp"]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("stay inside the tmp directory"), "{err}");
    assert!(!dir.path().join("escape.ts").exists());
}

#[tokio::test]
async fn polyfill_imports_come_from_config() {
    let dir = project();
    write_config(
        dir.path(),
        &json!({ "polyfill": { "imports": ["core-js/stable", "whatwg-fetch"] } }),
    );
    let service = service(dir.path(), &RecordingBundler::new(), []);
    service.run("generate", Args::parse(["generate", "tmp"])).await.unwrap();

    let polyfill = read(&service.paths().abs_tmp_path.join("core/polyfill.ts"));
    assert_eq!(
        polyfill,
        "// @ts-nocheck\nimport 'core-js/stable';\nimport 'whatwg-fetch';\n"
    );
}

#[tokio::test]
async fn polyfill_can_be_disabled_from_config() {
    let dir = project();
    write_config(dir.path(), &json!({ "polyfill": false }));
    let service = service(dir.path(), &RecordingBundler::new(), []);
    service.run("generate", Args::parse(["generate", "tmp"])).await.unwrap();

    let tmp = service.paths().abs_tmp_path;
    assert!(tmp.join("core/plugin.ts").is_file());
    assert!(!tmp.join("core/polyfill.ts").exists());
    assert!(!service.has_plugins(&["kiln:polyfill"]));
}
