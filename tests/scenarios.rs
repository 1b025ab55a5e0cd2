//! End-to-end scenarios through the statement entry point.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde_json::{Value, json};
use tempfile::TempDir;

use aaviondb::{Response, Runtime, Scope, SetupOptions, Status};

fn runtime() -> (TempDir, std::sync::Arc<Runtime>) {
    let tmp = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
    let runtime = Runtime::setup(SetupOptions {
        root: Some(root),
        config_overrides: BTreeMap::new(),
        bootstrap_token: None,
        skip_tracing: true,
    })
    .unwrap();
    (tmp, runtime)
}

fn run(runtime: &Runtime, statement: &str) -> Response {
    runtime.execute_statement(statement, Scope::all())
}

fn run_ok(runtime: &Runtime, statement: &str) -> Value {
    let response = run(runtime, statement);
    assert_eq!(
        response.status,
        Status::Ok,
        "statement '{statement}' failed: {}",
        response.message
    );
    response.data.unwrap_or(Value::Null)
}

#[test]
fn create_save_show() {
    let (_tmp, rt) = runtime();
    run_ok(&rt, r#"project create demo title="Demo""#);
    let saved = run_ok(&rt, r#"entity save demo hero {"name":"Aria","role":"Pilot"}"#);
    assert_eq!(saved["version"], json!("1"));

    let shown = run_ok(&rt, "entity show demo hero");
    assert_eq!(shown["payload"], json!({"name":"Aria","role":"Pilot"}));
    assert_eq!(shown["version"], json!("1"));

    // The recorded hash is the SHA-256 over the canonical payload bytes.
    let expected =
        aavion_utils::canonical::hash_value(&json!({"name":"Aria","role":"Pilot"})).unwrap();
    assert_eq!(saved["hash"], json!(expected));
}

#[test]
fn incremental_merge_with_null_removal() {
    let (_tmp, rt) = runtime();
    run_ok(&rt, r#"entity save demo hero {"name":"Aria","role":"Pilot"}"#);
    run_ok(&rt, r#"entity save demo hero {"role":null,"stats":{"agility":12}}"#);

    let shown = run_ok(&rt, "entity show demo hero");
    assert_eq!(shown["version"], json!("2"));
    assert_eq!(
        shown["payload"],
        json!({"name":"Aria","stats":{"agility":12}})
    );

    let versions = run_ok(&rt, "entity versions demo hero");
    let list = versions["versions"].as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["status"], json!("inactive"));
    assert_eq!(list[1]["status"], json!("active"));
}

#[test]
fn restore_earlier_version() {
    let (_tmp, rt) = runtime();
    run_ok(&rt, r#"entity save demo hero {"n":1}"#);
    run_ok(&rt, r#"entity save demo hero {"n":2}"#);
    run_ok(&rt, "entity restore demo hero @1");

    let shown = run_ok(&rt, "entity show demo hero");
    assert_eq!(shown["version"], json!("1"));
    assert_eq!(shown["payload"], json!({"n":1}));
    assert_eq!(shown["status"], json!("active"));

    let versions = run_ok(&rt, "entity versions demo hero");
    assert_eq!(versions["versions"][1]["status"], json!("inactive"));
}

#[test]
fn delete_active_version_shifts_active() {
    let (_tmp, rt) = runtime();
    for n in 1..=3 {
        run_ok(&rt, &format!(r#"entity save demo hero {{"n":{n}}}"#));
    }
    let before = run_ok(&rt, "entity commits demo hero");
    assert_eq!(before["commits"].as_array().unwrap().len(), 3);

    let deleted = run_ok(&rt, "entity delete demo hero @3");
    assert_eq!(deleted["new_active"], json!("2"));

    let shown = run_ok(&rt, "entity show demo hero");
    assert_eq!(shown["version"], json!("2"));
    let after = run_ok(&rt, "entity commits demo hero");
    assert_eq!(after["commits"].as_array().unwrap().len(), 2);
}

#[test]
fn protected_preset_update_clones() {
    let (_tmp, rt) = runtime();
    let response = run(
        &rt,
        r#"preset update context-unified {"meta":{"description":"mine"}}"#,
    );
    assert_eq!(response.status, Status::Ok);
    let data = response.data.unwrap();
    assert_eq!(data["clone"], json!("context-unified-v2"));

    // Original untouched; clone carries the change.
    let original = run_ok(&rt, "preset show context-unified");
    assert_ne!(original["meta"]["description"], json!("mine"));
    let clone = run_ok(&rt, "preset show context-unified-v2");
    assert_eq!(clone["meta"]["description"], json!("mine"));
}

#[test]
fn rest_admission_via_auth_manager() {
    let (_tmp, rt) = runtime();
    run_ok(&rt, r#"entity save demo hero {"name":"Aria"}"#);

    // api enable is a no-op before a key exists.
    run_ok(&rt, "api serve");
    assert!(!rt.auth.is_api_enabled().unwrap());

    let granted = run_ok(&rt, "auth grant scope=RW projects=demo");
    let token = granted["token"].as_str().unwrap().to_string();
    run_ok(&rt, "api serve");
    assert!(rt.auth.is_api_enabled().unwrap());

    // Token admits with the granted scope; bootstrap is refused.
    let (scope, _) = rt.auth.admit_rest(Some(&token)).unwrap();
    assert!(scope.allows_write("demo"));
    assert!(!scope.allows_read("other"));
    assert!(matches!(
        rt.auth.admit_rest(Some("admin")),
        Err(aaviondb::AavionError::BootstrapNotAllowed)
    ));

    // A scoped dispatch cannot write elsewhere.
    let response = rt.dispatch(
        aaviondb::CommandRequest::new(
            "entity save",
            serde_json::from_value(json!({"project": "other", "entity": "x"})).unwrap(),
            Some(json!({"k": 1})),
        )
        .with_scope(scope),
    );
    assert_eq!(response.status, Status::Error);
    assert!(response.message.contains("Scope denied"));
}

#[test]
fn hierarchy_flow() {
    let (_tmp, rt) = runtime();
    run_ok(&rt, r#"entity save demo fleet {"kind":"group"}"#);
    run_ok(&rt, r#"entity save demo hero --parent=fleet {"name":"Aria"}"#);

    let shown = run_ok(&rt, "entity show demo hero");
    assert_eq!(shown["path"], json!(["fleet", "hero"]));

    let under = run_ok(&rt, "entity list demo path=fleet");
    assert_eq!(under["entities"].as_array().unwrap().len(), 2);

    // Deleting the parent without recursion promotes the child.
    run_ok(&rt, "entity delete demo fleet");
    let shown = run_ok(&rt, "entity show demo hero");
    assert_eq!(shown["path"], json!(["hero"]));
}

#[test]
fn fieldset_save_selector() {
    let (_tmp, rt) = runtime();
    run_ok(
        &rt,
        r#"entity save fieldsets character {"type":"object","properties":{"name":{"type":"string"},"role":{"type":"string","default":"crew"}},"required":["name"]}"#,
    );
    let saved = run_ok(&rt, r#"entity save demo hero:character {"name":"Aria"}"#);
    assert_eq!(saved["fieldset"], json!("character"));

    let shown = run_ok(&rt, "entity show demo hero");
    assert_eq!(shown["payload"]["role"], json!("crew"));

    // A violating payload is refused with the offending path.
    let response = run(&rt, r#"entity save demo hero {"name":12}"#);
    assert_eq!(response.status, Status::Error);
    assert_eq!(response.meta.unwrap()["path"], json!("/name"));
}

#[test]
fn resolver_roundtrip_on_save_and_show() {
    let (_tmp, rt) = runtime();
    run_ok(&rt, r#"entity save demo ship {"name":"Vanguard"}"#);
    let first = run_ok(&rt, r#"entity save demo hero {"bio":"flies [ref ship|name]"}"#);

    // entity show resolves in place, keeping the instruction.
    let shown = run_ok(&rt, "entity show demo hero");
    assert_eq!(
        shown["payload"]["bio"],
        json!("flies [ref ship|name]Vanguard[/ref]")
    );

    // Saving the resolved output back strips it to the same hash.
    let second = run_ok(
        &rt,
        r#"entity save demo hero {"bio":"flies [ref ship|name]Vanguard[/ref]"}"#,
    );
    assert_eq!(first["hash"], second["hash"]);
}

#[test]
fn export_end_to_end() {
    let (_tmp, rt) = runtime();
    run_ok(&rt, r#"entity save demo hero {"name":"Aria"}"#);
    run_ok(&rt, r#"entity save demo ship {"name":"Vanguard"}"#);

    let data = run_ok(&rt, "export demo");
    let content: Value = serde_json::from_str(data["content"].as_str().unwrap()).unwrap();
    assert_eq!(content["stats"]["entities"], json!(2));

    let data = run_ok(&rt, "export demo --preset=context-markdown-slim");
    assert!(data["content"].as_str().unwrap().contains("### hero"));

    let data = run_ok(&rt, "export demo hero --format=jsonl");
    assert_eq!(data["entities"], json!(["demo/hero@1"]));

    // Wildcard plus selectors is refused.
    let response = run(&rt, "export * hero");
    assert_eq!(response.status, Status::Error);

    // Saved exports land under the root.
    let data = run_ok(&rt, "export demo --save --response=false");
    assert!(data.get("content").is_none());
    let saved = data["saved_path"].as_str().unwrap();
    assert!(std::path::Path::new(saved).exists());
}

#[test]
fn brain_lifecycle_and_maintenance() {
    let (_tmp, rt) = runtime();
    run_ok(&rt, r#"entity save demo hero {"n":1}"#);
    run_ok(&rt, r#"entity save demo hero {"n":2}"#);

    run_ok(&rt, "brain backup label=probe");
    let backups = run_ok(&rt, "brain backups");
    assert_eq!(backups.as_array().unwrap().len(), 1);

    let integrity = run_ok(&rt, "brain integrity");
    assert_eq!(integrity["ok"], json!(true));

    let purge = run_ok(&rt, "entity purge demo keep=0 --dry-run");
    assert_eq!(purge["dry_run"], json!(true));
    run_ok(&rt, "entity purge demo keep=0");
    let versions = run_ok(&rt, "entity versions demo hero");
    assert_eq!(versions["versions"].as_array().unwrap().len(), 1);

    run_ok(&rt, "brain compact");
    run_ok(&rt, "brain repair");
    let integrity = run_ok(&rt, "brain integrity");
    assert_eq!(integrity["ok"], json!(true));

    run_ok(&rt, "brain create scratch");
    run_ok(&rt, "brain use scratch");
    let status = run_ok(&rt, "status");
    assert_eq!(status["active_brain"], json!("scratch"));
    run_ok(&rt, "brain delete default");
}

#[test]
fn config_and_unknown_commands() {
    let (_tmp, rt) = runtime();
    let value = run_ok(&rt, "config get hierarchy.max_depth");
    assert_eq!(value["value"], json!(10));

    run_ok(&rt, "config set hierarchy.max_depth 4");
    let value = run_ok(&rt, "config get hierarchy.max_depth");
    assert_eq!(value["value"], json!(4));

    let response = run(&rt, "definitely not a command");
    assert_eq!(response.status, Status::Error);
    assert!(response.message.contains("unknown command"));
}

#[test]
fn scheduler_task_crud() {
    let (_tmp, rt) = runtime();
    run_ok(&rt, r#"schedule add nightly "export demo --save""#);
    let listed = run_ok(&rt, "schedule list");
    assert!(listed["tasks"]["nightly"]["command"]
        .as_str()
        .unwrap()
        .contains("export demo"));
    run_ok(&rt, "schedule remove nightly");
    let response = run(&rt, "schedule remove nightly");
    assert_eq!(response.status, Status::Error);
}
