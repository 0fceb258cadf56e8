//! Integration tests for `gimme install`.
//!
//! These tests use a mock npm registry to avoid network calls.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::io::Write;
use std::process::{Command, Output};
use std::sync::{mpsc, Arc};
use std::thread;
use tar::Builder;
use tempfile::TempDir;

fn gimme() -> Command {
    Command::new(env!("CARGO_BIN_EXE_gimme"))
}

/// name -> (version, dependencies)
type Catalog = BTreeMap<&'static str, (&'static str, Vec<(&'static str, &'static str)>)>;

#[derive(Clone)]
struct RegistryState {
    base_url: String,
    catalog: Arc<Catalog>,
}

/// Create a test tarball with a package.json.
fn create_test_tarball(name: &str, version: &str) -> Vec<u8> {
    let pkg_json = format!(r#"{{"name":"{name}","version":"{version}","main":"index.js"}}"#);
    let index_js = b"module.exports = 42;";

    let mut tar_bytes = Vec::new();
    {
        let mut builder = Builder::new(&mut tar_bytes);

        let mut header = tar::Header::new_gnu();
        header.set_path("package/package.json").unwrap();
        header.set_size(pkg_json.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, pkg_json.as_bytes()).unwrap();

        let mut header = tar::Header::new_gnu();
        header.set_path("package/index.js").unwrap();
        header.set_size(index_js.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, &index_js[..]).unwrap();

        builder.finish().unwrap();
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

async fn handle_packument(Path(name): Path<String>, State(state): State<RegistryState>) -> Response {
    let Some((version, deps)) = state.catalog.get(name.as_str()) else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };

    let dependencies: serde_json::Map<String, serde_json::Value> = deps
        .iter()
        .map(|(dep, spec)| ((*dep).to_string(), serde_json::Value::from(*spec)))
        .collect();
    let packument = serde_json::json!({
        "name": name,
        "dist-tags": { "latest": version },
        "versions": {
            *version: {
                "name": name,
                "version": version,
                "dependencies": dependencies,
                "dist": {
                    "tarball": format!("{}/{name}/-/{name}-{version}.tgz", state.base_url),
                }
            }
        }
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        packument.to_string(),
    )
        .into_response()
}

async fn handle_tarball(
    Path((name, file)): Path<(String, String)>,
    State(state): State<RegistryState>,
) -> Response {
    let version = file
        .strip_prefix(&format!("{name}-"))
        .and_then(|s| s.strip_suffix(".tgz"))
        .unwrap_or("");

    match state.catalog.get(name.as_str()) {
        Some((v, _)) if *v == version => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/gzip")],
            Body::from(create_test_tarball(&name, version)),
        )
            .into_response(),
        _ => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

/// Start the mock registry on a background thread and return its base URL.
fn start_mock_registry(catalog: Catalog) -> String {
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base_url = format!("http://{}", listener.local_addr().unwrap());
            let app = Router::new()
                .route("/:name", get(handle_packument))
                .route("/:name/-/:file", get(handle_tarball))
                .with_state(RegistryState {
                    base_url: base_url.clone(),
                    catalog: Arc::new(catalog),
                });
            tx.send(base_url).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });

    rx.recv().unwrap()
}

fn sample_registry() -> String {
    let mut catalog = Catalog::new();
    catalog.insert("a", ("1.0.0", vec![("b", "^2.0.0")]));
    catalog.insert("b", ("2.1.0", vec![]));
    catalog.insert("c", ("3.0.0", vec![("ghost", "^1.0.0")]));
    start_mock_registry(catalog)
}

/// Create a test project with package.json.
fn create_test_project(deps: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let deps: serde_json::Map<String, serde_json::Value> = deps
        .iter()
        .map(|(name, spec)| ((*name).to_string(), serde_json::Value::from(*spec)))
        .collect();
    let package_json = serde_json::json!({
        "name": "test-project",
        "version": "1.0.0",
        "dependencies": deps,
    });
    std::fs::write(
        dir.path().join("package.json"),
        serde_json::to_string_pretty(&package_json).unwrap(),
    )
    .unwrap();
    dir
}

fn run_install(project: &TempDir, extra: &[&str]) -> Output {
    gimme()
        .arg("--cwd")
        .arg(project.path())
        .arg("install")
        .args(extra)
        .env_remove("GIMME_REGISTRY")
        .env_remove("GIMME_CONCURRENCY")
        .env_remove("GIMME_RUN_TIMEOUT_SECS")
        .output()
        .expect("Failed to run gimme")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("invalid JSON ({e}): {stdout}"))
}

#[test]
fn test_version_prints_name_and_version() {
    let output = gimme().arg("version").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("gimme "), "{stdout}");
}

#[test]
fn test_install_json_success() {
    let registry = sample_registry();
    let project = create_test_project(&[("a", "^1.0.0")]);

    let output = run_install(&project, &["--json", "--registry", &registry]);
    assert_eq!(output.status.code(), Some(0), "{}", String::from_utf8_lossy(&output.stderr));

    let json = stdout_json(&output);
    assert_eq!(json["ok"], true);
    assert_eq!(json["counts"]["materialized"], 2);
    assert_eq!(json["failures"].as_array().unwrap().len(), 0);

    let modules = project.path().join("gimme_modules");
    assert!(modules.join("a/package.json").exists());
    assert!(modules.join("b/index.js").exists());
    assert!(!modules.join(".staging").exists());
}

#[test]
fn test_install_human_output() {
    let registry = sample_registry();
    let project = create_test_project(&[("b", "2")]);

    let output = run_install(&project, &["--registry", &registry]);
    assert_eq!(output.status.code(), Some(0));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("gimme install"), "{stdout}");
    assert!(stdout.contains("+ b@2.1.0"), "{stdout}");
}

#[test]
fn test_failed_dependency_exits_1() {
    let registry = sample_registry();
    let project = create_test_project(&[("a", "^1.0.0"), ("c", "^3.0.0")]);

    let output = run_install(&project, &["--json", "--registry", &registry]);
    assert_eq!(output.status.code(), Some(1));

    let json = stdout_json(&output);
    assert_eq!(json["ok"], false);
    let failures = json["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["key"], "ghost@^1.0.0");
    assert_eq!(failures[0]["code"], "PKG_NOT_FOUND");
    assert_eq!(failures[0]["requesters"][0], "c@3.0.0");
    assert_eq!(json["all_failed"], false);

    // Siblings of the failure still land on disk
    let modules = project.path().join("gimme_modules");
    assert!(modules.join("a/package.json").exists());
    assert!(modules.join("c/package.json").exists());
}

#[test]
fn test_every_dependency_failing_is_reported() {
    let registry = sample_registry();
    let project = create_test_project(&[("ghost", "^1.0.0"), ("phantom", "2")]);

    let output = run_install(&project, &["--registry", &registry]);
    assert_eq!(output.status.code(), Some(1));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("every dependency failed"), "{stderr}");
    assert!(stderr.contains("ghost@^1.0.0: PKG_NOT_FOUND"), "{stderr}");
}

#[test]
fn test_missing_manifest_exits_2() {
    let dir = tempfile::tempdir().unwrap();

    let output = gimme()
        .arg("--cwd")
        .arg(dir.path())
        .args(["--json", "install", "--registry", "http://127.0.0.1:9"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));

    let json = stdout_json(&output);
    assert_eq!(json["ok"], false);
    assert_eq!(json["error"]["code"], "PKG_MANIFEST_NOT_FOUND");
    assert!(!dir.path().join("gimme_modules").exists());
}

#[test]
fn test_invalid_manifest_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("package.json"), "{ not json").unwrap();

    let output = gimme()
        .arg("--cwd")
        .arg(dir.path())
        .args(["install", "--registry", "http://127.0.0.1:9"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("PKG_MANIFEST_INVALID"));
}

#[test]
fn test_dry_run_prints_tree_and_writes_nothing() {
    let registry = sample_registry();
    let project = create_test_project(&[("a", "^1.0.0")]);

    let output = run_install(&project, &["--dry-run", "--registry", &registry]);
    assert_eq!(output.status.code(), Some(0));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("└── a@1.0.0"), "{stdout}");
    assert!(stdout.contains("└── b@2.1.0"), "{stdout}");
    assert!(!project.path().join("gimme_modules").exists());
}
