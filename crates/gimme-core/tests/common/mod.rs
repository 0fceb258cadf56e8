//! In-process mock registry for install tests.
//!
//! Serves packuments at `/{name}` and archives at `/{name}/-/{name}-{version}.tgz`,
//! counts requests per name, can answer 503 a set number of times, and can
//! serve archives that are not gzip at all.

#![allow(dead_code)]

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
use gimme_core::pkg::RetryPolicy;
use gimme_core::InstallConfig;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tar::Builder;
use tempfile::TempDir;

/// Fail every request.
pub const ALWAYS: u32 = u32::MAX;

type Versions = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Default)]
pub struct MockRegistryBuilder {
    packages: BTreeMap<String, Versions>,
    metadata_failures: HashMap<String, u32>,
    archive_failures: HashMap<String, u32>,
    corrupt_archives: BTreeSet<String>,
    metadata_delay: Duration,
}

impl MockRegistryBuilder {
    /// Publish `name@version` with the given dependencies.
    pub fn package(mut self, name: &str, version: &str, deps: &[(&str, &str)]) -> Self {
        let deps = deps
            .iter()
            .map(|(n, s)| ((*n).to_string(), (*s).to_string()))
            .collect();
        self.packages
            .entry(name.to_string())
            .or_default()
            .insert(version.to_string(), deps);
        self
    }

    /// Answer the first `times` packument requests for `name` with 503.
    pub fn fail_metadata(mut self, name: &str, times: u32) -> Self {
        self.metadata_failures.insert(name.to_string(), times);
        self
    }

    /// Answer the first `times` archive requests for `name` with 503.
    pub fn fail_archive(mut self, name: &str, times: u32) -> Self {
        self.archive_failures.insert(name.to_string(), times);
        self
    }

    /// Serve bytes that fail to extract for every archive of `name`.
    pub fn corrupt_archive(mut self, name: &str) -> Self {
        self.corrupt_archives.insert(name.to_string());
        self
    }

    /// Delay every packument response.
    pub fn metadata_delay(mut self, delay: Duration) -> Self {
        self.metadata_delay = delay;
        self
    }

    pub async fn start(self) -> MockRegistry {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let state = Arc::new(MockState {
            base_url: url.clone(),
            packages: self.packages,
            metadata_failures: Mutex::new(self.metadata_failures),
            archive_failures: Mutex::new(self.archive_failures),
            corrupt_archives: self.corrupt_archives,
            metadata_delay: self.metadata_delay,
            metadata_hits: Mutex::new(HashMap::new()),
            archive_hits: Mutex::new(HashMap::new()),
        });

        let app = Router::new()
            .route("/:name", get(handle_packument))
            .route("/:name/-/:file", get(handle_archive))
            .with_state(Arc::clone(&state));

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockRegistry { url, state }
    }
}

struct MockState {
    base_url: String,
    packages: BTreeMap<String, Versions>,
    metadata_failures: Mutex<HashMap<String, u32>>,
    archive_failures: Mutex<HashMap<String, u32>>,
    corrupt_archives: BTreeSet<String>,
    metadata_delay: Duration,
    metadata_hits: Mutex<HashMap<String, u32>>,
    archive_hits: Mutex<HashMap<String, u32>>,
}

pub struct MockRegistry {
    pub url: String,
    state: Arc<MockState>,
}

impl MockRegistry {
    pub fn builder() -> MockRegistryBuilder {
        MockRegistryBuilder::default()
    }

    /// Packument requests seen for `name`.
    pub fn metadata_hits(&self, name: &str) -> u32 {
        hits(&self.state.metadata_hits, name)
    }

    /// Archive requests seen for `name`.
    pub fn archive_hits(&self, name: &str) -> u32 {
        hits(&self.state.archive_hits, name)
    }

    /// Install config pointed at this registry with fast retries.
    pub fn config(&self) -> InstallConfig {
        InstallConfig::default()
            .with_registry(self.url.clone())
            .with_retry(fast_retry())
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    }
}

fn hits(counter: &Mutex<HashMap<String, u32>>, name: &str) -> u32 {
    counter.lock().unwrap().get(name).copied().unwrap_or(0)
}

fn bump(counter: &Mutex<HashMap<String, u32>>, name: &str) {
    *counter.lock().unwrap().entry(name.to_string()).or_default() += 1;
}

/// Consume one induced failure for `name`, if any are left.
fn take_failure(failures: &Mutex<HashMap<String, u32>>, name: &str) -> bool {
    let mut failures = failures.lock().unwrap();
    match failures.get_mut(name) {
        Some(left) if *left == ALWAYS => true,
        Some(left) if *left > 0 => {
            *left -= 1;
            true
        }
        _ => false,
    }
}

async fn handle_packument(
    Path(name): Path<String>,
    State(state): State<Arc<MockState>>,
) -> Response {
    bump(&state.metadata_hits, &name);
    if !state.metadata_delay.is_zero() {
        tokio::time::sleep(state.metadata_delay).await;
    }
    if take_failure(&state.metadata_failures, &name) {
        return (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response();
    }

    let Some(versions) = state.packages.get(&name) else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };

    let mut doc_versions = serde_json::Map::new();
    for (version, deps) in versions {
        doc_versions.insert(
            version.clone(),
            serde_json::json!({
                "name": name,
                "version": version,
                "dependencies": deps,
                "dist": {
                    "tarball": format!("{}/{name}/-/{name}-{version}.tgz", state.base_url)
                }
            }),
        );
    }
    let latest = versions
        .keys()
        .filter_map(|v| semver::Version::parse(v).ok())
        .max()
        .map(|v| v.to_string())
        .unwrap_or_default();
    let doc = serde_json::json!({
        "name": name,
        "dist-tags": { "latest": latest },
        "versions": doc_versions,
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        doc.to_string(),
    )
        .into_response()
}

async fn handle_archive(
    Path((name, file)): Path<(String, String)>,
    State(state): State<Arc<MockState>>,
) -> Response {
    bump(&state.archive_hits, &name);
    if take_failure(&state.archive_failures, &name) {
        return (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response();
    }

    let version = file
        .strip_prefix(&format!("{name}-"))
        .and_then(|s| s.strip_suffix(".tgz"))
        .unwrap_or("");
    let published = state
        .packages
        .get(&name)
        .is_some_and(|v| v.contains_key(version));
    if !published {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    }
    if state.corrupt_archives.contains(&name) {
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/gzip")],
            Body::from("this is not a gzip stream"),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/gzip")],
        Body::from(package_tarball(&name, version)),
    )
        .into_response()
}

/// A `package/`-prefixed archive with `package.json` and `index.js`.
pub fn package_tarball(name: &str, version: &str) -> Vec<u8> {
    let pkg_json = format!(r#"{{"name":"{name}","version":"{version}","main":"index.js"}}"#);
    let index_js = format!("module.exports = '{name}@{version}';");

    let mut tar_bytes = Vec::new();
    {
        let mut builder = Builder::new(&mut tar_bytes);
        for (path, data) in [
            ("package/package.json", pkg_json.as_bytes()),
            ("package/index.js", index_js.as_bytes()),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_path(path).unwrap();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, data).unwrap();
        }
        builder.finish().unwrap();
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

/// A temp project whose `package.json` declares `deps`.
pub fn project(deps: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let deps: serde_json::Map<String, serde_json::Value> = deps
        .iter()
        .map(|(name, spec)| ((*name).to_string(), serde_json::json!(spec)))
        .collect();
    let manifest = serde_json::json!({
        "name": "test-project",
        "version": "1.0.0",
        "dependencies": deps,
    });
    std::fs::write(
        dir.path().join("package.json"),
        serde_json::to_string_pretty(&manifest).unwrap(),
    )
    .unwrap();
    dir
}

/// The `version` field of an installed package.
pub fn installed_version(dir: &std::path::Path) -> String {
    let text = std::fs::read_to_string(dir.join("package.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    value["version"].as_str().unwrap().to_string()
}
