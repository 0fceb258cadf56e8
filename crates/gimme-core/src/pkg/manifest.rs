//! Root `package.json` reader.
//!
//! Only the fields the installer needs are read: `name`, `version`,
//! `dependencies` and (optionally) `devDependencies`. Entries that cannot be
//! used are reported as warnings rather than failing the whole manifest.

use super::error::PkgError;
use super::spec::is_valid_package_name;
use gimme_util::fs::read_to_string_lossy;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Manifest file name looked up in the working directory.
pub const MANIFEST_FILE: &str = "package.json";

/// The root project's declared dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootManifest {
    /// Project name, if declared.
    pub name: Option<String>,
    /// Project version, if declared.
    pub version: Option<String>,
    /// Usable dependencies (name -> raw specifier), sorted by name.
    pub dependencies: BTreeMap<String, String>,
    /// Number of dependency entries declared across the read sections.
    pub declared: usize,
    /// Entries that were skipped.
    pub warnings: Vec<ManifestWarning>,
}

/// A manifest entry that was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestWarning {
    /// Dependency or section name.
    pub name: String,
    /// Why it was skipped.
    pub message: String,
}

impl RootManifest {
    /// Whether the manifest declared dependencies but none of them are usable.
    #[must_use]
    pub fn has_only_unusable(&self) -> bool {
        self.declared > 0 && self.dependencies.is_empty()
    }
}

/// Read the root manifest at `path`.
///
/// `dependencies` wins over `devDependencies` when a name appears in both.
///
/// # Errors
/// - `PKG_MANIFEST_NOT_FOUND` if the file does not exist
/// - `PKG_MANIFEST_INVALID` if it cannot be read or is not a JSON object
pub fn read_manifest(path: &Path, include_dev: bool) -> Result<RootManifest, PkgError> {
    if !path.exists() {
        return Err(PkgError::manifest_not_found(path));
    }

    let content = read_to_string_lossy(path)
        .map_err(|e| PkgError::manifest_invalid(format!("Failed to read {}: {e}", path.display())))?;

    parse_manifest(&content, include_dev)
}

/// Parse manifest text.
///
/// # Errors
/// Returns `PKG_MANIFEST_INVALID` if `content` is not a JSON object.
pub fn parse_manifest(content: &str, include_dev: bool) -> Result<RootManifest, PkgError> {
    let value: Value = serde_json::from_str(content)
        .map_err(|e| PkgError::manifest_invalid(format!("Invalid JSON: {e}")))?;

    let root = value
        .as_object()
        .ok_or_else(|| PkgError::manifest_invalid("package.json must be a JSON object"))?;

    let mut manifest = RootManifest {
        name: root.get("name").and_then(Value::as_str).map(str::to_string),
        version: root
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string),
        ..RootManifest::default()
    };

    // Lower precedence first so `dependencies` overwrites
    if include_dev {
        read_section(root, "devDependencies", &mut manifest);
    }
    read_section(root, "dependencies", &mut manifest);

    Ok(manifest)
}

fn read_section(root: &Map<String, Value>, section: &str, manifest: &mut RootManifest) {
    let Some(value) = root.get(section) else {
        return;
    };

    let Some(entries) = value.as_object() else {
        manifest.warnings.push(ManifestWarning {
            name: section.to_string(),
            message: format!("'{section}' must be an object, got {}", json_type_name(value)),
        });
        return;
    };

    for (name, spec) in entries {
        manifest.declared += 1;

        if !is_valid_package_name(name) {
            manifest.warnings.push(ManifestWarning {
                name: name.clone(),
                message: "invalid package name".to_string(),
            });
            continue;
        }

        match spec.as_str() {
            Some(spec) => {
                manifest.dependencies.insert(name.clone(), spec.to_string());
            }
            None => manifest.warnings.push(ManifestWarning {
                name: name.clone(),
                message: format!("expected string specifier, got {}", json_type_name(spec)),
            }),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
