//! Version resolution using semver.

use super::error::PkgError;
use super::registry::Packument;
use super::spec::VersionSpecifier;
use semver::{Version, VersionReq};

/// Resolve a specifier against the versions a packument reports.
///
/// # Rules
/// - An exact version present in the packument is returned as is
/// - Otherwise the specifier is coerced into a semver range and the highest
///   satisfying version wins (a missing exact version is treated as `^x.y.z`)
/// - Tags go through `dist-tags`
/// - References (git/url/file/alias) are never resolved
///
/// Candidates are parsed and sorted first, so the result does not depend on
/// the registry's key order.
///
/// # Errors
/// - `PKG_UNRESOLVABLE_VERSION` if nothing satisfies the range
/// - `PKG_UNSUPPORTED_SPECIFIER` for references, unknown tags and unparsable ranges
pub fn resolve_version(
    name: &str,
    specifier: &VersionSpecifier,
    packument: &Packument,
) -> Result<Version, PkgError> {
    match specifier {
        VersionSpecifier::Reference(raw) => Err(PkgError::unsupported_specifier(
            name,
            raw,
            "non-registry sources are not fetched",
        )),
        VersionSpecifier::Tag(tag) => {
            let Some(target) = packument.tag(tag) else {
                return Err(PkgError::unsupported_specifier(
                    name,
                    tag,
                    "no such dist-tag in registry metadata",
                ));
            };
            if !packument.versions.contains_key(target) {
                return Err(PkgError::unresolvable(name, tag));
            }
            Version::parse(target).map_err(|e| {
                PkgError::unresolvable(name, &format!("{tag} -> {target} ({e})"))
            })
        }
        VersionSpecifier::Exact(exact) => {
            if packument.versions.contains_key(exact.as_str()) {
                if let Ok(version) = Version::parse(exact) {
                    return Ok(version);
                }
            }
            resolve_range(name, exact, &sorted_versions(packument))
        }
        VersionSpecifier::Range(range) => resolve_range(name, range, &sorted_versions(packument)),
    }
}

/// Parse every valid version in the packument, highest first.
#[must_use]
pub fn sorted_versions(packument: &Packument) -> Vec<Version> {
    let mut parsed: Vec<Version> = packument
        .version_strings()
        .filter_map(|v| Version::parse(v).ok())
        .collect();
    parsed.sort_by(|a, b| b.cmp(a));
    parsed.dedup();
    parsed
}

/// Check whether `version` satisfies `range` (npm range syntax).
#[must_use]
pub fn version_satisfies(version: &Version, range: &str) -> bool {
    parse_or_range(range).is_ok_and(|reqs| reqs.iter().any(|r| r.matches(version)))
}

/// Pick the highest version in `versions` (sorted descending) that satisfies `range`.
fn resolve_range(name: &str, range: &str, versions: &[Version]) -> Result<Version, PkgError> {
    let reqs = parse_or_range(range).map_err(|e| {
        PkgError::unsupported_specifier(name, range, &format!("not a valid range ({e})"))
    })?;

    versions
        .iter()
        .find(|v| reqs.iter().any(|r| r.matches(v)))
        .cloned()
        .ok_or_else(|| PkgError::unresolvable(name, range))
}

/// Parse a range that may contain `||` alternatives.
///
/// Invalid alternatives are skipped as long as one alternative parses.
fn parse_or_range(range: &str) -> Result<Vec<VersionReq>, String> {
    let mut reqs = Vec::new();
    let mut last_err = None;

    for alt in range.split("||").map(str::trim) {
        match parse_range(alt) {
            Ok(req) => reqs.push(req),
            Err(e) => last_err = Some(e),
        }
    }

    if reqs.is_empty() {
        return Err(last_err.unwrap_or_else(|| "empty range".to_string()));
    }
    Ok(reqs)
}

/// Parse a single version range, handling npm-specific syntax.
///
/// Handles:
/// - Standard semver ranges: ^1.0.0, ~1.0.0, >=1.0.0, etc.
/// - Loose versions: 4 (as ^4), v1.2.3, =1.2.3
/// - Hyphen ranges: 1.0.0 - 2.0.0
/// - X-ranges: 1.x, 1.0.x, *, ""
/// - Space-separated comparators: >= 2.1.2 < 3.0.0
fn parse_range(range: &str) -> Result<VersionReq, String> {
    let range = range.trim();

    if range.is_empty() || range == "*" || range == "x" || range == "X" || range == "latest" {
        return Ok(VersionReq::STAR);
    }

    // "1.0.0 - 2.0.0" -> ">=1.0.0, <=2.0.0"
    if let Some((start, end)) = parse_hyphen_range(range) {
        let converted = format!(">={}, <={}", strip_v(&start), strip_v(&end));
        return VersionReq::parse(&converted).map_err(|e| e.to_string());
    }

    // "1.x" -> ">=1.0.0, <2.0.0"
    if range.contains(['x', 'X', '*']) {
        let converted = convert_x_range(range);
        return VersionReq::parse(&converted).map_err(|e| e.to_string());
    }

    // ">= 2.1.2 < 3.0.0" -> ">=2.1.2, <3.0.0"
    let converted = convert_space_separated_comparators(range);
    VersionReq::parse(&converted).map_err(|e| e.to_string())
}

/// Parse a hyphen range like "1.0.0 - 2.0.0".
fn parse_hyphen_range(range: &str) -> Option<(String, String)> {
    let (start, end) = range.split_once(" - ")?;
    let (start, end) = (start.trim(), end.trim());
    if start.is_empty() || end.is_empty() {
        return None;
    }
    Some((start.to_string(), end.to_string()))
}

/// Drop a leading `v`/`V`/`=` from a bare version.
fn strip_v(token: &str) -> &str {
    token.trim_start_matches('=').trim_start_matches(['v', 'V'])
}

/// Convert space-separated comparators to comma-separated ones.
///
/// npm allows `>= 2.1.2 < 3.0.0` meaning `>=2.1.2 AND <3.0.0`; the semver
/// crate requires `>=2.1.2, <3.0.0`. Operators separated from their version
/// by a space are glued back on.
fn convert_space_separated_comparators(range: &str) -> String {
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op = String::new();

    for token in range.split_whitespace() {
        let token = token.trim_end_matches(',');
        if token.is_empty() {
            continue;
        }

        if token.chars().any(|c| c.is_ascii_digit()) {
            let split = token
                .find(|c: char| c.is_ascii_digit() || c == 'v' || c == 'V')
                .unwrap_or(0);
            let (op, version) = token.split_at(split);
            comparators.push(format!("{pending_op}{op}{}", strip_v(version)));
            pending_op.clear();
        } else {
            // Operator without version, glue it to the next token
            pending_op.push_str(token);
        }
    }

    if comparators.is_empty() {
        return range.to_string();
    }

    comparators.join(", ")
}

/// Convert x-range to semver range.
fn convert_x_range(range: &str) -> String {
    let range = strip_v(range.trim());

    let parts: Vec<&str> = range.split('.').collect();
    let is_wild = |p: &str| matches!(p, "x" | "X" | "*");

    match parts.as_slice() {
        [major, ..] if is_wild(*major) => return ">=0.0.0".to_string(),
        [major, minor, ..] if is_wild(*minor) => {
            if let Ok(m) = major.parse::<u64>() {
                return match m.checked_add(1) {
                    Some(next) => format!(">={m}.0.0, <{next}.0.0"),
                    None => format!(">={m}.0.0"),
                };
            }
        }
        [major, minor, patch] if is_wild(*patch) => {
            if let (Ok(m), Ok(n)) = (major.parse::<u64>(), minor.parse::<u64>()) {
                return match n.checked_add(1) {
                    Some(next) => format!(">={m}.{n}.0, <{m}.{next}.0"),
                    None => format!(">={m}.{n}.0"),
                };
            }
        }
        _ => {}
    }

    // Fallback: just replace x with 0
    range.replace(['x', 'X', '*'], "0")
}
