//! Version specifier classification.
//!
//! A dependent declares its requirement on another package as a raw string.
//! Before resolution the string is classified as one of:
//! - an exact version: `1.2.3`, `v1.2.3`, `=1.2.3`
//! - a semver range: `^1.0.0`, `~1.2`, `1.x`, `>= 2 < 3`, `1.0.0 - 2.0.0`, `4`, `*`
//! - a tag: `latest`, `next`, `beta`
//! - a non-registry reference: `git+https://...`, `github:user/repo`,
//!   `file:../x`, `npm:other@^1`, `user/repo`

use semver::Version;
use serde::Serialize;
use std::fmt;

/// Prefixes that mark a specifier as a non-registry reference.
const REFERENCE_PREFIXES: &[&str] = &[
    "git+", "git:", "git://", "github:", "gitlab:", "bitbucket:", "gist:", "http:", "https:",
    "file:", "link:", "portal:", "workspace:", "npm:",
];

/// A dependent's classified version requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum VersionSpecifier {
    /// A single concrete version.
    Exact(String),
    /// A semver range (possibly loosely formed).
    Range(String),
    /// A registry-side alias such as `latest`.
    Tag(String),
    /// A git/url/file/alias reference; never resolved from the registry.
    Reference(String),
}

impl VersionSpecifier {
    /// Classify a raw specifier string. Never fails: anything that is not a
    /// version, tag or reference is kept as a range and rejected later by the
    /// resolver if it cannot be parsed.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        if raw.is_empty() {
            return Self::Range("*".to_string());
        }

        if is_reference(raw) {
            return Self::Reference(raw.to_string());
        }

        let bare = raw.trim_start_matches('=').trim_start_matches(['v', 'V']);
        if Version::parse(bare).is_ok() {
            return Self::Exact(bare.to_string());
        }

        if is_tag(raw) {
            return Self::Tag(raw.to_string());
        }

        Self::Range(raw.to_string())
    }

    /// The specifier text, as used for resolution and error messages.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact(s) | Self::Range(s) | Self::Tag(s) | Self::Reference(s) => s,
        }
    }

    /// Short name of the variant, for logs and reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Exact(_) => "exact",
            Self::Range(_) => "range",
            Self::Tag(_) => "tag",
            Self::Reference(_) => "reference",
        }
    }
}

impl fmt::Display for VersionSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_reference(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    if REFERENCE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return true;
    }

    // Local paths
    if raw.starts_with("./")
        || raw.starts_with("../")
        || raw.starts_with('/')
        || (raw.starts_with('~') && raw.contains('/'))
    {
        return true;
    }

    // GitHub shorthand: `user/repo` or `user/repo#ref`
    if !raw.contains(' ') && !raw.starts_with('@') {
        if let Some((owner, repo)) = raw.split_once('/') {
            return !owner.is_empty() && !repo.is_empty();
        }
    }

    false
}

/// A tag is an identifier that starts with a letter and is not an x-range.
fn is_tag(raw: &str) -> bool {
    let mut chars = raw.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    if !first.is_ascii_alphabetic() || matches!(raw, "x" | "X") {
        return false;
    }

    // `x.1`, `X.x` and friends are ranges
    if (first == 'x' || first == 'X') && raw[1..].starts_with('.') {
        return false;
    }

    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Validate a dependency name as it appears in a manifest.
///
/// Accepts `name` and `@scope/name`; rejects empty names, names containing
/// path traversal, and characters outside the registry's allowed set.
#[must_use]
pub fn is_valid_package_name(name: &str) -> bool {
    let body = if let Some(scoped) = name.strip_prefix('@') {
        let Some((scope, rest)) = scoped.split_once('/') else {
            return false;
        };
        if !valid_segment(scope) {
            return false;
        }
        rest
    } else {
        name
    };

    valid_segment(body)
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.starts_with('.')
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'))
}

/// URL-encode a package name for registry requests.
///
/// For scoped packages, encodes the `/` as `%2F`.
#[must_use]
pub fn url_encoded_name(name: &str) -> String {
    if name.starts_with('@') {
        name.replace('/', "%2F")
    } else {
        name.to_string()
    }
}
