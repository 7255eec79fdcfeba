use std::cmp::Ordering;
use std::fmt;

/// Key used for releases whose version string cannot be interpreted.
pub const FALLBACK_VERSION_KEY: &str = "11";

pub type VersionTriple = (u32, u32, u32);

/// Catalog key for an OS family: `"10.15"` for the two-part releases up to
/// Catalina, the bare major (`"14"`) from Big Sur on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionKey(String);

impl VersionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn fallback() -> Self {
        VersionKey(FALLBACK_VERSION_KEY.to_string())
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Drops `Beta`/`RC`/build suffixes: everything after the first space, then
/// everything after the first hyphen.
fn strip_suffixes(version: &str) -> &str {
    let first_word = version.split_whitespace().next().unwrap_or("");
    first_word.split('-').next().unwrap_or("")
}

pub fn normalize(version: &str) -> VersionKey {
    let clean = strip_suffixes(version);
    let mut parts = clean.split('.');
    let first = parts.next().unwrap_or("");

    if first == "10" {
        if let Some(minor) = parts.next().and_then(|value| value.parse::<u32>().ok()) {
            return VersionKey(format!("10.{}", minor));
        }
    }

    match first.parse::<u32>() {
        Ok(major) if major >= 11 => VersionKey(major.to_string()),
        _ => VersionKey::fallback(),
    }
}

/// `(major, minor, patch)` for ordering. Missing components are 0; a
/// component that is present but not numeric makes the whole triple 0.
pub fn parse_ordered_triple(version: &str) -> VersionTriple {
    let clean = strip_suffixes(version);
    let parts: Vec<&str> = clean.split('.').collect();
    let parse = |idx: usize| -> Option<u32> {
        match parts.get(idx) {
            Some(value) => value.parse::<u32>().ok(),
            None => Some(0),
        }
    };

    let Some(major) = parts.first().and_then(|value| value.parse::<u32>().ok()) else {
        return (0, 0, 0);
    };
    match (parse(1), parse(2)) {
        (Some(minor), Some(patch)) => (major, minor, patch),
        _ => (0, 0, 0),
    }
}

pub fn compare_versions(left: &str, right: &str) -> Ordering {
    parse_ordered_triple(left).cmp(&parse_ordered_triple(right))
}

/// True when `candidate` is a newer point release of the same major version.
pub fn is_update(current: &str, candidate: &str) -> bool {
    let current = parse_ordered_triple(current);
    let candidate = parse_ordered_triple(candidate);
    current.0 == candidate.0 && candidate > current
}

pub fn format_version_display(version: &str) -> String {
    match parse_ordered_triple(version) {
        (major, minor, patch) if patch > 0 => format!("{}.{}.{}", major, minor, patch),
        (major, minor, _) if minor > 0 => format!("{}.{}", major, minor),
        (major, _, _) => major.to_string(),
    }
}
