use semver::Version;
use log::debug;

/// Strip a single leading `v`/`V` from a version tag
pub fn strip_version_prefix(version: &str) -> &str {
    version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version)
}

/// Parse a tag into a semantic version, accepting the short `major.minor` and
/// bare `major` forms the firmware projects publish by padding with zeros.
pub fn parse_lenient(version: &str) -> Option<Version> {
    let version = strip_version_prefix(version.trim());

    // Split off pre-release / build metadata before counting numeric parts
    let suffix_start = version.find(|c| c == '-' || c == '+').unwrap_or(version.len());
    let (core, suffix) = version.split_at(suffix_start);

    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    if parts
        .iter()
        .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
    {
        return None;
    }

    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    padded.push_str(suffix);

    Version::parse(&padded).ok()
}

/// Compare two version strings for equality.
///
/// Both sides are compared structurally when they parse as semantic versions,
/// so `v1.2` equals `1.2.0`. Anything else falls back to case-sensitive string
/// comparison of the prefix-stripped forms.
pub fn versions_equal(a: &str, b: &str) -> bool {
    match (parse_lenient(a), parse_lenient(b)) {
        (Some(left), Some(right)) => left == right,
        _ => {
            debug!(
                "Could not parse versions '{}' and '{}' semantically, using string comparison",
                a, b
            );
            strip_version_prefix(a) == strip_version_prefix(b)
        }
    }
}
