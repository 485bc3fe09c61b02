//! API version ranges
//!
//! A subset of semver without patch versions. `2` and `2.1` are lower bounds
//! within one major version, `1 - 3` is an inclusive range, `^` and `~` are
//! accepted and ignored, and `x` is a wildcard minor. Unlike semver, `2.0`
//! matches 2.0 or any newer 2.x.

type Version = (u64, Option<u64>);

fn parse_version(version: &str) -> Option<Version> {
    let sanitized: String = version
        .trim()
        .chars()
        .filter(|c| !matches!(c, '^' | '~' | 'x'))
        .collect();
    let mut parts = sanitized.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = match parts.next() {
        Some("") | None => None,
        Some(minor) => Some(minor.parse().ok()?),
    };
    Some((major, minor))
}

fn unpack_range(range: &str) -> Option<(Version, Version)> {
    match range.split_once(" - ") {
        Some((min, max)) => Some((parse_version(min)?, parse_version(max)?)),
        None => {
            let min = parse_version(range)?;
            Some((min, (min.0, None)))
        }
    }
}

/// Whether `range` is well formed and not inverted
pub fn valid_range(range: &str) -> bool {
    match unpack_range(range) {
        Some((min, max)) => match (min.1, max.1) {
            (Some(_), Some(_)) => min <= max,
            _ => min.0 <= max.0,
        },
        None => false,
    }
}

/// Whether `version` falls inside `range`
pub fn satisfies(version: &str, range: &str) -> bool {
    if !valid_range(range) {
        return false;
    }
    let (Some(version), Some((min, max))) = (parse_version(version), unpack_range(range)) else {
        return false;
    };

    let version = (version.0, version.1.unwrap_or(0));
    let min = (min.0, min.1.unwrap_or(0));
    let max = (max.0, max.1.unwrap_or(u64::MAX));
    min <= version && version <= max
}
