use std::cmp::Ordering;

use semver::Version;

use crate::error::Error;

/// Version query meaning "whatever the source considers the latest version".
pub const LATEST: &str = "latest";

/// Parse a Go module version ("v1.2.3") into a semver::Version.
///
/// Handles partial versions like "v1" or "v1.2" by padding with zeros.
/// The leading 'v' is required, as it is for Go modules.
///
/// Examples:
/// - "v1" -> Version(1, 0, 0)
/// - "v1.2" -> Version(1, 2, 0)
/// - "v1.2.3-rc.1" -> Version(1, 2, 3, pre: rc.1)
/// - "v2.0.0+incompatible" -> Version(2, 0, 0, build: incompatible)
pub fn parse_version(version: &str) -> Option<Version> {
    let version = version.strip_prefix('v')?;
    let core_end = version.find(['-', '+']).unwrap_or(version.len());
    let (core, rest) = version.split_at(core_end);
    let parts: Vec<&str> = core.split('.').collect();
    let normalized = match parts.len() {
        1 => format!("{}.0.0{}", parts[0], rest),
        2 => format!("{}.{}.0{}", parts[0], parts[1], rest),
        _ => version.to_string(),
    };
    Version::parse(&normalized).ok()
}

/// Checks a requested version: either `latest` or a parseable semantic version.
pub fn validate_version(version: &str) -> Result<(), Error> {
    if version == LATEST || parse_version(version).is_some() {
        Ok(())
    } else {
        Err(Error::InvalidVersion(version.to_string()))
    }
}

/// Compares two versions by semantic-version precedence.
/// Unparseable versions sort below every valid one.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(a), Some(b)) => a.cmp_precedence(&b).then_with(|| a.build.cmp(&b.build)),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

/// Sorts versions descending by precedence, dropping unparseable entries and duplicates.
pub fn sort_descending(versions: &mut Vec<String>) {
    versions.retain(|v| parse_version(v).is_some());
    versions.sort_by(|a, b| compare_versions(b, a));
    versions.dedup();
}

/// The latest version of a descending list is its first element.
pub fn latest(versions: &[String]) -> Option<&str> {
    versions.first().map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("v1", Some((1, 0, 0)))]
    #[case("v1.2", Some((1, 2, 0)))]
    #[case("v1.2.3", Some((1, 2, 3)))]
    #[case("v1.2.3-rc.1", Some((1, 2, 3)))]
    #[case("v0.0.0-20191109021931-daa7c04131f5", Some((0, 0, 0)))]
    #[case("v2.0.0+incompatible", Some((2, 0, 0)))]
    #[case("1.2.3", None)]
    #[case("latest", None)]
    #[case("vx.y.z", None)]
    fn parse_version_returns_expected(#[case] input: &str, #[case] expected: Option<(u64, u64, u64)>) {
        let parsed = parse_version(input).map(|v| (v.major, v.minor, v.patch));
        assert_eq!(parsed, expected);
    }

    #[rstest]
    #[case("latest", true)]
    #[case("v1.0.0", true)]
    #[case("master", false)]
    #[case("", false)]
    fn validate_version_returns_expected(#[case] input: &str, #[case] ok: bool) {
        assert_eq!(validate_version(input).is_ok(), ok);
    }

    #[test]
    fn sort_descending_orders_by_precedence() {
        let mut versions = vec![
            "v1.2.0".to_string(),
            "v1.10.0".to_string(),
            "v1.10.0-rc.1".to_string(),
            "v0.9.0".to_string(),
            "not-a-version".to_string(),
            "v1.2.0".to_string(),
        ];

        sort_descending(&mut versions);

        assert_eq!(
            versions,
            vec!["v1.10.0", "v1.10.0-rc.1", "v1.2.0", "v0.9.0"]
        );
        assert_eq!(latest(&versions), Some("v1.10.0"));
    }

    #[test]
    fn sort_descending_handles_pseudo_versions() {
        let mut versions = vec![
            "v0.0.0-20190101000000-aaaaaaaaaaaa".to_string(),
            "v0.1.0".to_string(),
            "v0.0.0-20200101000000-bbbbbbbbbbbb".to_string(),
        ];

        sort_descending(&mut versions);

        assert_eq!(
            versions,
            vec![
                "v0.1.0",
                "v0.0.0-20200101000000-bbbbbbbbbbbb",
                "v0.0.0-20190101000000-aaaaaaaaaaaa",
            ]
        );
    }

    #[test]
    fn latest_of_empty_list_is_none() {
        assert_eq!(latest(&[]), None);
    }
}
