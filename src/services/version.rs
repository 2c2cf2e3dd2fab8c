use once_cell::sync::Lazy;
use regex::Regex;
use semver::{Prerelease, Version};
use std::cmp::Ordering;

static VERSION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+(?:\.\d+)*)(?:-([0-9A-Za-z.-]+))?").expect("invalid version regex")
});

/// 解析后的版本：前三段交给 semver 比较，超出三段的部分按数字逐段比较
#[derive(Debug, PartialEq, Eq)]
struct ParsedVersion {
    semver: Version,
    extra: Vec<u64>,
}

/// 提取数字主体并补齐到三段（"2.1" -> 2.1.0，"0.13.0-preview.2" 保留预发布标识）
fn parse_version(version: &str) -> ParsedVersion {
    let Some(captures) = VERSION_REGEX.captures(version.trim()) else {
        return ParsedVersion {
            semver: Version::new(0, 0, 0),
            extra: Vec::new(),
        };
    };

    let mut segments: Vec<u64> = captures
        .get(1)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .split('.')
        .map(|s| s.parse::<u64>().unwrap_or(0))
        .collect();
    if segments.len() < 3 {
        segments.resize(3, 0);
    }
    let extra = segments.split_off(3);

    let mut semver = Version::new(segments[0], segments[1], segments[2]);
    if let Some(pre) = captures.get(2) {
        semver.pre = Prerelease::new(pre.as_str()).unwrap_or(Prerelease::EMPTY);
    }
    ParsedVersion { semver, extra }
}

/// 比较两个版本号
///
/// 段数不同时缺失段按 0 处理，因此 "2.1" 与 "2.1.0" 相等；
/// 预发布版本低于同号正式版本。
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left = parse_version(a);
    let right = parse_version(b);

    match left.semver.cmp(&right.semver) {
        Ordering::Equal => {}
        other => return other,
    }

    let len = left.extra.len().max(right.extra.len());
    (0..len)
        .map(|i| {
            let l = left.extra.get(i).copied().unwrap_or(0);
            let r = right.extra.get(i).copied().unwrap_or(0);
            l.cmp(&r)
        })
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

/// `candidate` 是否严格新于 `current`
pub fn is_newer(candidate: &str, current: &str) -> bool {
    compare_versions(candidate, current) == Ordering::Greater
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_comparison() {
        assert_eq!(compare_versions("1.2.0", "1.1.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.1.9", "1.2.0"), Ordering::Less);
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("0.2.29", "0.2.29"), Ordering::Equal);
    }

    #[test]
    fn test_differing_segment_counts() {
        assert_eq!(compare_versions("2.1", "2.1.0"), Ordering::Equal);
        assert_eq!(compare_versions("2.1.0.0", "2.1"), Ordering::Equal);
        assert_eq!(compare_versions("2.1.1", "2.1"), Ordering::Greater);
        assert_eq!(compare_versions("2.1.0.1", "2.1.0"), Ordering::Greater);
    }

    #[test]
    fn test_antisymmetry() {
        let pairs = [("1.0.1", "1.0.0"), ("10.0", "9.99.99"), ("0.46.0", "0.45.12")];
        for (a, b) in pairs {
            assert_eq!(compare_versions(a, b), Ordering::Greater, "{a} > {b}");
            assert_eq!(compare_versions(b, a), Ordering::Less, "{b} < {a}");
            assert_eq!(compare_versions(a, a), Ordering::Equal);
        }
    }

    #[test]
    fn test_prefix_ignored() {
        assert_eq!(compare_versions("v22.12.0", "22.12.0"), Ordering::Equal);
        assert_eq!(compare_versions("codex-cli 0.46.0", "0.46.0"), Ordering::Equal);
    }

    #[test]
    fn test_stable_release_is_newer_than_prerelease() {
        assert_eq!(compare_versions("0.13.0-preview.2", "0.13.0"), Ordering::Less);
        assert!(is_newer("0.13.0", "0.13.0-preview.2"));
        assert!(is_newer("0.13.0-preview.3", "0.13.0-preview.2"));
        assert!(is_newer("0.13.0-preview.2", "0.12.9"));
    }

    #[test]
    fn test_is_newer_is_strict() {
        assert!(is_newer("1.0.1", "1.0.0"));
        assert!(!is_newer("1.0.0", "1.0.0"));
        assert!(!is_newer("0.9.0", "1.0.0"));
    }
}
