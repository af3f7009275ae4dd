//! Named sampling periods and nearest-match search.
//!
//! Canonical names are lower case except for months (`1M`). Names outside the
//! canonical table (e.g. `10m`, `2d`) still parse into a duration so that a
//! source can serve them by aggregation.

/// Canonical granularities, finest first.
pub const CANONICAL: &[(&str, i64)] = &[
    ("1s", 1),
    ("1m", 60),
    ("3m", 180),
    ("5m", 300),
    ("15m", 900),
    ("30m", 1_800),
    ("1h", 3_600),
    ("2h", 7_200),
    ("4h", 14_400),
    ("6h", 21_600),
    ("8h", 28_800),
    ("12h", 43_200),
    ("1d", 86_400),
    ("3d", 259_200),
    ("1w", 604_800),
    ("1M", 2_592_000),
];

/// Position of a name in the canonical ordering.
pub fn canonical_index(name: &str) -> Option<usize> {
    CANONICAL.iter().position(|(n, _)| *n == name)
}

/// Whether the name is one of the canonical granularities.
pub fn is_canonical(name: &str) -> bool {
    canonical_index(name).is_some()
}

/// Duration of a granularity in seconds.
///
/// Canonical names resolve through the table; other `<n><unit>` names with
/// unit `s`, `m`, `h`, `d`, `w` or `M` are computed.
pub fn to_seconds(name: &str) -> Option<i64> {
    if let Some(idx) = canonical_index(name) {
        return Some(CANONICAL[idx].1);
    }
    let unit = name.chars().last()?;
    let count: i64 = name[..name.len() - unit.len_utf8()].parse().ok()?;
    if count <= 0 {
        return None;
    }
    let unit_secs = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3_600,
        'd' => 86_400,
        'w' => 604_800,
        'M' => 2_592_000,
        _ => return None,
    };
    count.checked_mul(unit_secs)
}

/// Whether the name denotes a usable granularity.
pub fn is_valid(name: &str) -> bool {
    to_seconds(name).is_some()
}

/// Split a list into valid and invalid names.
pub fn validate_list<'a, S: AsRef<str>>(names: &'a [S]) -> (bool, Vec<&'a str>) {
    let invalid: Vec<&str> = names
        .iter()
        .map(AsRef::as_ref)
        .filter(|n| !is_valid(n))
        .collect();
    (invalid.is_empty(), invalid)
}

/// Finest supported granularity that evenly divides `requested` at least twice.
///
/// Candidates satisfy `requested % g == 0 && requested >= 2 * g`. The largest
/// candidate wins, which keeps the number of raw samples fetched smallest;
/// ties keep declaration order. Returns the base name and the ratio.
pub fn aggregation_base<'a, S: AsRef<str>>(
    requested: &str,
    supported: &'a [S],
) -> Option<(&'a str, i64)> {
    let requested_secs = to_seconds(requested)?;
    let mut best: Option<(&str, i64)> = None;
    for name in supported.iter().map(AsRef::as_ref) {
        let Some(secs) = to_seconds(name) else {
            continue;
        };
        if requested_secs % secs != 0 || requested_secs < 2 * secs {
            continue;
        }
        match best {
            Some((_, best_secs)) if best_secs >= secs => {}
            _ => best = Some((name, secs)),
        }
    }
    best.map(|(name, secs)| (name, requested_secs / secs))
}

/// Find the supported granularity closest to `requested`.
///
/// Exact match first. For canonical names, scan the canonical ordering from
/// `requested` towards coarser periods, then towards finer ones, and return
/// the first supported member. A non-canonical name has no position in the
/// ordering; it resolves to its aggregation base instead.
pub fn find_closest_supported<'a, S: AsRef<str>>(
    requested: &str,
    supported: &'a [S],
) -> Option<&'a str> {
    if let Some(exact) = supported.iter().map(AsRef::as_ref).find(|s| *s == requested) {
        return Some(exact);
    }

    let Some(idx) = canonical_index(requested) else {
        return aggregation_base(requested, supported).map(|(name, _)| name);
    };

    let lookup = |name: &str| supported.iter().map(AsRef::as_ref).find(|s| *s == name);

    CANONICAL[idx..]
        .iter()
        .chain(CANONICAL[..idx].iter().rev())
        .find_map(|(name, _)| lookup(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_seconds() {
        assert_eq!(to_seconds("1m"), Some(60));
        assert_eq!(to_seconds("4h"), Some(14_400));
        assert_eq!(to_seconds("1M"), Some(2_592_000));
        assert_eq!(to_seconds("10m"), Some(600));
        assert_eq!(to_seconds("2d"), Some(172_800));
        assert_eq!(to_seconds("0m"), None);
        assert_eq!(to_seconds("1x"), None);
        assert_eq!(to_seconds(""), None);
        assert_eq!(to_seconds("h"), None);
    }

    #[test]
    fn test_is_valid() {
        assert!(is_valid("1d"));
        assert!(is_valid("10m"));
        assert!(!is_valid("hourly"));
        assert!(is_canonical("1h"));
        assert!(!is_canonical("10m"));
    }

    #[test]
    fn test_validate_list() {
        let (ok, invalid) = validate_list(&["1m", "bogus", "1h"]);
        assert!(!ok);
        assert_eq!(invalid, vec!["bogus"]);
    }

    #[test]
    fn test_closest_exact_match() {
        assert_eq!(find_closest_supported("1h", &["1m", "1h"]), Some("1h"));
    }

    #[test]
    fn test_closest_prefers_coarser() {
        // 2h missing: walks up to 4h before looking down at 1h
        assert_eq!(find_closest_supported("2h", &["1h", "4h"]), Some("4h"));
    }

    #[test]
    fn test_closest_falls_back_to_finer() {
        assert_eq!(find_closest_supported("1d", &["1m", "1h"]), Some("1h"));
    }

    #[test]
    fn test_closest_no_match() {
        let empty: [&str; 0] = [];
        assert_eq!(find_closest_supported("1h", &empty), None);
    }

    #[test]
    fn test_closest_non_canonical_uses_largest_divisor() {
        let supported = ["1m", "5m", "15m", "1h"];
        assert_eq!(find_closest_supported("10m", &supported), Some("5m"));
    }

    #[test]
    fn test_aggregation_base_largest_divisor() {
        let supported = ["1m", "5m", "15m", "1h"];
        assert_eq!(aggregation_base("10m", &supported), Some(("5m", 2)));
        assert_eq!(aggregation_base("2h", &supported), Some(("1h", 2)));
        assert_eq!(aggregation_base("2d", &["1h", "1d"]), Some(("1d", 2)));
    }

    #[test]
    fn test_aggregation_base_requires_ratio_two() {
        // 1h cannot aggregate from itself
        assert_eq!(aggregation_base("1h", &["1h"]), None);
        // 7m is not a multiple of 5m
        assert_eq!(aggregation_base("7m", &["5m"]), None);
    }
}
