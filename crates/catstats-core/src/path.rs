//! Helpers for navigation-qualified field paths.
//!
//! `$orderby` and expand options may address a field of an expanded
//! relation as `"navigation/field"`. These helpers centralise the split so
//! every call site behaves identically.

/// Split `"stats/heartRate"` into `("stats", "heartRate")`.
///
/// Returns `None` when there is no `/` or either side is empty.
///
/// ```
/// # use catstats_core::path::split_navigation;
/// assert_eq!(split_navigation("stats/heartRate"), Some(("stats", "heartRate")));
/// assert_eq!(split_navigation("heartRate"), None);
/// ```
pub fn split_navigation(path: &str) -> Option<(&str, &str)> {
    let idx = path.find('/')?;
    let (nav, field) = (&path[..idx], &path[idx + 1..]);
    if nav.is_empty() || field.is_empty() {
        return None;
    }
    Some((nav, field))
}

/// Strip `"navigation/"` from a path. Returns `None` if the path does not
/// start with that navigation.
///
/// ```
/// # use catstats_core::path::strip_navigation;
/// assert_eq!(strip_navigation("stats/heartRate", "stats"), Some("heartRate"));
/// assert_eq!(strip_navigation("owner/name", "stats"), None);
/// ```
pub fn strip_navigation<'a>(path: &'a str, navigation: &str) -> Option<&'a str> {
    path.strip_prefix(navigation)?
        .strip_prefix('/')
        .filter(|rest| !rest.is_empty())
}

/// Join a navigation and a field into `"navigation/field"`
///
/// ```
/// # use catstats_core::path::qualified;
/// assert_eq!(qualified("stats", "heartRate"), "stats/heartRate");
/// ```
pub fn qualified(navigation: &str, field: &str) -> String {
    format!("{}/{}", navigation, field)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_with_navigation() {
        assert_eq!(
            split_navigation("stats/bodyTemperature"),
            Some(("stats", "bodyTemperature"))
        );
    }

    #[test]
    fn split_without_navigation() {
        assert_eq!(split_navigation("bodyTemperature"), None);
    }

    #[test]
    fn split_empty_sides() {
        assert_eq!(split_navigation("/heartRate"), None);
        assert_eq!(split_navigation("stats/"), None);
    }

    #[test]
    fn split_nested_path() {
        // Only splits on the first `/`
        assert_eq!(split_navigation("owner/pet/name"), Some(("owner", "pet/name")));
    }

    #[test]
    fn strip_matching_navigation() {
        assert_eq!(strip_navigation("stats/heartRate", "stats"), Some("heartRate"));
    }

    #[test]
    fn strip_prefix_of_longer_name() {
        assert_eq!(strip_navigation("statsx/heartRate", "stats"), None);
        assert_eq!(strip_navigation("stats", "stats"), None);
    }
}
