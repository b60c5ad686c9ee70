//! Key normalization and path-prefix helpers.
//!
//! Keys are `/`-separated paths. Object stores have no directories, so a
//! "directory" is any prefix that ends at a separator boundary. All helpers
//! here operate on normalized keys: no leading, trailing or repeated
//! separators.

/// Path separator for keys.
pub const SEPARATOR: char = '/';

/// Normalize a key by dropping empty segments.
///
/// `"/acme//example.com/"` becomes `"acme/example.com"`. An input made only
/// of separators normalizes to the empty string.
pub fn normalize(key: &str) -> String {
    key.split(SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Join path segments into a normalized key.
pub fn join<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = parts
        .into_iter()
        .map(|part| part.as_ref().to_string())
        .collect::<Vec<_>>()
        .join("/");
    normalize(&joined)
}

/// Returns `true` if `key` lies strictly below `prefix`.
///
/// The empty prefix contains every non-empty key. `a/b` is below `a` but
/// `ab` is not.
pub fn is_under(key: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return !key.is_empty();
    }
    key.strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with(SEPARATOR) && rest.len() > 1)
}

/// The immediate child of `prefix` on the way to `key`.
///
/// For `key = "a/b/c"` and `prefix = "a"` this is `"a/b"`. Returns `None`
/// when `key` is not below `prefix`.
pub fn child_of(key: &str, prefix: &str) -> Option<String> {
    if !is_under(key, prefix) {
        return None;
    }
    let rest = if prefix.is_empty() {
        key
    } else {
        &key[prefix.len() + 1..]
    };
    let segment = rest.split(SEPARATOR).next()?;
    Some(join([prefix, segment]))
}

/// Strip a root namespace from a stored key.
///
/// Returns `None` for keys outside the namespace.
pub fn strip_root<'a>(key: &'a str, root: &str) -> Option<&'a str> {
    if root.is_empty() {
        return Some(key);
    }
    if is_under(key, root) {
        Some(&key[root.len() + 1..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("acme/example.com"), "acme/example.com");
        assert_eq!(normalize("/acme//example.com/"), "acme/example.com");
        assert_eq!(normalize("///"), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_join() {
        assert_eq!(join(["acme", "example.com", "sites"]), "acme/example.com/sites");
        assert_eq!(join(["", "acme/", "/lock"]), "acme/lock");
    }

    #[test]
    fn test_is_under_respects_segment_boundary() {
        assert!(is_under("a/b", "a"));
        assert!(is_under("a/b/c", "a/b"));
        assert!(!is_under("ab", "a"));
        assert!(!is_under("a", "a"));
        assert!(is_under("a", ""));
        assert!(!is_under("", ""));
    }

    #[test]
    fn test_child_of() {
        assert_eq!(child_of("a/b/c", "a"), Some("a/b".to_string()));
        assert_eq!(child_of("a/e", "a"), Some("a/e".to_string()));
        assert_eq!(child_of("a/b/c", ""), Some("a".to_string()));
        assert_eq!(child_of("ab/c", "a"), None);
    }

    #[test]
    fn test_strip_root() {
        assert_eq!(strip_root("certs/acme/x", "certs"), Some("acme/x"));
        assert_eq!(strip_root("acme/x", ""), Some("acme/x"));
        assert_eq!(strip_root("other/x", "certs"), None);
        assert_eq!(strip_root("certsx/y", "certs"), None);
    }
}
