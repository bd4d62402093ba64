use std::any::type_name;

#[inline]
pub fn short_type_name<K>() -> Option<&'static str> {
    let type_name = type_name::<K>();
    type_name.split("::").last()
}

/// Last path segment of a possibly slash-separated resource name.
///
/// Fleet membership refs may carry a `membership/foo` path; only the final
/// segment participates in downstream object names.
#[inline]
pub fn last_segment(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Sanitize a string into a DNS-1123 compatible object name.
pub fn sanitize_name(name: &str) -> String {
    let sanitized = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>();
    sanitized.trim_matches('-').chars().take(63).collect()
}

#[cfg(test)]
mod test {
    use super::{last_segment, sanitize_name};

    #[test]
    fn test_last_segment() {
        assert_eq!(last_segment("membership/foo"), "foo");
        assert_eq!(last_segment("foo/0"), "0");
        assert_eq!(last_segment("plain"), "plain");
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("github-0-dir-0"), "github-0-dir-0");
        assert_eq!(sanitize_name("Repo_Name/sub"), "repo-name-sub");
        assert_eq!(sanitize_name("-edge-"), "edge");
    }

    #[test]
    fn test_sanitize_name_truncates() {
        let long = "a".repeat(100);
        assert_eq!(sanitize_name(&long).len(), 63);
    }
}
