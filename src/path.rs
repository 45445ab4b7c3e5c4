//! Logical-path helpers shared by [`crate::tree`], [`crate::walk`], and
//! [`crate::cache`].
//!
//! A logical path is slash-separated and relative to the root; the empty
//! string denotes the root itself. These helpers centralize the
//! trim-and-split behavior spec.md §3/§4.5 describes so every component
//! walks paths the same way.

/// Splits a logical path into its components, trimming leading/trailing
/// slashes first. The root (`""`, `"/"`, or all-slashes) yields no
/// components.
pub fn components(path: &str) -> Vec<&str> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

/// Joins a parent logical path and a child name into a child logical path.
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Appends a child name to a URL that is known to end in `/` (a folder
/// URL), percent-encoding is left to the caller via [`url::Url::join`]
/// elsewhere; this is used only for the plain string concatenation case
/// where the parent URL is already a validated absolute folder URL.
pub fn join_url(parent_url: &str, name: &str, trailing_slash: bool) -> String {
    let mut out = if parent_url.ends_with('/') {
        format!("{parent_url}{name}")
    } else {
        format!("{parent_url}/{name}")
    };
    if trailing_slash && !out.ends_with('/') {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_variants_have_no_components() {
        assert!(components("").is_empty());
        assert!(components("/").is_empty());
        assert!(components("///").is_empty());
    }

    #[test]
    fn trims_and_splits() {
        assert_eq!(components("/a/b/c/"), vec!["a", "b", "c"]);
        assert_eq!(components("a/b"), vec!["a", "b"]);
    }

    #[test]
    fn join_from_root_has_no_leading_slash() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a", "b"), "a/b");
    }

    #[test]
    fn join_url_adds_single_slash() {
        assert_eq!(join_url("http://h/a", "b", false), "http://h/a/b");
        assert_eq!(join_url("http://h/a/", "b", false), "http://h/a/b");
        assert_eq!(join_url("http://h/a/", "b", true), "http://h/a/b/");
    }
}
