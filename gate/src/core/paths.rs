//! Helpers for slash-separated repository paths.

/// Every ancestor directory of `file`, nearest first, ending with the root (`""`).
///
/// Empty components are ignored, so `"a//b.py"` and `"a/b.py"` agree. A path
/// with no components has no ancestors.
pub fn ancestor_directories(file: &str) -> Vec<String> {
    let parts: Vec<&str> = file.split('/').filter(|part| !part.is_empty()).collect();
    (0..parts.len())
        .rev()
        .map(|len| parts[..len].join("/"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_level_file_has_only_root() {
        assert_eq!(ancestor_directories("b.py"), vec![""]);
    }

    #[test]
    fn nested_file_lists_nearest_first() {
        assert_eq!(ancestor_directories("a/b/c.py"), vec!["a/b", "a", ""]);
    }

    #[test]
    fn empty_path_has_no_ancestors() {
        assert!(ancestor_directories("").is_empty());
        assert!(ancestor_directories("/").is_empty());
    }

    #[test]
    fn redundant_separators_are_ignored() {
        assert_eq!(ancestor_directories("a//b.py"), vec!["a", ""]);
    }
}
