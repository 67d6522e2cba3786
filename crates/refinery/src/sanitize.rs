//! Helpers for making user-supplied names safe for the filesystem and for
//! log fields.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

static RE_UNSAFE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());
static RE_DOTS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.{2,}").unwrap());

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Reduces an uploaded filename to a single safe path component.
///
/// Directory parts are dropped, runs of unsafe characters become `_`, and
/// leading dots are stripped so the result is never hidden or a traversal.
/// Returns `None` when nothing usable remains.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    let cleaned = RE_UNSAFE.replace_all(base, "_");
    let cleaned = RE_DOTS.replace_all(&cleaned, ".");
    let cleaned = cleaned.trim_start_matches('.').trim_matches('_');

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Everything before the first `.` of a filename: `sales.2024.csv` -> `sales`.
pub fn stem_before_first_dot(name: &str) -> &str {
    name.split('.').next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(Path::new("/srv/uploads/1700-sales.csv")),
            "1700-sales.csv"
        );
    }

    #[test]
    fn test_redact_path_no_filename() {
        assert_eq!(redact_path(Path::new("/")), "<unknown>");
    }

    #[test]
    fn test_sanitize_keeps_plain_names() {
        assert_eq!(sanitize_filename("sales.csv").as_deref(), Some("sales.csv"));
        assert_eq!(
            sanitize_filename("Q1-report_v2.xlsx").as_deref(),
            Some("Q1-report_v2.xlsx")
        );
    }

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(
            sanitize_filename("../../etc/passwd.csv").as_deref(),
            Some("passwd.csv")
        );
        assert_eq!(
            sanitize_filename("C:\\Users\\me\\data.csv").as_deref(),
            Some("data.csv")
        );
    }

    #[test]
    fn test_sanitize_replaces_unsafe_characters() {
        assert_eq!(
            sanitize_filename("my sales (final).csv").as_deref(),
            Some("my_sales_final_.csv")
        );
        assert_eq!(sanitize_filename("a..b.csv").as_deref(), Some("a.b.csv"));
    }

    #[test]
    fn test_sanitize_rejects_empty_results() {
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename("   "), None);
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename("dir/"), None);
    }

    #[test]
    fn test_stem_before_first_dot() {
        assert_eq!(stem_before_first_dot("sales.2024.csv"), "sales");
        assert_eq!(stem_before_first_dot("noext"), "noext");
        assert_eq!(stem_before_first_dot(".hidden"), "");
    }
}
