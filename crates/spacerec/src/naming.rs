//! Resource IDs from URLs and output path conventions.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::Local;
use regex::Regex;

use crate::status::StatusReport;

static SPACE_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"spaces/(\w+)").unwrap());

/// Default extension of captured audio.
pub const DEFAULT_EXTENSION: &str = "aac";

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Extract the resource ID from a space URL such as
/// `https://x.com/i/spaces/1OyKAjPPAPbGb?s=20`.
pub fn parse_space_id(url: &str) -> Option<String> {
    SPACE_URL_REGEX
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Make `input` safe as a filename on every platform.
///
/// 1. Replaces control and Windows invalid characters with underscores
/// 2. Collapses consecutive replacements into one underscore
/// 3. Trims leading/trailing spaces and dots
/// 4. Prefixes Windows reserved names with `_`
/// 5. Returns "unnamed" if the result would be empty
///
/// # Examples
///
/// ```
/// use spacerec_engine::naming::sanitize_filename;
///
/// assert_eq!(sanitize_filename("Weekly AMA?"), "Weekly AMA_");
/// assert_eq!(sanitize_filename("a<>b"), "a_b");
/// assert_eq!(sanitize_filename(" .. "), "unnamed");
/// assert_eq!(sanitize_filename("CON"), "_CON");
/// ```
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let upper = trimmed.to_uppercase();
    let reserved = WINDOWS_RESERVED_NAMES
        .iter()
        .any(|name| upper == *name || upper.starts_with(&format!("{name}.")));
    if reserved {
        format!("_{trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// `Space_<id>`, or `<title>_<id>` when the title is known.
pub fn watcher_filename(id: &str, report: &StatusReport) -> String {
    match report.title.as_deref().map(str::trim) {
        Some(title) if !title.is_empty() => sanitize_filename(&format!("{title}_{id}")),
        _ => sanitize_filename(&format!("Space_{id}")),
    }
}

/// `Space_<local timestamp>` for captures without a resource ID.
pub fn timestamped_filename() -> String {
    format!("Space_{}", Local::now().format("%Y%m%d_%H%M%S"))
}

/// `<media_root>/<sub_dir>/<filename>.<extension>`
pub fn output_path(
    media_root: &Path,
    sub_dir: Option<&str>,
    filename: &str,
    extension: &str,
) -> PathBuf {
    let mut path = media_root.to_path_buf();
    if let Some(sub_dir) = sub_dir.filter(|s| !s.is_empty()) {
        path.push(sub_dir);
    }
    path.push(format!("{}.{extension}", sanitize_filename(filename)));
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::ResourceStatus;

    #[test]
    fn space_id_from_urls() {
        assert_eq!(
            parse_space_id("https://x.com/i/spaces/1OyKAjPPAPbGb").as_deref(),
            Some("1OyKAjPPAPbGb")
        );
        assert_eq!(
            parse_space_id("https://twitter.com/i/spaces/1ypKdAbcdEfGW?s=20").as_deref(),
            Some("1ypKdAbcdEfGW")
        );
        assert_eq!(parse_space_id("https://x.com/home"), None);
    }

    #[test]
    fn sanitize() {
        assert_eq!(sanitize_filename("hello?world"), "hello_world");
        assert_eq!(sanitize_filename("a<>:b"), "a_b");
        assert_eq!(sanitize_filename(" . "), "unnamed");
        assert_eq!(sanitize_filename("con"), "_con");
        assert_eq!(sanitize_filename("観る会"), "観る会");
    }

    #[test]
    fn watcher_filenames() {
        let mut report = StatusReport::new(ResourceStatus::Scheduled);
        assert_eq!(watcher_filename("abc", &report), "Space_abc");
        report.title = Some("Weekly: AMA?".to_string());
        assert_eq!(watcher_filename("abc", &report), "Weekly_ AMA__abc");
    }

    #[test]
    fn output_path_layout() {
        let root = Path::new("/media");
        assert_eq!(
            output_path(root, Some("spaces"), "room", DEFAULT_EXTENSION),
            PathBuf::from("/media/spaces/room.aac")
        );
        assert_eq!(
            output_path(root, Some(""), "room", "aac"),
            PathBuf::from("/media/room.aac")
        );
        assert!(timestamped_filename().starts_with("Space_"));
    }
}
