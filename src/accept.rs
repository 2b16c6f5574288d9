// # Accept matching
//
// Default implementation of the accept predicate. The pattern is a comma
// separated list where each entry is one of:
// - `*` or `*/*`: anything
// - `.ext`: file name extension
// - `type/*`: MIME type prefix
// - `type/subtype`: exact MIME type

use crate::file::RawFile;
use std::sync::Arc;

/// Predicate deciding whether a file matches an accept pattern
pub type AcceptFn = Arc<dyn Fn(&RawFile, &str) -> bool + Send + Sync>;

/// Match a file against an accept pattern. Comparison is case-insensitive.
/// A pattern with no entries matches everything, like `*`.
pub fn accepts(file: &RawFile, pattern: &str) -> bool {
    let mime_type = file.mime_type.to_lowercase();
    let name = file.name.to_lowercase();

    let entries: Vec<String> = pattern
        .split(',')
        .map(|entry| entry.trim().to_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect();
    if entries.is_empty() {
        return true;
    }

    entries.iter().map(String::as_str).any(|entry| {
        if entry == "*" || entry == "*/*" {
            true
        } else if entry.starts_with('.') {
            name.ends_with(entry)
        } else if let Some(prefix) = entry.strip_suffix("/*") {
            mime_type
                .split_once('/')
                .map(|(major, _)| major == prefix)
                .unwrap_or(false)
        } else {
            mime_type == entry
        }
    })
}

pub(crate) fn default_accept_fn() -> AcceptFn {
    Arc::new(accepts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, mime_type: &str) -> RawFile {
        RawFile::new(name, mime_type, vec![0u8; 4])
    }

    #[test]
    fn test_wildcard_matches_everything() {
        assert!(accepts(&file("a.bin", ""), "*"));
        assert!(accepts(&file("a.bin", "application/octet-stream"), "*/*"));
    }

    #[test]
    fn test_mixed_pattern() {
        let pattern = "image/*, .flac,application/pdf";

        assert!(accepts(&file("a.PNG", "image/png"), pattern));
        assert!(accepts(&file("Track 01.FLAC", "audio/flac"), pattern));
        assert!(accepts(&file("doc.pdf", "application/pdf"), pattern));
        assert!(!accepts(&file("a.mp3", "audio/mpeg"), pattern));
        assert!(!accepts(&file("a.txt", "text/plain"), pattern));
    }

    #[test]
    fn test_prefix_requires_full_major_type() {
        assert!(!accepts(&file("a", "imagery/x"), "image/*"));
        assert!(!accepts(&file("a", ""), "image/*"));
    }

    #[test]
    fn test_empty_pattern_matches_everything() {
        assert!(accepts(&file("a.png", "image/png"), ""));
        assert!(accepts(&file("a.bin", ""), " , "));
    }
}
