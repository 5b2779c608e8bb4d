//! Filename derivation, sanitization and truncation for downloads.

use std::path::{Component, Path};

use url::Url;

use super::constants::MAX_FILENAME_LEN;

/// Fallback name when a link has no usable path segment.
pub const FALLBACK_FILENAME: &str = "download.bin";

/// Derives a filename from the last percent-decoded path segment of `link`.
#[must_use]
pub fn filename_from_link(link: &str) -> String {
    let Ok(url) = Url::parse(link) else {
        return FALLBACK_FILENAME.to_string();
    };
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(|s| {
            urlencoding::decode(s)
                .map_or_else(|_| s.to_string(), std::borrow::Cow::into_owned)
        });
    match segment {
        Some(name) if !name.trim().is_empty() => sanitize_filename(name.trim()),
        _ => FALLBACK_FILENAME.to_string(),
    }
}

/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Shortens `name` to at most 120 characters, keeping its extension.
#[must_use]
pub fn truncate_filename(name: &str) -> String {
    truncate_to(name, MAX_FILENAME_LEN)
}

fn truncate_to(name: &str, max_chars: usize) -> String {
    if name.chars().count() <= max_chars {
        return name.to_string();
    }

    let extension = name
        .rfind('.')
        .filter(|&dot| dot > 0)
        .map(|dot| &name[dot..])
        .filter(|ext| ext.chars().count() < max_chars)
        .unwrap_or("");
    let stem = &name[..name.len() - extension.len()];
    let keep = max_chars - extension.chars().count();
    let mut truncated: String = stem.chars().take(keep).collect();
    truncated.push_str(extension);
    truncated
}
