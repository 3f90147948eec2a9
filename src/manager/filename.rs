//! File name sanitization and unique path resolution for stored downloads.

use std::path::{Component, Path, PathBuf};

use crate::identifier::Identifier;

/// Replaces characters that are unsafe in file names.
///
/// Path separators, reserved characters and control characters become `_`.
/// Names that would still traverse directories have their dots replaced.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
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

/// Destination name for an identifier: its save-as name, else its last path segment.
#[must_use]
pub fn file_name_for(identifier: &Identifier) -> String {
    if let Some(save_as) = identifier.save_as()
        && !save_as.trim().is_empty()
    {
        return sanitize_filename(save_as);
    }
    if let Some(name) = identifier.file_name() {
        return sanitize_filename(&name);
    }
    let host = identifier.host().unwrap_or("download").replace('.', "-");
    format!("{}.bin", sanitize_filename(&host))
}

/// `dir/filename`, or `dir/stem_N.ext` with the first free `N` when taken.
#[must_use]
pub fn resolve_unique_path(dir: &Path, filename: &str) -> PathBuf {
    let filename = {
        let sanitized = sanitize_filename(filename);
        if sanitized.trim_matches('_').is_empty() {
            "download.bin".to_string()
        } else {
            sanitized
        }
    };
    let base_path = dir.join(&filename);
    if !base_path.exists() {
        return base_path;
    }

    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename.as_str(), ""),
    };

    for i in 1..1000 {
        let candidate = dir.join(format!("{stem}_{i}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.join(format!("{stem}_{timestamp}{ext}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_filename("a/b\\c:d*e?.mov"), "a_b_c_d_e_.mov");
        assert_eq!(sanitize_filename("Movie: Trailer.mov"), "Movie_ Trailer.mov");
    }

    #[test]
    fn test_sanitize_blocks_traversal() {
        assert_eq!(sanitize_filename(".."), "__");
        assert_eq!(sanitize_filename(""), "_");
    }

    #[test]
    fn test_file_name_for_prefers_save_as() {
        let id = Identifier::parse("https://example.com/v/123.mp4")
            .unwrap()
            .with_save_as("Movie (123).mp4");
        assert_eq!(file_name_for(&id), "Movie (123).mp4");
    }

    #[test]
    fn test_file_name_for_uses_decoded_basename() {
        let id = Identifier::parse("https://example.com/v/My%20Clip.mp4").unwrap();
        assert_eq!(file_name_for(&id), "My Clip.mp4");
    }

    #[test]
    fn test_file_name_for_directory_url_falls_back_to_host() {
        let id = Identifier::parse("https://example.com/").unwrap();
        assert_eq!(file_name_for(&id), "example-com.bin");
    }

    #[test]
    fn test_resolve_unique_path_adds_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let first = resolve_unique_path(dir.path(), "a.mov");
        assert_eq!(first, dir.path().join("a.mov"));
        std::fs::write(&first, b"x").unwrap();
        let second = resolve_unique_path(dir.path(), "a.mov");
        assert_eq!(second, dir.path().join("a_1.mov"));
    }
}
