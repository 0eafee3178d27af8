//! Path normalization for registry keys.
//!
//! Registry lookups compare paths exactly, and native events report paths
//! relative to the directory that was registered. Both sides therefore go
//! through the same normalization: absolute, lexically cleaned, and with the
//! existing directory part resolved through symlinks.

use std::path::{Component, Path, PathBuf};

/// Make `path` absolute against the current directory and drop `.`/`..`
/// components without touching the filesystem.
pub fn lexical_absolute(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Normalize a file path. The file itself may not exist yet.
pub fn normalize_file(path: &Path) -> PathBuf {
    let absolute = lexical_absolute(path);
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => match parent.canonicalize() {
            Ok(parent) => parent.join(name),
            Err(_) => absolute,
        },
        _ => absolute,
    }
}

/// Normalize a directory path.
pub fn normalize_directory(path: &Path) -> PathBuf {
    let absolute = lexical_absolute(path);
    absolute.canonicalize().unwrap_or(absolute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lexical_cleanup() {
        assert_eq!(
            lexical_absolute(Path::new("/a/./b/../c.md")),
            PathBuf::from("/a/c.md")
        );
        assert!(lexical_absolute(Path::new("notes.md")).is_absolute());
    }

    #[test]
    fn test_normalize_file_resolves_parent_only() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("docs");
        std::fs::create_dir(&dir).unwrap();

        let normalized = normalize_file(&dir.join("../docs/missing.md"));
        assert_eq!(
            normalized,
            dir.canonicalize().unwrap().join("missing.md")
        );
    }

    #[test]
    fn test_normalize_missing_directory_is_lexical() {
        let missing = Path::new("/definitely/not/here/..");
        assert_eq!(
            normalize_directory(missing),
            PathBuf::from("/definitely/not")
        );
    }
}
