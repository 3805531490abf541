//! Path helpers for profile contexts
//!
//! Every file the pipeline touches must live under a profile's context
//! directory. These helpers resolve paths lexically (no symlink resolution,
//! no filesystem access beyond the current directory) so that the same
//! answer comes back whether or not the file still exists.

use std::path::{Component, Path, PathBuf};

use super::errors::DomainError;

/// Expands a leading `~` or `~/` to the user's home directory
///
/// Any other input is returned unchanged. When the home directory cannot
/// be determined the input is returned as-is.
pub fn expand_tilde(raw: &str) -> PathBuf {
    if raw == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(raw));
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Lexically normalises a path: drops `.` segments and folds `..` into
/// their parent. `..` at the root is discarded.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(seg) => out.push(seg),
        }
    }
    out
}

/// Returns an absolute, lexically normalised version of `path`
///
/// Relative paths are resolved against the current working directory.
///
/// # Errors
/// Returns [`DomainError::InvalidPath`] for an empty path or when the
/// current directory cannot be read.
pub fn absolutize(path: &Path) -> Result<PathBuf, DomainError> {
    if path.as_os_str().is_empty() {
        return Err(DomainError::InvalidPath(String::new()));
    }
    if path.is_absolute() {
        return Ok(normalize(path));
    }
    let cwd = std::env::current_dir()
        .map_err(|e| DomainError::InvalidPath(format!("{}: {e}", path.display())))?;
    Ok(normalize(&cwd.join(path)))
}

/// Computes the path of `file` relative to `context`
///
/// Both paths are made absolute first. A file equal to the context itself
/// resolves to its own file name.
///
/// # Errors
/// Returns [`DomainError::PathNotInContext`] when `file` does not live
/// under `context`.
pub fn relative_to_context(file: &Path, context: &Path) -> Result<PathBuf, DomainError> {
    let abs_file = absolutize(file)?;
    let abs_context = absolutize(context)?;

    if abs_file == abs_context {
        return abs_file
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| DomainError::InvalidPath(abs_file.display().to_string()));
    }

    match abs_file.strip_prefix(&abs_context) {
        Ok(rel) if !rel.as_os_str().is_empty() => Ok(rel.to_path_buf()),
        _ => Err(DomainError::PathNotInContext {
            path: abs_file.display().to_string(),
            context: abs_context.display().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolutize_normalizes_dots() {
        let p = absolutize(Path::new("/srv/site/./a/../b/file.txt")).unwrap();
        assert_eq!(p, PathBuf::from("/srv/site/b/file.txt"));
    }

    #[test]
    fn test_absolutize_relative_uses_cwd() {
        let cwd = std::env::current_dir().unwrap();
        let p = absolutize(Path::new("some/file.txt")).unwrap();
        assert_eq!(p, cwd.join("some/file.txt"));
    }

    #[test]
    fn test_absolutize_rejects_empty() {
        assert!(matches!(
            absolutize(Path::new("")),
            Err(DomainError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_relative_to_context_nested() {
        let rel =
            relative_to_context(Path::new("/srv/site/css/main.css"), Path::new("/srv/site"))
                .unwrap();
        assert_eq!(rel, PathBuf::from("css/main.css"));
    }

    #[test]
    fn test_relative_to_context_trailing_slash_context() {
        let rel =
            relative_to_context(Path::new("/srv/site/index.html"), Path::new("/srv/site/"))
                .unwrap();
        assert_eq!(rel, PathBuf::from("index.html"));
    }

    #[test]
    fn test_relative_to_context_equal_paths_uses_file_name() {
        let rel = relative_to_context(Path::new("/srv/site"), Path::new("/srv/site")).unwrap();
        assert_eq!(rel, PathBuf::from("site"));
    }

    #[test]
    fn test_relative_to_context_sibling_prefix_is_rejected() {
        // "/srv/site2" shares a string prefix with "/srv/site" but is not inside it
        let err = relative_to_context(Path::new("/srv/site2/a.txt"), Path::new("/srv/site"))
            .unwrap_err();
        assert!(matches!(err, DomainError::PathNotInContext { .. }));
    }

    #[test]
    fn test_relative_to_context_escape_via_parent_dir() {
        let err = relative_to_context(
            Path::new("/srv/site/../secrets/key.pem"),
            Path::new("/srv/site"),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::PathNotInContext { .. }));
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        assert_eq!(expand_tilde("rel/path"), PathBuf::from("rel/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/www"), home.join("www"));
            assert_eq!(expand_tilde("~"), home);
        }
    }
}
