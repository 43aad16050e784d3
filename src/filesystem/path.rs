// src/filesystem/path.rs

//! Path sanitization for paths taken from package metadata and archives
//!
//! Every path a package names is untrusted: it is reduced to a relative path
//! with no `..` components before being joined onto the target root.

use crate::error::{Error, Result};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Symlinks followed by `resolve_in_root` before giving up, as the kernel's ELOOP limit
const MAX_SYMLINK_HOPS: usize = 40;

/// Reduce an untrusted path to a normalized relative path
///
/// Leading slashes and `.` components are dropped, `..` is rejected, and an
/// empty result is an error.
///
/// ```
/// use strata::filesystem::path::sanitize_path;
/// use std::path::PathBuf;
///
/// assert_eq!(sanitize_path("/usr/bin/foo").unwrap(), PathBuf::from("usr/bin/foo"));
/// assert!(sanitize_path("usr/../../etc/passwd").is_err());
/// ```
pub fn sanitize_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let path_str = path.to_string_lossy();
    let relative = path_str.trim_start_matches('/');

    let mut normalized = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir | Component::Prefix(_) | Component::RootDir => {}
            Component::ParentDir => return Err(Error::PathTraversal(path_str.to_string())),
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(Error::InvalidPath(format!("'{}' names no file", path_str)));
    }

    Ok(normalized)
}

/// Join an untrusted package path onto the target root
///
/// When both sides exist on disk the canonical result must still live under
/// the canonical root, which catches symlinks planted by earlier packages.
pub fn safe_join(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<PathBuf> {
    let root = root.as_ref();
    let joined = root.join(sanitize_path(path.as_ref())?);

    if let (Ok(canonical_root), Ok(canonical_joined)) =
        (root.canonicalize(), joined.canonicalize())
        && !canonical_joined.starts_with(&canonical_root)
    {
        return Err(Error::PathTraversal(format!(
            "{} escapes root {}",
            joined.display(),
            root.display()
        )));
    }

    Ok(joined)
}

/// Host location of `path` as a process chrooted into `root` would see it
///
/// Symlinks are followed one component at a time. Absolute link targets
/// restart at `root` and `..` never climbs above it, so the result always
/// lies under `root`. The final component need not exist.
pub fn resolve_in_root(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<PathBuf> {
    let root = root.as_ref();
    let mut pending = Vec::new();
    push_components(&mut pending, path.as_ref());

    let mut resolved = PathBuf::new();
    let mut hops = 0;
    while let Some(part) = pending.pop() {
        if part == ".." {
            resolved.pop();
            continue;
        }
        let candidate = resolved.join(&part);
        let host = root.join(&candidate);
        match fs::symlink_metadata(&host) {
            Ok(meta) if meta.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(Error::PathTraversal(format!(
                        "too many symlinks resolving {} in {}",
                        path.as_ref().display(),
                        root.display()
                    )));
                }
                let target = fs::read_link(&host)?;
                if target.is_absolute() {
                    resolved.clear();
                }
                push_components(&mut pending, &target);
            }
            Ok(_) => resolved = candidate,
            Err(e) if e.kind() == io::ErrorKind::NotFound => resolved = candidate,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(root.join(resolved))
}

/// Queue the components of `path` so that popping yields them in order
fn push_components(pending: &mut Vec<OsString>, path: &Path) {
    for component in path.components().rev() {
        match component {
            Component::Normal(c) => pending.push(c.to_os_string()),
            Component::ParentDir => pending.push(OsString::from("..")),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
}

/// Validate a single file name, such as an artifact name built from package metadata
pub fn sanitize_filename(name: &str) -> Result<&str> {
    if name.is_empty() {
        return Err(Error::InvalidPath("empty file name".to_string()));
    }
    if name.contains('/') || name == "." || name == ".." {
        return Err(Error::PathTraversal(format!("invalid file name: {}", name)));
    }
    Ok(name)
}

/// Path as recorded in the database and in reference counts: absolute, normalized
pub fn absolute_package_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    Ok(Path::new("/").join(sanitize_path(path)?))
}
