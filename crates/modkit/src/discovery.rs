//! Filesystem discovery of module executables
//!
//! The walk never follows symlinks and visits directory entries in sorted
//! order, so a fixed tree always produces the same catalog.

use crate::{ModuleError, Result};
use std::fs::{self, Metadata};
use std::io;
use std::path::{Component, Path};
use tracing::trace;

/// Check whether a directory entry is a module candidate
///
/// Candidates are regular files with the owner-execute bit set.
pub fn is_module_candidate(metadata: &Metadata) -> bool {
    if !metadata.file_type().is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o100 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}

/// Derive the fully-qualified module name for `path`
///
/// The name is everything after the first path component equal to
/// `marker`, or the path relative to `root` when no such component exists.
/// The extension of the last component is dropped and components are
/// joined with `/`.
pub fn derive_fullname(root: &Path, path: &Path, marker: &str) -> Option<String> {
    let normal: Vec<_> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();

    let tail: Vec<_> = match normal.iter().position(|part| *part == marker) {
        Some(index) => normal[index + 1..].to_vec(),
        None => path
            .strip_prefix(root)
            .ok()?
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect(),
    };

    let (last, parents) = tail.split_last()?;
    let stem = Path::new(last).file_stem()?;

    let mut parts: Vec<String> = parents
        .iter()
        .map(|part| part.to_string_lossy().into_owned())
        .collect();
    parts.push(stem.to_string_lossy().into_owned());
    Some(parts.join("/"))
}

/// Walk `root` depth-first, calling `visit` for every entry below it
///
/// Returns the number of entries visited, counting `root` itself. The first
/// I/O error stops the walk; entries already visited stay visited.
pub fn walk(root: &Path, visit: &mut dyn FnMut(&Path, &Metadata)) -> Result<usize> {
    let metadata = fs::symlink_metadata(root).map_err(discovery_error(root))?;

    let mut visited = 1;
    if metadata.is_dir() {
        walk_dir(root, visit, &mut visited)?;
    } else {
        visit(root, &metadata);
    }
    Ok(visited)
}

fn walk_dir(dir: &Path, visit: &mut dyn FnMut(&Path, &Metadata), visited: &mut usize) -> Result<()> {
    let mut paths = fs::read_dir(dir)
        .map_err(discovery_error(dir))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()
        .map_err(discovery_error(dir))?;
    paths.sort();

    for path in paths {
        let metadata = fs::symlink_metadata(&path).map_err(discovery_error(&path))?;
        *visited += 1;
        trace!("Visiting {:?}", path);

        if metadata.is_dir() {
            walk_dir(&path, visit, visited)?;
        } else {
            visit(&path, &metadata);
        }
    }

    Ok(())
}

fn discovery_error(path: &Path) -> impl FnOnce(io::Error) -> ModuleError {
    let path = path.to_path_buf();
    move |source| ModuleError::Discovery { path, source }
}
