//! Directory traversal in a stable order.
//!
//! Entries are visited sorted by file name so that two walks over an
//! unchanged tree always yield the same sequence, which keeps archive
//! streams (and therefore fingerprints) reproducible across runs.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Maximum depth (None = unlimited)
    pub max_depth: Option<usize>,

    /// Entry names skipped together with everything below them (exact match)
    pub exclude_names: Vec<String>,
}

/// Information about an entry discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the entry
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// Size in bytes (0 for directories)
    pub size: u64,

    /// Is this a directory?
    pub is_dir: bool,

    /// Is this a symlink? Symlinks are reported, never followed.
    pub is_symlink: bool,

    /// Depth from root (the root itself is 0)
    pub depth: usize,
}

impl FileInfo {
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Self> {
        let metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        Ok(Self {
            size: if metadata.is_file() { metadata.len() } else { 0 },
            is_dir: metadata.is_dir(),
            is_symlink: entry.path_is_symlink(),
            depth: entry.depth(),
            path,
            relative_path,
        })
    }
}

/// Walk a tree in sorted order, calling `callback` for every entry including
/// the root and directories.
///
/// The first error (from the walk or from the callback) stops the walk and is
/// returned; nothing is skipped silently.
pub fn walk_sorted<F>(root: &Path, options: &WalkOptions, mut callback: F) -> std::io::Result<()>
where
    F: FnMut(&FileInfo) -> std::io::Result<()>,
{
    let mut walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name();

    if let Some(max_depth) = options.max_depth {
        walker = walker.max_depth(max_depth);
    }

    let mut iter = walker.into_iter();
    while let Some(entry) = iter.next() {
        let entry = entry?;

        if entry.depth() > 0 && should_exclude(&entry, &options.exclude_names) {
            if entry.file_type().is_dir() {
                iter.skip_current_dir();
            }
            continue;
        }

        callback(&FileInfo::from_entry(&entry, root)?)?;
    }

    Ok(())
}

/// Names of the directories directly below `root`, sorted.
pub fn top_level_dirs(root: &Path) -> std::io::Result<Vec<String>> {
    let options = WalkOptions {
        max_depth: Some(1),
        ..WalkOptions::default()
    };

    let mut names = Vec::new();
    walk_sorted(root, &options, |info| {
        if info.depth == 1 && info.is_dir && !info.is_symlink {
            names.push(info.relative_path.to_string_lossy().into_owned());
        }
        Ok(())
    })?;

    Ok(names)
}

fn should_exclude(entry: &DirEntry, names: &[String]) -> bool {
    let file_name = entry.file_name().to_string_lossy();
    names.iter().any(|name| *name == file_name)
}
