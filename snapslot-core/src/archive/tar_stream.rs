//! Deterministic uncompressed tar encoding of one directory tree.
//!
//! Entries are named relative to the source's parent, so archiving
//! `/srv/data/photos` yields `photos`, `photos/2020`, `photos/2020/a.jpg`...
//! Headers are plain ustar carrying mode, uid, gid, mtime and size; access
//! and change times are never recorded, so re-reading a tree does not alter
//! its encoding.

use crate::fs::walker::{walk_sorted, FileInfo, WalkOptions};
use crate::utils::errors::{Result, SnapError};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header, HeaderMode};
use tracing::debug;

/// Write the tar encoding of `source` into `out` and return `out`.
///
/// Symlinks are stored as links and never followed. The first read error
/// aborts the archive; nothing is skipped silently except sockets and other
/// special files, which tar cannot restore anyway.
pub fn write_tar<W: Write>(source: &Path, out: W) -> Result<W> {
    let base = source.file_name().map(PathBuf::from).ok_or_else(|| {
        SnapError::Config(format!("cannot archive {}: no file name", source.display()))
    })?;

    let mut builder = Builder::new(out);
    builder.follow_symlinks(false);
    let mut current = source.to_path_buf();

    let walked = walk_sorted(source, &WalkOptions::default(), |info| {
        current = info.path.clone();
        append_entry(&mut builder, &entry_name(&base, &info.relative_path), info)
    });

    walked.map_err(|err| SnapError::Traversal {
        path: current,
        source: err,
    })?;

    builder.into_inner().map_err(|err| SnapError::Traversal {
        path: source.to_path_buf(),
        source: err,
    })
}

/// Archive member name. Directories carry no trailing slash, the root
/// included.
fn entry_name(base: &Path, relative_path: &Path) -> PathBuf {
    if relative_path.as_os_str().is_empty() {
        base.to_path_buf()
    } else {
        base.join(relative_path)
    }
}

fn append_entry<W: Write>(builder: &mut Builder<W>, name: &Path, info: &FileInfo) -> io::Result<()> {
    let metadata = fs::symlink_metadata(&info.path)?;
    let file_type = metadata.file_type();

    let mut header = Header::new_ustar();
    header.set_metadata_in_mode(&metadata, HeaderMode::Complete);

    if file_type.is_dir() {
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        builder.append_data(&mut header, name, io::empty())
    } else if file_type.is_symlink() {
        let target = fs::read_link(&info.path)?;
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        builder.append_link(&mut header, name, target)
    } else if file_type.is_file() {
        let file = File::open(&info.path)?;
        header.set_entry_type(EntryType::Regular);
        header.set_size(metadata.len());
        builder.append_data(&mut header, name, file.take(metadata.len()))
    } else {
        debug!("Skipping special file {}", info.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::fingerprint::Fingerprint;
    use tempfile::TempDir;

    fn fixture() -> io::Result<TempDir> {
        let temp_dir = TempDir::new()?;
        let photos = temp_dir.path().join("photos");
        fs::create_dir_all(photos.join("2020"))?;
        fs::write(photos.join("2020/a.jpg"), vec![7u8; 10_000])?;
        fs::write(photos.join("index.txt"), b"a.jpg\n")?;
        fs::write(temp_dir.path().join("sibling.txt"), b"not archived")?;
        Ok(temp_dir)
    }

    fn entry_names(archive: &[u8]) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in tar::Archive::new(archive).entries()? {
            names.push(entry?.path()?.to_string_lossy().into_owned());
        }
        Ok(names)
    }

    #[test]
    fn test_entries_named_from_parent() -> Result<()> {
        let temp_dir = fixture()?;
        let bytes = write_tar(&temp_dir.path().join("photos"), Vec::new())?;

        let names = entry_names(&bytes)?;
        assert_eq!(
            names,
            vec!["photos", "photos/2020", "photos/2020/a.jpg", "photos/index.txt"]
        );
        Ok(())
    }

    #[test]
    fn test_root_entry_has_no_trailing_slash() {
        let base = Path::new("photos");
        assert_eq!(entry_name(base, Path::new("")).to_str(), Some("photos"));
        assert_eq!(entry_name(base, Path::new("2020")).to_str(), Some("photos/2020"));
    }

    #[test]
    fn test_encoding_is_deterministic() -> Result<()> {
        let temp_dir = fixture()?;
        let source = temp_dir.path().join("photos");

        let first = write_tar(&source, Vec::new())?;
        let second = write_tar(&source, Vec::new())?;
        assert_eq!(Fingerprint::of_bytes(&first), Fingerprint::of_bytes(&second));
        Ok(())
    }

    #[test]
    fn test_one_byte_change_changes_fingerprint() -> Result<()> {
        let temp_dir = fixture()?;
        let source = temp_dir.path().join("photos");
        let before = write_tar(&source, Vec::new())?;

        let file = source.join("index.txt");
        let mtime = fs::metadata(&file)?.modified()?;
        fs::write(&file, b"b.jpg\n")?;
        File::options().write(true).open(&file)?.set_modified(mtime)?;

        let after = write_tar(&source, Vec::new())?;
        assert_eq!(before.len(), after.len());
        assert_ne!(Fingerprint::of_bytes(&before), Fingerprint::of_bytes(&after));
        Ok(())
    }

    #[test]
    fn test_output_is_uncompressed_tar() -> Result<()> {
        let temp_dir = fixture()?;
        let bytes = write_tar(&temp_dir.path().join("photos"), Vec::new())?;

        assert_eq!(bytes.len() % 512, 0);
        assert_eq!(&bytes[257..262], b"ustar");
        let mut content = Vec::new();
        for entry in tar::Archive::new(bytes.as_slice()).entries()? {
            let mut entry = entry?;
            if entry.path()?.ends_with("a.jpg") {
                entry.read_to_end(&mut content)?;
            }
        }
        assert_eq!(content, vec![7u8; 10_000]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() -> Result<()> {
        let temp_dir = fixture()?;
        let source = temp_dir.path().join("photos");
        std::os::unix::fs::symlink("../sibling.txt", source.join("link"))?;

        let bytes = write_tar(&source, Vec::new())?;
        let mut found = false;
        for entry in tar::Archive::new(bytes.as_slice()).entries()? {
            let entry = entry?;
            if entry.path()?.ends_with("link") {
                assert_eq!(entry.header().entry_type(), EntryType::Symlink);
                assert_eq!(entry.size(), 0);
                assert_eq!(
                    entry.link_name()?.as_deref(),
                    Some(Path::new("../sibling.txt"))
                );
                found = true;
            }
        }
        assert!(found);
        Ok(())
    }

    #[test]
    fn test_missing_source_is_traversal_error() {
        let err = write_tar(Path::new("/nonexistent/snapslot/photos"), Vec::new()).unwrap_err();
        match err {
            SnapError::Traversal { path, .. } => {
                assert_eq!(path, Path::new("/nonexistent/snapslot/photos"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
