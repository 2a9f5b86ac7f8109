//! Filesystem operations using tokio::fs
//!
//! Every function takes a path already confined by the gateway.

use crate::error::{Error, Result};
use crate::protocol::{DirectoryEntry, EntryKind};
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};

/// Metadata without following a final symlink, `None` if nothing is there.
async fn lookup(path: &Path) -> Result<Option<Metadata>> {
    match fs::symlink_metadata(path).await {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::server(e)),
    }
}

/// Metadata following symlinks, `None` if missing or dangling.
async fn lookup_target(path: &Path) -> Result<Option<Metadata>> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::server(e)),
    }
}

pub async fn list(path: &Path) -> Result<Vec<DirectoryEntry>> {
    let meta = lookup_target(path)
        .await?
        .ok_or_else(|| Error::request("path does not exist"))?;
    if !meta.is_dir() {
        return Err(Error::request("path is not a directory"));
    }

    let mut entries = Vec::new();
    let mut dir = fs::read_dir(path).await.map_err(Error::server)?;
    while let Some(entry) = dir.next_entry().await.map_err(Error::server)? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = match fs::metadata(entry.path()).await {
            Ok(meta) => meta.is_dir(),
            Err(_) => entry.file_type().await.map(|ft| ft.is_dir()).unwrap_or(false),
        };
        let kind = if is_dir {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        entries.push(DirectoryEntry { name, kind });
    }

    Ok(entries)
}

/// Open a file for DOWNLOAD, returning it with its length.
pub async fn open_download(path: &Path) -> Result<(File, u64)> {
    let meta = lookup_target(path)
        .await?
        .ok_or_else(|| Error::request("file does not exist"))?;
    if meta.is_dir() {
        return Err(Error::request("cannot download a directory"));
    }
    let file = File::open(path).await.map_err(Error::server)?;
    Ok((file, meta.len()))
}

/// Create or truncate the UPLOAD target, making missing parents first.
pub async fn open_upload(path: &Path) -> Result<File> {
    if let Some(meta) = lookup_target(path).await? {
        if meta.is_dir() {
            return Err(Error::request("path is a directory"));
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(Error::server)?;
    }
    File::create(path).await.map_err(Error::server)
}

pub async fn delete(path: &Path) -> Result<u64> {
    if lookup(path).await?.is_none() {
        return Err(Error::request("path does not exist"));
    }
    remove_tree(path).await
}

enum Visit {
    Enter(PathBuf),
    Leave(PathBuf),
}

/// Post-order removal of `root`, returning the number of entries removed.
///
/// Children are removed before their directory. The first failing node aborts
/// the walk; whatever was already removed stays removed. Symlinks are unlinked,
/// never followed.
pub async fn remove_tree(root: &Path) -> Result<u64> {
    let mut stack = vec![Visit::Enter(root.to_path_buf())];
    let mut removed = 0u64;

    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Enter(path) => {
                let meta = fs::symlink_metadata(&path).await.map_err(Error::server)?;
                if meta.is_dir() {
                    let mut dir = fs::read_dir(&path).await.map_err(Error::server)?;
                    stack.push(Visit::Leave(path));
                    while let Some(entry) = dir.next_entry().await.map_err(Error::server)? {
                        stack.push(Visit::Enter(entry.path()));
                    }
                } else {
                    fs::remove_file(&path).await.map_err(Error::server)?;
                    removed += 1;
                }
            }
            Visit::Leave(path) => {
                fs::remove_dir(&path).await.map_err(Error::server)?;
                removed += 1;
            }
        }
    }

    Ok(removed)
}

pub async fn mkdir(path: &Path) -> Result<()> {
    if lookup(path).await?.is_some() {
        return Err(Error::request("path already exists"));
    }
    fs::create_dir_all(path).await.map_err(Error::server)
}

pub async fn rename(from: &Path, to: &Path) -> Result<()> {
    if lookup(from).await?.is_none() {
        return Err(Error::request("source path does not exist"));
    }
    if lookup(to).await?.is_some() {
        return Err(Error::request("target path already exists"));
    }
    fs::rename(from, to).await.map_err(Error::server)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remove_tree_is_post_order() {
        let dir = tempfile::tempdir().unwrap();
        let top = dir.path().join("top");
        std::fs::create_dir_all(top.join("a/b/c")).unwrap();
        std::fs::write(top.join("a/one.txt"), b"1").unwrap();
        std::fs::write(top.join("a/b/c/two.txt"), b"2").unwrap();
        std::fs::write(top.join("three.txt"), b"3").unwrap();

        let removed = delete(&top).await.unwrap();
        assert_eq!(removed, 7);
        assert!(!top.exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn delete_missing_is_request_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = delete(&dir.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, Error::Request(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn remove_tree_unlinks_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let keep = dir.path().join("keep");
        std::fs::create_dir(&keep).unwrap();
        std::fs::write(keep.join("precious"), b"x").unwrap();
        let doomed = dir.path().join("doomed");
        std::fs::create_dir(&doomed).unwrap();
        std::os::unix::fs::symlink(&keep, doomed.join("link")).unwrap();

        delete(&doomed).await.unwrap();
        assert!(keep.join("precious").exists());
    }

    #[tokio::test]
    async fn list_rejects_files_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"").unwrap();

        assert!(matches!(list(&file).await, Err(Error::Request(_))));
        assert!(matches!(list(&dir.path().join("x")).await, Err(Error::Request(_))));
        assert!(list(dir.path()).await.unwrap().len() == 1);
    }

    #[tokio::test]
    async fn mkdir_creates_chain_and_rejects_existing() {
        let dir = tempfile::tempdir().unwrap();
        mkdir(&dir.path().join("a/b/c")).await.unwrap();
        assert!(dir.path().join("a/b/c").is_dir());
        assert!(matches!(mkdir(&dir.path().join("a")).await, Err(Error::Request(_))));
    }

    #[tokio::test]
    async fn upload_target_may_not_be_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(open_upload(dir.path()).await, Err(Error::Request(_))));
        open_upload(&dir.path().join("new/sub/file.bin")).await.unwrap();
        assert!(dir.path().join("new/sub/file.bin").is_file());
    }
}
