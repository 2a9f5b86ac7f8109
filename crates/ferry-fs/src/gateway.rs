//! Path confinement under the server root

use crate::error::{Error, Result};
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

const DENIED: &[char] = &['"', '\'', ':', '*', '?', '<', '>', '|'];

/// Clean a caller-supplied path into a root-relative string.
pub fn sanitize(raw: &str) -> String {
    let normalized = raw.replace('\\', "/");
    let mut cleaned = normalized.trim_start_matches('/');
    if let Some(stripped) = cleaned
        .strip_suffix('"')
        .or_else(|| cleaned.strip_suffix('\''))
    {
        cleaned = stripped;
    }
    cleaned.chars().filter(|c| !DENIED.contains(c)).collect()
}

/// Resolves wire paths to absolute paths that stay inside `root`.
#[derive(Debug, Clone)]
pub struct Gateway {
    root: PathBuf,
}

impl Gateway {
    /// Create the root if needed and pin its canonical form.
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: std::fs::canonicalize(root)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_root(&self, path: &Path) -> bool {
        path == self.root
    }

    pub async fn resolve(&self, raw: &str) -> Result<PathBuf> {
        let cleaned = sanitize(raw);
        let mut joined = self.root.clone();
        let mut depth = 0usize;

        for comp in Path::new(&cleaned).components() {
            match comp {
                Component::Normal(seg) => {
                    joined.push(seg);
                    depth += 1;
                }
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(Error::request(format!("path escapes root: {raw}")));
                    }
                    joined.pop();
                    depth -= 1;
                }
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            }
        }

        self.verify_confined(&joined, raw).await?;
        Ok(joined)
    }

    /// Canonicalize the deepest existing ancestor and check it is still under root.
    async fn verify_confined(&self, path: &Path, raw: &str) -> Result<()> {
        let mut next = Some(path);
        while let Some(candidate) = next {
            match fs::canonicalize(candidate).await {
                Ok(real) if real.starts_with(&self.root) => return Ok(()),
                Ok(_) => {
                    return Err(Error::request(format!("path escapes root: {raw}")));
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
                    ) =>
                {
                    // a dangling link would be followed by create/open wherever it points
                    if let Ok(meta) = fs::symlink_metadata(candidate).await {
                        if meta.file_type().is_symlink() {
                            return Err(Error::request(format!(
                                "path crosses a dangling symlink: {raw}"
                            )));
                        }
                    }
                    next = candidate.parent();
                }
                Err(e) => return Err(Error::server(e)),
            }
        }
        Ok(())
    }
}
