//! Document discovery
//!
//! Supplies `(path, bytes)` pairs to the ingestion engine. Paths are
//! relative to the source root, `/`-separated and sorted.

use std::path::{Path, PathBuf};

use dref_common::Error;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::EtlResult;

/// One raw document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Relative path, e.g. `spells/spells_phb.json`
    pub path: String,
    pub bytes: Vec<u8>,
}

impl SourceDocument {
    pub fn new(path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            bytes: bytes.into(),
        }
    }
}

/// Provider of documents to ingest
pub trait DocumentSource: Send + Sync {
    fn documents(&self) -> EtlResult<Vec<SourceDocument>>;
}

impl DocumentSource for Vec<SourceDocument> {
    fn documents(&self) -> EtlResult<Vec<SourceDocument>> {
        Ok(self.clone())
    }
}

/// `*.json` files below a local directory
pub struct LocalDirectorySource {
    root: PathBuf,
}

impl LocalDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

fn is_json_file(entry: &DirEntry) -> bool {
    entry.file_type().is_file()
        && entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
}

impl DocumentSource for LocalDirectorySource {
    /// Walk the root recursively
    ///
    /// **Algorithm:**
    /// 1. Fail when the root is missing or not a directory
    /// 2. Skip hidden files and directories
    /// 3. Read every `*.json` file; unreadable entries are logged and skipped
    /// 4. Sort by relative path
    fn documents(&self) -> EtlResult<Vec<SourceDocument>> {
        if !self.root.is_dir() {
            return Err(Error::NotFound(format!(
                "Source directory {} does not exist",
                self.root.display()
            ))
            .into());
        }

        let mut documents = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !is_hidden(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Error accessing entry: {}", e);
                    continue;
                }
            };
            if !is_json_file(&entry) {
                continue;
            }

            let Some(path) = self.relative_path(entry.path()) else {
                warn!(path = %entry.path().display(), "Skipping file with non UTF-8 path");
                continue;
            };

            match std::fs::read(entry.path()) {
                Ok(bytes) => documents.push(SourceDocument { path, bytes }),
                Err(e) => warn!(path = %path, "Skipping unreadable document: {}", e),
            }
        }

        documents.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(
            root = %self.root.display(),
            count = documents.len(),
            "Discovered documents"
        );
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_keeps_json_sorted_relative() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("spells")).unwrap();
        fs::create_dir_all(dir.path().join(".cache")).unwrap();
        fs::write(dir.path().join("spells/spells_xge.json"), b"[]").unwrap();
        fs::write(dir.path().join("spells/spells_phb.json"), b"[1]").unwrap();
        fs::write(dir.path().join("tables.JSON"), b"{}").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(dir.path().join(".hidden.json"), b"{}").unwrap();
        fs::write(dir.path().join(".cache/cached.json"), b"{}").unwrap();

        let docs = LocalDirectorySource::new(dir.path()).documents().unwrap();
        let paths: Vec<&str> = docs.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["spells/spells_phb.json", "spells/spells_xge.json", "tables.JSON"]
        );
        assert_eq!(docs[0].bytes, b"[1]");
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let source = LocalDirectorySource::new(dir.path().join("absent"));
        assert!(source.documents().is_err());
    }

    #[test]
    fn test_vec_source() {
        let docs = vec![SourceDocument::new("a.json", "{}")];
        assert_eq!(docs.documents().unwrap().len(), 1);
    }
}
