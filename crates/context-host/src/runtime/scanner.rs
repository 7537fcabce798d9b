//! Unit directory scanner
//!
//! Enumerates the deployable units under a root folder: every immediate
//! subdirectory that is readable and not hidden. Anything else (regular files,
//! dangling or looping symlinks, directories we may not read) is skipped
//! without failing the scan.

use std::fs::ReadDir;
use std::path::{Path, PathBuf};

use context_host_sdk::MountPath;

/// A unit directory found by the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDir {
    /// Directory name
    pub name: String,

    /// Full path, used as the context's doc base
    pub path: PathBuf,
}

impl UnitDir {
    /// Mount path this unit is served at
    pub fn mount_path(&self) -> MountPath {
        MountPath::for_unit_dir(&self.name)
    }
}

/// Scanner over a units root
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    root: PathBuf,
}

impl DirectoryScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily scan the root. Each call re-reads the filesystem.
    pub fn scan(&self) -> UnitScan {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => Some(entries),
            Err(e) => {
                tracing::warn!("Units root {:?} is not readable: {}", self.root, e);
                None
            }
        };
        UnitScan { entries }
    }
}

/// Iterator over candidate units
#[derive(Debug)]
pub struct UnitScan {
    entries: Option<ReadDir>,
}

impl Iterator for UnitScan {
    type Item = UnitDir;

    fn next(&mut self) -> Option<Self::Item> {
        let entries = self.entries.as_mut()?;
        for entry in entries {
            let Ok(entry) = entry else { continue };
            if let Some(unit) = candidate(entry.path()) {
                return Some(unit);
            }
        }
        None
    }
}

fn candidate(path: PathBuf) -> Option<UnitDir> {
    let name = path.file_name()?.to_str()?.to_string();
    tracing::debug!("Filtering: {:?}", path);

    if name.starts_with('.') {
        return None;
    }
    // Follows symlinks; loops and dangling links fail here
    if !std::fs::metadata(&path).ok()?.is_dir() {
        return None;
    }
    // Permission-denied directories fail here
    std::fs::read_dir(&path).ok()?;

    Some(UnitDir { name, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(scanner: &DirectoryScanner) -> Vec<String> {
        let mut names: Vec<String> = scanner.scan().map(|u| u.name).collect();
        names.sort();
        names
    }

    #[test]
    fn test_scan_filters_hidden_and_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("root")).unwrap();
        std::fs::create_dir(dir.path().join("app1")).unwrap();
        std::fs::create_dir(dir.path().join(".hidden")).unwrap();
        std::fs::write(dir.path().join("notadir"), "x").unwrap();

        let scanner = DirectoryScanner::new(dir.path());
        assert_eq!(names(&scanner), vec!["app1".to_string(), "root".to_string()]);
    }

    #[test]
    fn test_scan_is_restartable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        let scanner = DirectoryScanner::new(dir.path());
        assert_eq!(names(&scanner), vec!["a".to_string()]);

        std::fs::create_dir(dir.path().join("b")).unwrap();
        assert_eq!(names(&scanner), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = DirectoryScanner::new(dir.path().join("missing"));
        assert_eq!(scanner.scan().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("linked")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("nowhere"), dir.path().join("dangling")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("loop"), dir.path().join("loop")).unwrap();

        let scanner = DirectoryScanner::new(dir.path());
        assert_eq!(names(&scanner), vec!["linked".to_string(), "real".to_string()]);
    }

    #[test]
    fn test_unit_mount_paths() {
        let root = UnitDir { name: "ROOT".to_string(), path: PathBuf::from("/w/ROOT") };
        let app = UnitDir { name: "chat".to_string(), path: PathBuf::from("/w/chat") };
        assert!(root.mount_path().is_root());
        assert_eq!(app.mount_path().as_str(), "/chat");
    }
}
