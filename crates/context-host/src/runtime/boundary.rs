//! Code-loading boundaries
//!
//! Every unit gets its own boundary: the native libraries found under
//! `<doc_base>/lib`, searched before the libraries shared by the whole host
//! (`<server_root>/lib`). Symbols are looked up unit-first and fall back to the
//! shared boundary, so one unit's code never shadows another's.
//!
//! Boundaries are attached in two phases. The host runtime creates a context
//! with its default (shared) boundary, and the context factory swaps in an
//! isolated [`UnitBoundary`] before any configuration is resolved against it.

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use libloading::Library;
use thiserror::Error;

use context_host_sdk::MountPath;

use crate::container::SymbolResolver;

/// Directory, relative to a unit's doc base or the server root, holding native libraries
pub const LIB_DIR: &str = "lib";

/// Errors raised while opening a boundary
#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error("Failed to read library directory {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load library {path:?}: {reason}")]
    Load { path: PathBuf, reason: String },
}

/// A loaded native library
pub struct NativeLibrary {
    /// The loaded library (must stay alive while symbols from it are in use)
    library: Library,

    /// Path the library was loaded from
    pub path: PathBuf,

    /// When the library was loaded
    pub loaded_at: Instant,
}

impl NativeLibrary {
    /// Load a library from disk
    ///
    /// # Safety
    /// Loading a library runs its initialisers. The library must be trusted.
    pub unsafe fn load(path: &Path) -> Result<Self, BoundaryError> {
        let library = Library::new(path).map_err(|e| BoundaryError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            library,
            path: path.to_path_buf(),
            loaded_at: Instant::now(),
        })
    }

    /// Whether the library exports the symbol
    pub fn contains(&self, symbol: &str) -> bool {
        // Safety: the symbol is only probed, never called or dereferenced
        unsafe { self.library.get::<*mut c_void>(symbol.as_bytes()).is_ok() }
    }
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("path", &self.path)
            .finish()
    }
}

/// Libraries shared by every unit on the host
#[derive(Debug, Default)]
pub struct SharedBoundary {
    dir: PathBuf,
    libraries: Vec<NativeLibrary>,
}

impl SharedBoundary {
    /// A shared boundary with no libraries
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load every library in `dir`.
    ///
    /// A missing directory gives an empty boundary. A library that fails to
    /// load is logged and skipped so one bad file cannot take the host down.
    pub fn open(dir: &Path) -> Self {
        let paths = match library_files(dir) {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!("Shared libraries unavailable: {}", e);
                Vec::new()
            }
        };

        let mut libraries = Vec::with_capacity(paths.len());
        for path in paths {
            // Safety: shared libraries are installed by the host operator
            match unsafe { NativeLibrary::load(&path) } {
                Ok(library) => {
                    tracing::debug!("Loaded shared library {:?}", path);
                    libraries.push(library);
                }
                Err(e) => tracing::error!("Skipping shared library: {}", e),
            }
        }

        Self {
            dir: dir.to_path_buf(),
            libraries,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn library_count(&self) -> usize {
        self.libraries.len()
    }
}

impl SymbolResolver for SharedBoundary {
    fn contains_symbol(&self, symbol: &str) -> bool {
        self.libraries.iter().any(|lib| lib.contains(symbol))
    }

    fn describe(&self) -> String {
        format!("shared boundary {:?} ({} libraries)", self.dir, self.libraries.len())
    }
}

/// A unit's isolated boundary, delegating to the shared boundary last
#[derive(Debug)]
pub struct UnitBoundary {
    mount_path: MountPath,
    dir: PathBuf,
    libraries: Vec<NativeLibrary>,
    parent: Arc<SharedBoundary>,
}

impl UnitBoundary {
    /// Open the boundary of the unit rooted at `doc_base`.
    ///
    /// Unlike the shared boundary, any library that fails to load fails the
    /// whole unit.
    pub fn open(
        mount_path: MountPath,
        doc_base: &Path,
        parent: Arc<SharedBoundary>,
    ) -> Result<Self, BoundaryError> {
        let dir = doc_base.join(LIB_DIR);
        let mut libraries = Vec::new();
        for path in library_files(&dir)? {
            // Safety: unit libraries are deployed by the host operator
            libraries.push(unsafe { NativeLibrary::load(&path)? });
        }

        tracing::debug!(
            mount_path = %mount_path,
            libraries = libraries.len(),
            "Opened unit boundary"
        );

        Ok(Self {
            mount_path,
            dir,
            libraries,
            parent,
        })
    }

    pub fn mount_path(&self) -> &MountPath {
        &self.mount_path
    }

    pub fn library_count(&self) -> usize {
        self.libraries.len()
    }

    pub fn parent(&self) -> &Arc<SharedBoundary> {
        &self.parent
    }
}

impl SymbolResolver for UnitBoundary {
    fn contains_symbol(&self, symbol: &str) -> bool {
        self.libraries.iter().any(|lib| lib.contains(symbol)) || self.parent.contains_symbol(symbol)
    }

    fn describe(&self) -> String {
        format!(
            "unit boundary {} {:?} ({} libraries)",
            self.mount_path,
            self.dir,
            self.libraries.len()
        )
    }
}

/// Which boundary a context currently uses
#[derive(Debug, Clone, Default)]
pub enum BoundarySlot {
    /// Nothing assigned yet
    #[default]
    Unassigned,

    /// The host runtime's default boundary
    Shared(Arc<SharedBoundary>),

    /// The unit's own boundary
    Isolated(Arc<UnitBoundary>),
}

impl BoundarySlot {
    pub fn is_isolated(&self) -> bool {
        matches!(self, BoundarySlot::Isolated(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BoundarySlot::Unassigned => "unassigned",
            BoundarySlot::Shared(_) => "shared",
            BoundarySlot::Isolated(_) => "isolated",
        }
    }
}

/// Check if a file is a native library
pub fn is_native_library(name: &str) -> bool {
    name.ends_with(".so") || name.ends_with(".dll") || name.ends_with(".dylib")
}

/// Library files directly inside `dir`, sorted by name. A missing directory is empty.
fn library_files(dir: &Path) -> Result<Vec<PathBuf>, BoundaryError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(BoundaryError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_native_library)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_native_library() {
        assert!(is_native_library("libtransport.so"));
        assert!(is_native_library("libtransport.dylib"));
        assert!(is_native_library("transport.dll"));
        assert!(!is_native_library("transport.rs"));
        assert!(!is_native_library("unit-app.yaml"));
    }

    #[test]
    fn test_missing_lib_dir_gives_empty_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let shared = Arc::new(SharedBoundary::open(&dir.path().join("lib")));
        assert_eq!(shared.library_count(), 0);

        let unit = UnitBoundary::open(MountPath::root(), dir.path(), shared).unwrap();
        assert_eq!(unit.library_count(), 0);
        assert!(!unit.contains_symbol("anything"));
    }

    #[test]
    fn test_non_library_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(LIB_DIR)).unwrap();
        std::fs::write(dir.path().join(LIB_DIR).join("README.txt"), "not code").unwrap();

        let unit = UnitBoundary::open(
            MountPath::parse("/app").unwrap(),
            dir.path(),
            Arc::new(SharedBoundary::empty()),
        )
        .unwrap();
        assert_eq!(unit.library_count(), 0);
    }

    #[test]
    fn test_corrupt_unit_library_fails_the_unit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(LIB_DIR)).unwrap();
        std::fs::write(
            dir.path().join(LIB_DIR).join("libbroken.so"),
            b"definitely not an object file",
        )
        .unwrap();

        let result = UnitBoundary::open(
            MountPath::parse("/app").unwrap(),
            dir.path(),
            Arc::new(SharedBoundary::empty()),
        );
        assert!(matches!(result, Err(BoundaryError::Load { .. })));

        // The shared boundary skips what it cannot load
        let shared = SharedBoundary::open(&dir.path().join(LIB_DIR));
        assert_eq!(shared.library_count(), 0);
    }
}
