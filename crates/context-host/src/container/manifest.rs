//! Deployment manifest parsing
//!
//! The manifest maps container names to configuration sources, one
//! `name=path` pair per line:
//!
//! ```text
//! # top-level containers
//! default.context=default.yaml
//! core = core.yaml
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::ConfigError;

/// One manifest entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Container name
    pub name: String,

    /// Configuration source, possibly relative to the manifest
    pub source: PathBuf,
}

/// The deployment manifest, in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentManifest {
    pub entries: Vec<ManifestEntry>,
}

impl DeploymentManifest {
    /// Parse manifest content.
    ///
    /// Blank lines and lines starting with `#` or `!` are ignored. The first
    /// `=` or `:` separates the name from the source. Names must be unique.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();

        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }

            let split = line
                .find(['=', ':'])
                .map(|at| (&line[..at], &line[at + 1..]));
            let (name, source) = match split {
                Some((name, source)) if !name.trim().is_empty() && !source.trim().is_empty() => {
                    (name.trim(), source.trim())
                }
                _ => {
                    return Err(ConfigError::ManifestSyntax {
                        line: index + 1,
                        content: raw.to_string(),
                    })
                }
            };

            if !seen.insert(name.to_string()) {
                return Err(ConfigError::DuplicateManifestKey(name.to_string()));
            }

            entries.push(ManifestEntry {
                name: name.to_string(),
                source: PathBuf::from(source),
            });
        }

        Ok(Self { entries })
    }

    /// Load a manifest from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
