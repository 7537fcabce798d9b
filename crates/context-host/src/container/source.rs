//! Container source parsing
//!
//! Parses container YAML files with environment variable substitution and
//! follows their `imports` relative to the importing file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use super::{ComponentDefinition, ConfigError};

static BRACED_VAR: LazyLock<regex_lite::Regex> = LazyLock::new(|| {
    regex_lite::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("braced variable pattern is valid")
});

static BARE_VAR: LazyLock<regex_lite::Regex> = LazyLock::new(|| {
    regex_lite::Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("bare variable pattern is valid")
});

/// One container source file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerSource {
    /// Other sources merged in before this one's components
    #[serde(default)]
    pub imports: Vec<PathBuf>,

    /// Component definitions by name
    #[serde(default)]
    pub components: BTreeMap<String, ComponentDefinition>,
}

impl ContainerSource {
    /// Parse a source from YAML content
    pub fn parse(yaml: &str) -> Result<Self, serde_yaml::Error> {
        let expanded = expand_env_vars(yaml);
        if expanded.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&expanded)
    }

    /// Load a source file and everything it imports.
    ///
    /// Imported definitions come first so the importing file can override them.
    pub fn load(path: &Path) -> Result<BTreeMap<String, ComponentDefinition>, ConfigError> {
        let mut definitions = BTreeMap::new();
        load_into(path, &mut Vec::new(), &mut definitions)?;
        Ok(definitions)
    }
}

fn load_into(
    path: &Path,
    visiting: &mut Vec<PathBuf>,
    definitions: &mut BTreeMap<String, ComponentDefinition>,
) -> Result<(), ConfigError> {
    if visiting.iter().any(|p| p == path) {
        return Err(ConfigError::ImportCycle(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let source = ContainerSource::parse(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    visiting.push(path.to_path_buf());
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for import in &source.imports {
        load_into(&base.join(import), visiting, definitions)?;
    }
    visiting.pop();

    tracing::debug!(
        "Loaded {} component definitions from {:?}",
        source.components.len(),
        path
    );
    definitions.extend(source.components);
    Ok(())
}

/// Expand environment variables in a string
/// Supports: ${VAR}, ${VAR:-default}, $VAR
pub(crate) fn expand_env_vars(input: &str) -> String {
    let result = BRACED_VAR.replace_all(input, |caps: &regex_lite::Captures| {
        let default = caps.get(2).map(|m| m.as_str());
        std::env::var(&caps[1]).unwrap_or_else(|_| default.unwrap_or("").to_string())
    });

    BARE_VAR
        .replace_all(&result, |caps: &regex_lite::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}
