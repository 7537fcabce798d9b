//! Host configuration

use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use context_host_sdk::MountPath;

/// Name of the top-level container per-unit containers are parented to
pub const DEFAULT_PARENT_CONTAINER: &str = "default.context";

/// Name of the top-level container holding core services
pub const DEFAULT_CORE_CONTAINER: &str = "core";

/// Host configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Server root; shared libraries live under `<root>/lib`
    pub server_root: PathBuf,

    /// Directory scanned for deployable units
    pub units_dir: PathBuf,

    /// Deployment manifest (`name=source` lines)
    pub manifest_path: PathBuf,

    /// Address the default connector listens on
    pub bind_addr: SocketAddr,

    /// Additional connectors, all sharing the connector properties
    pub extra_binds: Vec<SocketAddr>,

    /// Engine name reported to management
    pub engine_name: String,

    /// Name of the base host
    pub host_name: String,

    /// Top-level container per-unit containers are parented to
    pub parent_container: String,

    /// Top-level container holding core services
    pub core_container: String,

    /// Publish naming attributes on every bound context
    pub use_naming: bool,

    /// Log every request through the access log valve
    pub access_log: bool,

    /// Extra properties applied to the default connector
    pub connector_properties: BTreeMap<String, String>,

    /// Statically configured contexts (mount path -> dir relative to `units_dir`)
    pub extra_contexts: BTreeMap<MountPath, PathBuf>,
}

impl HostConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let server_root = env::var("CONTEXT_HOST_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        Self {
            units_dir: env::var("CONTEXT_HOST_UNITS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| server_root.join("webapps")),

            manifest_path: env::var("CONTEXT_HOST_MANIFEST")
                .map(PathBuf::from)
                .unwrap_or_else(|_| server_root.join("conf").join("contexts.properties")),

            bind_addr: env::var("CONTEXT_HOST_BIND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 5080))),

            extra_binds: env::var("CONTEXT_HOST_EXTRA_BINDS")
                .map(|s| parse_addrs(&s))
                .unwrap_or_default(),

            engine_name: env::var("CONTEXT_HOST_ENGINE_NAME")
                .unwrap_or_else(|_| "hostEngine".to_string()),

            host_name: env::var("CONTEXT_HOST_HOST_NAME")
                .unwrap_or_else(|_| "localhost".to_string()),

            parent_container: env::var("CONTEXT_HOST_PARENT_CONTAINER")
                .unwrap_or_else(|_| DEFAULT_PARENT_CONTAINER.to_string()),

            core_container: env::var("CONTEXT_HOST_CORE_CONTAINER")
                .unwrap_or_else(|_| DEFAULT_CORE_CONTAINER.to_string()),

            use_naming: env::var("CONTEXT_HOST_USE_NAMING")
                .ok()
                .map(|s| parse_flag(&s))
                .unwrap_or(false),

            access_log: env::var("CONTEXT_HOST_ACCESS_LOG")
                .ok()
                .map(|s| parse_flag(&s))
                .unwrap_or(false),

            connector_properties: env::var("CONTEXT_HOST_CONNECTOR_PROPS")
                .map(|s| parse_pairs(&s).collect())
                .unwrap_or_default(),

            extra_contexts: env::var("CONTEXT_HOST_EXTRA_CONTEXTS")
                .map(|s| parse_extra_contexts(&s))
                .unwrap_or_default(),

            server_root,
        }
    }

    /// Configuration rooted at `server_root` with every other value defaulted
    pub fn with_root(server_root: impl Into<PathBuf>) -> Self {
        let server_root = server_root.into();
        Self {
            units_dir: server_root.join("webapps"),
            manifest_path: server_root.join("conf").join("contexts.properties"),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            extra_binds: Vec::new(),
            engine_name: "hostEngine".to_string(),
            host_name: "localhost".to_string(),
            parent_container: DEFAULT_PARENT_CONTAINER.to_string(),
            core_container: DEFAULT_CORE_CONTAINER.to_string(),
            use_naming: false,
            access_log: false,
            connector_properties: BTreeMap::new(),
            extra_contexts: BTreeMap::new(),
            server_root,
        }
    }

    /// Directory holding libraries shared by every unit
    pub fn shared_lib_dir(&self) -> PathBuf {
        self.server_root.join("lib")
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Parse `k=v,k=v` lists, skipping malformed pairs
fn parse_pairs(value: &str) -> impl Iterator<Item = (String, String)> + '_ {
    value.split(',').filter_map(|pair| {
        let (key, val) = pair.split_once('=')?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        Some((key.to_string(), val.trim().to_string()))
    })
}

/// Parse a comma-separated address list, skipping entries that do not parse
fn parse_addrs(value: &str) -> Vec<SocketAddr> {
    value
        .split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .filter_map(|addr| match addr.parse() {
            Ok(addr) => Some(addr),
            Err(e) => {
                tracing::warn!("Ignoring connector address {}: {}", addr, e);
                None
            }
        })
        .collect()
}

fn parse_extra_contexts(value: &str) -> BTreeMap<MountPath, PathBuf> {
    parse_pairs(value)
        .filter_map(|(path, dir)| match MountPath::parse(&path) {
            Ok(mount) => Some((mount, PathBuf::from(dir))),
            Err(e) => {
                tracing::warn!("Ignoring extra context {}: {}", path, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let pairs: Vec<_> = parse_pairs("maxThreads=200, keepAlive = 30,broken,=x").collect();
        assert_eq!(
            pairs,
            vec![
                ("maxThreads".to_string(), "200".to_string()),
                ("keepAlive".to_string(), "30".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_addrs() {
        let addrs = parse_addrs("127.0.0.1:8443, nonsense,,[::1]:9000");
        assert_eq!(
            addrs,
            vec![
                SocketAddr::from(([127, 0, 0, 1], 8443)),
                "[::1]:9000".parse().unwrap(),
            ]
        );
    }

    #[test]
    fn test_parse_extra_contexts() {
        let contexts = parse_extra_contexts("/admin=admin-ui,bad=x,/docs/=docs");
        assert_eq!(contexts.len(), 2);
        assert_eq!(
            contexts.get(&MountPath::parse("/docs").unwrap()),
            Some(&PathBuf::from("docs"))
        );
    }

    #[test]
    fn test_with_root_defaults() {
        let config = HostConfig::with_root("/srv/host");
        assert_eq!(config.units_dir, PathBuf::from("/srv/host/webapps"));
        assert_eq!(config.manifest_path, PathBuf::from("/srv/host/conf/contexts.properties"));
        assert_eq!(config.shared_lib_dir(), PathBuf::from("/srv/host/lib"));
        assert_eq!(config.parent_container, DEFAULT_PARENT_CONTAINER);
        assert!(config.extra_binds.is_empty());
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("no"));
    }
}
