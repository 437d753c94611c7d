use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Application settings, read from TOML with environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub request_timeout_ms: u64,
    /// Timeout for internal function calls.
    pub internal_timeout_ms: u64,
    /// How long an idle worker thread waits before releasing its environment.
    pub idle_timeout_ms: u64,
    pub max_evaluators: usize,
    pub max_conflict_retries: u32,
    pub retry_base_ms: u64,
    pub default_action: String,
    pub not_found_action: String,
    pub error_action: String,
    pub charset: String,
    pub debug: bool,
    pub suppress_error_page: bool,
    pub auto_etags: bool,
    /// Template extension to MIME type.
    pub skin_extensions: BTreeMap<String, String>,
    /// Methods reachable over RPC: `Type.method`, `*.method`, `Type.*` or `*`.
    pub rpc_access: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let skin_extensions = [
            ("html", "text/html"),
            ("htm", "text/html"),
            ("xml", "text/xml"),
            ("txt", "text/plain"),
            ("css", "text/css"),
            ("js", "text/javascript"),
            ("json", "application/json"),
        ]
        .into_iter()
        .map(|(ext, mime)| (ext.to_string(), mime.to_string()))
        .collect();

        Self {
            name: "app".to_string(),
            request_timeout_ms: 60_000,
            internal_timeout_ms: 900_000,
            idle_timeout_ms: 600_000,
            max_evaluators: num_cpus::get().max(1),
            max_conflict_retries: 8,
            retry_base_ms: 800,
            default_action: "main".to_string(),
            not_found_action: "notfound".to_string(),
            error_action: "error".to_string(),
            charset: "UTF-8".to_string(),
            debug: false,
            suppress_error_page: false,
            auto_etags: true,
            skin_extensions,
            rpc_access: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load from `explicit` if given, otherwise from the first config file
    /// found in the usual locations. Parse failures log a warning and fall
    /// back to defaults. Environment overrides apply in every case.
    pub fn load(explicit: Option<&Path>) -> Self {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_config_path(),
        };

        let mut config = match path {
            Some(path) => match Self::from_file(&path) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!("{}", err);
                    Self::default()
                }
            },
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str::<AppConfig>(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `TRELLIS_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(ms) = lookup("TRELLIS_REQUEST_TIMEOUT_MS").and_then(|s| s.parse().ok()) {
            self.request_timeout_ms = ms;
        }
        if let Some(count) = lookup("TRELLIS_EVALUATORS").and_then(|s| s.parse::<usize>().ok()) {
            self.max_evaluators = count.max(1);
        }
        if let Some(debug) = lookup("TRELLIS_DEBUG") {
            self.debug = debug != "false" && debug != "0";
        }
    }

    fn find_config_path() -> Option<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(path) = std::env::var("TRELLIS_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
            tracing::warn!("TRELLIS_CONFIG set but file not found: {}", path.display());
        }

        candidates.push(PathBuf::from("trellis.toml"));
        candidates.push(PathBuf::from("app.toml"));

        if let Some(path) = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        {
            candidates.push(path.join("trellis").join("config.toml"));
        }

        candidates.push(PathBuf::from("/etc/trellis/config.toml"));

        candidates.into_iter().find(|path| path.exists())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn internal_timeout(&self) -> Duration {
        Duration::from_millis(self.internal_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn content_type_for(&self, extension: &str) -> Option<&str> {
        self.skin_extensions
            .get(&extension.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Whether `method` on an object of `type_tag` may be called over RPC.
    pub fn rpc_allowed(&self, type_tag: &str, method: &str) -> bool {
        self.rpc_access.iter().any(|rule| {
            if rule == "*" {
                return true;
            }
            let Some((ty, name)) = rule.rsplit_once('.') else {
                return false;
            };
            (ty == "*" || ty.eq_ignore_ascii_case(type_tag)) && (name == "*" || name == method)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.request_timeout_ms, 60_000);
        assert_eq!(config.internal_timeout(), Duration::from_secs(15 * 60));
        assert_eq!(config.max_conflict_retries, 8);
        assert_eq!(config.default_action, "main");
        assert_eq!(config.content_type_for("HTML"), Some("text/html"));
        assert_eq!(config.content_type_for("exe"), None);
        assert!(config.max_evaluators >= 1);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("trellis.toml");
        fs::write(
            &path,
            "name = \"shop\"\nretry_base_ms = 5\n\n[skin_extensions]\nrss = \"application/rss+xml\"\n",
        )
        .expect("write config");

        let config = AppConfig::from_file(&path).expect("parse");
        assert_eq!(config.name, "shop");
        assert_eq!(config.retry_base_ms, 5);
        assert_eq!(config.error_action, "error");
        assert_eq!(config.content_type_for("rss"), Some("application/rss+xml"));
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.toml");
        fs::write(&path, "name = [").expect("write config");

        assert!(matches!(
            AppConfig::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
        let config = AppConfig::load(Some(&path));
        assert_eq!(config.not_found_action, "notfound");
    }

    #[test]
    fn overrides_replace_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TRELLIS_REQUEST_TIMEOUT_MS", "250"),
            ("TRELLIS_EVALUATORS", "0"),
            ("TRELLIS_DEBUG", "1"),
        ]);
        let mut config = AppConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.request_timeout_ms, 250);
        assert_eq!(config.max_evaluators, 1);
        assert!(config.debug);
    }

    #[test]
    fn rpc_access_patterns() {
        let config = AppConfig {
            rpc_access: vec![
                "Catalog.list".into(),
                "*.ping".into(),
                "Admin.*".into(),
            ],
            ..AppConfig::default()
        };
        assert!(config.rpc_allowed("catalog", "list"));
        assert!(!config.rpc_allowed("Catalog", "delete"));
        assert!(config.rpc_allowed("Product", "ping"));
        assert!(config.rpc_allowed("Admin", "reset"));
        assert!(!AppConfig::default().rpc_allowed("Root", "ping"));

        let open = AppConfig {
            rpc_access: vec!["*".into()],
            ..AppConfig::default()
        };
        assert!(open.rpc_allowed("Anything", "at_all"));
    }
}
