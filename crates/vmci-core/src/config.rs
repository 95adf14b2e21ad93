//! Hierarchical YAML configuration with dotted-key lookup.
//!
//! ```yaml
//! worker:
//!   id: builder-1
//!   vagrant:
//!     machines: /var/lib/vmci/machines
//! ```
//!
//! is read with `config.get_str("worker.vagrant.machines")`.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_yaml::{Mapping, Value};
use thiserror::Error;

/// File name looked up in the home directory when no path is given.
pub const DEFAULT_FILE_NAME: &str = ".vmci.yml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("missing mandatory config key '{0}'")]
    MissingKey(String),

    #[error("invalid value for config key '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Dotted-key view over a YAML document.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    root: Value,
}

impl Configuration {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Load from `path` if given, otherwise from [`Configuration::default_path`].
    ///
    /// A missing default file yields an empty configuration; a missing
    /// explicit file is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Parse configuration from YAML text. Empty text is an empty config.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let root: Value = serde_yaml::from_str(text)?;
        Ok(Self { root })
    }

    /// `~/.vmci.yml`, if a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(DEFAULT_FILE_NAME))
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        key.split('.').try_fold(&self.root, |node, part| match node {
            Value::Mapping(map) => map.get(part),
            _ => None,
        })
    }

    /// Scalar value at `key` rendered as a string, if present.
    pub fn get_opt_str(&self, key: &str) -> Option<String> {
        match self.lookup(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Mandatory string value.
    pub fn get_str(&self, key: &str) -> Result<String, ConfigError> {
        self.get_opt_str(key)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }

    /// Mandatory value parsed with `FromStr`.
    pub fn get<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.get_str(key)?;
        raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// Optional value parsed with `FromStr`, falling back to `default` when absent.
    pub fn get_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Err(ConfigError::MissingKey(_)) => Ok(default),
            other => other,
        }
    }

    /// Mandatory boolean. Accepts YAML booleans and `yes`/`no`/`on`/`off`/`1`/`0`.
    pub fn get_bool(&self, key: &str) -> Result<bool, ConfigError> {
        let raw = self.get_str(key)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            other => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{other}' is not a boolean"),
            }),
        }
    }

    /// Sequence of scalars at `key`. A missing key is an empty list; a single
    /// scalar is a list of one.
    pub fn get_array(&self, key: &str) -> Result<Vec<String>, ConfigError> {
        let Some(value) = self.lookup(key) else {
            return Ok(Vec::new());
        };

        let scalar = |value: &Value| match value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: "expected a list of scalars".to_string(),
            }),
        };

        match value {
            Value::Sequence(items) => items.iter().map(scalar).collect(),
            Value::Null => Ok(Vec::new()),
            other => Ok(vec![scalar(other)?]),
        }
    }

    /// Whether any value exists at `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Set a string value, creating intermediate mappings. Used for
    /// command-line overrides; a non-mapping on the path is replaced.
    pub fn set(&mut self, key: &str, value: &str) {
        let mut node = &mut self.root;
        for part in key.split('.') {
            if !node.is_mapping() {
                *node = Value::Mapping(Mapping::new());
            }
            node = match node {
                Value::Mapping(map) => map
                    .entry(Value::String(part.to_string()))
                    .or_insert(Value::Null),
                _ => return,
            };
        }
        *node = Value::String(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
worker:
  id: builder-1
  server: http://localhost:8080
  concurrency: 4
  verbose: yes
  vagrant:
    machines: /tmp/machines
    cpus: 2
  tags:
    - linux
    - 64
dispatcher:
  bind: "0.0.0.0:8080"
"#;

    #[test]
    fn test_dotted_lookup() {
        let config = Configuration::from_yaml(SAMPLE).unwrap();

        assert_eq!(config.get_str("worker.id").unwrap(), "builder-1");
        assert_eq!(config.get_str("worker.vagrant.machines").unwrap(), "/tmp/machines");
        assert_eq!(config.get::<u32>("worker.vagrant.cpus").unwrap(), 2);
        assert_eq!(config.get_str("dispatcher.bind").unwrap(), "0.0.0.0:8080");
        assert!(config.contains("worker.vagrant"));
    }

    #[test]
    fn test_missing_key() {
        let config = Configuration::from_yaml(SAMPLE).unwrap();

        let err = config.get_str("worker.vagrant.memory").unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey(ref k) if k == "worker.vagrant.memory"));

        // Descending through a scalar is also a missing key.
        assert!(matches!(
            config.get_str("worker.id.nested"),
            Err(ConfigError::MissingKey(_))
        ));
    }

    #[test]
    fn test_get_or_and_invalid_values() {
        let config = Configuration::from_yaml(SAMPLE).unwrap();

        assert_eq!(config.get_or("worker.vagrant.memory", 1024u32).unwrap(), 1024);
        assert_eq!(config.get_or("worker.concurrency", 1usize).unwrap(), 4);
        assert!(matches!(
            config.get::<u32>("worker.id"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config.get_or::<u32>("worker.id", 3),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_bool_and_array() {
        let config = Configuration::from_yaml(SAMPLE).unwrap();

        assert!(config.get_bool("worker.verbose").unwrap());
        assert!(config.get_bool("worker.id").is_err());
        assert_eq!(config.get_array("worker.tags").unwrap(), vec!["linux", "64"]);
        assert_eq!(config.get_array("worker.id").unwrap(), vec!["builder-1"]);
        assert!(config.get_array("worker.nothing").unwrap().is_empty());
        assert!(config.get_array("worker.vagrant").is_err());
    }

    #[test]
    fn test_empty_document() {
        let config = Configuration::from_yaml("").unwrap();
        assert!(!config.contains("worker"));
        assert!(matches!(config.get_str("worker.id"), Err(ConfigError::MissingKey(_))));
    }

    #[test]
    fn test_set_overrides_and_creates_keys() {
        let mut config = Configuration::from_yaml(SAMPLE).unwrap();
        config.set("worker.id", "builder-2");
        config.set("worker.vagrant.box_urls", "https://boxes.example/");
        assert_eq!(config.get_str("worker.id").unwrap(), "builder-2");
        assert_eq!(config.get_str("worker.vagrant.machines").unwrap(), "/tmp/machines");
        assert_eq!(
            config.get_str("worker.vagrant.box_urls").unwrap(),
            "https://boxes.example/"
        );

        let mut empty = Configuration::default();
        empty.set("dispatcher.bind", "127.0.0.1:9000");
        assert_eq!(empty.get_str("dispatcher.bind").unwrap(), "127.0.0.1:9000");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Configuration::load(file.path()).unwrap();
        assert_eq!(config.get_str("worker.server").unwrap(), "http://localhost:8080");

        let explicit = Configuration::load_or_default(Some(file.path())).unwrap();
        assert_eq!(explicit.get_str("worker.id").unwrap(), "builder-1");
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yml");
        assert!(matches!(Configuration::load(&missing), Err(ConfigError::Io { .. })));

        let broken = dir.path().join("broken.yml");
        std::fs::write(&broken, "worker: [unclosed").unwrap();
        assert!(matches!(Configuration::load(&broken), Err(ConfigError::Parse(_))));
    }
}
