use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs::File, io::BufReader, path::Path, str::FromStr};

use crate::bindings::UnstoredKeys;
use crate::error::{ScriptError, ScriptResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptingConfig {
    /// Cache engines that declare safe concurrent reuse.
    #[serde(default = "default_true")]
    pub engine_cache_enabled: bool,

    /// Keys merged with the built-in unstored set; writes to these never reach
    /// the host container.
    #[serde(default)]
    pub unstored_keys: Vec<String>,

    /// Values visible to every script through the static values resolver.
    #[serde(default)]
    pub static_values: BTreeMap<String, serde_json::Value>,

    /// Tags added to every trace by the default enhancer.
    #[serde(default)]
    pub default_tags: BTreeMap<String, String>,
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            engine_cache_enabled: default_true(),
            unstored_keys: Vec::new(),
            static_values: BTreeMap::new(),
            default_tags: BTreeMap::new(),
        }
    }
}

impl ScriptingConfig {
    // JSONファイルから設定を読み込む
    pub fn from_file<P: AsRef<Path>>(path: P) -> ScriptResult<Self> {
        from_file(path)
    }

    pub fn unstored_keys(&self) -> UnstoredKeys {
        UnstoredKeys::new(self.unstored_keys.iter().cloned())
    }
}

/// `ScriptingConfig::from_str(json)` or `json.parse::<ScriptingConfig>()`.
impl FromStr for ScriptingConfig {
    type Err = ScriptError;

    fn from_str(s: &str) -> ScriptResult<Self> {
        from_str(s)
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> ScriptResult<T> {
    let file = File::open(path)
        .map_err(|e| ScriptError::configuration(format!("Failed to open config file: {}", e)))?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| ScriptError::configuration(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> ScriptResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| ScriptError::configuration(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // test serialization/deserialization
    #[test]
    fn test_scripting_config_serde() {
        let mut config = ScriptingConfig::default();
        config.unstored_keys.push("tmp".to_string());
        config
            .default_tags
            .insert("tenant".to_string(), "acme".to_string());
        let json = serde_json::to_string(&config).unwrap();
        tracing::debug!("{}", json);
        let deserialized: ScriptingConfig = from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_defaults_from_empty_object() {
        let config: ScriptingConfig = from_str("{}").unwrap();
        assert!(config.engine_cache_enabled);
        assert!(config.unstored_keys.is_empty());
        assert!(config.static_values.is_empty());
    }

    #[test]
    fn test_invalid_config_is_configuration_error() {
        let result: ScriptResult<ScriptingConfig> = from_str("{\"engine_cache_enabled\": 3}");
        assert!(matches!(result, Err(ScriptError::Configuration(_))));
    }

    #[test]
    fn test_scripting_config_from_str() {
        let config = ScriptingConfig::from_str(
            r#"{"unstored_keys": ["scratch"], "default_tags": {"service": "orders"}}"#,
        )
        .unwrap();
        assert_eq!(config.unstored_keys, vec!["scratch".to_string()]);
        assert_eq!(
            config.default_tags.get("service"),
            Some(&"orders".to_string())
        );
        assert!(config.engine_cache_enabled);

        let parsed: ScriptingConfig = r#"{"engine_cache_enabled": false}"#.parse().unwrap();
        assert!(!parsed.engine_cache_enabled);

        let result = ScriptingConfig::from_str("not json");
        assert!(matches!(result, Err(ScriptError::Configuration(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"engine_cache_enabled": false, "static_values": {{"region": "eu"}}}}"#
        )
        .unwrap();

        let config = ScriptingConfig::from_file(file.path()).unwrap();
        assert!(!config.engine_cache_enabled);
        assert_eq!(
            config.static_values.get("region"),
            Some(&serde_json::json!("eu"))
        );
    }

    #[test]
    fn test_unstored_keys_merge_defaults() {
        let config = ScriptingConfig {
            unstored_keys: vec!["scratch".to_string()],
            ..Default::default()
        };
        let keys = config.unstored_keys();
        assert!(keys.contains("scratch"));
        assert!(keys.contains("print"));
        assert!(!keys.contains("total"));
    }
}
