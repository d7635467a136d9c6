//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.converse/config.json`) and environment.

use crate::eviction::IdlePolicy;
use crate::options::Options;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// The agent's own identity and options handed to dialogues.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Conversation lifetime settings.
    #[serde(default)]
    pub dialogues: DialoguesConfig,
}

/// Agent identity and pass-through dialogue options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// The agent's user id on the chat platform. Messages from it are ignored.
    /// Overridden by CONVERSE_AUTHOR_ID env.
    pub author_id: Option<String>,

    /// Extra settings passed untouched to dialogue bodies.
    #[serde(default)]
    pub options: Map<String, Value>,
}

/// Idle eviction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialoguesConfig {
    /// Evict conversations idle for this many seconds. Unset or 0 keeps them until they finish.
    #[serde(default)]
    pub idle_ttl_secs: Option<u64>,

    /// How often the idle sweeper runs (default 60).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for DialoguesConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: None,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Config {
    /// Options snapshot for new conversations (author id resolved against env).
    pub fn options(&self) -> Options {
        let mut options = self
            .agent
            .options
            .iter()
            .fold(Options::new(), |o, (k, v)| o.with(k.clone(), v.clone()));
        if let Some(author_id) = resolve_author_id(self) {
            options = options.with_author_id(author_id);
        }
        options
    }

    /// Idle eviction policy, when a non-zero TTL is configured.
    pub fn idle_policy(&self) -> Option<IdlePolicy> {
        let ttl = self.dialogues.idle_ttl_secs.filter(|s| *s > 0)?;
        Some(IdlePolicy {
            ttl: Duration::from_secs(ttl),
            sweep_interval: Duration::from_secs(self.dialogues.sweep_interval_secs.max(1)),
        })
    }
}

/// Resolve the agent's author id: env CONVERSE_AUTHOR_ID overrides config.
pub fn resolve_author_id(config: &Config) -> Option<String> {
    std::env::var("CONVERSE_AUTHOR_ID")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config
                .agent
                .author_id
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("CONVERSE_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".converse").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, or the default path (or CONVERSE_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_dialogues_config() {
        let d = DialoguesConfig::default();
        assert_eq!(d.idle_ttl_secs, None);
        assert_eq!(d.sweep_interval_secs, 60);
        assert!(Config::default().idle_policy().is_none());
    }

    #[test]
    fn parses_camel_case_config() {
        let config: Config = serde_json::from_str(
            r#"{
                "agent": { "authorId": "  BOT  ", "options": { "locale": "en" } },
                "dialogues": { "idleTtlSecs": 900 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.dialogues.sweep_interval_secs, 60);
        assert_eq!(
            config.idle_policy(),
            Some(IdlePolicy {
                ttl: Duration::from_secs(900),
                sweep_interval: Duration::from_secs(60),
            })
        );
        let options = config.options();
        assert_eq!(options.get("locale").and_then(|v| v.as_str()), Some("en"));
        // CONVERSE_AUTHOR_ID may be set in the environment running the tests.
        if std::env::var("CONVERSE_AUTHOR_ID").is_err() {
            assert_eq!(options.author_id(), Some("BOT"));
        }
    }

    #[test]
    fn zero_ttl_disables_eviction() {
        let mut config = Config::default();
        config.dialogues.idle_ttl_secs = Some(0);
        assert!(config.idle_policy().is_none());
    }

    #[test]
    fn load_config_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join(format!("converse-missing-{}.json", uuid::Uuid::new_v4()));
        let (config, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert!(config.agent.author_id.is_none());
    }

    #[test]
    fn load_config_reads_file() {
        let path = std::env::temp_dir().join(format!("converse-config-{}.json", uuid::Uuid::new_v4()));
        std::fs::File::create(&path)
            .and_then(|mut f| f.write_all(br#"{"dialogues":{"sweepIntervalSecs":5}}"#))
            .unwrap();
        let (config, _) = load_config(Some(path.clone())).unwrap();
        assert_eq!(config.dialogues.sweep_interval_secs, 5);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn load_config_reports_parse_errors() {
        let path = std::env::temp_dir().join(format!("converse-bad-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_config(Some(path.clone())).unwrap_err();
        assert!(err.to_string().contains("parsing config"));
        let _ = std::fs::remove_file(path);
    }
}
