use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Conversation to moderate.
    pub chat_id: i64,
    /// Falls back to the `APP_ID` environment variable.
    pub app_id: Option<String>,
    /// Falls back to the `API_HASH` environment variable.
    pub api_hash: Option<String>,
    pub api_base_url: String,
    pub persist_path: String,
    pub autosave_interval_seconds: u64,
    pub volume_threshold: u64,
    pub notice_ttl_seconds: u64,
    pub request_timeout_seconds: u64,
    pub poll_timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub app_id: u64,
    pub api_hash: String,
}

impl Credentials {
    pub fn bot_token(&self) -> String {
        format!("{}:{}", self.app_id, self.api_hash)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing startup credential {0}")]
    MissingCredential(&'static str),
    #[error("chat_id is not set")]
    MissingChat,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            chat_id: 0,
            app_id: None,
            api_hash: None,
            api_base_url: "https://api.telegram.org".to_string(),
            persist_path: "./.persist".to_string(),
            autosave_interval_seconds: 10,
            volume_threshold: 10,
            notice_ttl_seconds: 60,
            request_timeout_seconds: 10,
            poll_timeout_seconds: 30,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The moderated conversation. Zero is the unset default and is rejected.
    pub fn chat(&self) -> Result<i64, ConfigError> {
        match self.chat_id {
            0 => Err(ConfigError::MissingChat),
            chat => Ok(chat),
        }
    }

    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        self.resolve_credentials(|name| std::env::var(name).ok())
    }

    /// Values from the file win over `env`. An application id that is not a
    /// positive number counts as missing.
    pub fn resolve_credentials<F>(&self, env: F) -> Result<Credentials, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let app_id = self
            .app_id
            .clone()
            .or_else(|| env("APP_ID"))
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|&id| id > 0)
            .ok_or(ConfigError::MissingCredential("APP_ID"))?;

        let api_hash = self
            .api_hash
            .clone()
            .or_else(|| env("API_HASH"))
            .map(|raw| raw.trim().to_string())
            .filter(|hash| !hash.is_empty())
            .ok_or(ConfigError::MissingCredential("API_HASH"))?;

        Ok(Credentials { app_id, api_hash })
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_seconds.max(1))
    }

    pub fn notice_ttl(&self) -> Duration {
        Duration::from_secs(self.notice_ttl_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("chat_id: -1001234\nvolume_threshold: 5\n").unwrap();

        assert_eq!(config.chat_id, -1001234);
        assert_eq!(config.volume_threshold, 5);
        assert_eq!(config.notice_ttl(), Duration::from_secs(60));
        assert_eq!(config.autosave_interval(), Duration::from_secs(10));
        assert_eq!(config.persist_path, "./.persist");
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentry.yaml");
        let path = path.to_str().unwrap();
        let config = Config {
            chat_id: 42,
            ..Config::default()
        };

        config.to_file(path).unwrap();
        assert_eq!(Config::from_file(path).unwrap(), config);
    }

    #[test]
    fn test_unset_chat_is_rejected() {
        assert!(matches!(Config::default().chat(), Err(ConfigError::MissingChat)));

        let config: Config = serde_yaml::from_str("chat_id: -1001234\n").unwrap();
        assert_eq!(config.chat().unwrap(), -1001234);
    }

    #[test]
    fn test_credentials_from_environment() {
        let config = Config::default();

        let credentials = config
            .resolve_credentials(env_of(&[("APP_ID", "12345"), ("API_HASH", "abcdef")]))
            .unwrap();

        assert_eq!(credentials.app_id, 12345);
        assert_eq!(credentials.bot_token(), "12345:abcdef");
    }

    #[test]
    fn test_file_credentials_override_environment() {
        let config = Config {
            app_id: Some("777".to_string()),
            ..Config::default()
        };

        let credentials = config
            .resolve_credentials(env_of(&[("APP_ID", "1"), ("API_HASH", "secret")]))
            .unwrap();

        assert_eq!(credentials.app_id, 777);
        assert_eq!(credentials.api_hash, "secret");
    }

    #[test]
    fn test_missing_or_invalid_credentials() {
        let config = Config::default();

        assert!(matches!(
            config.resolve_credentials(env_of(&[("API_HASH", "secret")])),
            Err(ConfigError::MissingCredential("APP_ID"))
        ));
        assert!(matches!(
            config.resolve_credentials(env_of(&[("APP_ID", "abc"), ("API_HASH", "secret")])),
            Err(ConfigError::MissingCredential("APP_ID"))
        ));
        assert!(matches!(
            config.resolve_credentials(env_of(&[("APP_ID", "12"), ("API_HASH", "  ")])),
            Err(ConfigError::MissingCredential("API_HASH"))
        ));
    }
}
