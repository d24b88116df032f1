use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

const DEFAULT_AI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_AI_MODEL: &str = "gpt-4o-mini";

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    pub ai: AiConfig,
}

/// Assistant backend settings, read from `FITLOG_AI_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub force_mock: bool,
}

impl AiConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            api_key: non_empty("FITLOG_AI_API_KEY"),
            base_url: non_empty("FITLOG_AI_BASE_URL")
                .map_or_else(
                    || DEFAULT_AI_BASE_URL.to_string(),
                    |u| u.trim_end_matches('/').to_string(),
                ),
            model: non_empty("FITLOG_AI_MODEL").unwrap_or_else(|| DEFAULT_AI_MODEL.to_string()),
            force_mock: non_empty("FITLOG_AI_MOCK")
                .is_some_and(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes")),
        }
    }

    /// Mock mode applies when forced or when no key is configured.
    pub fn use_mock(&self) -> bool {
        self.force_mock || self.api_key.is_none()
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "fitlog").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = std::env::var_os("FITLOG_DB")
            .filter(|p| !p.is_empty())
            .map_or_else(|| data_dir.join("fitlog.db"), PathBuf::from);

        Ok(Config {
            db_path,
            data_dir,
            ai: AiConfig::from_env(),
        })
    }

    /// Load the REST API key from disk, or generate a new one.
    ///
    /// Returns `(key, newly_created)`.
    pub fn load_or_create_api_key(&self) -> Result<(String, bool)> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("api_key");

        if path.exists() {
            let key = std::fs::read_to_string(&path).context("Failed to read API key file")?;
            let key = key.trim().to_string();
            if !key.is_empty() {
                return Ok((key, false));
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let key = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &key).context("Failed to write API key file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set API key file permissions")?;
        }
        eprintln!("Generated new API key: {key}");
        eprintln!("Include in requests: Authorization: Bearer {key}");
        Ok((key, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ai_config(vars: &[(&str, &str)]) -> AiConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        AiConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_ai_defaults_to_mock() {
        let config = ai_config(&[]);
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert_eq!(config.model, "gpt-4o-mini");
        assert!(config.api_key.is_none());
        assert!(config.use_mock());
    }

    #[test]
    fn test_ai_key_enables_remote() {
        let config = ai_config(&[
            ("FITLOG_AI_API_KEY", "sk-test"),
            ("FITLOG_AI_BASE_URL", "http://localhost:11434/v1/"),
            ("FITLOG_AI_MODEL", "llava"),
        ]);
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.base_url, "http://localhost:11434/v1");
        assert_eq!(config.model, "llava");
        assert!(!config.use_mock());
    }

    #[test]
    fn test_ai_mock_flag_wins_over_key() {
        let config = ai_config(&[("FITLOG_AI_API_KEY", "sk-test"), ("FITLOG_AI_MOCK", "TRUE")]);
        assert!(config.use_mock());

        let config = ai_config(&[("FITLOG_AI_API_KEY", "sk-test"), ("FITLOG_AI_MOCK", "0")]);
        assert!(!config.use_mock());
    }

    #[test]
    fn test_blank_key_is_ignored() {
        let config = ai_config(&[("FITLOG_AI_API_KEY", "   ")]);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_api_key_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            db_path: dir.path().join("fitlog.db"),
            data_dir: dir.path().to_path_buf(),
            ai: ai_config(&[]),
        };

        let (key, created) = config.load_or_create_api_key().unwrap();
        assert!(created);
        assert_eq!(key.len(), 64);

        let (again, created) = config.load_or_create_api_key().unwrap();
        assert!(!created);
        assert_eq!(again, key);
    }
}
