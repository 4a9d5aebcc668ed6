use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_URL: &str = "https://arcaea.fandom.com/api.php";
pub const DEFAULT_USER_AGENT: &str =
    "jacketsync/0.1 (contact: set WIKI_USER_AGENT; gentle bot)";
pub const DEFAULT_SONGS_BY_LEVEL_PAGE: &str = "Songs_by_Level";
pub const DEFAULT_SONGS_CATEGORY: &str = "Category:Songs";
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 1_500;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_TABLE: &str = "songs";
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_CONSTANT: f64 = 13.0;

/// Pages that are always checked even when Songs_by_Level omits them.
pub const DEFAULT_MANUAL_SONG_URLS: &[&str] = &[
    "https://arcaea.fandom.com/wiki/OMAJINAI",
    "https://arcaea.fandom.com/wiki/CHAIN2NITE",
    "https://arcaea.fandom.com/wiki/One_Step_Closer",
    "https://arcaea.fandom.com/wiki/My_life_is_mine_alone!",
    "https://arcaea.fandom.com/wiki/Melty_Rhapsody",
    "https://arcaea.fandom.com/wiki/Signal",
    "https://arcaea.fandom.com/wiki/The_%27Raft%27_taught_me:_your_heart_will_always_find_a_way.",
];

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct SyncConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub manual: ManualSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub songs_by_level_page: Option<String>,
    pub songs_category: Option<String>,
    pub request_delay_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct StoreSection {
    pub url: Option<String>,
    pub table: Option<String>,
    pub batch_size: Option<usize>,
    pub max_constant: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ManualSection {
    pub song_urls: Option<Vec<String>>,
}

/// Fully resolved wiki settings (env > config file > defaults).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiSettings {
    pub api_url: String,
    pub user_agent: String,
    pub songs_by_level_page: String,
    pub songs_category: String,
    pub request_delay_ms: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    pub url: Option<String>,
    pub table: String,
    pub batch_size: usize,
    pub max_constant: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCredentials {
    pub url: String,
    pub service_role_key: String,
}

impl SyncConfig {
    pub fn wiki_settings(&self) -> WikiSettings {
        self.wiki_settings_with_lookup(|key| env::var(key).ok())
    }

    fn wiki_settings_with_lookup<F>(&self, lookup_env: F) -> WikiSettings
    where
        F: Fn(&str) -> Option<String>,
    {
        let wiki = &self.wiki;
        WikiSettings {
            api_url: env_or(&lookup_env, "WIKI_API_URL", wiki.api_url.as_deref())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            user_agent: env_or(&lookup_env, "WIKI_USER_AGENT", wiki.user_agent.as_deref())
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            songs_by_level_page: wiki
                .songs_by_level_page
                .clone()
                .unwrap_or_else(|| DEFAULT_SONGS_BY_LEVEL_PAGE.to_string()),
            songs_category: wiki
                .songs_category
                .clone()
                .unwrap_or_else(|| DEFAULT_SONGS_CATEGORY.to_string()),
            request_delay_ms: wiki.request_delay_ms.unwrap_or(DEFAULT_REQUEST_DELAY_MS),
            timeout_ms: wiki.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn store_settings(&self) -> StoreSettings {
        let store = &self.store;
        StoreSettings {
            url: store.url.clone(),
            table: store
                .table
                .clone()
                .unwrap_or_else(|| DEFAULT_TABLE.to_string()),
            batch_size: store.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1),
            max_constant: store.max_constant.unwrap_or(DEFAULT_MAX_CONSTANT),
        }
    }

    pub fn manual_song_urls(&self) -> Vec<String> {
        match &self.manual.song_urls {
            Some(urls) => urls.clone(),
            None => DEFAULT_MANUAL_SONG_URLS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }

    /// Credentials for table writes: `SUPABASE_URL` (or `[store].url`) and
    /// `SUPABASE_SERVICE_ROLE_KEY`.
    pub fn store_credentials(&self) -> Result<StoreCredentials> {
        self.store_credentials_with_lookup(|key| env::var(key).ok())
    }

    fn store_credentials_with_lookup<F>(&self, lookup_env: F) -> Result<StoreCredentials>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = env_or(&lookup_env, "SUPABASE_URL", self.store.url.as_deref());
        let key = env_or(&lookup_env, "SUPABASE_SERVICE_ROLE_KEY", None);
        match (url, key) {
            (Some(url), Some(service_role_key)) => Ok(StoreCredentials {
                url,
                service_role_key,
            }),
            _ => bail!("SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY must be set."),
        }
    }
}

/// Load and parse a SyncConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<SyncConfig> {
    if !config_path.exists() {
        return Ok(SyncConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: SyncConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_or<F>(lookup_env: &F, key: &str, fallback: Option<&str>) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup_env(key) {
        let trimmed = value.trim().to_string();
        if !trimmed.is_empty() {
            return Some(trimmed);
        }
    }
    fallback
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_uses_fandom_defaults() {
        let settings = SyncConfig::default().wiki_settings_with_lookup(|_| None);
        assert_eq!(settings.api_url, DEFAULT_API_URL);
        assert_eq!(settings.songs_by_level_page, "Songs_by_Level");
        assert_eq!(settings.request_delay_ms, DEFAULT_REQUEST_DELAY_MS);
        assert_eq!(
            settings.user_agent,
            "jacketsync/0.1 (contact: set WIKI_USER_AGENT; gentle bot)"
        );

        let store = SyncConfig::default().store_settings();
        assert_eq!(store.table, "songs");
        assert_eq!(store.batch_size, 100);
        assert_eq!(store.max_constant, 13.0);
        assert_eq!(SyncConfig::default().manual_song_urls().len(), 7);
    }

    #[test]
    fn load_missing_config_returns_default() {
        let temp = tempdir().expect("tempdir");
        let config = load_config(&temp.path().join("nope.toml")).expect("load");
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn load_config_reads_all_sections() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[wiki]
api_url = "https://example.fandom.com/api.php"
request_delay_ms = 0

[store]
table = "charts"
batch_size = 0
max_constant = 12.5

[manual]
song_urls = ["https://example.fandom.com/wiki/Alpha"]
"#,
        )
        .expect("write config");

        let config = load_config(&path).expect("load");
        let wiki = config.wiki_settings_with_lookup(|_| None);
        assert_eq!(wiki.api_url, "https://example.fandom.com/api.php");
        assert_eq!(wiki.request_delay_ms, 0);
        assert_eq!(wiki.user_agent, DEFAULT_USER_AGENT);

        let store = config.store_settings();
        assert_eq!(store.table, "charts");
        assert_eq!(store.batch_size, 1);
        assert_eq!(store.max_constant, 12.5);
        assert_eq!(
            config.manual_song_urls(),
            vec!["https://example.fandom.com/wiki/Alpha".to_string()]
        );
    }

    #[test]
    fn env_overrides_config_values() {
        let config = SyncConfig {
            wiki: WikiSection {
                user_agent: Some("from-config".to_string()),
                ..WikiSection::default()
            },
            ..SyncConfig::default()
        };
        let env = HashMap::from([("WIKI_USER_AGENT".to_string(), " from-env ".to_string())]);
        let settings = config.wiki_settings_with_lookup(|key| env.get(key).cloned());
        assert_eq!(settings.user_agent, "from-env");
    }

    #[test]
    fn invalid_toml_reports_path() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[wiki\n").expect("write config");
        let error = load_config(&path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn store_credentials_require_url_and_key() {
        let config = SyncConfig::default();
        let error = config
            .store_credentials_with_lookup(|_| None)
            .expect_err("must fail");
        assert!(error.to_string().contains("SUPABASE_URL"));

        let env = HashMap::from([
            ("SUPABASE_URL".to_string(), "https://x.supabase.co".to_string()),
            ("SUPABASE_SERVICE_ROLE_KEY".to_string(), "secret".to_string()),
        ]);
        let credentials = config
            .store_credentials_with_lookup(|key| env.get(key).cloned())
            .expect("credentials");
        assert_eq!(credentials.url, "https://x.supabase.co");
        assert_eq!(credentials.service_role_key, "secret");
    }

    #[test]
    fn store_url_can_come_from_config() {
        let config = SyncConfig {
            store: StoreSection {
                url: Some("https://cfg.supabase.co".to_string()),
                ..StoreSection::default()
            },
            ..SyncConfig::default()
        };
        let env = HashMap::from([("SUPABASE_SERVICE_ROLE_KEY".to_string(), "k".to_string())]);
        let credentials = config
            .store_credentials_with_lookup(|key| env.get(key).cloned())
            .expect("credentials");
        assert_eq!(credentials.url, "https://cfg.supabase.co");
    }
}
