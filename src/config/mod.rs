pub mod categories;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub use categories::{AuthorDirectory, CategoryConfig};

const SETTINGS_PATH: &str = "config/settings.toml";
const ENV_PREFIX: &str = "FARSIHUB";

const MAX_RETRY_ATTEMPTS: u32 = 10;
const MAX_RETRY_BASE_DELAY_MS: u64 = 10 * 60 * 1000;
const MAX_COOLDOWN_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub generator: GeneratorConfig,
    pub retry: RetrySettings,
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneratorConfig {
    pub api_key: String,
    pub api_url: String,
    pub text_model: String,
    pub image_model: String,
    /// 文章写作语言
    pub language: String,
    /// 热点话题所在地区
    pub region: String,
    pub proxy: String,
    pub request_timeout_secs: u64,
}

/// 单个调用点的重试参数
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrySettings {
    pub trend: RetryConfig,
    pub draft: RetryConfig,
    pub image: RetryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// 两次生成之间的冷却时间，需低于上游限流阈值
    pub cooldown_secs: u64,
    pub status_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub database_path: String,
    /// 随站点发布的文章快照，启动时优先加载
    pub snapshot_path: String,
    /// 文章发布日期的显示格式 (chrono)
    pub date_format: String,
}

impl AppConfig {
    /// 默认值 → config/settings.toml → FARSIHUB_<SECTION>__<KEY> 环境变量
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(SETTINGS_PATH), std::env::vars().collect())
    }

    /// 从指定配置文件和给定的环境变量表加载
    pub fn load_from(settings_path: &Path, vars: config::Map<String, String>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::from(settings_path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(Some(vars.clone())),
            )
            .build()?;

        let mut config: AppConfig = settings.try_deserialize()?;
        if config.generator.api_key.trim().is_empty() {
            config.generator.api_key = ["GEMINI_API_KEY", "API_KEY"]
                .iter()
                .filter_map(|name| vars.get(*name))
                .find(|key| !key.trim().is_empty())
                .cloned()
                .unwrap_or_default();
        }
        config.validate()?;
        Ok(config)
    }

    /// 拒绝会导致退避或冷却计时溢出的取值
    pub fn validate(&self) -> Result<()> {
        for (name, retry) in [
            ("trend", &self.retry.trend),
            ("draft", &self.retry.draft),
            ("image", &self.retry.image),
        ] {
            if !(1..=MAX_RETRY_ATTEMPTS).contains(&retry.max_attempts) {
                bail!("retry.{}.max_attempts 必须在 1 到 {} 之间", name, MAX_RETRY_ATTEMPTS);
            }
            if retry.base_delay_ms > MAX_RETRY_BASE_DELAY_MS {
                bail!("retry.{}.base_delay_ms 不能超过 {}", name, MAX_RETRY_BASE_DELAY_MS);
            }
        }
        if !(1..=MAX_COOLDOWN_SECS).contains(&self.scheduler.cooldown_secs) {
            bail!("scheduler.cooldown_secs 必须在 1 到 {} 之间", MAX_COOLDOWN_SECS);
        }
        if self.generator.request_timeout_secs == 0 {
            bail!("generator.request_timeout_secs 不能为 0");
        }
        Ok(())
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl GeneratorConfig {
    /// 检查 API key 是否已配置
    pub fn is_configured(&self) -> bool {
        let key = self.api_key.trim();
        !key.is_empty() && key != "your-api-key"
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 5000,
        }
    }
}

impl SchedulerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            generator: GeneratorConfig {
                api_key: String::new(),
                api_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                text_model: "gemini-2.0-flash-exp".to_string(),
                image_model: "gemini-2.5-flash-image".to_string(),
                language: "Persian (Farsi)".to_string(),
                region: "Iran".to_string(),
                proxy: String::new(),
                request_timeout_secs: 60,
            },
            retry: RetrySettings {
                trend: RetryConfig::default(),
                draft: RetryConfig::default(),
                image: RetryConfig::default(),
            },
            scheduler: SchedulerConfig {
                cooldown_secs: 30,
                status_interval_secs: 10,
            },
            storage: StorageConfig {
                database_path: "./data/farsihub.db".to_string(),
                snapshot_path: "./data/posts.json".to_string(),
                date_format: "%Y/%m/%d".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let text = toml::to_string_pretty(&AppConfig::default()).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.scheduler.cooldown_secs, 30);
        assert_eq!(parsed.retry.draft.max_attempts, 3);
        assert_eq!(parsed.retry.image.base_delay(), Duration::from_secs(5));
    }

    fn vars(pairs: &[(&str, &str)]) -> config::Map<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn load_with(settings: &str, env: &[(&str, &str)]) -> Result<AppConfig> {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, settings).unwrap();
        AppConfig::load_from(&path, vars(env))
    }

    #[test]
    fn env_overrides_file_and_defaults() {
        let config = load_with(
            "[scheduler]\ncooldown_secs = 10\n",
            &[
                ("FARSIHUB_SCHEDULER__COOLDOWN_SECS", "45"),
                ("FARSIHUB_GENERATOR__TEXT_MODEL", "gemini-test"),
                ("FARSIHUB_RETRY__DRAFT__MAX_ATTEMPTS", "5"),
            ],
        )
        .unwrap();

        assert_eq!(config.scheduler.cooldown_secs, 45);
        assert_eq!(config.generator.text_model, "gemini-test");
        assert_eq!(config.retry.draft.max_attempts, 5);
        assert_eq!(config.retry.trend.max_attempts, 3);
        assert_eq!(config.storage.date_format, "%Y/%m/%d");
    }

    #[test]
    fn settings_file_applies_without_env() {
        let config = load_with("[scheduler]\ncooldown_secs = 10\n", &[]).unwrap();
        assert_eq!(config.scheduler.cooldown_secs, 10);
        assert!(!config.generator.is_configured());
    }

    #[test]
    fn missing_settings_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = AppConfig::load_from(&dir.path().join("absent.toml"), vars(&[])).unwrap();
        assert_eq!(config.scheduler.cooldown_secs, 30);
    }

    #[test]
    fn empty_key_falls_back_to_gemini_key_then_api_key() {
        let config = load_with("", &[("GEMINI_API_KEY", "gem"), ("API_KEY", "plain")]).unwrap();
        assert_eq!(config.generator.api_key, "gem");

        let config = load_with("", &[("API_KEY", "plain")]).unwrap();
        assert_eq!(config.generator.api_key, "plain");

        let config = load_with("", &[("GEMINI_API_KEY", " "), ("API_KEY", "plain")]).unwrap();
        assert_eq!(config.generator.api_key, "plain");
    }

    #[test]
    fn configured_key_wins_over_fallbacks() {
        let config = load_with(
            "[generator]\napi_key = \"from-file\"\n",
            &[("GEMINI_API_KEY", "gem")],
        )
        .unwrap();
        assert_eq!(config.generator.api_key, "from-file");

        let config = load_with("", &[("FARSIHUB_GENERATOR__API_KEY", "from-env"), ("API_KEY", "plain")]).unwrap();
        assert_eq!(config.generator.api_key, "from-env");
    }

    #[test]
    fn out_of_range_timing_is_rejected() {
        assert!(load_with("[retry.image]\nbase_delay_ms = 4000000000\n", &[]).is_err());
        assert!(load_with("[retry.trend]\nmax_attempts = 0\n", &[]).is_err());
        assert!(load_with("", &[("FARSIHUB_SCHEDULER__COOLDOWN_SECS", "0")]).is_err());
        assert!(load_with("[scheduler]\ncooldown_secs = 4000000000\n", &[]).is_err());
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn placeholder_key_is_not_configured() {
        let mut generator = AppConfig::default().generator;
        assert!(!generator.is_configured());

        generator.api_key = "your-api-key".to_string();
        assert!(!generator.is_configured());

        generator.api_key = "AIza-test".to_string();
        assert!(generator.is_configured());
    }
}
