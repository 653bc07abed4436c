//! Configuration
//!
//! 設定はデフォルト値 → TOMLファイル → 環境変数 (`PBN_*`) の順に重ねて読み込む。

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::{
    LlmProviderKind, LlmSettings, LoggingConfig, PbnConfig, SchedulingConfig, ServerConfig,
    StorageBackend, StorageConfig, WordPressSettings,
};

use crate::error::{Error, Result};

impl PbnConfig {
    /// Load from the default file locations and the process environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config = ConfigLoader::new()
            .load_from_file(path)
            .load_from_env()
            .build()?;
        config.validate()?;
        Ok(config)
    }

    /// 設定値の範囲チェック
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(Error::Config(format!(
                "llm.temperature must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            )));
        }
        if self.llm.max_tokens == 0 || self.llm.max_tokens > 100_000 {
            return Err(Error::Config(format!(
                "llm.max_tokens must be between 1 and 100000, got {}",
                self.llm.max_tokens
            )));
        }
        if self.wordpress.max_concurrency == 0 {
            return Err(Error::Config(
                "wordpress.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.scheduling.interval_hours == 0 {
            return Err(Error::Config(
                "scheduling.interval_hours must be at least 1".to_string(),
            ));
        }
        if self.scheduling.publish_hour > 23 {
            return Err(Error::Config(format!(
                "scheduling.publish_hour must be 0-23, got {}",
                self.scheduling.publish_hour
            )));
        }
        Ok(())
    }

    /// サンプル設定ファイルの内容を生成
    pub fn sample_toml() -> Result<String> {
        let toml_content = toml::to_string_pretty(&PbnConfig::default())
            .map_err(|e| Error::Config(format!("Failed to render sample config: {}", e)))?;

        Ok(format!(
            r#"# pbn-manager configuration
#
# Save as pbn-manager.toml. Every key can be overridden from the
# environment, e.g. PBN_SERVER__BIND_ADDR=0.0.0.0:8080
#
# Secrets are never written to this file. Provide them as:
#   PBN_MASTER_KEY   key used to encrypt stored application passwords
#   OPENAI_API_KEY   when [llm] provider = "openai"
#   GEMINI_API_KEY   when [llm] provider = "gemini"
#
# Application Passwords are created in the WordPress admin under
# Users > Profile > Application Passwords.

{}"#,
            toml_content
        ))
    }
}
