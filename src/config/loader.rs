use super::types::PbnConfig;
use crate::error::{Error, Result};
use config::{Config, Environment, File, FileFormat};
use secrecy::SecretString;
use std::collections::HashMap;

/// Configuration loader with builder pattern
///
/// Layers, lowest priority first: built-in defaults, TOML file,
/// `PBN_*` environment variables, well-known secret variables.
pub struct ConfigLoader {
    config_file: Option<String>,
    load_env: bool,
    env_override: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            config_file: None,
            load_env: false,
            env_override: None,
        }
    }

    /// Load configuration from file
    pub fn load_from_file(mut self, path: Option<&str>) -> Self {
        self.config_file = path.map(String::from);
        self
    }

    /// Load configuration from environment variables
    pub fn load_from_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Use the given map instead of the process environment
    pub fn with_env_source(mut self, vars: HashMap<String, String>) -> Self {
        self.load_env = true;
        self.env_override = Some(vars);
        self
    }

    /// Build the final configuration
    pub fn build(self) -> Result<PbnConfig> {
        let mut builder = Config::builder().add_source(Config::try_from(&PbnConfig::default())?);

        if let Some(config_path) = &self.config_file {
            builder = builder.add_source(File::new(config_path, FileFormat::Toml).required(true));
        } else {
            builder = builder
                .add_source(File::with_name("pbn-manager").required(false))
                .add_source(File::with_name("config/pbn-manager").required(false));
        }

        if self.load_env {
            builder = builder.add_source(
                Environment::with_prefix("PBN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(self.env_override.clone()),
            );
        }

        let mut config: PbnConfig = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to build configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to deserialize configuration: {}", e)))?;

        if self.load_env {
            self.apply_secret_vars(&mut config);
        }

        Ok(config)
    }

    /// 特定の環境変数も直接対応（OPENAI_API_KEY など）
    fn apply_secret_vars(&self, config: &mut PbnConfig) {
        let lookup = |name: &str| -> Option<String> {
            match &self.env_override {
                Some(vars) => vars.get(name).cloned(),
                None => std::env::var(name).ok(),
            }
            .filter(|v| !v.is_empty())
        };

        if config.storage.master_key.is_none() {
            if let Some(key) = lookup("PBN_MASTER_KEY") {
                config.storage.master_key = Some(SecretString::from(key));
            }
        }

        if config.llm.api_key.is_none() {
            let var = match config.llm.provider {
                super::LlmProviderKind::OpenAI => "OPENAI_API_KEY",
                super::LlmProviderKind::Gemini => "GEMINI_API_KEY",
            };
            if let Some(key) = lookup(var) {
                config.llm.api_key = Some(SecretString::from(key));
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmProviderKind, StorageBackend};
    use secrecy::ExposeSecret;
    use std::io::Write;

    #[test]
    fn test_defaults_without_sources() {
        let config = ConfigLoader::new()
            .with_env_source(HashMap::new())
            .build()
            .unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.wordpress.per_page, 100);
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn test_file_then_env_override() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nbind_addr = \"0.0.0.0:9000\"\n\n[llm]\nprovider = \"gemini\"\nmodel = \"gemini-1.5-flash\"\n"
        )
        .unwrap();

        let mut vars = HashMap::new();
        vars.insert("PBN_WORDPRESS__MAX_RETRIES".to_string(), "5".to_string());
        vars.insert("GEMINI_API_KEY".to_string(), "g-key".to_string());
        vars.insert("PBN_MASTER_KEY".to_string(), "master".to_string());

        let config = ConfigLoader::new()
            .load_from_file(file.path().to_str())
            .with_env_source(vars)
            .build()
            .unwrap();

        assert_eq!(config.server.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.llm.provider, LlmProviderKind::Gemini);
        assert_eq!(config.llm.model, "gemini-1.5-flash");
        assert_eq!(config.wordpress.max_retries, 5);
        assert_eq!(config.llm.api_key.unwrap().expose_secret(), "g-key");
        assert_eq!(config.storage.master_key.unwrap().expose_secret(), "master");
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = ConfigLoader::new()
            .load_from_file(Some("/nonexistent/pbn-manager.toml"))
            .build();
        assert!(result.is_err());
    }
}
