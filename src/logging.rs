use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "pbn-manager.log";

/// ログ設定
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// ログレベル (trace, debug, info, warn, error) または EnvFilter 指定
    pub level: String,
    /// ログディレクトリ
    pub log_dir: PathBuf,
    /// コンソール出力有効
    pub console_enabled: bool,
    /// ファイル出力有効（日次ローテーション）
    pub file_enabled: bool,
    /// JSON形式で出力
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::from_logging_config(&LoggingConfig::default())
    }
}

impl LogConfig {
    /// 設定からログ設定を作成
    pub fn from_logging_config(config: &LoggingConfig) -> Self {
        Self {
            level: config.level.clone(),
            log_dir: config.dir.clone(),
            console_enabled: config.console,
            file_enabled: config.file,
            json: config.json,
        }
    }

    /// ログレベルを上書き（CLI --log-level）
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// カスタムログディレクトリを設定
    pub fn with_log_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// コンソール出力制御
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.console_enabled = enabled;
        self
    }

    /// ファイル出力制御
    pub fn with_file(mut self, enabled: bool) -> Self {
        self.file_enabled = enabled;
        self
    }

    /// `RUST_LOG` があれば優先、なければ設定値
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// ログディレクトリを確保
fn ensure_log_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    }
    Ok(())
}

/// ログシステムを初期化
///
/// ファイル出力が有効な場合は `WorkerGuard` を返す。プロセス終了まで
/// 保持しないとバッファされたログが失われる。
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let mut guard = None;

    let console_layer = if config.console_enabled {
        let layer = fmt::layer().with_target(true).with_writer(std::io::stderr);
        Some(if config.json {
            layer.json().boxed()
        } else {
            layer.boxed()
        })
    } else {
        None
    };

    let file_layer = if config.file_enabled {
        ensure_log_dir(&config.log_dir)?;
        let file_appender = rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
        let (writer, worker_guard) = non_blocking(file_appender);
        guard = Some(worker_guard);

        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        Some(if config.json {
            layer.json().boxed()
        } else {
            layer.boxed()
        })
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    tracing::debug!(
        level = %config.level,
        console = config.console_enabled,
        file = config.file_enabled,
        log_dir = %config.log_dir.display(),
        "logging initialised"
    );

    Ok(guard)
}
