use std::{fmt, io, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Переменная окружения, переопределяющая уровень логирования.
pub const ENV_LOG_LEVEL: &str = "HERALD_LOG_LEVEL";
/// Переменная окружения, переопределяющая формат консольного вывода.
pub const ENV_LOG_FORMAT: &str = "HERALD_LOG_FORMAT";
/// Переменная окружения, переопределяющая каталог файловых логов.
pub const ENV_LOG_DIR: &str = "HERALD_LOG_DIR";

const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Ошибки инициализации логирования.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log level '{0}'")]
    InvalidLevel(String),

    #[error("Invalid log format '{0}' (expected pretty, compact or json)")]
    InvalidFormat(String),

    #[error("Invalid filter directive '{directive}': {reason}")]
    InvalidDirective { directive: String, reason: String },

    #[error("Failed to prepare log directory: {0}")]
    Io(#[from] io::Error),

    #[error("Global tracing subscriber is already set")]
    AlreadyInitialized,
}

/// Формат строки лога.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(LoggingError::InvalidFormat(other.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        };
        f.write_str(s)
    }
}

/// Периодичность ротации файловых логов.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

/// Настройки консольного вывода.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
}

/// Настройки файлового вывода.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    pub format: LogFormat,
    /// Префикс имени файла; к нему дописывается дата ротации.
    pub filename_prefix: String,
    pub rotation: Rotation,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень: trace, debug, info, warn, error, off.
    pub level: String,
    /// Каталог файловых логов.
    pub log_dir: PathBuf,
    /// Дополнительные директивы `EnvFilter`, например `herald::network=debug`.
    pub directives: Vec<String>,
    pub console: ConsoleConfig,
    pub file: FileConfig,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: LogFormat::Compact,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            format: LogFormat::Json,
            filename_prefix: "herald.log".to_string(),
            rotation: Rotation::Daily,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            directives: Vec::new(),
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
        }
    }
}

impl LoggingConfig {
    /// Применяет `HERALD_LOG_LEVEL`, `HERALD_LOG_FORMAT` и `HERALD_LOG_DIR`.
    pub fn apply_env_overrides(&mut self) -> Result<(), LoggingError> {
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            self.level = level;
        }
        if let Ok(format) = std::env::var(ENV_LOG_FORMAT) {
            self.console.format = format.parse()?;
        }
        if let Ok(dir) = std::env::var(ENV_LOG_DIR) {
            self.log_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), LoggingError> {
        let level = self.level.to_ascii_lowercase();
        if !LEVELS.contains(&level.as_str()) {
            return Err(LoggingError::InvalidLevel(self.level.clone()));
        }
        Ok(())
    }

    /// Создаёт каталог логов, если включён файловый вывод.
    pub fn ensure_log_dir(&self) -> Result<(), LoggingError> {
        if self.file.enabled {
            std::fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }

    /// Директива для `EnvFilter`: базовый уровень плюс дополнительные.
    pub fn build_filter_directive(&self) -> String {
        let mut parts = vec![self.level.to_ascii_lowercase()];
        parts.extend(self.directives.iter().cloned());
        parts.join(",")
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = LoggingConfig::default();
        assert_eq!(cfg.level, "info");
        assert!(cfg.console.enabled);
        assert!(!cfg.file.enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_invalid_level_rejected() {
        let cfg = LoggingConfig {
            level: "loud".to_string(),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(LoggingError::InvalidLevel(_))));
    }

    #[test]
    fn test_filter_directive_includes_overrides() {
        let cfg = LoggingConfig {
            level: "WARN".to_string(),
            directives: vec!["herald::network=debug".to_string()],
            ..Default::default()
        };
        assert_eq!(cfg.build_filter_directive(), "warn,herald::network=debug");
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    /// Тест проверяет переопределение настроек переменными окружения.
    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var(ENV_LOG_LEVEL, "debug");
        std::env::set_var(ENV_LOG_FORMAT, "json");
        std::env::set_var(ENV_LOG_DIR, "/tmp/herald-logs");

        let mut cfg = LoggingConfig::default();
        let result = cfg.apply_env_overrides();

        std::env::remove_var(ENV_LOG_LEVEL);
        std::env::remove_var(ENV_LOG_FORMAT);
        std::env::remove_var(ENV_LOG_DIR);

        assert!(result.is_ok());
        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.console.format, LogFormat::Json);
        assert_eq!(cfg.log_dir, PathBuf::from("/tmp/herald-logs"));
    }

    #[test]
    fn test_deserialize_partial_toml_like_json() {
        let cfg: LoggingConfig =
            serde_json::from_str(r#"{"level":"error","file":{"enabled":true}}"#).unwrap();
        assert_eq!(cfg.level, "error");
        assert!(cfg.file.enabled);
        assert_eq!(cfg.file.filename_prefix, "herald.log");
        assert!(cfg.console.enabled);
    }
}
