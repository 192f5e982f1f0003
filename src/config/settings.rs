use std::{net::SocketAddr, path::Path, time::Duration};

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::{
    logging::LoggingConfig,
    network::ConnectionConfig,
    pubsub::{BrokerConfig, ReplayPolicy, DEFAULT_REPLAY_CAPACITY, DEFAULT_SUBSCRIBER_QUEUE_CAPACITY},
};

/// Адрес по умолчанию.
pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:65432";
/// Переменная окружения с путём к файлу конфигурации.
pub const ENV_CONFIG_PATH: &str = "HERALD_CONFIG";
/// Файл конфигурации по умолчанию (необязательный).
pub const DEFAULT_CONFIG_FILE: &str = "herald.toml";

/// Настройки брокера.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub replay_enabled: bool,
    pub replay_capacity: usize,
    pub subscriber_queue_capacity: usize,
}

/// Настройки сервера.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub listen_address: String,
    pub max_connections: usize,
    pub max_connections_per_ip: usize,
    pub idle_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    /// Максимальная длина строки запроса в байтах.
    pub max_line_length: usize,
    pub broker: BrokerSettings,
    pub logging: LoggingConfig,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            replay_enabled: true,
            replay_capacity: DEFAULT_REPLAY_CAPACITY,
            subscriber_queue_capacity: DEFAULT_SUBSCRIBER_QUEUE_CAPACITY,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            max_connections: 10_000,
            max_connections_per_ip: 100,
            idle_timeout_secs: 300,
            write_timeout_secs: 10,
            shutdown_timeout_secs: 10,
            max_line_length: 64 * 1024,
            broker: BrokerSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    /// Загружает настройки: значения по умолчанию, затем файл
    /// (`HERALD_CONFIG` или `herald.toml`, если есть), затем окружение
    /// `HERALD_*` (вложенные ключи через `__`).
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) => Self::load_from(Some(Path::new(&path)), true),
            Err(_) => Self::load_from(Some(Path::new(DEFAULT_CONFIG_FILE)), false),
        }
    }

    /// Загружает настройки из явного файла.
    pub fn load_from(
        path: Option<&Path>,
        required: bool,
    ) -> Result<Self, ConfigError> {
        let defaults = Config::try_from(&Settings::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(required),
            );
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("HERALD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Проверяет согласованность значений.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Message(msg.to_string()));

        if self.listen_address.parse::<SocketAddr>().is_err() {
            return invalid("listen_address must be a socket address (host:port)");
        }
        if self.max_connections == 0 {
            return invalid("max_connections must be greater than zero");
        }
        if self.max_connections_per_ip == 0 {
            return invalid("max_connections_per_ip must be greater than zero");
        }
        if self.broker.subscriber_queue_capacity == 0 {
            return invalid("broker.subscriber_queue_capacity must be greater than zero");
        }
        if self.broker.replay_enabled && self.broker.replay_capacity == 0 {
            return invalid("broker.replay_capacity must be greater than zero when replay is enabled");
        }
        if self.max_line_length == 0 {
            return invalid("max_line_length must be greater than zero");
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig::from(&self.broker)
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_connections: self.max_connections,
            max_connections_per_ip: self.max_connections_per_ip,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            max_line_length: self.max_line_length,
            ..ConnectionConfig::default()
        }
    }
}

impl From<&BrokerSettings> for BrokerConfig {
    fn from(settings: &BrokerSettings) -> Self {
        let replay = if settings.replay_enabled {
            ReplayPolicy::drain_once(settings.replay_capacity)
        } else {
            ReplayPolicy::Disabled
        };
        Self {
            replay,
            subscriber_queue_capacity: settings.subscriber_queue_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;

    use super::*;

    fn clear_env() {
        for key in [
            ENV_CONFIG_PATH,
            "HERALD_LISTEN_ADDRESS",
            "HERALD_MAX_CONNECTIONS",
            "HERALD_BROKER__REPLAY_CAPACITY",
            "HERALD_BROKER__REPLAY_ENABLED",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.listen_address, "127.0.0.1:65432");
        assert_eq!(
            settings.broker_config().replay,
            ReplayPolicy::DrainOnce {
                capacity: DEFAULT_REPLAY_CAPACITY
            }
        );
    }

    /// Тест проверяет загрузку без файла: получаем значения по умолчанию.
    #[test]
    #[serial]
    fn test_load_without_file() {
        clear_env();
        let settings = Settings::load_from(None, false).unwrap();
        assert_eq!(settings, Settings::default());
    }

    /// Тест проверяет, что файл TOML перекрывает значения по умолчанию, а
    /// окружение перекрывает файл.
    #[test]
    #[serial]
    fn test_file_then_env_precedence() {
        clear_env();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "listen_address = \"0.0.0.0:7000\"\nmax_connections = 5\n\n[broker]\nreplay_capacity = 16\n"
        )
        .unwrap();

        std::env::set_var("HERALD_MAX_CONNECTIONS", "7");
        let result = Settings::load_from(Some(file.path()), true);
        clear_env();

        let settings = result.unwrap();
        assert_eq!(settings.listen_address, "0.0.0.0:7000");
        assert_eq!(settings.max_connections, 7);
        assert_eq!(settings.broker.replay_capacity, 16);
        assert!(settings.broker.replay_enabled);
    }

    #[test]
    #[serial]
    fn test_nested_env_override() {
        clear_env();
        std::env::set_var("HERALD_BROKER__REPLAY_ENABLED", "false");
        let result = Settings::load_from(None, false);
        clear_env();

        let settings = result.unwrap();
        assert!(!settings.broker.replay_enabled);
        assert_eq!(settings.broker_config().replay, ReplayPolicy::Disabled);
    }

    #[test]
    #[serial]
    fn test_missing_required_file_fails() {
        clear_env();
        let result = Settings::load_from(Some(Path::new("/nonexistent/herald.toml")), true);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut settings = Settings::default();
        settings.broker.subscriber_queue_capacity = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.listen_address = "not-an-address".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_connection_config_mapping() {
        let settings = Settings {
            idle_timeout_secs: 42,
            ..Default::default()
        };
        let conn = settings.connection_config();
        assert_eq!(conn.idle_timeout, Duration::from_secs(42));
        assert_eq!(conn.max_connections, settings.max_connections);
    }
}
