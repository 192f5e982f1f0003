use tracing_subscriber::EnvFilter;

use crate::logging::config::{LoggingConfig, LoggingError};

/// Строит фильтр: `RUST_LOG` имеет приоритет над конфигурацией.
pub fn build_filter_from_config(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        return Ok(env_filter);
    }

    let directive = config.build_filter_directive();
    EnvFilter::try_new(&directive).map_err(|e| LoggingError::InvalidDirective {
        directive,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::{
        env,
        sync::{Arc, Mutex},
    };

    use serial_test::serial;
    use tracing_subscriber::{fmt, prelude::*, registry::Registry};

    use super::*;

    // Мини-буферный writer для тестов
    struct VecMakeWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> fmt::MakeWriter<'a> for VecMakeWriter {
        type Writer = VecWriterGuard;

        fn make_writer(&'a self) -> Self::Writer {
            VecWriterGuard(self.0.clone())
        }
    }

    struct VecWriterGuard(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for VecWriterGuard {
        fn write(
            &mut self,
            buf: &[u8],
        ) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Тест проверяет, что некорректная директива даёт ошибку, а не панику.
    #[test]
    #[serial]
    fn test_invalid_directive_is_error() {
        env::remove_var("RUST_LOG");
        let cfg = LoggingConfig {
            directives: vec!["herald=notalevel".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            build_filter_from_config(&cfg),
            Err(LoggingError::InvalidDirective { .. })
        ));
    }

    /// Тест проверяет, что RUST_LOG побеждает конфигурацию.
    #[test]
    #[serial]
    fn test_rust_log_wins() {
        env::set_var("RUST_LOG", "debug");
        let cfg = LoggingConfig {
            directives: vec!["herald=notalevel".to_string()],
            ..Default::default()
        };
        let result = build_filter_from_config(&cfg);
        env::remove_var("RUST_LOG");
        assert!(result.is_ok());
    }

    /// Тест проверяет фильтрацию в runtime: при уровне warn сообщения info
    /// отбрасываются.
    #[test]
    #[serial]
    fn test_filter_drops_lower_levels() {
        env::remove_var("RUST_LOG");
        let cfg = LoggingConfig {
            level: "warn".to_string(),
            ..Default::default()
        };
        let filter = build_filter_from_config(&cfg).unwrap();

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let layer = fmt::layer()
            .with_ansi(false)
            .with_writer(VecMakeWriter(buffer.clone()))
            .with_filter(filter);
        let subscriber = Registry::default().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("subscriber registered on quiet topic");
            tracing::warn!("delivery failed on noisy topic");
        });

        let out = buffer.lock().unwrap();
        let s = String::from_utf8_lossy(&out);
        assert!(s.contains("delivery failed on noisy topic"));
        assert!(!s.contains("subscriber registered on quiet topic"));
    }
}
