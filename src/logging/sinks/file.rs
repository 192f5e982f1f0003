use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{self, RollingFileAppender},
};
use tracing_subscriber::{layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::{
    config::{LoggingConfig, LoggingError, Rotation},
    formatter::{self, FormatOptions},
};

/// Файловый layer с ротацией и неблокирующей записью.
///
/// Возвращённый `WorkerGuard` нужно держать до завершения процесса:
/// при его drop оставшиеся записи сбрасываются на диск.
pub fn layer_with_config<S>(
    config: &LoggingConfig
) -> Result<(Box<dyn LayerTrait<S> + Send + Sync>, WorkerGuard), LoggingError>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    std::fs::create_dir_all(&config.log_dir)?;

    let dir = &config.log_dir;
    let prefix = &config.file.filename_prefix;
    let appender: RollingFileAppender = match config.file.rotation {
        Rotation::Hourly => rolling::hourly(dir, prefix),
        Rotation::Daily => rolling::daily(dir, prefix),
        Rotation::Never => rolling::never(dir, prefix),
    };
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let options = FormatOptions {
        format: config.file.format,
        with_ansi: false,
        with_target: true,
        with_thread_ids: false,
        with_line_numbers: false,
    };
    Ok((formatter::build_formatter(options, writer), guard))
}
