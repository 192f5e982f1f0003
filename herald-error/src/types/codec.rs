use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки декодирования запросов и кодирования ответов.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Ни один декодер из цепочки не распознал запрос.
    #[error("Unrecognized request format (tried: {tried})")]
    UnrecognizedFormat { tried: String },

    /// Формат распознан, но в запросе не хватает поля.
    #[error("Missing field '{field}'")]
    MissingField { field: &'static str },

    /// Неизвестная команда.
    #[error("Unknown command '{command}'")]
    InvalidCommand { command: String },

    /// Неверные аргументы известной команды.
    #[error("Invalid arguments for {command}: {reason}")]
    InvalidArguments {
        command: &'static str,
        reason: String,
    },

    /// Строка запроса превышает допустимый размер.
    #[error("Request too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Запрос не является корректным UTF-8.
    #[error("Request is not valid UTF-8")]
    InvalidUtf8,

    /// Ошибка конкретного формата (JSON, XML, text).
    #[error("Malformed {format} request: {reason}")]
    Malformed {
        format: &'static str,
        reason: String,
    },
}

impl ErrorExt for CodecError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnrecognizedFormat { .. } => StatusCode::UnrecognizedFormat,
            Self::MissingField { .. } => StatusCode::InvalidFrame,
            Self::InvalidCommand { .. } => StatusCode::InvalidCommand,
            Self::InvalidArguments { .. } => StatusCode::InvalidArgs,
            Self::FrameTooLarge { .. } => StatusCode::SizeLimit,
            Self::InvalidUtf8 => StatusCode::InvalidUtf8,
            Self::Malformed { .. } => StatusCode::ParseError,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "codec".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        match self {
            Self::Malformed { format, .. } => tags.push(("format", format.to_string())),
            Self::FrameTooLarge { size, max } => {
                tags.push(("frame_size", size.to_string()));
                tags.push(("max_size", max.to_string()));
            }
            _ => {}
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_codes() {
        let err = CodecError::UnrecognizedFormat {
            tried: "json, xml".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::UnrecognizedFormat);
        assert!(err.status_code().is_protocol_error());
        assert!(err.to_string().contains("json, xml"));
    }

    #[test]
    fn test_frame_too_large_tags() {
        let err = CodecError::FrameTooLarge { size: 10, max: 4 };
        let tags = err.metrics_tags();
        assert!(tags.iter().any(|(k, v)| *k == "frame_size" && v == "10"));
        assert!(tags.iter().any(|(k, v)| *k == "max_size" && v == "4"));
    }
}
