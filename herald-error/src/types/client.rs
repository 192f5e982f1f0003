use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки клиента Herald.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("Connection to {address} failed: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Response timeout")]
    ResponseTimeout,

    #[error("Connection closed by server")]
    ConnectionClosed,

    /// Сервер ответил строкой `-ERR ...`.
    #[error("Server error: {message}")]
    ServerError { message: String },

    /// Ответ сервера не соответствует протоколу.
    #[error("Unexpected response: {response}")]
    UnexpectedResponse { response: String },
}

impl ErrorExt for ClientError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ConnectionFailed { .. } => StatusCode::ConnectionFailed,
            Self::ConnectionTimeout | Self::ResponseTimeout => StatusCode::Timeout,
            Self::ConnectionClosed => StatusCode::ConnectionClosed,
            Self::ServerError { message } if message.contains("retry later") => {
                StatusCode::Unavailable
            }
            Self::ServerError { message } if message.contains("not found") => {
                StatusCode::NotFound
            }
            Self::ServerError { .. } => StatusCode::InvalidArgs,
            Self::UnexpectedResponse { .. } => StatusCode::ProtocolError,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
