use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки операций брокера (publish / subscribe / unsubscribe).
///
/// Сбои доставки отдельному подписчику сюда не попадают: они изолируются
/// внутри брокера и описываются [`SinkError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Подписчик или топик не зарегистрирован (только для unsubscribe).
    #[error("Topic not found: {topic}")]
    UnknownTopic { topic: String },

    /// Брокер начал остановку и не принимает новые операции.
    #[error("Broker unavailable, retry later")]
    EngineUnavailable,

    /// Имя топика не проходит синтаксическую проверку.
    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },
}

/// Ошибка доставки сообщения в sink одного подписчика.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Получатель закрыт (соединение или поток подписки завершились).
    #[error("sink is closed")]
    Closed,

    /// Очередь подписчика переполнена.
    #[error("subscriber queue is full (capacity {capacity})")]
    Full { capacity: usize },

    /// Произвольный сбой транспорта.
    #[error("delivery failed: {reason}")]
    Failed { reason: String },
}

impl ErrorExt for BrokerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownTopic { .. } => StatusCode::NotFound,
            Self::EngineUnavailable => StatusCode::Unavailable,
            Self::InvalidTopic { .. } => StatusCode::InvalidTopic,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::UnknownTopic { .. } => "Topic not found".to_string(),
            Self::EngineUnavailable => "Broker unavailable, retry later".to_string(),
            Self::InvalidTopic { reason, .. } => format!("Invalid topic: {reason}"),
        }
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "broker".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        if let Self::UnknownTopic { topic } | Self::InvalidTopic { topic, .. } = self {
            tags.push(("topic", topic.clone()));
        }

        tags
    }
}

impl ErrorExt for SinkError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Closed => StatusCode::ConnectionClosed,
            Self::Full { .. } => StatusCode::SubscriberQueueFull,
            Self::Failed { .. } => StatusCode::Io,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "sink".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        if let Self::Full { capacity } = self {
            tags.push(("capacity", capacity.to_string()));
        }
        tags
    }
}
