use std::{fmt, str::FromStr};

use bytes::Bytes;
use herald_error::CodecError;
use serde::{Deserialize, Serialize};

use crate::pubsub::SubscriberId;

/// Формат, в котором соединению доставляются сообщения.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Xml,
}

impl FromStr for OutputFormat {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            other => Err(CodecError::InvalidArguments {
                command: "FORMAT",
                reason: format!("unknown format '{other}' (expected text, json or xml)"),
            }),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::Xml => "xml",
        };
        f.write_str(s)
    }
}

/// Декодированный запрос клиента.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Publish { topic: String, content: Bytes },
    Subscribe { topic: String },
    /// Без `id` снимаются все подписки соединения на топик.
    Unsubscribe {
        topic: String,
        id: Option<SubscriberId>,
    },
    Format(OutputFormat),
    Stats,
    Ping,
    Quit,
}

impl Request {
    pub fn publish(
        topic: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self::Publish {
            topic: topic.into(),
            content: content.into(),
        }
    }

    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self::Subscribe {
            topic: topic.into(),
        }
    }

    pub fn unsubscribe(
        topic: impl Into<String>,
        id: Option<SubscriberId>,
    ) -> Self {
        Self::Unsubscribe {
            topic: topic.into(),
            id,
        }
    }

    /// Имя команды для логов.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Publish { .. } => "PUBLISH",
            Self::Subscribe { .. } => "SUBSCRIBE",
            Self::Unsubscribe { .. } => "UNSUBSCRIBE",
            Self::Format(_) => "FORMAT",
            Self::Stats => "STATS",
            Self::Ping => "PING",
            Self::Quit => "QUIT",
        }
    }

    /// Собирает запрос из имени команды и полей (общая часть JSON и XML
    /// декодеров).
    pub(crate) fn from_parts(
        command: Option<&str>,
        topic: Option<String>,
        content: Option<String>,
        id: Option<&str>,
        format: Option<&str>,
    ) -> Result<Self, CodecError> {
        let command = match command {
            Some(c) => c.trim().to_ascii_lowercase(),
            None if content.is_some() => "publish".to_string(),
            None => return Err(CodecError::MissingField { field: "command" }),
        };
        let topic_required = || topic.clone().ok_or(CodecError::MissingField { field: "topic" });

        match command.as_str() {
            "publish" => Ok(Self::Publish {
                topic: topic_required()?,
                content: Bytes::from(content.unwrap_or_default()),
            }),
            "subscribe" => Ok(Self::Subscribe {
                topic: topic_required()?,
            }),
            "unsubscribe" => Ok(Self::Unsubscribe {
                topic: topic_required()?,
                id: id.map(|s| parse_id("UNSUBSCRIBE", s)).transpose()?,
            }),
            "format" => {
                let format = format.ok_or(CodecError::MissingField { field: "format" })?;
                Ok(Self::Format(format.parse()?))
            }
            "stats" => Ok(Self::Stats),
            "ping" => Ok(Self::Ping),
            "quit" => Ok(Self::Quit),
            other => Err(CodecError::InvalidCommand {
                command: other.to_string(),
            }),
        }
    }
}

/// Разбирает идентификатор подписчика.
pub(crate) fn parse_id(
    command: &'static str,
    raw: &str,
) -> Result<SubscriberId, CodecError> {
    raw.trim()
        .parse::<u64>()
        .map(SubscriberId::new)
        .map_err(|_| CodecError::InvalidArguments {
            command,
            reason: format!("invalid subscriber id '{raw}'"),
        })
}
