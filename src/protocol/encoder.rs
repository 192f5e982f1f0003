use std::fmt;

use herald_error::ErrorExt;
use serde::Serialize;

use super::{request::OutputFormat, xml};
use crate::pubsub::{Message, SubscriberId};

/// Префикс строки с доставленным сообщением в текстовом формате.
pub const PUSH_PREFIX: &str = "MESSAGE ";

/// Префикс уведомления о подписке, снятой брокером без запроса клиента.
pub const EVICTED_PREFIX: &str = "-ERR Subscription evicted ";

/// Ответ сервера на один запрос.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Published { sequence: u64 },
    Subscribed { topic: String, id: SubscriberId },
    /// `removed` подписок снято.
    Unsubscribed { removed: usize },
    FormatSet(OutputFormat),
    /// JSON со статистикой.
    Stats(String),
    Pong,
    Bye,
    ShuttingDown,
    /// Подписка снята брокером (переполнение очереди, сбой replay).
    Evicted { topic: String, id: SubscriberId },
    Error(String),
}

impl Response {
    /// Ответ об ошибке с безопасным для клиента текстом.
    pub fn from_error(err: &dyn ErrorExt) -> Self {
        Self::Error(err.client_message())
    }

    /// Строка ответа с завершающим `\n`.
    pub fn encode(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for Response {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Published { sequence } => write!(f, "+OK Message published {sequence}"),
            Self::Subscribed { topic, id } => write!(f, "+OK Subscribed {topic} {id}"),
            Self::Unsubscribed { .. } => f.write_str("+OK Unsubscribed from topic"),
            Self::FormatSet(format) => write!(f, "+OK Format {format}"),
            Self::Stats(json) => write!(f, "+STATS {json}"),
            Self::Pong => f.write_str("+PONG"),
            Self::Bye => f.write_str("+OK Bye"),
            Self::ShuttingDown => f.write_str("-ERR Server shutting down"),
            Self::Evicted { topic, id } => write!(f, "{EVICTED_PREFIX}{topic} {id}"),
            Self::Error(message) => write!(f, "-ERR {}", single_line(message)),
        }
    }
}

fn single_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}

////////////////////////////////////////////////////////////////////////////////
// Доставка сообщений
////////////////////////////////////////////////////////////////////////////////

#[derive(Serialize)]
struct JsonPush<'a> {
    topic: &'a str,
    content: &'a str,
    sequence: u64,
}

/// Представляет доставленное сообщение одной строкой (без `\n`).
pub fn render_push(
    message: &Message,
    format: OutputFormat,
) -> String {
    let content = message.content_lossy();
    match format {
        OutputFormat::Text => format!(
            "{PUSH_PREFIX}{} {} {}",
            message.topic,
            message.sequence,
            escape_text(&content)
        ),
        OutputFormat::Json => {
            let push = JsonPush {
                topic: &message.topic,
                content: &content,
                sequence: message.sequence,
            };
            // Сериализация структуры из строк и числа не может упасть.
            serde_json::to_string(&push).unwrap_or_default()
        }
        OutputFormat::Xml => format!(
            "<Message><Topic>{}</Topic><Content>{}</Content><Sequence>{}</Sequence></Message>",
            xml::escape(&message.topic),
            xml::escape(&content),
            message.sequence
        ),
    }
}

/// Экранирует `\`, `\n` и `\r`, чтобы сообщение занимало одну строку.
pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

/// Обратное к [`escape_text`]. Неизвестные последовательности остаются
/// как есть.
pub fn unescape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Разбирает текстовую строку доставки `MESSAGE <topic> <seq> <content>`.
pub fn parse_text_push(line: &str) -> Option<Message> {
    let rest = line.strip_prefix(PUSH_PREFIX)?;
    let (topic, rest) = rest.split_once(' ')?;
    let (sequence, content) = match rest.split_once(' ') {
        Some((seq, content)) => (seq, content),
        None => (rest, ""),
    };
    let sequence = sequence.parse().ok()?;
    Some(Message::new(topic, unescape_text(content), sequence))
}

#[cfg(test)]
mod tests {
    use herald_error::BrokerError;

    use super::*;

    #[test]
    fn test_response_lines() {
        assert_eq!(
            Response::Published { sequence: 5 }.encode(),
            "+OK Message published 5\n"
        );
        assert_eq!(
            Response::Subscribed {
                topic: "temp".into(),
                id: SubscriberId::new(2)
            }
            .to_string(),
            "+OK Subscribed temp 2"
        );
        assert_eq!(
            Response::Unsubscribed { removed: 1 }.to_string(),
            "+OK Unsubscribed from topic"
        );
        assert_eq!(Response::Pong.to_string(), "+PONG");
        assert_eq!(
            Response::FormatSet(OutputFormat::Json).to_string(),
            "+OK Format json"
        );
        assert_eq!(
            Response::ShuttingDown.to_string(),
            "-ERR Server shutting down"
        );
        assert_eq!(
            Response::Evicted {
                topic: "news".into(),
                id: SubscriberId::new(7)
            }
            .to_string(),
            "-ERR Subscription evicted news 7"
        );
    }

    /// Тест проверяет, что ошибки брокера дают исходные тексты ответов.
    #[test]
    fn test_error_responses() {
        let missing = BrokerError::UnknownTopic {
            topic: "x".into(),
        };
        assert_eq!(
            Response::from_error(&missing).to_string(),
            "-ERR Topic not found"
        );
        assert_eq!(
            Response::from_error(&BrokerError::EngineUnavailable).to_string(),
            "-ERR Broker unavailable, retry later"
        );
        assert_eq!(
            Response::Error("two\nlines".into()).encode(),
            "-ERR two lines\n"
        );
    }

    #[test]
    fn test_render_push_formats() {
        let msg = Message::new("news", "a <b>\n\"c\"", 9);

        let text = render_push(&msg, OutputFormat::Text);
        assert_eq!(text, "MESSAGE news 9 a <b>\\n\"c\"");

        let json: serde_json::Value =
            serde_json::from_str(&render_push(&msg, OutputFormat::Json)).unwrap();
        assert_eq!(json["topic"], "news");
        assert_eq!(json["content"], "a <b>\n\"c\"");
        assert_eq!(json["sequence"], 9);

        let xml_line = render_push(&msg, OutputFormat::Xml);
        assert!(!xml_line.contains('\n'));
        let el = xml::parse_flat(&xml_line).unwrap();
        assert_eq!(el.child("content"), Some("a <b>\n\"c\""));
        assert_eq!(el.child("sequence"), Some("9"));
    }

    #[test]
    fn test_text_escape() {
        assert_eq!(escape_text("a\\n\nb\r"), "a\\\\n\\nb\\r");
        assert_eq!(unescape_text("a\\\\n\\nb\\r"), "a\\n\nb\r");
        assert_eq!(unescape_text("tail\\"), "tail\\");
        assert_eq!(unescape_text("\\t"), "\\t");
    }

    #[test]
    fn test_parse_text_push() {
        let msg = Message::new("temp", "72F\nline", 3);
        let parsed = parse_text_push(&render_push(&msg, OutputFormat::Text)).unwrap();
        assert_eq!(parsed, msg);

        let empty = parse_text_push("MESSAGE temp 4").unwrap();
        assert!(empty.is_empty());
        assert!(parse_text_push("+OK Subscribed temp 1").is_none());
        assert!(parse_text_push("MESSAGE temp x hi").is_none());
    }
}
