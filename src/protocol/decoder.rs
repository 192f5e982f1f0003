use std::fmt;

use herald_error::CodecError;
use serde::Deserialize;

use super::{
    request::{parse_id, Request},
    xml,
};

/// Максимальная длина строки запроса по умолчанию.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Декодер одного формата запросов.
///
/// `Ok(None)` означает «не мой формат»: цепочка переходит к следующему
/// декодеру. `Err` означает, что формат узнан, но запрос некорректен.
pub trait RequestDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn decode(
        &self,
        line: &str,
    ) -> Result<Option<Request>, CodecError>;
}

////////////////////////////////////////////////////////////////////////////////
// JSON
////////////////////////////////////////////////////////////////////////////////

/// `{"command":"publish","topic":"t","content":"..."}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDecoder;

#[derive(Debug, Deserialize)]
struct JsonRequest {
    #[serde(default, alias = "Command")]
    command: Option<String>,
    #[serde(default, alias = "Topic")]
    topic: Option<String>,
    #[serde(default, alias = "Content", alias = "message")]
    content: Option<serde_json::Value>,
    #[serde(default, alias = "Id")]
    id: Option<serde_json::Value>,
    #[serde(default, alias = "Format")]
    format: Option<String>,
}

impl RequestDecoder for JsonDecoder {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(
        &self,
        line: &str,
    ) -> Result<Option<Request>, CodecError> {
        if !line.trim_start().starts_with('{') {
            return Ok(None);
        }
        let raw: JsonRequest = serde_json::from_str(line).map_err(|e| CodecError::Malformed {
            format: "json",
            reason: e.to_string(),
        })?;

        let content = raw.content.map(|value| match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });
        let id = raw.id.map(|value| match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });

        Request::from_parts(
            raw.command.as_deref(),
            raw.topic,
            content,
            id.as_deref(),
            raw.format.as_deref(),
        )
        .map(Some)
    }
}

////////////////////////////////////////////////////////////////////////////////
// XML
////////////////////////////////////////////////////////////////////////////////

/// `<message><Command>subscribe</Command><Topic>t</Topic></message>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlDecoder;

impl RequestDecoder for XmlDecoder {
    fn name(&self) -> &'static str {
        "xml"
    }

    fn decode(
        &self,
        line: &str,
    ) -> Result<Option<Request>, CodecError> {
        if !line.trim_start().starts_with('<') {
            return Ok(None);
        }
        let element = xml::parse_flat(line)?;
        if !element.name.eq_ignore_ascii_case("message") {
            return Err(CodecError::Malformed {
                format: "xml",
                reason: format!("unexpected root element <{}>", element.name),
            });
        }

        Request::from_parts(
            element.child("command"),
            element.child("topic").map(str::to_string),
            element.child("content").map(str::to_string),
            element.child("id"),
            element.child("format"),
        )
        .map(Some)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Команды
////////////////////////////////////////////////////////////////////////////////

/// `PUBLISH <topic> <content...>`, `SUBSCRIBE <topic>`, `UNSUBSCRIBE <topic>
/// [id]`, `FORMAT <fmt>`, `STATS`, `PING`, `QUIT`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandDecoder;

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], &s[pos + 1..]),
        None => (s, ""),
    }
}

fn invalid_args(
    command: &'static str,
    reason: &str,
) -> CodecError {
    CodecError::InvalidArguments {
        command,
        reason: reason.to_string(),
    }
}

impl RequestDecoder for CommandDecoder {
    fn name(&self) -> &'static str {
        "command"
    }

    fn decode(
        &self,
        line: &str,
    ) -> Result<Option<Request>, CodecError> {
        let (verb, rest) = split_word(line);
        let request = match verb.to_ascii_uppercase().as_str() {
            "PUBLISH" => {
                let (topic, content) = split_word(rest);
                if topic.is_empty() {
                    return Err(invalid_args("PUBLISH", "expected PUBLISH <topic> <message>"));
                }
                Request::publish(topic, content.to_string())
            }
            "SUBSCRIBE" => {
                let (topic, extra) = split_word(rest);
                if topic.is_empty() || !extra.trim().is_empty() {
                    return Err(invalid_args("SUBSCRIBE", "expected SUBSCRIBE <topic>"));
                }
                Request::subscribe(topic)
            }
            "UNSUBSCRIBE" => {
                let (topic, tail) = split_word(rest);
                let (id, extra) = split_word(tail);
                if topic.is_empty() || !extra.trim().is_empty() {
                    return Err(invalid_args("UNSUBSCRIBE", "expected UNSUBSCRIBE <topic> [id]"));
                }
                let id = if id.is_empty() {
                    None
                } else {
                    Some(parse_id("UNSUBSCRIBE", id)?)
                };
                Request::unsubscribe(topic, id)
            }
            "FORMAT" => Request::Format(rest.parse()?),
            "STATS" => Request::Stats,
            "PING" => Request::Ping,
            "QUIT" => Request::Quit,
            _ => return Ok(None),
        };
        Ok(Some(request))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Текст через двоеточие
////////////////////////////////////////////////////////////////////////////////

/// `publish:<topic>:<content>`, `subscribe:<topic>`,
/// `unsubscribe:<topic>[:<id>]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ColonDecoder;

impl RequestDecoder for ColonDecoder {
    fn name(&self) -> &'static str {
        "text"
    }

    fn decode(
        &self,
        line: &str,
    ) -> Result<Option<Request>, CodecError> {
        let Some((command, rest)) = line.split_once(':') else {
            return Ok(None);
        };

        let request = match command.trim().to_ascii_lowercase().as_str() {
            "publish" => {
                let (topic, content) = rest.split_once(':').ok_or_else(|| {
                    invalid_args("PUBLISH", "expected publish:<topic>:<message>")
                })?;
                Request::publish(topic, content.to_string())
            }
            "subscribe" => Request::subscribe(rest),
            "unsubscribe" => match rest.split_once(':') {
                Some((topic, id)) => Request::unsubscribe(topic, Some(parse_id("UNSUBSCRIBE", id)?)),
                None => Request::unsubscribe(rest, None),
            },
            _ => return Ok(None),
        };
        Ok(Some(request))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Цепочка
////////////////////////////////////////////////////////////////////////////////

/// Упорядоченная цепочка декодеров: побеждает первый успешный.
///
/// Если ни один декодер не узнал формат, возвращается
/// [`CodecError::UnrecognizedFormat`]; если формат узнан, но запрос
/// некорректен, возвращается ошибка первого узнавшего декодера.
pub struct DecoderChain {
    decoders: Vec<Box<dyn RequestDecoder>>,
    max_line_length: usize,
}

impl DecoderChain {
    /// Пустая цепочка.
    pub fn new(max_line_length: usize) -> Self {
        Self {
            decoders: Vec::new(),
            max_line_length,
        }
    }

    /// JSON → XML → команды → текст через двоеточие.
    pub fn standard(max_line_length: usize) -> Self {
        Self::new(max_line_length)
            .with(JsonDecoder)
            .with(XmlDecoder)
            .with(CommandDecoder)
            .with(ColonDecoder)
    }

    pub fn with(
        mut self,
        decoder: impl RequestDecoder + 'static,
    ) -> Self {
        self.decoders.push(Box::new(decoder));
        self
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.decoders.iter().map(|d| d.name()).collect()
    }

    /// Декодирует одну строку (без завершающего перевода строки).
    pub fn decode(
        &self,
        line: &str,
    ) -> Result<Request, CodecError> {
        if line.len() > self.max_line_length {
            return Err(CodecError::FrameTooLarge {
                size: line.len(),
                max: self.max_line_length,
            });
        }

        let mut first_error = None;
        for decoder in &self.decoders {
            match decoder.decode(line) {
                Ok(Some(request)) => return Ok(request),
                Ok(None) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        Err(first_error.unwrap_or_else(|| CodecError::UnrecognizedFormat {
            tried: self.names().join(", "),
        }))
    }

    /// Декодирует сырые байты строки: снимает `\r\n`, проверяет UTF-8.
    pub fn decode_bytes(
        &self,
        raw: &[u8],
    ) -> Result<Request, CodecError> {
        let raw = trim_line_ending(raw);
        if raw.len() > self.max_line_length {
            return Err(CodecError::FrameTooLarge {
                size: raw.len(),
                max: self.max_line_length,
            });
        }
        let line = std::str::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8)?;
        self.decode(line)
    }
}

impl Default for DecoderChain {
    fn default() -> Self {
        Self::standard(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl fmt::Debug for DecoderChain {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("DecoderChain")
            .field("decoders", &self.names())
            .field("max_line_length", &self.max_line_length)
            .finish()
    }
}

/// Отрезает завершающие `\n` / `\r\n`.
pub fn trim_line_ending(raw: &[u8]) -> &[u8] {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    raw.strip_suffix(b"\r").unwrap_or(raw)
}

/// Декодирует строку стандартной цепочкой.
pub fn decode_request(line: &str) -> Result<Request, CodecError> {
    DecoderChain::default().decode(line)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::{protocol::OutputFormat, pubsub::SubscriberId};

    #[test]
    fn test_json_requests() {
        assert_eq!(
            decode_request(r#"{"command":"publish","topic":"news","content":"hi"}"#).unwrap(),
            Request::publish("news", "hi")
        );
        assert_eq!(
            decode_request(r#"{"topic":"news","content":"implied"}"#).unwrap(),
            Request::publish("news", "implied")
        );
        assert_eq!(
            decode_request(r#"{"command":"subscribe","topic":"temp"}"#).unwrap(),
            Request::subscribe("temp")
        );
        assert_eq!(
            decode_request(r#"{"command":"unsubscribe","topic":"temp","id":7}"#).unwrap(),
            Request::unsubscribe("temp", Some(SubscriberId::new(7)))
        );
        assert_eq!(
            decode_request(r#"{"command":"format","format":"xml"}"#).unwrap(),
            Request::Format(OutputFormat::Xml)
        );
    }

    /// Тест проверяет, что нестроковое содержимое JSON сериализуется
    /// обратно в текст.
    #[test]
    fn test_json_structured_content() {
        let req = decode_request(r#"{"topic":"metrics","content":{"cpu":0.5}}"#).unwrap();
        assert_eq!(req, Request::publish("metrics", r#"{"cpu":0.5}"#));
    }

    #[test]
    fn test_json_malformed_reports_json_error() {
        let err = decode_request(r#"{"command":"publish","topic":"#).unwrap_err();
        assert!(matches!(err, CodecError::Malformed { format: "json", .. }));
    }

    #[test]
    fn test_xml_requests() {
        assert_eq!(
            decode_request("<message><Command>subscribe</Command><Topic>temp</Topic></message>")
                .unwrap(),
            Request::subscribe("temp")
        );
        assert_eq!(
            decode_request("<Message><Topic>news</Topic><Content>a &amp; b</Content></Message>")
                .unwrap(),
            Request::publish("news", "a & b")
        );
        assert!(decode_request("<envelope><Topic>x</Topic></envelope>").is_err());
    }

    #[test]
    fn test_command_requests() {
        assert_eq!(
            decode_request("PUBLISH news hello  world").unwrap(),
            Request::publish("news", "hello  world")
        );
        assert_eq!(
            decode_request("publish news").unwrap(),
            Request::publish("news", Bytes::new())
        );
        assert_eq!(decode_request("subscribe temp").unwrap(), Request::subscribe("temp"));
        assert_eq!(
            decode_request("UNSUBSCRIBE temp 3").unwrap(),
            Request::unsubscribe("temp", Some(SubscriberId::new(3)))
        );
        assert_eq!(
            decode_request("UNSUBSCRIBE temp").unwrap(),
            Request::unsubscribe("temp", None)
        );
        assert_eq!(decode_request("FORMAT json").unwrap(), Request::Format(OutputFormat::Json));
        assert_eq!(decode_request("stats").unwrap(), Request::Stats);
        assert_eq!(decode_request("PING").unwrap(), Request::Ping);
        assert_eq!(decode_request("QUIT").unwrap(), Request::Quit);
    }

    #[test]
    fn test_command_argument_errors() {
        assert!(matches!(
            decode_request("SUBSCRIBE"),
            Err(CodecError::InvalidArguments { command: "SUBSCRIBE", .. })
        ));
        assert!(matches!(
            decode_request("SUBSCRIBE a b"),
            Err(CodecError::InvalidArguments { .. })
        ));
        assert!(matches!(
            decode_request("UNSUBSCRIBE temp abc"),
            Err(CodecError::InvalidArguments { .. })
        ));
        assert!(matches!(
            decode_request("FORMAT yaml"),
            Err(CodecError::InvalidArguments { command: "FORMAT", .. })
        ));
    }

    /// Тест проверяет формат исходных клиентов: двоеточие внутри
    /// сообщения сохраняется.
    #[test]
    fn test_colon_requests() {
        assert_eq!(
            decode_request("publish:temp:72F").unwrap(),
            Request::publish("temp", "72F")
        );
        assert_eq!(
            decode_request("publish:clock:12:30:00").unwrap(),
            Request::publish("clock", "12:30:00")
        );
        assert_eq!(decode_request("subscribe:news").unwrap(), Request::subscribe("news"));
        assert_eq!(
            decode_request("unsubscribe:news:4").unwrap(),
            Request::unsubscribe("news", Some(SubscriberId::new(4)))
        );
        assert!(matches!(
            decode_request("publish:onlytopic"),
            Err(CodecError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn test_unrecognized_format() {
        let err = decode_request("hello there").unwrap_err();
        match err {
            CodecError::UnrecognizedFormat { tried } => {
                assert_eq!(tried, "json, xml, command, text");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(
            decode_request(""),
            Err(CodecError::UnrecognizedFormat { .. })
        ));
    }

    #[test]
    fn test_decode_bytes_limits() {
        let chain = DecoderChain::standard(16);
        assert_eq!(chain.decode_bytes(b"PING\r\n").unwrap(), Request::Ping);
        assert!(matches!(
            chain.decode_bytes(b"PUBLISH topic a-very-long-message\n"),
            Err(CodecError::FrameTooLarge { max: 16, .. })
        ));
        assert_eq!(
            chain.decode_bytes(&[0x50, 0xff, 0xfe]),
            Err(CodecError::InvalidUtf8)
        );
    }

    #[test]
    fn test_custom_chain_order() {
        let chain = DecoderChain::new(1024).with(ColonDecoder);
        assert_eq!(chain.names(), vec!["text"]);
        assert!(chain.decode("PING").is_err());
        assert_eq!(chain.decode("subscribe:x").unwrap(), Request::subscribe("x"));
    }
}
