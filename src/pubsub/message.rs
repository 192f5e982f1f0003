use std::{borrow::Cow, sync::Arc};

use bytes::Bytes;

/// Опубликованное сообщение.
///
/// Неизменяемо после публикации. `sequence` строго возрастает в пределах
/// топика и используется для упорядочивания replay-буфера.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: Arc<str>,
    pub content: Bytes,
    pub sequence: u64,
}

impl Message {
    pub fn new(
        topic: impl Into<Arc<str>>,
        content: impl Into<Bytes>,
        sequence: u64,
    ) -> Self {
        Self {
            topic: topic.into(),
            content: content.into(),
            sequence,
        }
    }

    /// Содержимое как строка (невалидный UTF-8 заменяется на U+FFFD).
    pub fn content_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет создание сообщения из &str и статических байт.
    #[test]
    fn test_message_creation() {
        let msg = Message::new("news", Bytes::from_static(b"hello world"), 7);

        assert_eq!(&*msg.topic, "news");
        assert_eq!(msg.content, Bytes::from_static(b"hello world"));
        assert_eq!(msg.sequence, 7);
        assert_eq!(msg.len(), 11);
    }

    /// Тест проверяет, что клонирование разделяет имя топика.
    #[test]
    fn test_clone_shares_topic() {
        let topic: Arc<str> = Arc::from("temp");
        let msg = Message::new(topic.clone(), "72F", 1);
        let copy = msg.clone();
        assert!(Arc::ptr_eq(&msg.topic, &copy.topic));
        assert!(Arc::ptr_eq(&topic, &copy.topic));
    }

    /// Тест проверяет lossy-представление бинарного содержимого.
    #[test]
    fn test_content_lossy_with_binary_payload() {
        let msg = Message::new("bin", vec![0x66, 0x6f, 0xff], 1);
        assert_eq!(msg.content_lossy(), "fo\u{fffd}");
    }

    #[test]
    fn test_empty_content() {
        let msg = Message::new("system", Bytes::new(), 1);
        assert!(msg.is_empty());
    }
}
