use std::{collections::HashMap, sync::Arc};

use herald_error::{BrokerError, SinkError};

use super::{HistoryBuffer, Message, ReplayPolicy, Sink, SubscriberHandle, SubscriberId};

/// Максимальная длина имени топика в байтах.
pub const MAX_TOPIC_LEN: usize = 256;

/// Проверяет имя топика: непустое, не длиннее [`MAX_TOPIC_LEN`], без
/// пробельных и управляющих символов.
pub fn validate_topic(topic: &str) -> Result<(), BrokerError> {
    let invalid = |reason: &str| BrokerError::InvalidTopic {
        topic: topic.to_string(),
        reason: reason.to_string(),
    };

    if topic.is_empty() {
        return Err(invalid("topic must not be empty"));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(invalid("topic is too long"));
    }
    if topic.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid("topic must not contain whitespace or control characters"));
    }
    Ok(())
}

/// Запись одного топика.
#[derive(Debug)]
struct TopicEntry {
    name: Arc<str>,
    subscribers: Vec<Arc<SubscriberHandle>>,
    history: HistoryBuffer,
}

impl TopicEntry {
    fn new(
        name: Arc<str>,
        replay: ReplayPolicy,
    ) -> Self {
        Self {
            name,
            subscribers: Vec::new(),
            history: HistoryBuffer::new(replay.capacity()),
        }
    }

    fn is_unused(&self) -> bool {
        self.subscribers.is_empty() && self.history.is_empty()
    }
}

/// Результат выдачи истории новому подписчику.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Сколько сообщений доставлено.
    pub replayed: usize,
    /// Ошибка sink, прервавшая выдачу (остаток истории отброшен).
    pub failed: Option<SinkError>,
}

/// Таблица топиков: подписчики и буферы истории.
///
/// Не синхронизирована сама по себе; брокер держит её под одной
/// блокировкой, так что каждая операция атомарна относительно остальных.
/// Запись топика удаляется, как только у него нет ни подписчиков, ни
/// буферизованной истории.
#[derive(Debug)]
pub struct TopicTable {
    topics: HashMap<Arc<str>, TopicEntry>,
    replay: ReplayPolicy,
    next_id: u64,
    next_sequence: u64,
}

impl TopicTable {
    pub fn new(replay: ReplayPolicy) -> Self {
        Self {
            topics: HashMap::new(),
            replay,
            next_id: 1,
            next_sequence: 1,
        }
    }

    pub fn replay_policy(&self) -> ReplayPolicy {
        self.replay
    }

    fn entry_mut(
        &mut self,
        topic: &str,
    ) -> &mut TopicEntry {
        let replay = self.replay;
        self.topics
            .entry(Arc::from(topic))
            .or_insert_with_key(|name| TopicEntry::new(name.clone(), replay))
    }

    /// Регистрирует sink в топике, создавая запись при необходимости.
    pub fn register(
        &mut self,
        topic: &str,
        sink: Box<dyn Sink>,
    ) -> Arc<SubscriberHandle> {
        let id = SubscriberId::new(self.next_id);
        self.next_id += 1;

        let entry = self.entry_mut(topic);
        let handle = Arc::new(SubscriberHandle::new(id, entry.name.clone(), sink));
        entry.subscribers.push(handle.clone());
        handle
    }

    /// Удаляет подписчика. Возвращает его handle, если он был в таблице.
    pub fn deregister(
        &mut self,
        topic: &str,
        id: SubscriberId,
    ) -> Option<Arc<SubscriberHandle>> {
        let entry = self.topics.get_mut(topic)?;
        let pos = entry.subscribers.iter().position(|h| h.id() == id)?;
        let handle = entry.subscribers.remove(pos);
        handle.mark_dead();
        self.prune(topic);
        Some(handle)
    }

    /// Живые подписчики топика на момент вызова.
    pub fn snapshot(
        &self,
        topic: &str,
    ) -> Vec<Arc<SubscriberHandle>> {
        self.topics
            .get(topic)
            .map(|e| e.subscribers.iter().filter(|h| h.is_alive()).cloned().collect())
            .unwrap_or_default()
    }

    /// Создаёт сообщение со следующим порядковым номером.
    ///
    /// Номера берутся из общего счётчика таблицы, поэтому остаются
    /// строго возрастающими в топике даже после удаления его записи.
    pub fn next_message(
        &mut self,
        topic: &str,
        content: bytes::Bytes,
    ) -> Message {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let name = match self.topics.get(topic) {
            Some(entry) => entry.name.clone(),
            None => Arc::from(topic),
        };
        Message::new(name, content, sequence)
    }

    /// Кладёт сообщение в историю топика. Возвращает вытесненное.
    pub fn buffer(
        &mut self,
        message: Message,
    ) -> Option<Message> {
        if !self.replay.is_enabled() {
            return Some(message);
        }
        let topic = message.topic.clone();
        self.entry_mut(&topic).history.push(message)
    }

    /// Выдаёт историю топика подписчику `id` и очищает её.
    pub fn replay_to(
        &mut self,
        topic: &str,
        id: SubscriberId,
    ) -> ReplayOutcome {
        let mut outcome = ReplayOutcome::default();
        let Some(entry) = self.topics.get_mut(topic) else {
            return outcome;
        };
        let Some(handle) = entry.subscribers.iter().find(|h| h.id() == id).cloned() else {
            return outcome;
        };

        for message in entry.history.drain() {
            match handle.deliver(&message) {
                Ok(()) => outcome.replayed += 1,
                Err(err) => {
                    outcome.failed = Some(err);
                    break;
                }
            }
        }
        outcome
    }

    /// Удаляет запись топика, если она больше не используется.
    pub fn prune(
        &mut self,
        topic: &str,
    ) -> bool {
        if self.topics.get(topic).is_some_and(TopicEntry::is_unused) {
            self.topics.remove(topic);
            true
        } else {
            false
        }
    }

    /// Удаляет всех подписчиков и всю историю. Возвращает число
    /// закрытых подписчиков.
    pub fn clear(&mut self) -> usize {
        let mut closed = 0;
        for (_, entry) in self.topics.drain() {
            for handle in entry.subscribers {
                if handle.mark_dead() {
                    closed += 1;
                }
            }
        }
        closed
    }

    pub fn contains(
        &self,
        topic: &str,
    ) -> bool {
        self.topics.contains_key(topic)
    }

    /// Зарегистрирован ли подписчик `id` в топике.
    pub fn is_registered(
        &self,
        topic: &str,
        id: SubscriberId,
    ) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|e| e.subscribers.iter().any(|h| h.id() == id))
    }

    pub fn subscriber_count(
        &self,
        topic: &str,
    ) -> usize {
        self.topics
            .get(topic)
            .map(|e| e.subscribers.len())
            .unwrap_or(0)
    }

    pub fn total_subscribers(&self) -> usize {
        self.topics.values().map(|e| e.subscribers.len()).sum()
    }

    pub fn buffered_len(
        &self,
        topic: &str,
    ) -> usize {
        self.topics.get(topic).map(|e| e.history.len()).unwrap_or(0)
    }

    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.keys().map(|k| k.to_string()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn ok_sink() -> Box<dyn Sink> {
        Box::new(|_: &Message| -> Result<(), SinkError> { Ok(()) })
    }

    #[test]
    fn test_validate_topic() {
        assert!(validate_topic("temp").is_ok());
        assert!(validate_topic("sensors/room-1.temp").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("a b").is_err());
        assert!(validate_topic("tab\there").is_err());
        assert!(validate_topic(&"x".repeat(MAX_TOPIC_LEN)).is_ok());
        assert!(validate_topic(&"x".repeat(MAX_TOPIC_LEN + 1)).is_err());
    }

    /// Тест проверяет, что идентификаторы уникальны в пределах таблицы.
    #[test]
    fn test_register_assigns_unique_ids() {
        let mut table = TopicTable::new(ReplayPolicy::Disabled);
        let a = table.register("temp", ok_sink());
        let b = table.register("temp", ok_sink());
        let c = table.register("news", ok_sink());

        assert_ne!(a.id(), b.id());
        assert_ne!(b.id(), c.id());
        assert_eq!(table.subscriber_count("temp"), 2);
        assert_eq!(table.total_subscribers(), 3);
    }

    /// Тест проверяет, что удаление последнего подписчика удаляет топик,
    /// а повторное удаление ничего не находит.
    #[test]
    fn test_deregister_prunes_empty_topic() {
        let mut table = TopicTable::new(ReplayPolicy::Disabled);
        let handle = table.register("temp", ok_sink());
        assert!(table.is_registered("temp", handle.id()));
        assert!(!table.is_registered("other", handle.id()));

        let removed = table.deregister("temp", handle.id()).unwrap();
        assert!(!table.is_registered("temp", handle.id()));
        assert!(!removed.is_alive());
        assert!(!table.contains("temp"));
        assert!(table.deregister("temp", handle.id()).is_none());
    }

    #[test]
    fn test_snapshot_skips_dead_handles() {
        let mut table = TopicTable::new(ReplayPolicy::Disabled);
        let a = table.register("temp", ok_sink());
        let b = table.register("temp", ok_sink());
        a.mark_dead();

        let snap = table.snapshot("temp");
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].id(), b.id());
        assert!(table.snapshot("missing").is_empty());
    }

    /// Тест проверяет сквозную монотонность номеров сообщений.
    #[test]
    fn test_sequence_is_monotonic_across_prune() {
        let mut table = TopicTable::new(ReplayPolicy::Disabled);
        let first = table.next_message("temp", Bytes::from_static(b"a"));
        let handle = table.register("temp", ok_sink());
        table.deregister("temp", handle.id());
        let second = table.next_message("temp", Bytes::from_static(b"b"));
        assert!(second.sequence > first.sequence);
    }

    /// Тест проверяет буферизацию, выдачу и очистку истории.
    #[test]
    fn test_buffer_and_replay_to() {
        let mut table = TopicTable::new(ReplayPolicy::drain_once(2));
        for text in ["a", "b", "c"] {
            let msg = table.next_message("orders", Bytes::from(text));
            table.buffer(msg);
        }
        assert_eq!(table.buffered_len("orders"), 2);

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let handle = table.register(
            "orders",
            Box::new(move |m: &Message| -> Result<(), SinkError> {
                sink_seen.lock().push(m.content.clone());
                Ok(())
            }),
        );

        let outcome = table.replay_to("orders", handle.id());
        assert_eq!(outcome.replayed, 2);
        assert!(outcome.failed.is_none());
        assert_eq!(
            *seen.lock(),
            vec![Bytes::from_static(b"b"), Bytes::from_static(b"c")]
        );
        assert_eq!(table.buffered_len("orders"), 0);
    }

    #[test]
    fn test_buffer_disabled_returns_message() {
        let mut table = TopicTable::new(ReplayPolicy::Disabled);
        let msg = table.next_message("x", Bytes::from_static(b"lost"));
        assert!(table.buffer(msg).is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn test_clear_marks_everything_dead() {
        let mut table = TopicTable::new(ReplayPolicy::default());
        let a = table.register("a", ok_sink());
        let b = table.register("b", ok_sink());

        assert_eq!(table.clear(), 2);
        assert!(!a.is_alive());
        assert!(!b.is_alive());
        assert!(table.is_empty());
    }
}
