use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::Message;

/// Ёмкость буфера истории по умолчанию (сообщений на топик).
pub const DEFAULT_REPLAY_CAPACITY: usize = 1024;

/// Политика буферизации сообщений, опубликованных в топик без подписчиков.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ReplayPolicy {
    /// Публикация без подписчиков теряется.
    Disabled,
    /// Сообщения копятся в кольцевом буфере (старые вытесняются) и
    /// один раз выдаются первому подписчику, после чего буфер очищается.
    DrainOnce { capacity: usize },
}

impl ReplayPolicy {
    pub fn drain_once(capacity: usize) -> Self {
        if capacity == 0 {
            Self::Disabled
        } else {
            Self::DrainOnce { capacity }
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::DrainOnce { .. })
    }

    /// Ёмкость буфера; `0` для выключенного replay.
    pub fn capacity(&self) -> usize {
        match self {
            Self::Disabled => 0,
            Self::DrainOnce { capacity } => *capacity,
        }
    }
}

impl Default for ReplayPolicy {
    fn default() -> Self {
        Self::DrainOnce {
            capacity: DEFAULT_REPLAY_CAPACITY,
        }
    }
}

/// Ограниченная история сообщений одного топика.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    messages: VecDeque<Message>,
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            capacity,
        }
    }

    /// Добавляет сообщение в конец буфера.
    ///
    /// Возвращает вытесненное сообщение, если буфер был полон. При нулевой
    /// ёмкости сообщение не сохраняется и возвращается обратно.
    pub fn push(
        &mut self,
        message: Message,
    ) -> Option<Message> {
        if self.capacity == 0 {
            return Some(message);
        }
        let evicted = if self.messages.len() >= self.capacity {
            self.messages.pop_front()
        } else {
            None
        };
        self.messages.push_back(message);
        evicted
    }

    /// Забирает всё содержимое буфера в порядке публикации.
    pub fn drain(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.messages).into()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(seq: u64) -> Message {
        Message::new("orders", format!("order-{seq}"), seq)
    }

    /// Тест проверяет, что drain отдаёт сообщения в порядке публикации
    /// и оставляет буфер пустым.
    #[test]
    fn test_drain_in_order_and_clears() {
        let mut buf = HistoryBuffer::new(8);
        for seq in 1..=3 {
            assert!(buf.push(msg(seq)).is_none());
        }

        let drained: Vec<u64> = buf.drain().iter().map(|m| m.sequence).collect();
        assert_eq!(drained, vec![1, 2, 3]);
        assert!(buf.is_empty());
        assert!(buf.drain().is_empty());
    }

    /// Тест проверяет вытеснение самого старого сообщения при переполнении.
    #[test]
    fn test_overflow_evicts_oldest() {
        let mut buf = HistoryBuffer::new(2);
        buf.push(msg(1));
        buf.push(msg(2));
        let evicted = buf.push(msg(3)).expect("oldest must be evicted");

        assert_eq!(evicted.sequence, 1);
        assert_eq!(buf.len(), 2);
        let seqs: Vec<u64> = buf.iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut buf = HistoryBuffer::new(0);
        let back = buf.push(msg(1));
        assert_eq!(back.map(|m| m.sequence), Some(1));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_policy_helpers() {
        assert!(ReplayPolicy::default().is_enabled());
        assert_eq!(ReplayPolicy::default().capacity(), DEFAULT_REPLAY_CAPACITY);
        assert_eq!(ReplayPolicy::drain_once(0), ReplayPolicy::Disabled);
        assert_eq!(ReplayPolicy::Disabled.capacity(), 0);
        assert!(!ReplayPolicy::Disabled.is_enabled());
    }
}
