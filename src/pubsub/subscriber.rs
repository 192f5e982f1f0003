use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use herald_error::SinkError;
use tokio::sync::{
    mpsc::{self, error::TryRecvError},
    watch,
};

use super::{LifecycleState, Message, Sink, SubscriptionGuard, Unsubscribed};

/// Идентификатор подписчика, уникальный в пределах брокера.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for SubscriberId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Зарегистрированный подписчик: идентификатор, топик и sink.
///
/// Флаг `alive` сбрасывается ровно один раз, при удалении из таблицы.
pub struct SubscriberHandle {
    id: SubscriberId,
    topic: Arc<str>,
    sink: Box<dyn Sink>,
    alive: AtomicBool,
}

impl SubscriberHandle {
    pub fn new(
        id: SubscriberId,
        topic: Arc<str>,
        sink: Box<dyn Sink>,
    ) -> Self {
        Self {
            id,
            topic,
            sink,
            alive: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Доставляет сообщение в sink. Мёртвому подписчику не доставляется.
    pub fn deliver(
        &self,
        message: &Message,
    ) -> Result<(), SinkError> {
        if !self.is_alive() {
            return Err(SinkError::Closed);
        }
        self.sink.deliver(message)
    }

    /// Помечает подписчика мёртвым. Возвращает `true` только при первом
    /// вызове.
    pub(crate) fn mark_dead(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }
}

impl fmt::Debug for SubscriberHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SubscriberHandle")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

/// Подписка внутрипроцессного потребителя.
///
/// Получает сообщения топика из собственной очереди. Отписка происходит
/// при `Drop` или явно через [`Subscription::unsubscribe`]. После полной
/// остановки брокера `recv` отдаёт остаток очереди и затем `None`.
pub struct Subscription {
    guard: SubscriptionGuard,
    receiver: mpsc::Receiver<Message>,
    lifecycle: watch::Receiver<LifecycleState>,
}

impl Subscription {
    pub(crate) fn new(
        guard: SubscriptionGuard,
        receiver: mpsc::Receiver<Message>,
        lifecycle: watch::Receiver<LifecycleState>,
    ) -> Self {
        Self {
            guard,
            receiver,
            lifecycle,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.guard.id()
    }

    pub fn topic(&self) -> &str {
        self.guard.topic()
    }

    /// Асинхронно ожидает следующее сообщение.
    ///
    /// Возвращает `None`, когда подписка удалена брокером (переполнение
    /// очереди, остановка) и очередь пуста.
    pub async fn recv(&mut self) -> Option<Message> {
        tokio::select! {
            biased;
            message = self.receiver.recv() => return message,
            _ = wait_stopped(&mut self.lifecycle) => {}
        }
        self.receiver.try_recv().ok()
    }

    /// Пытается получить сообщение без ожидания.
    pub fn try_recv(&mut self) -> Result<Message, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Количество сообщений, ожидающих в очереди.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Явная отписка. Повторное удаление невозможно: подписка поглощается.
    pub fn unsubscribe(self) -> Unsubscribed {
        let Subscription { guard, .. } = self;
        guard.release()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id())
            .field("topic", &self.topic())
            .field("pending", &self.pending())
            .finish()
    }
}

async fn wait_stopped(rx: &mut watch::Receiver<LifecycleState>) {
    if rx
        .wait_for(|state| *state == LifecycleState::Stopped)
        .await
        .is_err()
    {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_id_display() {
        let id = SubscriberId::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(id.as_u64(), 42);
        assert_eq!(SubscriberId::from(42), id);
    }

    /// Тест проверяет, что mark_dead срабатывает только один раз и
    /// блокирует дальнейшую доставку.
    #[test]
    fn test_handle_mark_dead_once() {
        let sink = |_: &Message| -> Result<(), SinkError> { Ok(()) };
        let handle = SubscriberHandle::new(SubscriberId::new(1), Arc::from("t"), Box::new(sink));
        let msg = Message::new("t", "x", 1);

        assert!(handle.deliver(&msg).is_ok());
        assert!(handle.mark_dead());
        assert!(!handle.mark_dead());
        assert!(!handle.is_alive());
        assert_eq!(handle.deliver(&msg), Err(SinkError::Closed));
    }

    #[test]
    fn test_handle_debug_omits_sink() {
        let sink = |_: &Message| -> Result<(), SinkError> { Ok(()) };
        let handle = SubscriberHandle::new(SubscriberId::new(3), Arc::from("news"), Box::new(sink));
        let dbg = format!("{handle:?}");
        assert!(dbg.contains("news"));
        assert!(dbg.contains("alive: true"));
    }
}
