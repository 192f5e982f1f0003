use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use herald_error::BrokerError;
use tokio::sync::{watch, Notify};

use super::{broker::BrokerShared, SubscriberId, Unsubscribed};

/// Состояние жизненного цикла брокера.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Принимает publish / subscribe / unsubscribe.
    Running,
    /// Новые операции отклоняются, текущие завершаются.
    Draining,
    /// Все подписки закрыты.
    Stopped,
}

/// Координатор остановки: учитывает операции в полёте и рассылает
/// изменения состояния.
pub struct Lifecycle {
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    state: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Running);
        Self {
            accepting: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            state,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Начинает операцию. Счётчик увеличивается до проверки состояния,
    /// поэтому `wait_idle` не пропустит операцию, прошедшую проверку.
    pub fn enter(&self) -> Result<OperationGuard<'_>, BrokerError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if !self.accepting.load(Ordering::SeqCst) {
            self.leave();
            return Err(BrokerError::EngineUnavailable);
        }
        Ok(OperationGuard { lifecycle: self })
    }

    fn leave(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Переводит в `Draining`. Возвращает `false`, если остановка уже шла.
    pub fn begin_shutdown(&self) -> bool {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.state.send_replace(LifecycleState::Draining);
        true
    }

    /// Ждёт завершения всех операций в полёте. `false` при таймауте.
    pub async fn wait_idle(
        &self,
        timeout: Duration,
    ) -> bool {
        let wait = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    pub fn mark_stopped(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.state.send_replace(LifecycleState::Stopped);
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// RAII-маркер операции в полёте.
#[derive(Debug)]
pub struct OperationGuard<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.lifecycle.leave();
    }
}

/// Связывает время жизни потребителя с его регистрацией в брокере.
///
/// При `Drop` подписчик удаляется из таблицы (если ещё там). Используется
/// и внутрипроцессными подписками, и сетевыми соединениями.
pub struct SubscriptionGuard {
    shared: Arc<BrokerShared>,
    topic: Arc<str>,
    id: SubscriberId,
    released: bool,
}

impl SubscriptionGuard {
    pub(crate) fn new(
        shared: Arc<BrokerShared>,
        topic: Arc<str>,
        id: SubscriberId,
    ) -> Self {
        Self {
            shared,
            topic,
            id,
            released: false,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Подписчик ещё в таблице брокера. Сбой доставки удаляет его без
    /// участия владельца guard'а.
    pub fn is_registered(&self) -> bool {
        self.shared.is_registered(&self.topic, self.id)
    }

    /// Удаляет подписчика сейчас и сообщает, был ли он ещё в таблице.
    pub fn release(mut self) -> Unsubscribed {
        self.released = true;
        if self.shared.remove_subscriber(&self.topic, self.id) {
            Unsubscribed::Removed
        } else {
            Unsubscribed::NotFound
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if !self.released {
            self.shared.remove_subscriber(&self.topic, self.id);
        }
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}
