use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use herald_error::BrokerError;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{
    validate_topic, BrokerMetrics, Lifecycle, LifecycleState, MetricsSnapshot, OperationGuard,
    QueueSink, ReplayPolicy, Sink, SubscriberId, Subscription, SubscriptionGuard, TopicTable,
};

/// Ёмкость очереди подписчика по умолчанию.
pub const DEFAULT_SUBSCRIBER_QUEUE_CAPACITY: usize = 1024;

/// Параметры брокера.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub replay: ReplayPolicy,
    /// Ёмкость очереди, создаваемой [`Broker::subscribe`].
    pub subscriber_queue_capacity: usize,
}

impl BrokerConfig {
    /// Ёмкость очереди нового подписчика: вмещает всю историю топика.
    pub fn queue_capacity(&self) -> usize {
        self.subscriber_queue_capacity
            .max(self.replay.capacity())
            .max(1)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            replay: ReplayPolicy::default(),
            subscriber_queue_capacity: DEFAULT_SUBSCRIBER_QUEUE_CAPACITY,
        }
    }
}

/// Что произошло с опубликованным сообщением.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Сообщение передано живым подписчикам; `failed` из них удалены.
    Delivered { attempted: usize, failed: usize },
    /// Подписчиков нет, сообщение сохранено для replay.
    Buffered { evicted: bool },
    /// Подписчиков нет, replay выключен.
    Dropped,
}

/// Подтверждение публикации.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub topic: Arc<str>,
    pub sequence: u64,
    pub outcome: PublishOutcome,
}

impl PublishAck {
    /// Сколько подписчиков получили сообщение.
    pub fn delivered(&self) -> usize {
        match self.outcome {
            PublishOutcome::Delivered { attempted, failed } => attempted - failed,
            _ => 0,
        }
    }
}

/// Результат отписки.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsubscribed {
    Removed,
    NotFound,
}

impl Unsubscribed {
    pub fn is_removed(&self) -> bool {
        matches!(self, Self::Removed)
    }

    /// `NotFound` превращается в [`BrokerError::UnknownTopic`].
    pub fn into_result(
        self,
        topic: &str,
    ) -> Result<(), BrokerError> {
        match self {
            Self::Removed => Ok(()),
            Self::NotFound => Err(BrokerError::UnknownTopic {
                topic: topic.to_string(),
            }),
        }
    }
}

/// Итог остановки брокера.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Все операции в полёте завершились до таймаута.
    pub drained: bool,
    /// Сколько подписчиков было закрыто.
    pub closed_subscribers: usize,
}

/// Общее состояние брокера, разделяемое с guard'ами подписок.
#[derive(Debug)]
pub(crate) struct BrokerShared {
    pub(crate) table: Mutex<TopicTable>,
    pub(crate) config: BrokerConfig,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) metrics: BrokerMetrics,
}

impl BrokerShared {
    /// Удаляет подписчика из таблицы. `true`, если он там был.
    pub(crate) fn remove_subscriber(
        &self,
        topic: &str,
        id: SubscriberId,
    ) -> bool {
        let removed = self.table.lock().deregister(topic, id).is_some();
        if removed {
            self.metrics.record_unsubscribed();
            debug!(topic, %id, "Subscriber removed");
        }
        removed
    }

    pub(crate) fn is_registered(
        &self,
        topic: &str,
        id: SubscriberId,
    ) -> bool {
        self.table.lock().is_registered(topic, id)
    }
}

/// Брокер Pub/Sub сообщений.
///
/// Вся таблица топиков защищена одним мьютексом: publish, subscribe и
/// unsubscribe атомарны относительно друг друга, поэтому подписчик видит
/// сообщения топика строго в порядке публикации и без дублей. Доставка
/// идёт через неблокирующие [`Sink`], так что блокировка держится только
/// на время постановки в очереди.
///
/// Клонирование дёшево: клоны разделяют одно состояние.
#[derive(Debug, Clone)]
pub struct Broker {
    shared: Arc<BrokerShared>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        let table = TopicTable::new(config.replay);
        Self {
            shared: Arc::new(BrokerShared {
                table: Mutex::new(table),
                config,
                lifecycle: Lifecycle::new(),
                metrics: BrokerMetrics::default(),
            }),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.shared.config
    }

    ////// Операции //////

    /// Публикует сообщение в топик.
    ///
    /// Сбой sink отдельного подписчика не влияет на остальных и не
    /// возвращается вызывающему: подписчик удаляется, счётчики растут.
    pub fn publish(
        &self,
        topic: &str,
        content: impl Into<Bytes>,
    ) -> Result<PublishAck, BrokerError> {
        let _op = self.enter()?;
        validate_topic(topic)?;

        let shared = &self.shared;
        let mut table = shared.table.lock();
        let message = table.next_message(topic, content.into());
        let sequence = message.sequence;
        let topic_name = message.topic.clone();
        let targets = table.snapshot(topic);

        let outcome = if targets.is_empty() {
            if shared.config.replay.is_enabled() {
                let evicted = table.buffer(message).is_some();
                shared.metrics.record_buffered();
                if evicted {
                    shared.metrics.record_evicted();
                }
                PublishOutcome::Buffered { evicted }
            } else {
                shared.metrics.record_dropped();
                PublishOutcome::Dropped
            }
        } else {
            let mut failed = Vec::new();
            for handle in &targets {
                if let Err(err) = handle.deliver(&message) {
                    warn!(topic, id = %handle.id(), error = %err, "Delivery failed, dropping subscriber");
                    shared.metrics.record_delivery_failure();
                    failed.push(handle.id());
                }
            }
            for id in &failed {
                if table.deregister(topic, *id).is_some() {
                    shared.metrics.record_unsubscribed();
                }
            }
            shared.metrics.record_delivered(targets.len() - failed.len());
            PublishOutcome::Delivered {
                attempted: targets.len(),
                failed: failed.len(),
            }
        };
        drop(table);

        shared.metrics.record_published();
        debug!(topic, sequence, ?outcome, "Message published");

        Ok(PublishAck {
            topic: topic_name,
            sequence,
            outcome,
        })
    }

    /// Подписывает внутрипроцессного потребителя.
    ///
    /// Очередь подписки вмещает всю буферизованную историю, так что
    /// первый подписчик получает её целиком.
    pub fn subscribe(
        &self,
        topic: &str,
    ) -> Result<Subscription, BrokerError> {
        let (sink, receiver) = QueueSink::channel(self.shared.config.queue_capacity());
        let guard = self.subscribe_with_sink(topic, Box::new(sink))?;
        Ok(Subscription::new(
            guard,
            receiver,
            self.shared.lifecycle.watch(),
        ))
    }

    /// Регистрирует произвольный sink.
    ///
    /// Регистрация и выдача истории происходят под одной блокировкой:
    /// публикация не может вклиниться между ними. Если sink не принял
    /// историю, подписчик сразу удаляется, а guard станет пустым.
    pub fn subscribe_with_sink(
        &self,
        topic: &str,
        sink: Box<dyn Sink>,
    ) -> Result<SubscriptionGuard, BrokerError> {
        let _op = self.enter()?;
        validate_topic(topic)?;

        let shared = &self.shared;
        let mut table = shared.table.lock();
        let handle = table.register(topic, sink);
        let id = handle.id();
        shared.metrics.record_subscribed();

        let replay = table.replay_to(topic, id);
        shared.metrics.record_replayed(replay.replayed);
        if let Some(err) = &replay.failed {
            warn!(topic, %id, error = %err, "Replay failed, dropping subscriber");
            shared.metrics.record_delivery_failure();
            if table.deregister(topic, id).is_some() {
                shared.metrics.record_unsubscribed();
            }
        }
        drop(table);

        info!(topic, %id, replayed = replay.replayed, "Subscriber registered");
        Ok(SubscriptionGuard::new(
            shared.clone(),
            Arc::from(handle.topic()),
            id,
        ))
    }

    /// Явная отписка по идентификатору.
    pub fn unsubscribe(
        &self,
        topic: &str,
        id: SubscriberId,
    ) -> Result<Unsubscribed, BrokerError> {
        let _op = self.enter()?;
        if self.shared.remove_subscriber(topic, id) {
            Ok(Unsubscribed::Removed)
        } else {
            debug!(topic, %id, "Unsubscribe for unknown subscriber");
            Ok(Unsubscribed::NotFound)
        }
    }

    fn enter(&self) -> Result<OperationGuard<'_>, BrokerError> {
        self.shared.lifecycle.enter().inspect_err(|_| {
            self.shared.metrics.record_rejected();
        })
    }

    ////// Остановка //////

    pub fn state(&self) -> LifecycleState {
        self.shared.lifecycle.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.shared.lifecycle.watch()
    }

    pub fn is_accepting(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Перестаёт принимать новые операции. Идемпотентно.
    pub fn begin_shutdown(&self) -> bool {
        let started = self.shared.lifecycle.begin_shutdown();
        if started {
            info!("Broker is draining");
        }
        started
    }

    /// Полная остановка: ждёт операции в полёте (не дольше `timeout`),
    /// затем закрывает всех подписчиков и очищает историю.
    pub async fn shutdown(
        &self,
        timeout: Duration,
    ) -> ShutdownReport {
        self.begin_shutdown();
        let drained = self.shared.lifecycle.wait_idle(timeout).await;
        if !drained {
            warn!(
                in_flight = self.shared.lifecycle.in_flight(),
                "Shutdown timeout reached with operations still in flight"
            );
        }

        let closed_subscribers = self.shared.table.lock().clear();
        self.shared.lifecycle.mark_stopped();
        info!(closed_subscribers, "Broker stopped");

        ShutdownReport {
            drained,
            closed_subscribers,
        }
    }

    ////// Интроспекция //////

    pub fn subscriber_count(
        &self,
        topic: &str,
    ) -> usize {
        self.shared.table.lock().subscriber_count(topic)
    }

    pub fn buffered_len(
        &self,
        topic: &str,
    ) -> usize {
        self.shared.table.lock().buffered_len(topic)
    }

    /// Зарегистрирован ли ещё подписчик. `false` после отписки и после
    /// удаления из-за сбоя доставки.
    pub fn is_registered(
        &self,
        topic: &str,
        id: SubscriberId,
    ) -> bool {
        self.shared.is_registered(topic, id)
    }

    /// Отсортированный список активных топиков.
    pub fn topics(&self) -> Vec<String> {
        self.shared.table.lock().topics()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let (topics, subscribers) = {
            let table = self.shared.table.lock();
            (table.len(), table.total_subscribers())
        };
        self.shared.metrics.snapshot(topics, subscribers)
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}
