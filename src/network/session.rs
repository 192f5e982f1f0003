use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use herald_error::{BrokerError, ErrorExt};
use serde_json::json;
use tracing::{debug, info, warn};

use super::{registry::ConnectionRegistry, state::ConnectionInfo};
use crate::{
    protocol::{OutputFormat, Request, Response},
    pubsub::{Broker, QueueSink, SubscriberId, SubscriptionGuard},
};

/// Продолжать ли обслуживание соединения после ответа.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Состояние протокола одного соединения.
///
/// Все подписки соединения пишут в одну исходящую очередь. Guard'ы
/// подписок хранятся здесь: при закрытии сессии они удаляются из брокера.
pub struct Session {
    broker: Broker,
    registry: Arc<ConnectionRegistry>,
    info: Arc<ConnectionInfo>,
    outbound: QueueSink,
    format: OutputFormat,
    subscriptions: HashMap<SubscriberId, SubscriptionGuard>,
}

impl Session {
    pub fn new(
        broker: Broker,
        registry: Arc<ConnectionRegistry>,
        info: Arc<ConnectionInfo>,
        outbound: QueueSink,
    ) -> Self {
        Self {
            broker,
            registry,
            info,
            outbound,
            format: OutputFormat::default(),
            subscriptions: HashMap::new(),
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Забывает подписки, которые брокер снял сам (переполнение исходящей
    /// очереди, сбой replay), и возвращает уведомления для клиента.
    ///
    /// Во время остановки брокера ничего не делает: подписки снимаются
    /// при закрытии соединения.
    pub fn reap_evicted(&mut self) -> Vec<Response> {
        if self.subscriptions.is_empty() || !self.broker.is_accepting() {
            return Vec::new();
        }
        let evicted: Vec<SubscriberId> = self
            .subscriptions
            .iter()
            .filter(|(_, guard)| !guard.is_registered())
            .map(|(sid, _)| *sid)
            .collect();
        if evicted.is_empty() {
            return Vec::new();
        }

        let mut notices = Vec::with_capacity(evicted.len());
        for id in evicted {
            if let Some(guard) = self.subscriptions.remove(&id) {
                warn!(
                    connection_id = self.info.connection_id(),
                    topic = guard.topic(),
                    %id,
                    "Subscription evicted by broker"
                );
                notices.push(Response::Evicted {
                    topic: guard.topic().to_string(),
                    id,
                });
            }
        }
        self.info.stats.set_subscriptions(self.subscriptions.len());
        notices
    }

    /// Выполняет запрос и возвращает ответ для клиента.
    pub fn handle(
        &mut self,
        request: Request,
    ) -> (Response, Flow) {
        debug!(
            connection_id = self.info.connection_id(),
            command = request.name(),
            "Handling request"
        );

        let response = match request {
            Request::Publish { topic, content } => self.publish(&topic, content),
            Request::Subscribe { topic } => self.subscribe(&topic),
            Request::Unsubscribe { topic, id } => match self.unsubscribe(&topic, id) {
                Ok(removed) => Response::Unsubscribed { removed },
                Err(e) => self.reject(&e),
            },
            Request::Format(format) => {
                self.format = format;
                self.info.set_format(format);
                Response::FormatSet(format)
            }
            Request::Stats => Response::Stats(self.stats_json()),
            Request::Ping => Response::Pong,
            Request::Quit => return (Response::Bye, Flow::Close),
        };
        (response, Flow::Continue)
    }

    /// Ответ `-ERR` для ошибки запроса; ошибка запоминается для `STATS`.
    pub fn reject(
        &self,
        err: &dyn ErrorExt,
    ) -> Response {
        debug!(
            connection_id = self.info.connection_id(),
            error = %err.log_message(),
            tags = ?err.metrics_tags(),
            "Request failed"
        );
        self.info.record_failure(err);
        Response::from_error(err)
    }

    fn publish(
        &self,
        topic: &str,
        content: Bytes,
    ) -> Response {
        match self.broker.publish(topic, content) {
            Ok(ack) => Response::Published {
                sequence: ack.sequence,
            },
            Err(e) => self.reject(&e),
        }
    }

    fn subscribe(
        &mut self,
        topic: &str,
    ) -> Response {
        let sink = Box::new(self.outbound.clone());
        match self.broker.subscribe_with_sink(topic, sink) {
            Ok(guard) => {
                let id = guard.id();
                self.subscriptions.insert(id, guard);
                self.info.stats.set_subscriptions(self.subscriptions.len());
                info!(
                    connection_id = self.info.connection_id(),
                    topic,
                    %id,
                    "Connection subscribed"
                );
                Response::Subscribed {
                    topic: topic.to_string(),
                    id,
                }
            }
            Err(e) => self.reject(&e),
        }
    }

    /// Снимает подписки соединения на топик: одну по `id` или все.
    fn unsubscribe(
        &mut self,
        topic: &str,
        id: Option<SubscriberId>,
    ) -> Result<usize, BrokerError> {
        let owned: Vec<SubscriberId> = self
            .subscriptions
            .iter()
            .filter(|(sid, guard)| guard.topic() == topic && id.is_none_or(|want| want == **sid))
            .map(|(sid, _)| *sid)
            .collect();

        if owned.is_empty() {
            if !self.broker.is_accepting() {
                return Err(BrokerError::EngineUnavailable);
            }
            return Err(BrokerError::UnknownTopic {
                topic: topic.to_string(),
            });
        }

        let mut removed = 0;
        for sid in owned {
            let outcome = self.broker.unsubscribe(topic, sid)?;
            self.subscriptions.remove(&sid);
            if outcome.is_removed() {
                removed += 1;
            }
        }
        self.info.stats.set_subscriptions(self.subscriptions.len());

        info!(
            connection_id = self.info.connection_id(),
            topic,
            removed,
            "Connection unsubscribed"
        );
        if removed == 0 {
            // Подписчики уже удалены брокером (например, переполнение очереди).
            return Err(BrokerError::UnknownTopic {
                topic: topic.to_string(),
            });
        }
        Ok(removed)
    }

    fn stats_json(&self) -> String {
        json!({
            "broker": self.broker.metrics(),
            "connections": self.registry.global_stats(),
            "connection": self.info.snapshot(),
        })
        .to_string()
    }

    /// Снимает все подписки соединения. Возвращает их количество.
    pub fn close(&mut self) -> usize {
        let count = self.subscriptions.len();
        self.subscriptions.clear();
        self.info.stats.set_subscriptions(0);
        count
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
