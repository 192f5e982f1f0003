use herald_error::SinkError;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::Message;

/// Точка доставки сообщений одному подписчику.
///
/// Реализация обязана быть неблокирующей: брокер вызывает `deliver` под
/// блокировкой таблицы топиков. Ошибка означает, что подписчик мёртв и
/// будет удалён.
pub trait Sink: Send + Sync {
    fn deliver(
        &self,
        message: &Message,
    ) -> Result<(), SinkError>;

    /// Закрыт ли получатель на другой стороне.
    fn is_closed(&self) -> bool {
        false
    }
}

impl<F> Sink for F
where
    F: Fn(&Message) -> Result<(), SinkError> + Send + Sync,
{
    fn deliver(
        &self,
        message: &Message,
    ) -> Result<(), SinkError> {
        self(message)
    }
}

/// Sink на основе ограниченной очереди `tokio::sync::mpsc`.
///
/// Брокер только ставит сообщение в очередь; запись в транспорт делает
/// задача, обслуживающая соединение подписчика.
#[derive(Debug, Clone)]
pub struct QueueSink {
    tx: mpsc::Sender<Message>,
    capacity: usize,
}

impl QueueSink {
    /// Создаёт sink и парный приёмник.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, capacity }, rx)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Sink for QueueSink {
    fn deliver(
        &self,
        message: &Message,
    ) -> Result<(), SinkError> {
        self.tx.try_send(message.clone()).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Full {
                capacity: self.capacity,
            },
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
