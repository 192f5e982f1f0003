use std::{
    net::SocketAddr,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use herald_error::{ErrorExt, ErrorResponse};
use parking_lot::RwLock;
use serde::Serialize;

use crate::protocol::OutputFormat;

/// Состояние соединения в его жизненном цикле.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Только что принято
    New,
    /// Обрабатывает запрос
    Processing,
    /// Ждёт запрос или доставляет сообщения подписок
    Idle,
    /// Закрывается
    Closing,
}

/// Изменяемые метаданные соединения.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    pub connection_id: u32,
    pub client_addr: SocketAddr,
    pub connected_at: Instant,
    pub last_activity: Instant,
    pub state: ConnectionState,
    pub format: OutputFormat,
    /// Последняя ошибка, отправленная клиенту
    pub last_error: Option<ErrorResponse>,
}

/// Счётчики соединения, обновляемые без блокировок.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    requests: AtomicU64,
    pushes: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    errors: AtomicU64,
    subscriptions: AtomicUsize,
}

/// Снимок соединения для `STATS` и логов.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub connection_id: u32,
    pub client_addr: String,
    pub state: ConnectionState,
    pub format: OutputFormat,
    pub uptime_secs: u64,
    pub idle_secs: u64,
    pub requests: u64,
    pub pushes: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub errors: u64,
    pub subscriptions: usize,
    pub last_error: Option<ErrorResponse>,
}

/// Информация о соединении, разделяемая с реестром.
#[derive(Debug)]
pub struct ConnectionInfo {
    metadata: RwLock<ConnectionMetadata>,
    pub stats: ConnectionStats,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ConnectionMetadata {
    pub fn new(
        connection_id: u32,
        client_addr: SocketAddr,
    ) -> Self {
        let now = Instant::now();
        Self {
            connection_id,
            client_addr,
            connected_at: now,
            last_activity: now,
            state: ConnectionState::New,
            format: OutputFormat::default(),
            last_error: None,
        }
    }

    /// Время с момента подключения.
    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Время с последней активности (чтение запроса или доставка).
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

impl ConnectionStats {
    pub fn record_request(
        &self,
        bytes_received: usize,
        bytes_sent: usize,
    ) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(bytes_received as u64, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes_sent as u64, Ordering::Relaxed);
    }

    pub fn record_push(
        &self,
        bytes_sent: usize,
    ) {
        self.pushes.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes_sent as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_subscriptions(
        &self,
        count: usize,
    ) {
        self.subscriptions.store(count, Ordering::Relaxed);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn pushes(&self) -> u64 {
        self.pushes.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::Relaxed)
    }
}

impl ConnectionInfo {
    pub fn new(
        connection_id: u32,
        client_addr: SocketAddr,
    ) -> Self {
        Self {
            metadata: RwLock::new(ConnectionMetadata::new(connection_id, client_addr)),
            stats: ConnectionStats::default(),
        }
    }

    pub fn connection_id(&self) -> u32 {
        self.metadata.read().connection_id
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.metadata.read().client_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.metadata.read().state
    }

    pub fn set_state(
        &self,
        state: ConnectionState,
    ) {
        self.metadata.write().state = state;
    }

    pub fn set_format(
        &self,
        format: OutputFormat,
    ) {
        self.metadata.write().format = format;
    }

    /// Учитывает ошибку, отправленную клиенту.
    pub fn record_failure(
        &self,
        err: &dyn ErrorExt,
    ) {
        self.stats.record_error();
        self.metadata.write().last_error = Some(ErrorResponse::from_error(err));
    }

    pub fn touch(&self) {
        self.metadata.write().last_activity = Instant::now();
    }

    pub fn idle_time(&self) -> Duration {
        self.metadata.read().idle_time()
    }

    /// Согласованный снимок метаданных и счётчиков.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        let meta = self.metadata.read();
        ConnectionSnapshot {
            connection_id: meta.connection_id,
            client_addr: meta.client_addr.to_string(),
            state: meta.state,
            format: meta.format,
            uptime_secs: meta.uptime().as_secs(),
            idle_secs: meta.idle_time().as_secs(),
            requests: self.stats.requests(),
            pushes: self.stats.pushes(),
            bytes_sent: self.stats.bytes_sent(),
            bytes_received: self.stats.bytes_received(),
            errors: self.stats.errors(),
            subscriptions: self.stats.subscriptions(),
            last_error: meta.last_error.clone(),
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Processing => write!(f, "processing"),
            Self::Idle => write!(f, "idle"),
            Self::Closing => write!(f, "closing"),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
