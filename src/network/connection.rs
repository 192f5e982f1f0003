use std::{
    io::{self, ErrorKind},
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use dashmap::DashMap;
use herald_error::CodecError;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{tcp::OwnedWriteHalf, TcpStream},
    select,
    sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore},
    time::{sleep, sleep_until, timeout, Instant},
};
use tracing::{debug, error, info, trace, warn};

use super::{
    registry::ConnectionRegistry,
    session::{Flow, Session},
    state::{ConnectionInfo, ConnectionState},
};
use crate::{
    protocol::{render_push, trim_line_ending, DecoderChain, Response, DEFAULT_MAX_LINE_LENGTH},
    pubsub::{Broker, Message, QueueSink, DEFAULT_SUBSCRIBER_QUEUE_CAPACITY},
};

/// Конфигурация обработки соединений.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Максимальное кол-во одновременных соединений
    pub max_connections: usize,
    /// Максимальное кол-во соединений с одного IP
    pub max_connections_per_ip: usize,
    /// Таймаут простоя соединения без подписок
    pub idle_timeout: Duration,
    /// Таймаут записи ответа
    pub write_timeout: Duration,
    /// Максимальная длина строки запроса
    pub max_line_length: usize,
    /// Размер буфера для чтения
    pub read_buffer_size: usize,
    /// Ёмкость исходящей очереди соединения (общая для всех подписок)
    pub outbound_capacity: usize,
}

/// Почему соединение не принято.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    ShuttingDown,
    TooManyConnections,
    TooManyFromIp(IpAddr),
}

/// Менеджер соединений: лимиты, реестр и сигнал остановки.
#[derive(Debug)]
pub struct ConnectionManager {
    config: ConnectionConfig,
    broker: Broker,
    decoder: Arc<DecoderChain>,
    registry: Arc<ConnectionRegistry>,
    semaphore: Arc<Semaphore>,
    ip_connections: Arc<DashMap<IpAddr, usize>>,
    shutdown_tx: watch::Sender<bool>,
}

/// Разрешение на обслуживание соединения; освобождает лимиты при `Drop`.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
    ip: IpAddr,
    ip_connections: Arc<DashMap<IpAddr, usize>>,
}

/// Чем закончилось чтение строки.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineRead {
    /// В буфере строка (возможно, последняя и без `\n`).
    Line,
    Eof,
    TooLong,
}

/// Обработчик отдельного соединения.
pub struct ConnectionHandler {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: OwnedWriteHalf,
    addr: SocketAddr,
    info: Arc<ConnectionInfo>,
    config: ConnectionConfig,
    decoder: Arc<DecoderChain>,
    shutdown: watch::Receiver<bool>,
}

////////////////////////////////////////////////////////////////////////////////
// ConnectionManager
////////////////////////////////////////////////////////////////////////////////

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        broker: Broker,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_connections)),
            decoder: Arc::new(DecoderChain::standard(config.max_line_length)),
            config,
            broker,
            registry: Arc::new(ConnectionRegistry::new()),
            ip_connections: Arc::new(DashMap::new()),
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Текущее кол-во активных соединений.
    pub fn active_connections(&self) -> usize {
        self.registry.active_count()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Сообщает всем соединениям о завершении работы.
    pub fn shutdown(&self) {
        info!(
            active = self.active_connections(),
            "Initiating graceful shutdown for connection manager"
        );
        self.shutdown_tx.send_replace(true);
    }

    /// Ждёт закрытия всех соединений. `false`, если таймаут истёк.
    pub async fn wait_for_shutdown(
        &self,
        timeout_duration: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout_duration;

        while self.active_connections() > 0 {
            if Instant::now() >= deadline {
                warn!(
                    active = self.active_connections(),
                    "Shutdown timeout reached with active connections"
                );
                return false;
            }
            sleep(Duration::from_millis(20)).await;
        }

        info!("All connections closed gracefully");
        true
    }

    /// Проверяет лимиты и резервирует место под соединение.
    pub fn admit(
        &self,
        addr: SocketAddr,
    ) -> Result<ConnectionPermit, Rejection> {
        if self.is_shutting_down() {
            return Err(Rejection::ShuttingDown);
        }
        let permit = self
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| Rejection::TooManyConnections)?;

        let ip = addr.ip();
        {
            let mut count = self.ip_connections.entry(ip).or_insert(0);
            if *count >= self.config.max_connections_per_ip {
                return Err(Rejection::TooManyFromIp(ip));
            }
            *count += 1;
        }

        Ok(ConnectionPermit {
            _permit: permit,
            ip,
            ip_connections: self.ip_connections.clone(),
        })
    }

    /// Обслуживает соединение до его закрытия.
    pub async fn handle_connection(
        &self,
        mut socket: TcpStream,
        addr: SocketAddr,
    ) -> Result<()> {
        let permit = match self.admit(addr) {
            Ok(permit) => permit,
            Err(rejection) => {
                warn!(%addr, ?rejection, "Connection refused");
                let line = rejection.response().encode();
                let _ = timeout(self.config.write_timeout, socket.write_all(line.as_bytes())).await;
                return Ok(());
            }
        };

        let info = self.registry.register(addr);
        let connection_id = info.connection_id();
        info!(
            connection_id,
            %addr,
            active = self.active_connections(),
            "Connection established"
        );

        let (sink, outbound) = QueueSink::channel(self.config.outbound_capacity);
        let session = Session::new(self.broker.clone(), self.registry.clone(), info.clone(), sink);
        let handler = ConnectionHandler::new(
            socket,
            addr,
            info,
            self.config.clone(),
            self.decoder.clone(),
            self.shutdown_tx.subscribe(),
        );

        let result = handler.run(session, outbound).await;

        self.registry.unregister(connection_id);
        drop(permit);

        match &result {
            Ok(()) => debug!(connection_id, %addr, "Connection closed"),
            Err(e) => error!(connection_id, %addr, error = %e, "Connection closed with error"),
        }
        result
    }
}

impl Rejection {
    /// Строка ответа, отправляемая перед закрытием.
    pub fn response(&self) -> Response {
        match self {
            Self::ShuttingDown => Response::ShuttingDown,
            Self::TooManyConnections => Response::Error("Maximum connections limit reached".into()),
            Self::TooManyFromIp(_) => Response::Error("Too many connections from your address".into()),
        }
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.ip_connections
            .remove_if_mut(&self.ip, |_, count| {
                *count = count.saturating_sub(1);
                *count == 0
            });
    }
}

////////////////////////////////////////////////////////////////////////////////
// ConnectionHandler
////////////////////////////////////////////////////////////////////////////////

impl ConnectionHandler {
    fn new(
        socket: TcpStream,
        addr: SocketAddr,
        info: Arc<ConnectionInfo>,
        config: ConnectionConfig,
        decoder: Arc<DecoderChain>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (read_half, write_half) = socket.into_split();
        let reader = BufReader::with_capacity(config.read_buffer_size, read_half);

        Self {
            reader,
            writer: write_half,
            addr,
            info,
            config,
            decoder,
            shutdown,
        }
    }

    /// Основной цикл: запросы клиента, доставка сообщений подписок,
    /// таймаут простоя и сигнал остановки.
    async fn run(
        self,
        mut session: Session,
        mut outbound: mpsc::Receiver<Message>,
    ) -> Result<()> {
        let ConnectionHandler {
            mut reader,
            mut writer,
            addr,
            info,
            config,
            decoder,
            mut shutdown,
        } = self;

        let connection_id = info.connection_id();
        let mut line = Vec::with_capacity(256);
        let mut last_activity = Instant::now();

        loop {
            if let Err(e) = send_evictions(&mut session, &mut writer, config.write_timeout).await {
                warn!(connection_id, %addr, error = %e, "Failed to send eviction notice");
                break;
            }
            info.set_state(ConnectionState::Idle);
            let idle_deadline = last_activity + config.idle_timeout;

            select! {
                biased;

                _ = wait_for_shutdown(&mut shutdown) => {
                    info!(connection_id, %addr, "Received shutdown signal");
                    while let Ok(message) = outbound.try_recv() {
                        let push = render_push(&message, session.format());
                        if write_line(&mut writer, &push, config.write_timeout).await.is_err() {
                            break;
                        }
                    }
                    let _ = write_line(&mut writer, &Response::ShuttingDown.to_string(), config.write_timeout).await;
                    break;
                }

                Some(message) = outbound.recv() => {
                    let push = render_push(&message, session.format());
                    if let Err(e) = write_line(&mut writer, &push, config.write_timeout).await {
                        warn!(connection_id, %addr, error = %e, "Failed to deliver message");
                        break;
                    }
                    info.stats.record_push(push.len() + 1);
                    trace!(connection_id, topic = %message.topic, sequence = message.sequence, "Message pushed");
                }

                _ = sleep_until(idle_deadline), if session.subscription_count() == 0 => {
                    warn!(connection_id, %addr, "Idle timeout");
                    let _ = write_line(&mut writer, "-ERR Connection idle timeout", config.write_timeout).await;
                    break;
                }

                read = read_line(&mut reader, &mut line, config.max_line_length) => {
                    match read {
                        Ok(LineRead::Line) => {
                            last_activity = Instant::now();
                            info.touch();
                            info.set_state(ConnectionState::Processing);

                            if let Err(e) = send_evictions(&mut session, &mut writer, config.write_timeout).await {
                                warn!(connection_id, %addr, error = %e, "Failed to send eviction notice");
                                break;
                            }
                            let received = line.len();
                            let outcome = process_line(&decoder, &mut session, &line);
                            line.clear();

                            let Some((response, flow)) = outcome else {
                                continue;
                            };
                            let text = response.to_string();
                            if let Err(e) = write_line(&mut writer, &text, config.write_timeout).await {
                                error!(connection_id, %addr, error = %e, "Failed to send response");
                                break;
                            }
                            info.stats.record_request(received, text.len() + 1);

                            if flow == Flow::Close {
                                info!(connection_id, %addr, "Client sent QUIT, closing");
                                break;
                            }
                        }
                        Ok(LineRead::TooLong) => {
                            warn!(connection_id, %addr, "Request line too long, closing");
                            let err = CodecError::FrameTooLarge {
                                size: line.len(),
                                max: config.max_line_length,
                            };
                            let _ = write_line(&mut writer, &session.reject(&err).to_string(), config.write_timeout).await;
                            break;
                        }
                        Ok(LineRead::Eof) => {
                            debug!(connection_id, %addr, "Client closed connection");
                            break;
                        }
                        Err(e) if is_recoverable_error(&e) => {
                            debug!(connection_id, %addr, error = %e, "Connection dropped");
                            break;
                        }
                        Err(e) => {
                            error!(connection_id, %addr, error = %e, "Fatal read error");
                            info.set_state(ConnectionState::Closing);
                            session.close();
                            return Err(e.into());
                        }
                    }
                }
            }
        }

        info.set_state(ConnectionState::Closing);
        let released = session.close();
        if released > 0 {
            debug!(connection_id, released, "Subscriptions released");
        }
        graceful_close_writer(connection_id, writer).await
    }
}

/// Декодирует и выполняет строку запроса. Пустые строки пропускаются.
fn process_line(
    decoder: &DecoderChain,
    session: &mut Session,
    raw: &[u8],
) -> Option<(Response, Flow)> {
    if trim_line_ending(raw).iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    match decoder.decode_bytes(raw) {
        Ok(request) => Some(session.handle(request)),
        Err(e) => Some((session.reject(&e), Flow::Continue)),
    }
}

/// Читает строку не длиннее `max_line_length` (плюс `\r\n`).
///
/// Отмена безопасна: прочитанные байты остаются в `buf`, следующий вызов
/// продолжает строку.
async fn read_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_line_length: usize,
) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let limit = max_line_length + 2;
    let remaining = limit.saturating_sub(buf.len()) as u64;
    let n = (&mut *reader).take(remaining).read_until(b'\n', buf).await?;

    if buf.ends_with(b"\n") {
        return Ok(LineRead::Line);
    }
    if buf.len() >= limit {
        return Ok(LineRead::TooLong);
    }
    if n == 0 && buf.is_empty() {
        return Ok(LineRead::Eof);
    }
    // Последняя строка без перевода строки перед EOF.
    Ok(LineRead::Line)
}

/// Отправляет клиенту уведомления о подписках, снятых брокером.
async fn send_evictions(
    session: &mut Session,
    writer: &mut OwnedWriteHalf,
    write_timeout: Duration,
) -> Result<()> {
    for notice in session.reap_evicted() {
        write_line(writer, &notice.to_string(), write_timeout).await?;
    }
    Ok(())
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Пишет строку с `\n` с таймаутом.
async fn write_line(
    writer: &mut OwnedWriteHalf,
    line: &str,
    write_timeout: Duration,
) -> Result<()> {
    let mut frame = String::with_capacity(line.len() + 1);
    frame.push_str(line);
    frame.push('\n');

    timeout(write_timeout, writer.write_all(frame.as_bytes()))
        .await
        .context("Write timeout")?
        .context("Failed to write response")?;
    Ok(())
}

fn is_recoverable_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::TimedOut
    )
}

async fn graceful_close_writer(
    connection_id: u32,
    mut writer: OwnedWriteHalf,
) -> Result<()> {
    if let Err(e) = writer.shutdown().await {
        if e.kind() != ErrorKind::NotConnected {
            debug!(connection_id, error = %e, "Error during shutdown");
        }
    }
    debug!(connection_id, "Connection closed gracefully");
    Ok(())
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_connections_per_ip: 100,
            idle_timeout: Duration::from_secs(300),
            write_timeout: Duration::from_secs(10),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            read_buffer_size: 8192,
            outbound_capacity: DEFAULT_SUBSCRIBER_QUEUE_CAPACITY,
        }
    }
}
