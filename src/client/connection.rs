use std::{collections::VecDeque, net::SocketAddr, time::Duration};

use herald_error::{ClientError, HeraldResult as ClientResult, ResultExt};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    time::timeout,
};
use tracing::{debug, trace, warn};

use crate::protocol::EVICTED_PREFIX;

/// Клиентское соединение с сервером Herald.
///
/// Обменивается строками. Доставленные сообщения, пришедшие во время
/// ожидания ответа, складываются в очередь и не теряются.
pub struct ClientConnection {
    addr: SocketAddr,
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    read_timeout: Duration,
    write_timeout: Duration,
    partial: Vec<u8>,
    pushes: VecDeque<String>,
}

/// Ответ сервера начинается с `+` или `-`; всё остальное доставка.
pub fn is_response_line(line: &str) -> bool {
    line.starts_with('+') || line.starts_with('-')
}

/// Уведомление о снятой подписке приходит без запроса и ответом не является.
pub fn is_eviction_notice(line: &str) -> bool {
    line.starts_with(EVICTED_PREFIX)
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ClientConnection {
    pub async fn connect(
        addr: SocketAddr,
        connect_timeout: Duration,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> ClientResult<Self> {
        debug!(%addr, "Connecting");

        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::ConnectionTimeout)?
            .map_err(|e| ClientError::ConnectionFailed {
                address: addr.to_string(),
                reason: e.to_string(),
            })?;
        debug!(%addr, "Connection established");

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            addr,
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            read_timeout,
            write_timeout,
            partial: Vec::new(),
            pushes: VecDeque::new(),
        })
    }

    /// Отправляет одну строку запроса.
    pub async fn send_line(
        &mut self,
        line: &str,
    ) -> ClientResult<()> {
        trace!(line, "Sending request");

        let write_timeout = self.write_timeout;
        let writer = &mut self.writer;
        let write = async move {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        };
        timeout(write_timeout, write)
            .await
            .map_err(|_| ClientError::ResponseTimeout)?
            .context("Failed to send request")?;
        Ok(())
    }

    /// Читает строку без завершающего перевода строки. `None` означает
    /// ожидание без таймаута. Недочитанная по таймауту строка сохраняется
    /// до следующего вызова.
    async fn read_line(
        &mut self,
        wait: Option<Duration>,
    ) -> ClientResult<String> {
        let read = self.reader.read_until(b'\n', &mut self.partial);
        let n = match wait {
            Some(limit) => timeout(limit, read)
                .await
                .map_err(|_| ClientError::ResponseTimeout)?,
            None => read.await,
        }
        .context("Failed to read from server")?;

        if n == 0 && self.partial.is_empty() {
            return Err(ClientError::ConnectionClosed.into());
        }
        let raw = std::mem::take(&mut self.partial);
        let line = String::from_utf8_lossy(&raw);
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Отправляет запрос и ждёт строку ответа, откладывая доставки.
    pub async fn request(
        &mut self,
        line: &str,
    ) -> ClientResult<String> {
        self.send_line(line).await?;
        loop {
            let received = self.read_line(Some(self.read_timeout)).await?;
            if is_eviction_notice(&received) {
                warn!(notice = %received, "Subscription evicted by server");
            } else if is_response_line(&received) {
                trace!(response = %received, "Response received");
                return Ok(received);
            }
            self.pushes.push_back(received);
        }
    }

    /// Следующая строка доставки: сначала из очереди, затем из сокета.
    pub async fn next_push(
        &mut self,
        wait: Option<Duration>,
    ) -> ClientResult<String> {
        let line = match self.pushes.pop_front() {
            Some(line) => line,
            None => self.read_line(wait).await?,
        };
        if is_response_line(&line) {
            // Например, `-ERR Server shutting down`.
            return Err(response_error(&line));
        }
        Ok(line)
    }

    pub fn pending_pushes(&self) -> usize {
        self.pushes.len()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn close(mut self) -> ClientResult<()> {
        debug!(addr = %self.addr, "Closing connection");
        self.writer
            .shutdown()
            .await
            .context("Failed to shutdown connection")?;
        Ok(())
    }
}

/// Превращает строку `-ERR ...` (или неожиданный ответ) в ошибку клиента.
pub fn response_error(line: &str) -> herald_error::StackError {
    match line.strip_prefix("-ERR ") {
        Some(message) => ClientError::ServerError {
            message: message.to_string(),
        }
        .into(),
        None => ClientError::UnexpectedResponse {
            response: line.to_string(),
        }
        .into(),
    }
}

#[cfg(test)]
mod tests {
    use herald_error::StatusCode;

    use super::*;

    #[test]
    fn test_is_response_line() {
        assert!(is_response_line("+OK Subscribed temp 1"));
        assert!(is_response_line("-ERR Topic not found"));
        assert!(!is_response_line("MESSAGE temp 1 72F"));
        assert!(!is_response_line("{\"topic\":\"t\"}"));
        assert!(!is_response_line("<Message></Message>"));

        assert!(is_eviction_notice("-ERR Subscription evicted temp 3"));
        assert!(!is_eviction_notice("-ERR Topic not found"));
    }

    /// Тест проверяет, что уведомление о снятой подписке не принимается
    /// за ответ и отдаётся как ошибка из очереди доставок.
    #[tokio::test]
    async fn test_eviction_notice_is_not_a_response() -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await?;
            let mut request = [0u8; 5];
            tokio::io::AsyncReadExt::read_exact(&mut socket, &mut request).await?;
            socket
                .write_all(b"MESSAGE temp 1 a\n-ERR Subscription evicted temp 1\n+PONG\n")
                .await?;
            anyhow::Ok(socket)
        });

        let wait = Duration::from_secs(5);
        let mut conn = ClientConnection::connect(addr, wait, wait, wait).await?;
        assert_eq!(conn.request("PING").await?, "+PONG");
        assert_eq!(conn.pending_pushes(), 2);

        assert_eq!(conn.next_push(Some(wait)).await?, "MESSAGE temp 1 a");
        let err = conn.next_push(Some(wait)).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ClientError>(),
            Some(&ClientError::ServerError {
                message: "Subscription evicted temp 1".to_string()
            })
        );

        drop(server.await??);
        Ok(())
    }

    #[test]
    fn test_response_error() {
        let err = response_error("-ERR Broker unavailable, retry later");
        assert_eq!(err.status_code(), StatusCode::Unavailable);
        assert!(err.is_retryable());

        let err = response_error("garbage");
        assert_eq!(err.status_code(), StatusCode::ProtocolError);
    }
}
