use std::{net::SocketAddr, time::Duration};

use herald_error::{ClientError, HeraldResult as ClientResult};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::connection::{response_error, ClientConnection};
use crate::{
    protocol::{parse_text_push, xml, OutputFormat},
    pubsub::{Message, SubscriberId},
};

/// Конфигурация клиента.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Таймаут подключения
    pub connect_timeout: Duration,
    /// Таймаут ожидания ответа
    pub read_timeout: Duration,
    /// Таймаут записи
    pub write_timeout: Duration,
}

/// Клиент Herald.
///
/// Запросы публикации отправляются в JSON, поэтому содержимое может быть
/// любым текстом, включая переводы строк.
pub struct HeraldClient {
    connection: ClientConnection,
    format: OutputFormat,
}

#[derive(Deserialize)]
struct JsonPush {
    topic: String,
    content: String,
    sequence: u64,
}

impl HeraldClient {
    pub async fn connect(
        addr: SocketAddr,
        config: ClientConfig,
    ) -> ClientResult<Self> {
        let connection = ClientConnection::connect(
            addr,
            config.connect_timeout,
            config.read_timeout,
            config.write_timeout,
        )
        .await?;

        info!(%addr, "Connected to Herald");
        Ok(Self {
            connection,
            format: OutputFormat::default(),
        })
    }

    /// Публикует сообщение и возвращает его порядковый номер.
    pub async fn publish(
        &mut self,
        topic: &str,
        content: &str,
    ) -> ClientResult<u64> {
        debug!(topic, "PUBLISH");
        let request = json!({
            "command": "publish",
            "topic": topic,
            "content": content,
        })
        .to_string();

        let response = self.expect_ok(&request).await?;
        response
            .strip_prefix("Message published ")
            .and_then(|seq| seq.trim().parse().ok())
            .ok_or_else(|| unexpected(&response))
    }

    /// Подписывается на топик и возвращает идентификатор подписчика.
    pub async fn subscribe(
        &mut self,
        topic: &str,
    ) -> ClientResult<SubscriberId> {
        debug!(topic, "SUBSCRIBE");
        let response = self.expect_ok(&format!("SUBSCRIBE {topic}")).await?;
        response
            .strip_prefix("Subscribed ")
            .and_then(|rest| rest.rsplit_once(' '))
            .and_then(|(_, id)| id.parse::<u64>().ok())
            .map(SubscriberId::new)
            .ok_or_else(|| unexpected(&response))
    }

    /// Снимает одну подписку (`id`) или все подписки соединения на топик.
    pub async fn unsubscribe(
        &mut self,
        topic: &str,
        id: Option<SubscriberId>,
    ) -> ClientResult<()> {
        debug!(topic, ?id, "UNSUBSCRIBE");
        let request = match id {
            Some(id) => format!("UNSUBSCRIBE {topic} {id}"),
            None => format!("UNSUBSCRIBE {topic}"),
        };
        self.expect_ok(&request).await?;
        Ok(())
    }

    /// Меняет формат, в котором сервер присылает сообщения.
    pub async fn set_format(
        &mut self,
        format: OutputFormat,
    ) -> ClientResult<()> {
        self.expect_ok(&format!("FORMAT {format}")).await?;
        self.format = format;
        Ok(())
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub async fn ping(&mut self) -> ClientResult<()> {
        let response = self.connection.request("PING").await?;
        if response == "+PONG" {
            Ok(())
        } else {
            Err(response_error(&response))
        }
    }

    /// Статистика сервера в виде JSON.
    pub async fn stats(&mut self) -> ClientResult<serde_json::Value> {
        let response = self.connection.request("STATS").await?;
        response
            .strip_prefix("+STATS ")
            .and_then(|body| serde_json::from_str(body).ok())
            .ok_or_else(|| response_error(&response))
    }

    /// Следующая сырая строка доставки.
    pub async fn next_push(
        &mut self,
        wait: Option<Duration>,
    ) -> ClientResult<String> {
        self.connection.next_push(wait).await
    }

    /// Следующее доставленное сообщение, разобранное по текущему формату.
    pub async fn next_message(
        &mut self,
        wait: Option<Duration>,
    ) -> ClientResult<Message> {
        let line = self.next_push(wait).await?;
        parse_push(&line, self.format).ok_or_else(|| unexpected(&line))
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.connection.server_addr()
    }

    /// Отправляет `QUIT` и закрывает соединение.
    pub async fn quit(mut self) -> ClientResult<()> {
        let response = self.connection.request("QUIT").await?;
        if response != "+OK Bye" {
            return Err(response_error(&response));
        }
        info!("Closing connection to server");
        self.connection.close().await
    }

    /// Возвращает текст после `+OK `.
    async fn expect_ok(
        &mut self,
        request: &str,
    ) -> ClientResult<String> {
        let response = self.connection.request(request).await?;
        match response.strip_prefix("+OK ") {
            Some(rest) => Ok(rest.to_string()),
            None => Err(response_error(&response)),
        }
    }
}

/// Разбирает строку доставки в заданном формате.
pub fn parse_push(
    line: &str,
    format: OutputFormat,
) -> Option<Message> {
    match format {
        OutputFormat::Text => parse_text_push(line),
        OutputFormat::Json => {
            let push: JsonPush = serde_json::from_str(line).ok()?;
            Some(Message::new(push.topic, push.content, push.sequence))
        }
        OutputFormat::Xml => {
            let el = xml::parse_flat(line).ok()?;
            Some(Message::new(
                el.child("topic")?.to_string(),
                el.child("content").unwrap_or_default().to_string(),
                el.child("sequence")?.parse().ok()?,
            ))
        }
    }
}

fn unexpected(response: &str) -> herald_error::StackError {
    ClientError::UnexpectedResponse {
        response: response.to_string(),
    }
    .into()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
        }
    }
}
