//! herald-cli: консольный клиент брокера Herald.
//!
//! Публикует сообщения, подписывается на топики и печатает доставленные
//! сообщения, проверяет соединение и показывает статистику сервера.

use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use herald::{
    client::{ClientConfig, HeraldClient},
    protocol::OutputFormat,
    pubsub::SubscriberId,
};
use tracing::debug;

/// Командная строка herald-cli
#[derive(Parser)]
#[command(
    name = "herald-cli",
    version = env!("CARGO_PKG_VERSION"),
    about = "Command-line client for the Herald pub/sub broker",
    propagate_version = true
)]
struct Cli {
    /// Хост сервера
    #[arg(
        short = 'H',
        long,
        default_value = "127.0.0.1",
        env = "HERALD_HOST",
        help = "Адрес сервера"
    )]
    host: String,
    /// Порт сервера
    #[arg(
        short,
        long,
        default_value = "65432",
        env = "HERALD_PORT",
        help = "Порт сервера"
    )]
    port: u16,
    /// Таймаут подключения (сек)
    #[arg(
        short,
        long,
        default_value = "5",
        help = "Таймаут подключения в секундах"
    )]
    timeout: u64,
    /// Таймаут ожидания ответа (сек)
    #[arg(long, default_value = "30", help = "Таймаут ожидания ответа в секундах")]
    read_timeout: u64,
    /// Таймаут записи (сек)
    #[arg(long, default_value = "10", help = "Таймаут записи в секундах")]
    write_timeout: u64,
    /// Подробный вывод
    #[arg(short, long, help = "Включить отладочный вывод")]
    verbose: bool,
    /// Тихий режим
    #[arg(short, long, conflicts_with = "verbose", help = "Отключить журнал")]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

/// Формат доставки для подписки
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum PushFormat {
    Text,
    Json,
    Xml,
}

impl From<PushFormat> for OutputFormat {
    fn from(format: PushFormat) -> Self {
        match format {
            PushFormat::Text => OutputFormat::Text,
            PushFormat::Json => OutputFormat::Json,
            PushFormat::Xml => OutputFormat::Xml,
        }
    }
}

/// Подкоманды CLI
#[derive(Subcommand)]
enum Commands {
    /// Опубликовать сообщение в топик
    #[command(alias = "pub")]
    Publish {
        topic: String,
        /// Текст сообщения (несколько слов объединяются пробелом)
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// Подписаться на топик и печатать сообщения
    #[command(alias = "sub")]
    Subscribe {
        topic: String,
        /// Формат, в котором сервер присылает сообщения
        #[arg(short, long, value_enum, default_value = "text")]
        format: PushFormat,
        /// Печатать строки доставки как есть
        #[arg(long)]
        raw: bool,
    },
    /// Снять подписки соединения на топик
    Unsubscribe {
        topic: String,
        /// Идентификатор подписчика
        #[arg(long)]
        id: Option<u64>,
    },
    /// Проверка соединения с сервером
    Ping {
        #[arg(short = 'c', long, default_value = "1")]
        count: u32,
        /// Интервал между пингами (мс)
        #[arg(short, long, default_value = "1000")]
        interval: u64,
    },
    /// Статистика сервера
    #[command(alias = "info")]
    Stats,
}

/// Конфигурация CLI после разбора аргументов
#[derive(Debug, Clone)]
struct CliConfig {
    server_addr: SocketAddr,
    client_config: ClientConfig,
}

impl TryFrom<&Cli> for CliConfig {
    type Error = anyhow::Error;

    fn try_from(cli: &Cli) -> Result<Self> {
        let server_addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
            .parse()
            .context("Invalid server address")?;

        Ok(Self {
            server_addr,
            client_config: ClientConfig {
                connect_timeout: Duration::from_secs(cli.timeout),
                read_timeout: Duration::from_secs(cli.read_timeout),
                write_timeout: Duration::from_secs(cli.write_timeout),
            },
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet)?;

    let config = CliConfig::try_from(&cli)?;
    debug!(?config, "CLI configuration");

    if let Err(e) = handle_command(&cli.command, &config).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn handle_command(
    command: &Commands,
    config: &CliConfig,
) -> Result<()> {
    let mut client = connect(config).await?;

    match command {
        Commands::Publish { topic, message } => {
            let sequence = client.publish(topic, &message.join(" ")).await?;
            println!("Message published {sequence}");
        }
        Commands::Subscribe { topic, format, raw } => {
            return subscribe(client, topic, (*format).into(), *raw).await;
        }
        Commands::Unsubscribe { topic, id } => {
            client.unsubscribe(topic, id.map(SubscriberId::new)).await?;
            println!("Unsubscribed from {topic}");
        }
        Commands::Ping { count, interval } => {
            ping(&mut client, *count, Duration::from_millis(*interval)).await?;
        }
        Commands::Stats => {
            let stats = client.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    client.quit().await?;
    Ok(())
}

async fn connect(config: &CliConfig) -> Result<HeraldClient> {
    let client = HeraldClient::connect(config.server_addr, config.client_config.clone())
        .await
        .with_context(|| format!("Failed to connect to {}", config.server_addr))?;
    debug!(addr = %config.server_addr, "Connected");
    Ok(client)
}

/// Печатает сообщения топика, пока сервер не закроет соединение или не
/// придёт Ctrl-C.
async fn subscribe(
    mut client: HeraldClient,
    topic: &str,
    format: OutputFormat,
    raw: bool,
) -> Result<()> {
    if format != OutputFormat::Text {
        client.set_format(format).await?;
    }
    let id = client.subscribe(topic).await?;
    eprintln!("Subscribed to {topic} as {id}, waiting for messages (Ctrl-C to stop)");

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = client.next_push(None) => line,
        };
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                eprintln!("Connection closed: {e}");
                return Ok(());
            }
        };

        if raw {
            println!("{line}");
            continue;
        }
        match herald::client::parse_push(&line, format) {
            Some(message) => println!(
                "[{}#{}] {}",
                message.topic,
                message.sequence,
                message.content_lossy()
            ),
            None => println!("{line}"),
        }
    }

    client.quit().await?;
    Ok(())
}

async fn ping(
    client: &mut HeraldClient,
    count: u32,
    interval: Duration,
) -> Result<()> {
    println!("PING {}", client.server_addr());

    let mut successful = 0;
    let mut total_time = Duration::ZERO;

    for i in 1..=count {
        let start = std::time::Instant::now();
        match client.ping().await {
            Ok(()) => {
                let elapsed = start.elapsed();
                total_time += elapsed;
                successful += 1;
                println!("#{i}: PONG time={:.2}ms", elapsed.as_secs_f64() * 1000.0);
            }
            Err(e) => println!("#{i}: error - {e}"),
        }

        if i < count {
            tokio::time::sleep(interval).await;
        }
    }

    if count > 1 {
        println!("--- {count} sent, {successful} ok ---");
        if successful > 0 {
            let avg_ms = (total_time.as_secs_f64() * 1000.0) / successful as f64;
            println!("avg time: {avg_ms:.2}ms");
        }
    }
    if successful == 0 {
        anyhow::bail!("server did not answer");
    }
    Ok(())
}

fn init_logging(
    verbose: bool,
    quiet: bool,
) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if quiet {
        "off"
    } else if verbose {
        "debug"
    } else {
        "error"
    };

    fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_cli() {
        let cli = Cli::parse_from(["herald-cli", "-H", "127.0.0.1", "-p", "6174", "ping"]);
        let config = CliConfig::try_from(&cli).unwrap();
        assert_eq!(config.server_addr.port(), 6174);
        assert!(matches!(cli.command, Commands::Ping { count: 1, .. }));
    }

    #[test]
    fn test_publish_joins_words() {
        let cli = Cli::parse_from(["herald-cli", "publish", "temp", "72", "F"]);
        match cli.command {
            Commands::Publish { topic, message } => {
                assert_eq!(topic, "temp");
                assert_eq!(message.join(" "), "72 F");
            }
            _ => panic!("expected publish"),
        }
    }

    #[test]
    fn test_subscribe_format_flag() {
        let cli = Cli::parse_from(["herald-cli", "subscribe", "news", "--format", "xml"]);
        match cli.command {
            Commands::Subscribe { format, raw, .. } => {
                assert_eq!(OutputFormat::from(format), OutputFormat::Xml);
                assert!(!raw);
            }
            _ => panic!("expected subscribe"),
        }
    }

    #[test]
    fn test_unsubscribe_id() {
        let cli = Cli::parse_from(["herald-cli", "unsubscribe", "news", "--id", "3"]);
        assert!(matches!(cli.command, Commands::Unsubscribe { id: Some(3), .. }));
    }
}
