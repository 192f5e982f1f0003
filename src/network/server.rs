use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{net::TcpListener, select, time::sleep};
use tracing::{debug, error, info};

use super::connection::{ConnectionConfig, ConnectionManager};
use crate::{
    config::Settings,
    pubsub::{Broker, ShutdownReport},
};

/// TCP-сервер брокера.
pub struct Server {
    listener: TcpListener,
    broker: Broker,
    manager: Arc<ConnectionManager>,
    shutdown_timeout: Duration,
}

/// Итог работы сервера после остановки.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerReport {
    pub broker: ShutdownReport,
    /// Все соединения закрылись до таймаута.
    pub connections_closed: bool,
}

impl Server {
    /// Открывает слушающий сокет по настройкам.
    pub async fn bind(
        settings: &Settings,
        broker: Broker,
    ) -> Result<Self> {
        let mut config = settings.connection_config();
        config.outbound_capacity = broker.config().queue_capacity();
        Self::bind_with(
            &settings.listen_address,
            config,
            broker,
            settings.shutdown_timeout(),
        )
        .await
    }

    pub async fn bind_with(
        address: &str,
        config: ConnectionConfig,
        broker: Broker,
        shutdown_timeout: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("Failed to bind {address}"))?;

        Ok(Self {
            listener,
            manager: Arc::new(ConnectionManager::new(config, broker.clone())),
            broker,
            shutdown_timeout,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Принимает соединения, пока не завершится `shutdown`, затем
    /// останавливается: брокер перестаёт принимать операции, соединения
    /// получают `-ERR Server shutting down` и закрываются.
    pub async fn run<F>(
        self,
        shutdown: F,
    ) -> Result<ServerReport>
    where
        F: Future<Output = ()>,
    {
        let Server {
            listener,
            broker,
            manager,
            shutdown_timeout,
        } = self;

        info!(address = %listener.local_addr()?, "Herald is listening");
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((socket, addr)) => {
                        let manager = manager.clone();
                        tokio::spawn(async move {
                            if let Err(e) = manager.handle_connection(socket, addr).await {
                                debug!(%addr, error = %e, "Connection task failed");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }

        drop(listener);
        info!("Shutdown requested, draining");

        broker.begin_shutdown();
        manager.shutdown();
        let broker_report = broker.shutdown(shutdown_timeout).await;
        let connections_closed = manager.wait_for_shutdown(shutdown_timeout).await;

        info!(
            drained = broker_report.drained,
            closed_subscribers = broker_report.closed_subscribers,
            connections_closed,
            "Herald stopped"
        );

        Ok(ServerReport {
            broker: broker_report,
            connections_closed,
        })
    }
}
