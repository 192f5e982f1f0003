use std::future::Future;

use anyhow::Context;
use herald::{init_logging, Broker, Server, Settings};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Failed to load settings")?;
    let logging = init_logging(settings.logging.clone()).context("Failed to initialize logging")?;

    let broker = Broker::new(settings.broker_config());
    let server = Server::bind(&settings, broker).await?;
    let shutdown = shutdown_signal().context("Failed to install signal handlers")?;

    let report = server.run(shutdown).await?;

    info!(
        drained = report.broker.drained,
        connections_closed = report.connections_closed,
        "Shutdown complete"
    );
    logging.shutdown();
    Ok(())
}

/// Регистрирует обработчики SIGINT, SIGTERM и SIGQUIT. Возвращённый future
/// завершается при первом из сигналов.
#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    Ok(async move {
        tokio::select! {
            _ = sigint.recv() => {},
            _ = sigterm.recv() => {},
            _ = sigquit.recv() => {},
        }
        info!("Shutdown signal received");
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    })
}
