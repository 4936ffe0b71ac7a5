use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 等待 SIGTERM 或 Ctrl+C
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "Ctrl+C")
}

/// 收到信号后取消根令牌
pub fn cancel_on_signal(cancel: CancellationToken) {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(signal) => info!(signal, "Shutdown signal received"),
            Err(e) => {
                error!(error = %e, "Failed to listen for shutdown signals");
                return;
            }
        }
        cancel.cancel();
    });
}
