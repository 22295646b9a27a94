/// Resolves on the first SIGINT or SIGTERM (CTRL+C elsewhere).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    wait_for_unix_signal().await;

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

#[cfg(unix)]
async fn wait_for_unix_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let listen = |kind: SignalKind, name: &'static str| async move {
        match signal(kind) {
            Ok(mut sig) => {
                sig.recv().await;
                name
            }
            Err(err) => {
                tracing::warn!("Failed to install {name} handler: {err}");
                std::future::pending::<&'static str>().await
            }
        }
    };

    let name = tokio::select! {
        name = listen(SignalKind::interrupt(), "SIGINT") => name,
        name = listen(SignalKind::terminate(), "SIGTERM") => name,
    };
    tracing::info!("Caught {name}. Shutting down...");
}

#[cfg(not(unix))]
async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Caught CTRL+C. Shutting down..."),
        Err(err) => {
            tracing::warn!("Failed to install CTRL+C handler: {err}");
            std::future::pending::<()>().await
        }
    }
}
