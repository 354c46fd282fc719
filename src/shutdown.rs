use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Token for [`Node::run`](crate::node::Node::run) that fires on the first
/// SIGTERM or SIGINT.
///
/// Cancelling it stops the HTTP listener from accepting new requests and
/// workers, then stops the dispatch loop. Queued and in-flight jobs live only
/// in memory and are dropped with the process; connected benchmarkers see
/// their websocket close.
///
/// Fails if the signal handlers cannot be registered, before anything is
/// spawned.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let sigterm = signal(SignalKind::terminate())?;
    let sigint = signal(SignalKind::interrupt())?;

    let cancel = token.clone();
    tokio::spawn(async move {
        let name = first_signal(sigterm, sigint).await;
        tracing::info!(signal = name, "Shutting down dispatch server");
        cancel.cancel();
    });

    Ok(token)
}

async fn first_signal(mut sigterm: Signal, mut sigint: Signal) -> &'static str {
    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_waits_for_a_signal() {
        let token = install_shutdown_handler().unwrap();
        tokio::task::yield_now().await;
        assert!(!token.is_cancelled());
    }
}
