use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::api::{self, ApiState};
use crate::config::ServerConfig;
use crate::dispatch::{
    dispatch_channel, Coordinator, DispatchHandle, DispatchLoop, JsonLinesResultSink,
    LogResultSink, ResultSink, WebSocketTransport,
};
use crate::error::Result;

/// A dispatch server: the coordinator loop plus the HTTP/websocket front end.
pub struct Node {
    pub config: ServerConfig,
    handle: DispatchHandle,
    transport: WebSocketTransport,
    dispatch_loop: DispatchLoop,
}

impl Node {
    /// Wire up the transport, the result sink and the coordinator.
    ///
    /// # Errors
    ///
    /// Returns an error if the results file cannot be opened.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let sink: Arc<dyn ResultSink> = match &config.results_file {
            Some(path) => Arc::new(JsonLinesResultSink::open(path)?),
            None => Arc::new(LogResultSink),
        };
        let transport = WebSocketTransport::new(config.dispatch.send_timeout);

        let coordinator = Coordinator::new(
            Arc::new(transport.clone()),
            sink,
            config.dispatch.max_send_attempts,
        );
        let (handle, dispatch_loop) = dispatch_channel(coordinator, &config.dispatch);

        Ok(Self {
            config,
            handle,
            transport,
            dispatch_loop,
        })
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    /// Bind the configured address and serve until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` fires.
    ///
    /// The dispatch loop runs as a spawned task; the HTTP server runs on the
    /// calling task.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let state = ApiState {
            handle: self.handle,
            transport: self.transport,
            worker_channel_capacity: self.config.worker_channel_capacity,
        };
        let app = api::router(state);

        let loop_shutdown = shutdown.clone();
        let dispatch_task = tokio::spawn(self.dispatch_loop.run(loop_shutdown));

        tracing::info!(addr = %listener.local_addr()?, "Dispatch server listening");

        let server_shutdown = shutdown.clone();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await;

        shutdown.cancel();
        if let Err(e) = dispatch_task.await {
            tracing::error!(error = %e, "Dispatch loop panicked");
        }
        served?;

        tracing::info!("Dispatch server stopped");
        Ok(())
    }
}
