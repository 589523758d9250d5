//! Event loop driving the engine.
//!
//! # Responsibilities
//! - Own the [`Engine`] on a single task
//! - Accept clients and hand them to the transport
//! - Wait for socket events with the configured poll timeout
//! - Flush write queues and publish stats after every iteration
//!
//! # Design Decisions
//! - Events are drained in batches before flushing, so a burst of reads
//!   produces one round of sends
//! - Shutdown stops the loop immediately; pending requests are dropped

use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::config::ProxyConfig;
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionId;
use crate::net::listener::{Listener, ListenerError};
use crate::net::transport::{Event, TcpTransport};
use crate::observability::metrics;
use crate::proxy::engine::{Engine, EngineStats};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("Event channel closed unexpectedly")]
    EventChannelClosed,
}

/// The caching proxy: a listener plus the engine loop.
pub struct ProxyServer {
    config: ProxyConfig,
    stats_tx: watch::Sender<EngineStats>,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> Self {
        let (stats_tx, _) = watch::channel(EngineStats::default());
        Self { config, stats_tx }
    }

    /// Receiver for the stats published after each loop iteration.
    pub fn stats(&self) -> watch::Receiver<EngineStats> {
        self.stats_tx.subscribe()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Bind the configured listener and run until `shutdown` fires.
    pub async fn serve(self, shutdown: Shutdown) -> Result<(), ServerError> {
        let listener = Listener::bind(&self.config.listener).await?;
        self.run(listener, shutdown).await
    }

    /// Run on an already bound listener until `shutdown` fires.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) -> Result<(), ServerError> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let transport = TcpTransport::new(
            self.config.upstream.clone(),
            self.config.engine.read_buffer_size,
            events_tx.clone(),
        );
        let mut engine = Engine::from_config(transport, &self.config);

        tracing::info!(
            upstream = %self.config.upstream.address(),
            pool_size = self.config.upstream.pool_size,
            "Proxy engine starting"
        );
        engine.start();

        let accept_task = tokio::spawn(accept_loop(listener, events_tx, shutdown.clone()));
        let poll_interval = Duration::from_millis(self.config.engine.poll_interval_ms);
        let mut shutdown_rx = shutdown.subscribe();

        let result = loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Shutdown signal received, stopping engine");
                    break Ok(());
                }
                next = tokio::time::timeout(poll_interval, events_rx.recv()) => match next {
                    Ok(Some(event)) => {
                        dispatch_event(&mut engine, event);
                        while let Ok(event) = events_rx.try_recv() {
                            dispatch_event(&mut engine, event);
                        }
                    }
                    Ok(None) => break Err(ServerError::EventChannelClosed),
                    Err(_) => engine.on_tick(),
                }
            }

            engine.flush();
            self.publish(engine.stats());
        };

        accept_task.abort();
        let stats = engine.stats();
        tracing::info!(
            clients = stats.client_connections,
            dropped_pending = stats.pending_requests,
            max_concurrent = stats.max_concurrent_connections,
            "Proxy engine stopped"
        );
        result
    }

    fn publish(&self, stats: EngineStats) {
        metrics::record_engine_stats(&stats);
        self.stats_tx.send_if_modified(|current| {
            if *current == stats {
                return false;
            }
            *current = stats;
            true
        });
    }
}

fn dispatch_event(engine: &mut Engine<TcpTransport>, event: Event) {
    match event {
        Event::Accepted { stream, peer, permit } => {
            let id = ConnectionId::new();
            engine.transport_mut().attach_client(id, stream, permit);
            engine.on_client_accepted(id, peer);
        }
        Event::Connected { id } => engine.on_upstream_connected(id),
        Event::Received { id, data } => engine.on_received(id, data),
        Event::Closed { id } => engine.on_closed(id),
        Event::Sent { id, written } => engine.on_sent(id, written),
        Event::Failed { id, op, error } => engine.on_failed(id, op, &error),
    }
}

async fn accept_loop(listener: Listener, events: mpsc::UnboundedSender<Event>, shutdown: Shutdown) {
    let mut shutdown_rx = shutdown.subscribe();

    loop {
        let accepted = tokio::select! {
            _ = shutdown_rx.recv() => return,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer, permit)) => {
                if events.send(Event::Accepted { stream, peer, permit }).is_err() {
                    return;
                }
            }
            Err(ListenerError::Closed) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}
