//! WebSocket Stream Connector
//!
//! [`StreamConnector`] backed by tokio-tungstenite. Each link runs in its own
//! task and owns its connection lifecycle:
//!
//! - connects to `{stream_url}?token={credential}`
//! - discards commands queued while disconnected, then reports `Opened`
//!   (the channel manager replays its topics on every `Opened`)
//! - pings every `ping_interval`; no pong by the next ping drops the connection
//! - reconnects with exponential backoff until closed or attempts run out

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, StreamCodec, StreamFrame};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{
    ConnectRequest, StreamCommand, StreamConnector, StreamLink, TransportEvent, TransportEventKind,
};
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::metrics::{self, FrameType};

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a single connection attempt.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Stream URL could not be built.
    #[error("invalid stream URL: {0}")]
    InvalidUrl(String),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Outbound frame could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// No pong arrived within one ping interval.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// Connection closed by the server.
    #[error("connection closed")]
    ConnectionClosed,
}

// =============================================================================
// Connector
// =============================================================================

/// Opens WebSocket links to the streaming endpoint.
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    url: String,
    settings: StreamSettings,
}

impl TungsteniteConnector {
    /// Create a connector for a stream base URL.
    #[must_use]
    pub fn new(url: impl Into<String>, settings: StreamSettings) -> Self {
        Self {
            url: url.into(),
            settings,
        }
    }
}

impl StreamConnector for TungsteniteConnector {
    fn connect(&self, request: ConnectRequest) -> StreamLink {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = LinkTask {
            base_url: self.url.clone(),
            settings: self.settings.clone(),
            request,
            outbound: outbound_rx,
            cancel: cancel.clone(),
            codec: StreamCodec::new(),
        };
        tokio::spawn(task.run());

        StreamLink::new(outbound_tx, cancel)
    }
}

// =============================================================================
// Link Task
// =============================================================================

struct LinkTask {
    base_url: String,
    settings: StreamSettings,
    request: ConnectRequest,
    outbound: mpsc::UnboundedReceiver<StreamCommand>,
    cancel: CancellationToken,
    codec: StreamCodec,
}

impl LinkTask {
    async fn run(mut self) {
        let generation = self.request.generation;
        let url = match self.endpoint() {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(generation, error = %e, "Cannot open stream");
                self.emit(TransportEventKind::Error(e.to_string()));
                self.emit(TransportEventKind::Closed);
                return;
            }
        };

        let mut policy =
            ReconnectPolicy::new(ReconnectConfig::from_stream_settings(&self.settings));

        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            match self.connect_and_run(&url, &mut policy).await {
                Ok(()) => {
                    tracing::debug!(generation, "Stream link closed");
                    return;
                }
                Err(e) => {
                    tracing::warn!(generation, error = %e, "Stream connection lost");
                    self.emit(TransportEventKind::Closed);

                    let Some(delay) = policy.next_delay() else {
                        tracing::error!(generation, "Giving up on stream reconnection");
                        self.emit(TransportEventKind::Error(
                            "maximum reconnection attempts exceeded".to_string(),
                        ));
                        return;
                    };

                    metrics::record_reconnect();
                    tracing::info!(
                        generation,
                        attempt = policy.attempt_count(),
                        delay_ms = delay.as_millis(),
                        "Reconnecting to stream"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Connect once and pump frames until the connection ends.
    ///
    /// `Ok` means the link was closed locally.
    async fn connect_and_run(
        &mut self,
        url: &str,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), StreamError> {
        let generation = self.request.generation;
        tracing::info!(generation, url = %self.base_url, "Connecting to stream");

        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(url) => result?,
        };
        policy.reset();

        let (mut write, mut read) = ws_stream.split();

        // Upstream subscriptions are connection-scoped; the manager replays on Opened.
        while self.outbound.try_recv().is_ok() {}
        self.emit(TransportEventKind::Opened);
        tracing::info!(generation, "Stream connected");

        let ping_interval = self.settings.ping_interval.max(Duration::from_secs(1));
        let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut awaiting_pong = false;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = ping.tick() => {
                    if awaiting_pong {
                        return Err(StreamError::HeartbeatTimeout);
                    }
                    awaiting_pong = true;
                    write.send(Message::Ping(Vec::new().into())).await?;
                }
                command = self.outbound.recv() => {
                    let Some(command) = command else {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    };
                    let text = self.codec.encode(&command)?;
                    tracing::debug!(generation, ?command, "Sending stream command");
                    write.send(Message::Text(text.into())).await?;
                }
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            awaiting_pong = false;
                            self.handle_text(&text);
                        }
                        Some(Ok(Message::Pong(_))) => {
                            awaiting_pong = false;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(generation, ?frame, "Server sent close frame");
                            return Err(StreamError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(StreamError::ConnectionClosed),
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match self.codec.decode(text) {
            Ok(StreamFrame::Trades(ticks)) => {
                metrics::record_frame(FrameType::Trade);
                if !ticks.is_empty() {
                    self.emit(TransportEventKind::Trades(ticks));
                }
            }
            Ok(StreamFrame::Ping) => metrics::record_frame(FrameType::Ping),
            Ok(StreamFrame::Error(msg)) => {
                metrics::record_frame(FrameType::Other);
                tracing::warn!(generation = self.request.generation, msg = %msg, "Stream error frame");
                self.emit(TransportEventKind::Error(msg));
            }
            Ok(StreamFrame::Other) => {
                metrics::record_frame(FrameType::Other);
                tracing::trace!("Ignoring unhandled frame type");
            }
            Err(e) => {
                metrics::record_frame(FrameType::Invalid);
                tracing::warn!(error = %e, "Undecodable stream frame");
            }
        }
    }

    fn endpoint(&self) -> Result<String, StreamError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| StreamError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("token", self.request.credential.token());
        Ok(url.into())
    }

    fn emit(&self, kind: TransportEventKind) {
        let _ = self.request.events.send(TransportEvent {
            generation: self.request.generation,
            kind,
        });
    }
}

// =============================================================================
// Tests
// =============================================================================
