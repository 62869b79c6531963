//! Phoenix-channel transport for the hosted realtime service.
//!
//! Each physical channel gets its own WebSocket and a connection task that
//! owns both halves of the socket. The task joins the topic with the
//! channel's `postgres_changes` filters, keeps the socket alive with
//! heartbeats and translates inbound frames into transport signals:
//!
//! | Frame | Signal |
//! |-------|--------|
//! | `phx_reply` ok | `SUBSCRIBED` |
//! | `phx_reply` error, `phx_error`, `system` error | `CHANNEL_ERROR` |
//! | `phx_close`, socket closed | `CLOSED` |
//! | `postgres_changes` | change event |
//!
//! Adding a filter re-joins the topic with the extended filter list. Replies
//! and `phx_close` frames answering the superseded join are dropped.

pub mod protocol;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use secrecy::{ExposeSecret, Secret};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;

use crate::config::{BackendConfig, RealtimeConfig};
use crate::ports::{
    ChangeFeedTransport, ChannelSpec, ChannelStatus, SignalSender, TableFilter, TransportError,
    TransportHandle, TransportSignal,
};
use protocol::{Inbound, JoinTracker, PhoenixMessage};

/// Connection settings for [`PhoenixTransport`].
#[derive(Debug, Clone)]
pub struct PhoenixSettings {
    /// Base URL of the backend project, e.g. `https://xyz.supabase.co`.
    pub base_url: String,
    pub api_key: Secret<String>,
    pub heartbeat_interval: Duration,
}

impl PhoenixSettings {
    pub fn from_config(backend: &BackendConfig, realtime: &RealtimeConfig) -> Self {
        Self {
            base_url: backend.realtime_base_url().to_string(),
            api_key: backend.api_key.clone(),
            heartbeat_interval: realtime.heartbeat_interval(),
        }
    }

    /// WebSocket endpoint: `ws(s)://host/realtime/v1/websocket?apikey=...&vsn=1.0.0`.
    pub fn socket_url(&self) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| TransportError::Connection(format!("invalid realtime url: {}", e)))?;

        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| TransportError::Connection("cannot switch url to websocket".into()))?;

        url.set_path(&format!(
            "{}/realtime/v1/websocket",
            url.path().trim_end_matches('/')
        ));
        url.query_pairs_mut()
            .append_pair("apikey", self.api_key.expose_secret())
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }
}

enum Outbound {
    Rejoin(Vec<TableFilter>),
    Leave,
}

struct Connection {
    topic: String,
    filters: Vec<TableFilter>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

/// Production transport speaking Phoenix channels over WebSockets.
pub struct PhoenixTransport {
    settings: PhoenixSettings,
    connections: Mutex<HashMap<TransportHandle, Connection>>,
    next_handle: AtomicU64,
    refs: Arc<AtomicU64>,
}

impl PhoenixTransport {
    pub fn new(settings: PhoenixSettings) -> Self {
        Self {
            settings,
            connections: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            refs: Arc::new(AtomicU64::new(1)),
        }
    }
}

#[async_trait]
impl ChangeFeedTransport for PhoenixTransport {
    async fn open(
        &self,
        spec: &ChannelSpec,
        filters: &[TableFilter],
        signals: SignalSender,
    ) -> Result<TransportHandle, TransportError> {
        {
            let connections = self.connections.lock().await;
            if let Some((handle, _)) = connections.iter().find(|(_, c)| c.topic == spec.topic) {
                return Ok(*handle);
            }
        }

        let url = self.settings.socket_url()?;
        tracing::debug!(topic = %spec.topic, host = url.host_str().unwrap_or(""), "Connecting realtime socket");

        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Rejected(e.to_string()))?;
        let (mut sink, stream) = socket.split();

        let join_ref = self.refs.fetch_add(1, Ordering::SeqCst);
        let join = protocol::join(
            &spec.topic,
            filters,
            self.settings.api_key.expose_secret(),
            join_ref,
        );
        sink.send(Message::Text(protocol::encode(&join)?))
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let handle = TransportHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let task = ConnectionTask {
            handle,
            topic: spec.topic.clone(),
            access_token: self.settings.api_key.clone(),
            heartbeat_interval: self.settings.heartbeat_interval,
            refs: self.refs.clone(),
            joins: JoinTracker::new(join_ref),
            signals,
        };
        tokio::spawn(task.run(sink, stream, outbound_rx));

        self.connections.lock().await.insert(
            handle,
            Connection {
                topic: spec.topic.clone(),
                filters: filters.to_vec(),
                outbound: outbound_tx,
            },
        );
        Ok(handle)
    }

    async fn register_filter(
        &self,
        handle: TransportHandle,
        filter: TableFilter,
    ) -> Result<(), TransportError> {
        let mut connections = self.connections.lock().await;
        let connection = connections
            .get_mut(&handle)
            .ok_or(TransportError::UnknownHandle(handle))?;

        if connection.filters.contains(&filter) {
            return Ok(());
        }
        connection.filters.push(filter);
        connection
            .outbound
            .send(Outbound::Rejoin(connection.filters.clone()))
            .map_err(|_| TransportError::Connection("socket task ended".into()))
    }

    async fn close(&self, handle: TransportHandle) -> Result<(), TransportError> {
        let connection = self
            .connections
            .lock()
            .await
            .remove(&handle)
            .ok_or(TransportError::UnknownHandle(handle))?;
        // The task may already be gone after a socket failure.
        let _ = connection.outbound.send(Outbound::Leave);
        Ok(())
    }
}

type SocketSink = futures::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    Message,
>;
type SocketStream = futures::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
>;

struct ConnectionTask {
    handle: TransportHandle,
    topic: String,
    access_token: Secret<String>,
    heartbeat_interval: Duration,
    refs: Arc<AtomicU64>,
    joins: JoinTracker,
    signals: SignalSender,
}

impl ConnectionTask {
    async fn run(
        mut self,
        mut sink: SocketSink,
        mut stream: SocketStream,
        mut outbound: mpsc::UnboundedReceiver<Outbound>,
    ) {
        let mut heartbeat = time::interval(self.heartbeat_interval);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                command = outbound.recv() => match command {
                    Some(Outbound::Rejoin(filters)) => {
                        let leave = protocol::leave(&self.topic, self.joins.current(), self.next_ref());
                        let join_ref = self.next_ref();
                        let join = protocol::join(
                            &self.topic,
                            &filters,
                            self.access_token.expose_secret(),
                            join_ref,
                        );
                        self.joins.joined(join_ref);
                        if let Err(e) = self.send(&mut sink, &leave).await {
                            self.report(ChannelStatus::ChannelError, Some(e.to_string()));
                            break;
                        }
                        if let Err(e) = self.send(&mut sink, &join).await {
                            self.report(ChannelStatus::ChannelError, Some(e.to_string()));
                            break;
                        }
                    }
                    Some(Outbound::Leave) | None => {
                        let leave = protocol::leave(&self.topic, self.joins.current(), self.next_ref());
                        let _ = self.send(&mut sink, &leave).await;
                        let _ = sink.close().await;
                        tracing::debug!(topic = %self.topic, "Realtime socket closed");
                        break;
                    }
                },

                _ = heartbeat.tick() => {
                    let beat = protocol::heartbeat(self.next_ref());
                    if let Err(e) = self.send(&mut sink, &beat).await {
                        tracing::warn!(topic = %self.topic, error = %e, "Heartbeat send failed");
                        self.report(ChannelStatus::ChannelError, Some(e.to_string()));
                        break;
                    }
                    tracing::trace!(topic = %self.topic, "Heartbeat sent");
                }

                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if !self.on_text(text.as_str()) {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        self.report(ChannelStatus::Closed, Some("socket closed by server".into()));
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(topic = %self.topic, error = %e, "Realtime socket error");
                        self.report(ChannelStatus::ChannelError, Some(e.to_string()));
                        break;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    /// Handles one text frame; returns false when the channel is finished.
    fn on_text(&self, text: &str) -> bool {
        let frame = match protocol::decode(text, &self.topic) {
            Ok(frame) if !self.joins.accepts(&frame) => {
                tracing::debug!(
                    topic = %self.topic,
                    join_ref = frame.join_ref.as_deref().unwrap_or(""),
                    "Frame for a superseded join dropped"
                );
                return true;
            }
            other => other.map(|frame| frame.inbound),
        };
        match frame {
            Ok(Inbound::Reply { ok: true, .. }) => {
                self.report(ChannelStatus::Subscribed, None);
            }
            Ok(Inbound::Reply { ok: false, detail }) => {
                self.report(
                    ChannelStatus::ChannelError,
                    Some(detail.unwrap_or_else(|| "join rejected".into())),
                );
            }
            Ok(Inbound::Change(event)) => {
                let _ = self.signals.send(TransportSignal::change(self.handle, event));
            }
            Ok(Inbound::System { ok: false, message }) => {
                self.report(ChannelStatus::ChannelError, message);
            }
            Ok(Inbound::System { ok: true, message }) => {
                tracing::debug!(topic = %self.topic, message = message.as_deref().unwrap_or(""), "Realtime system message");
            }
            Ok(Inbound::Error(reason)) => {
                self.report(ChannelStatus::ChannelError, reason);
            }
            Ok(Inbound::Close) => {
                self.report(ChannelStatus::Closed, None);
                return false;
            }
            Ok(Inbound::Ignored) => {}
            Err(e) => {
                tracing::warn!(topic = %self.topic, error = %e, "Unreadable realtime frame");
            }
        }
        true
    }

    async fn send(
        &self,
        sink: &mut SocketSink,
        message: &PhoenixMessage,
    ) -> Result<(), TransportError> {
        let text = protocol::encode(message)?;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }

    fn report(&self, status: ChannelStatus, error: Option<String>) {
        let _ = self
            .signals
            .send(TransportSignal::status(self.handle, status, error));
    }

    fn next_ref(&self) -> u64 {
        self.refs.fetch_add(1, Ordering::SeqCst)
    }
}
