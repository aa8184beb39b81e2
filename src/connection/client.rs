/// WebSocket client: a single task owning the socket, the timers and the model
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::VecDeque;
use std::future::{self, Future};
use std::pin::Pin;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::ClientConfig;
use crate::connection::lifecycle::{
    ConnectionLifecycle, ConnectionState, ABNORMAL_CLOSURE, NO_STATUS_CLOSURE,
};
use crate::dispatcher::{decode, deliver, Inbound};
use crate::error::Result;
use crate::models::{Outbound, DEFAULT_DEVICE_DATA_LIMIT};
use crate::store::Reconciler;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ConnectFuture = Pin<Box<dyn Future<Output = Result<WsStream>> + Send>>;

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Send(Outbound),
    Shutdown,
}

/// Cheap, cloneable control surface for a running `TelemetryClient`
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ClientHandle {
    /// Open the connection; ignored while connected or connecting
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Close with a normal closure and cancel any pending reconnect
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Stop the client task; it closes the socket and flushes the cache
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Queue an outbound message
    ///
    /// Returns false without queuing anything unless the connection is open.
    pub fn send(&self, message: Outbound) -> bool {
        let state = self.state();
        if state != ConnectionState::Connected {
            warn!("WebSocket not connected ({}), dropping {:?}", state, message);
            return false;
        }
        self.commands.send(Command::Send(message)).is_ok()
    }

    pub fn request_statistics(&self) -> bool {
        self.send(Outbound::GetStats)
    }

    pub fn request_device_data(&self, device_id: &str, limit: Option<u32>) -> bool {
        self.send(Outbound::GetDeviceData {
            device_id: device_id.to_string(),
            limit: limit.unwrap_or(DEFAULT_DEVICE_DATA_LIMIT),
        })
    }

    pub fn send_command_to_device(&self, device_id: &str, command: Value) -> bool {
        self.send(Outbound::SendCommandToDevice {
            device_id: device_id.to_string(),
            command,
        })
    }
}

/// Connection manager and dispatcher for one dashboard endpoint
///
/// All state transitions, timers and model updates happen on the task
/// running `run()`, so handlers never interleave.
pub struct TelemetryClient {
    endpoint: Url,
    lifecycle: ConnectionLifecycle,
    socket: Option<WsStream>,
    pending: Option<ConnectFuture>,
    // Snapshots are applied on a later loop turn; anything arriving after
    // one waits behind it
    deferred: VecDeque<Inbound>,
    engine: Reconciler,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
}

impl TelemetryClient {
    pub fn new(config: &ClientConfig, engine: Reconciler) -> (Self, ClientHandle) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let client = TelemetryClient {
            endpoint: config.endpoint.clone(),
            lifecycle: ConnectionLifecycle::new(config.heartbeat_interval, config.reconnect_delay),
            socket: None,
            pending: None,
            deferred: VecDeque::new(),
            engine,
            commands,
            state_tx,
        };
        let handle = ClientHandle {
            commands: command_tx,
            state: state_rx,
        };
        (client, handle)
    }

    /// Drive the connection until shutdown, then hand the model back
    pub async fn run(mut self) -> Reconciler {
        info!("Telemetry client started for {}", self.endpoint);

        loop {
            let heartbeat_at = self.lifecycle.heartbeat_deadline();
            let reconnect_at = self.lifecycle.reconnect_deadline();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                result = finish_handshake(&mut self.pending) => self.handshake_finished(result),
                frame = next_frame(&mut self.socket) => self.handle_frame(frame),
                _ = sleep_until_deadline(heartbeat_at) => self.heartbeat().await,
                _ = sleep_until_deadline(reconnect_at) => self.reconnect(),
                _ = tokio::task::yield_now(), if !self.deferred.is_empty() => self.apply_deferred(),
            }
        }

        info!("Shutting down telemetry client");
        self.lifecycle.disconnect();
        self.publish_state();
        self.close_transport().await;
        while !self.deferred.is_empty() {
            self.apply_deferred();
        }
        self.engine.flush();
        self.engine
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                if self.socket.is_some() || self.pending.is_some() {
                    debug!("Connect ignored, transport already open or handshake in flight");
                } else if self.lifecycle.request_connect() {
                    self.start_attempt();
                } else {
                    debug!("Connect ignored while {}", self.lifecycle.state());
                }
            }
            Command::Disconnect => {
                info!("Disconnecting from {}", self.endpoint);
                self.lifecycle.disconnect();
                self.publish_state();
                self.close_transport().await;
            }
            Command::Send(message) => self.send_message(&message).await,
            Command::Shutdown => {}
        }
    }

    fn start_attempt(&mut self) {
        info!("Connecting to {}", self.endpoint);
        let url = self.endpoint.to_string();
        self.pending = Some(Box::pin(async move {
            let (stream, _response) = connect_async(url.as_str()).await?;
            Ok(stream)
        }));
        self.publish_state();
    }

    fn handshake_finished(&mut self, result: Result<WsStream>) {
        match result {
            Ok(stream) => {
                info!("WebSocket connected");
                self.socket = Some(stream);
                self.lifecycle.connected(Instant::now());
                self.publish_state();
            }
            Err(e) => {
                warn!("WebSocket connection failed: {}", e);
                self.connection_lost(ABNORMAL_CLOSURE);
            }
        }
    }

    fn handle_frame(&mut self, frame: Option<std::result::Result<Message, WsError>>) {
        match frame {
            Some(Ok(Message::Text(text))) => self.accept(&text),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => self.accept(&text),
                Err(e) => warn!("Dropping non UTF-8 binary frame: {}", e),
            },
            Some(Ok(Message::Close(frame))) => {
                let code = frame
                    .map(|frame| u16::from(frame.code))
                    .unwrap_or(NO_STATUS_CLOSURE);
                info!("WebSocket disconnected: {}", code);
                self.connection_lost(code);
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!("WebSocket error: {}", e);
                self.connection_lost(ABNORMAL_CLOSURE);
            }
            None => {
                info!("WebSocket disconnected: stream ended");
                self.connection_lost(ABNORMAL_CLOSURE);
            }
        }
    }

    fn accept(&mut self, text: &str) {
        let Some(message) = decode(text) else {
            return;
        };

        if matches!(message, Inbound::InitialData(_)) || !self.deferred.is_empty() {
            self.deferred.push_back(message);
        } else {
            deliver(message, &mut self.engine);
        }
    }

    fn apply_deferred(&mut self) {
        if let Some(message) = self.deferred.pop_front() {
            deliver(message, &mut self.engine);
        }
    }

    fn connection_lost(&mut self, code: u16) {
        self.socket = None;
        self.pending = None;
        let abnormal = self.lifecycle.closed(code);
        self.publish_state();

        if abnormal && self.lifecycle.schedule_reconnect(Instant::now()) {
            info!(
                "Reconnecting in {} ms",
                self.lifecycle.reconnect_delay().as_millis()
            );
        }
        self.publish_state();
    }

    async fn heartbeat(&mut self) {
        if self.lifecycle.heartbeat_due(Instant::now()) {
            self.send_message(&Outbound::Ping).await;
        }
    }

    fn reconnect(&mut self) {
        if self.lifecycle.reconnect_elapsed() {
            info!("Attempting to reconnect");
            self.start_attempt();
        }
    }

    async fn send_message(&mut self, message: &Outbound) {
        let Some(socket) = self.socket.as_mut() else {
            warn!("WebSocket not connected, dropping {:?}", message);
            return;
        };

        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode {:?}: {}", message, e);
                return;
            }
        };

        // A failed write surfaces again on the read side
        if let Err(e) = socket.send(Message::Text(text)).await {
            warn!("Failed to send message: {}", e);
        }
    }

    async fn close_transport(&mut self) {
        self.pending = None;
        if let Some(mut socket) = self.socket.take() {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "Client disconnect".into(),
            };
            if let Err(e) = socket.close(Some(frame)).await {
                debug!("Close handshake failed: {}", e);
            }
        }
    }

    fn publish_state(&mut self) {
        let state = self.lifecycle.state();
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!("Connection state: {}", state);
            self.engine.notify_connection(state);
        }
    }
}

async fn finish_handshake(pending: &mut Option<ConnectFuture>) -> Result<WsStream> {
    let Some(attempt) = pending.as_mut() else {
        return future::pending().await;
    };
    let result = attempt.await;
    *pending = None;
    result
}

async fn next_frame(
    socket: &mut Option<WsStream>,
) -> Option<std::result::Result<Message, WsError>> {
    match socket.as_mut() {
        Some(socket) => socket.next().await,
        None => future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}
