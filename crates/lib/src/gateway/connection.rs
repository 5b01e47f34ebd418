//! The connection task: sole owner of the socket, the request queue, the correlation table,
//! the heartbeat, and the reconnect timer.
//!
//! Everything that mutates connection state runs on this one task, driven by a `select!`
//! over client commands, the in-progress handshake, socket reads, and timers. Handles talk
//! to it only through the command channel.

use super::events::EventListeners;
use super::handshake::{self, close_quietly, Established};
use super::heartbeat::Heartbeat;
use super::pending::{CorrelationTable, QueuedRequest, RequestQueue};
use super::protocol::{decode_frame, encode_frame, ConnectParams, Frame, GatewayEvent, HelloOk, RequestFrame};
use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::transport::{Connector, Socket, SocketError, WireMessage};
use futures_util::future::BoxFuture;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

/// Where the connection is in its lifecycle. `Shutdown` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Opening the socket.
    Connecting,
    /// Socket open, `connect` sent, waiting for hello-ok.
    Handshaking,
    Authenticated,
    Shutdown,
}

pub(crate) enum Command {
    Request(QueuedRequest),
    EnsureConnected(oneshot::Sender<GatewayResult<()>>),
    Shutdown(oneshot::Sender<()>),
}

/// State published by the task for handles to read.
pub(crate) struct Shared {
    state_tx: watch::Sender<ConnectionState>,
    hello: Mutex<Option<HelloOk>>,
}

impl Shared {
    pub fn new() -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            state_tx,
            hello: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn hello(&self) -> Option<HelloOk> {
        self.hello
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, state: ConnectionState) {
        let prev = self.state_tx.send_replace(state);
        if prev != state {
            log::debug!("gateway connection state: {:?} -> {:?}", prev, state);
        }
    }

    fn set_hello(&self, hello: HelloOk) {
        *self.hello.lock().unwrap_or_else(PoisonError::into_inner) = Some(hello);
    }
}

pub(crate) struct Connection {
    config: Arc<ClientConfig>,
    connector: Arc<dyn Connector>,
    connect_params: ConnectParams,
    shared: Arc<Shared>,
    listeners: Arc<EventListeners>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    state: ConnectionState,
    socket: Option<Socket>,
    /// In-progress open + handshake. At most one at a time.
    connecting: Option<BoxFuture<'static, GatewayResult<Established>>>,
    /// Armed reconnect timer. At most one at a time, and never together with `connecting`.
    reconnect_at: Option<Instant>,
    backoff: Backoff,
    heartbeat: Heartbeat,
    queue: RequestQueue,
    inflight: CorrelationTable,
    connect_waiters: Vec<oneshot::Sender<GatewayResult<()>>>,
}

impl Connection {
    pub fn new(
        config: Arc<ClientConfig>,
        connector: Arc<dyn Connector>,
        connect_params: ConnectParams,
        shared: Arc<Shared>,
        listeners: Arc<EventListeners>,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let backoff = Backoff::new(config.timing.backoff_schedule(), config.timing.backoff_max());
        let heartbeat = Heartbeat::new(
            config.timing.heartbeat_interval(),
            config.timing.pong_timeout(),
        );
        Self {
            config,
            connector,
            connect_params,
            shared,
            listeners,
            cmd_rx,
            state: ConnectionState::Disconnected,
            socket: None,
            connecting: None,
            reconnect_at: None,
            backoff,
            heartbeat,
            queue: RequestQueue::default(),
            inflight: CorrelationTable::default(),
            connect_waiters: Vec::new(),
        }
    }

    /// Run until shutdown or until every client handle is dropped.
    pub async fn run(mut self) {
        log::debug!("gateway connection task started for {}", self.config.url);
        loop {
            let reconnect_at = self.reconnect_at;
            let next_ping = self.heartbeat.next_ping();
            let pong_deadline = self.heartbeat.pong_deadline();

            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Shutdown(done)) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        log::debug!("all gateway client handles dropped");
                        self.shutdown().await;
                        break;
                    }
                },
                result = poll_connecting(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_result(result).await;
                }
                _ = sleep_until(reconnect_at) => {
                    self.reconnect_at = None;
                    self.start_connecting();
                }
                msg = recv_socket(&mut self.socket) => self.on_socket_message(msg),
                _ = sleep_until(pong_deadline) => self.on_ping_timeout(),
                _ = sleep_until(next_ping) => self.send_ping().await,
            }
        }
        log::debug!("gateway connection task stopped");
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.shared.publish(state);
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Request(req) => {
                log::debug!("queueing {} ({})", req.method, req.id);
                self.queue.push(req);
                if self.state == ConnectionState::Authenticated {
                    self.flush_queue().await;
                } else {
                    self.ensure_connecting();
                }
            }
            Command::EnsureConnected(reply) => {
                if self.state == ConnectionState::Authenticated {
                    let _ = reply.send(Ok(()));
                } else {
                    self.connect_waiters.push(reply);
                    self.ensure_connecting();
                }
            }
            Command::Shutdown(done) => {
                self.shutdown().await;
                let _ = done.send(());
            }
        }
    }

    /// Start an attempt unless one is running, one is scheduled, or we are already up.
    fn ensure_connecting(&mut self) {
        if self.connecting.is_some()
            || self.reconnect_at.is_some()
            || matches!(
                self.state,
                ConnectionState::Authenticated | ConnectionState::Shutdown
            )
        {
            return;
        }
        self.start_connecting();
    }

    fn start_connecting(&mut self) {
        if self.state == ConnectionState::Shutdown {
            return;
        }
        self.set_state(ConnectionState::Connecting);
        let shared = self.shared.clone();
        let fut = handshake::establish(
            self.connector.clone(),
            self.config.clone(),
            self.connect_params.clone(),
            move |state| shared.publish(state),
        );
        self.connecting = Some(Box::pin(fut));
    }

    async fn on_connect_result(&mut self, result: GatewayResult<Established>) {
        match result {
            Ok(Established { socket, hello }) => {
                log::info!(
                    "gateway connected: {} (protocol {})",
                    self.config.url,
                    hello.protocol.map_or_else(|| "?".to_string(), |p| p.to_string())
                );
                self.socket = Some(socket);
                self.backoff.reset();
                self.heartbeat.start(Instant::now());
                self.shared.set_hello(hello);
                self.set_state(ConnectionState::Authenticated);
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                self.flush_queue().await;
            }
            Err(e) => {
                log::warn!("gateway connect failed: {}", e);
                self.set_state(ConnectionState::Disconnected);
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Err(e.clone()));
                }
                self.schedule_reconnect();
            }
        }
    }

    /// Write queued requests in FIFO order. A failed write rejects only that request.
    async fn flush_queue(&mut self) {
        while let Some(req) = self.queue.pop() {
            let Some(socket) = self.socket.as_mut() else {
                self.queue.requeue(req);
                return;
            };
            let QueuedRequest {
                id,
                method,
                params,
                reply,
            } = req;
            let text = match encode_frame(&Frame::Req(RequestFrame::new(id.clone(), method.clone(), params))) {
                Ok(text) => text,
                Err(e) => {
                    let _ = reply.send(Err(e));
                    continue;
                }
            };
            self.inflight.insert(id.clone(), method.clone(), reply);
            let sent = socket.send_text(text).await;
            match sent {
                Ok(()) => log::debug!("sent {} ({}), {} in flight", method, id, self.inflight.len()),
                Err(e) => {
                    log::warn!("failed to send {} ({}): {}", method, id, e);
                    self.inflight.reject(&id, GatewayError::Send(e.to_string()));
                }
            }
        }
    }

    fn on_socket_message(&mut self, msg: Option<Result<WireMessage, SocketError>>) {
        match msg {
            Some(Ok(WireMessage::Text(text))) => self.on_text(&text),
            Some(Ok(WireMessage::Pong(_))) => self.heartbeat.on_pong(),
            // The transport already answered it.
            Some(Ok(WireMessage::Ping(_))) => {}
            Some(Ok(WireMessage::Close)) => {
                self.on_disconnect(GatewayError::disconnected("gateway closed the connection"))
            }
            Some(Err(e)) => self.on_disconnect(GatewayError::disconnected(e.to_string())),
            None => self.on_disconnect(GatewayError::disconnected("connection lost")),
        }
    }

    fn on_text(&mut self, text: &str) {
        match decode_frame(text) {
            Some(Frame::Res(res)) => {
                let id = res.id.clone();
                if !self.inflight.resolve(&id, res.into_result()) {
                    log::debug!("dropping response for unknown id {}", id);
                }
            }
            Some(Frame::Event(ev)) => self.listeners.dispatch(&GatewayEvent::from(ev)),
            Some(Frame::Evt(ev)) => self.listeners.dispatch(&GatewayEvent::from(ev)),
            Some(Frame::Req(req)) => {
                log::debug!("ignoring server request {} ({})", req.method, req.id);
            }
            None => {}
        }
    }

    async fn send_ping(&mut self) {
        let Some(socket) = self.socket.as_mut() else {
            self.heartbeat.stop();
            return;
        };
        self.heartbeat.on_ping_sent(Instant::now());
        let sent = socket.send(WireMessage::Ping(Vec::new())).await;
        if let Err(e) = sent {
            self.on_disconnect(GatewayError::disconnected(format!("ping failed: {}", e)));
        }
    }

    fn on_ping_timeout(&mut self) {
        log::warn!(
            "no pong from gateway within {}ms",
            self.config.timing.pong_timeout_ms
        );
        self.on_disconnect(GatewayError::PingTimeout);
    }

    /// Drop the socket, fail everything in flight, and schedule a reconnect.
    /// Queued (unsent) requests are kept for the next connection.
    fn on_disconnect(&mut self, err: GatewayError) {
        if self.socket.take().is_none() {
            return;
        }
        self.heartbeat.stop();
        self.set_state(ConnectionState::Disconnected);
        let rejected = self.inflight.reject_all(&err);
        log::warn!(
            "gateway connection lost: {} ({} in-flight request(s) failed, {} queued)",
            err,
            rejected,
            self.queue.len()
        );
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.state == ConnectionState::Shutdown
            || self.connecting.is_some()
            || self.reconnect_at.is_some()
        {
            return;
        }
        let delay = self.backoff.next_delay();
        log::info!(
            "reconnecting to gateway in {}ms (attempt {})",
            delay.as_millis(),
            self.backoff.attempt()
        );
        self.reconnect_at = Some(Instant::now() + delay);
    }

    /// Terminal. Fails every queued, in-flight, and waiting caller with `ShutDown`, including
    /// commands that were already in the channel.
    async fn shutdown(&mut self) {
        if self.state == ConnectionState::Shutdown {
            return;
        }
        self.set_state(ConnectionState::Shutdown);
        self.reconnect_at = None;
        self.connecting = None;
        self.heartbeat.stop();
        if let Some(mut socket) = self.socket.take() {
            close_quietly(&mut socket, self.config.timing.close_timeout()).await;
        }

        let err = GatewayError::ShutDown;
        let queued = self.queue.reject_all(&err);
        let inflight = self.inflight.reject_all(&err);
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }

        self.cmd_rx.close();
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                Command::Request(req) => {
                    let _ = req.reply.send(Err(err.clone()));
                }
                Command::EnsureConnected(reply) => {
                    let _ = reply.send(Err(err.clone()));
                }
                Command::Shutdown(done) => {
                    let _ = done.send(());
                }
            }
        }
        log::info!(
            "gateway client shut down ({} queued and {} in-flight request(s) cancelled)",
            queued,
            inflight
        );
    }
}

async fn poll_connecting(
    connecting: &mut Option<BoxFuture<'static, GatewayResult<Established>>>,
) -> GatewayResult<Established> {
    match connecting {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn recv_socket(socket: &mut Option<Socket>) -> Option<Result<WireMessage, SocketError>> {
    match socket {
        Some(socket) => socket.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
