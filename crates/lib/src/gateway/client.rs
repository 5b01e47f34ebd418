//! Public client handle.

use super::connection::{Command, Connection, ConnectionState, Shared};
use super::events::{EventListeners, Subscription};
use super::pending::QueuedRequest;
use super::protocol::{ConnectParams, GatewayEvent, HelloOk};
use crate::config::ClientConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::transport::{Connector, WsConnector};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, watch};

/// Handle to one gateway session. Cheap to clone; all clones share the same connection task.
/// The connection opens lazily on the first request or `ensure_connected`, and the task
/// stops on `shutdown` or when the last handle is dropped.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    cmd_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    listeners: Arc<EventListeners>,
    closed: AtomicBool,
}

impl GatewayClient {
    /// Client over real WebSocket. Must be called inside a tokio runtime.
    /// Fails with [`GatewayError::Config`] when no token or password is configured.
    pub fn new(config: ClientConfig) -> GatewayResult<Self> {
        Self::with_connector(config, WsConnector)
    }

    pub fn with_connector(config: ClientConfig, connector: impl Connector) -> GatewayResult<Self> {
        Self::with_parts(config, Arc::new(connector), EventListeners::new())
    }

    pub(crate) fn with_parts(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        listeners: Arc<EventListeners>,
    ) -> GatewayResult<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| GatewayError::config("gateway client requires a tokio runtime"))?;

        let instance_id = uuid::Uuid::new_v4().to_string();
        let connect_params = ConnectParams::from_config(&config, &instance_id);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shared = Shared::new();
        let connection = Connection::new(
            Arc::new(config),
            connector,
            connect_params,
            shared.clone(),
            listeners.clone(),
            cmd_rx,
        );
        runtime.spawn(connection.run());

        Ok(Self {
            inner: Arc::new(ClientInner {
                cmd_tx,
                shared,
                listeners,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Queue a call and return its future. The call is queued before this returns, so calls
    /// made one after another go on the wire in that order. If the connection is down the
    /// call waits for the reconnect loop rather than failing; see [`Self::request_connected`].
    pub fn request<T, P>(&self, method: &str, params: P) -> ResponseFuture<T>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        let pending = match serde_json::to_value(params) {
            Ok(Value::Null) => self.request_value(method, None),
            Ok(params) => self.request_value(method, Some(params)),
            Err(e) => PendingResponse::failed(e.into()),
        };
        ResponseFuture {
            pending,
            _marker: PhantomData,
        }
    }

    /// Untyped variant of [`Self::request`].
    pub fn request_value(&self, method: &str, params: Option<Value>) -> PendingResponse {
        if self.inner.closed.load(Ordering::SeqCst) {
            return PendingResponse::failed(GatewayError::ShutDown);
        }
        let (reply, rx) = oneshot::channel();
        let req = QueuedRequest {
            id: uuid::Uuid::new_v4().to_string(),
            method: method.to_string(),
            params,
            reply,
        };
        if self.inner.cmd_tx.send(Command::Request(req)).is_err() {
            return PendingResponse::failed(GatewayError::ShutDown);
        }
        PendingResponse::waiting(rx)
    }

    /// Fail-fast variant: waits for a connection first and returns the connect error if that
    /// attempt fails, instead of leaving the call queued.
    pub async fn request_connected<T, P>(&self, method: &str, params: P) -> GatewayResult<T>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        self.ensure_connected().await?;
        self.request(method, params).await
    }

    /// Resolves once authenticated, or with the error of the attempt in progress.
    pub async fn ensure_connected(&self) -> GatewayResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::ShutDown);
        }
        let (reply, rx) = oneshot::channel();
        if self.inner.cmd_tx.send(Command::EnsureConnected(reply)).is_err() {
            return Err(GatewayError::ShutDown);
        }
        rx.await.unwrap_or(Err(GatewayError::ShutDown))
    }

    /// Register an event listener. Listeners run on the connection task, in registration
    /// order, and must not block.
    pub fn on_event<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(handler)
    }

    /// Close the socket and fail every queued and in-flight call with `ShutDown`.
    /// Idempotent; later calls return immediately.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let (done, rx) = oneshot::channel();
        if self.inner.cmd_tx.send(Command::Shutdown(done)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst) || self.state() == ConnectionState::Shutdown
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.shared.subscribe()
    }

    /// hello-ok payload of the most recent successful handshake.
    pub fn hello(&self) -> Option<HelloOk> {
        self.inner.shared.hello()
    }
}

/// Future returned by [`GatewayClient::request_value`].
pub struct PendingResponse {
    inner: PendingInner,
}

enum PendingInner {
    Waiting(oneshot::Receiver<GatewayResult<Value>>),
    Failed(Option<GatewayError>),
}

impl PendingResponse {
    fn waiting(rx: oneshot::Receiver<GatewayResult<Value>>) -> Self {
        Self {
            inner: PendingInner::Waiting(rx),
        }
    }

    fn failed(err: GatewayError) -> Self {
        Self {
            inner: PendingInner::Failed(Some(err)),
        }
    }
}

impl Future for PendingResponse {
    type Output = GatewayResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            PendingInner::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                // The task dropped the reply without answering; it only does that on exit.
                Poll::Ready(Err(_)) => Poll::Ready(Err(GatewayError::ShutDown)),
                Poll::Pending => Poll::Pending,
            },
            PendingInner::Failed(err) => {
                Poll::Ready(Err(err.take().unwrap_or(GatewayError::ShutDown)))
            }
        }
    }
}

/// Future returned by [`GatewayClient::request`]; decodes the payload into `T`.
pub struct ResponseFuture<T> {
    pending: PendingResponse,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Future for ResponseFuture<T> {
    type Output = GatewayResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.pending).poll(cx) {
            Poll::Ready(Ok(value)) => Poll::Ready(serde_json::from_value(value).map_err(Into::into)),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}
