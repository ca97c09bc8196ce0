//! One WebSocket session with the room.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use plaza_core::{ClientMessage, ServerMessage, SessionId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::errors::ClientError;

/// How long `connect` waits for the room's `init`.
const INIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Callback invoked for every server event.
pub type Listener = Arc<dyn Fn(&ServerMessage) + Send + Sync>;

/// Events held for the first subscriber before older ones are dropped.
const BACKLOG_LIMIT: usize = 1024;

struct Listeners {
    entries: Vec<(u64, Listener)>,
    /// `Some` until the first listener registers.
    backlog: Option<VecDeque<ServerMessage>>,
}

struct Shared {
    listeners: Mutex<Listeners>,
    /// Serializes dispatch with the backlog replay so order is preserved.
    dispatching: Mutex<()>,
    next_listener: AtomicU64,
    connected: AtomicBool,
    my_user_id: Mutex<Option<SessionId>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            listeners: Mutex::new(Listeners {
                entries: Vec::new(),
                backlog: Some(VecDeque::new()),
            }),
            dispatching: Mutex::new(()),
            next_listener: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            my_user_id: Mutex::new(None),
        }
    }

    fn dispatch(&self, event: &ServerMessage) {
        let _order = self.dispatching.lock();
        // Snapshot so a listener may subscribe or unsubscribe re-entrantly.
        let listeners: Vec<Listener> = {
            let mut guard = self.listeners.lock();
            if let Some(backlog) = guard.backlog.as_mut() {
                if backlog.len() == BACKLOG_LIMIT {
                    let _ = backlog.pop_front();
                    warn!(limit = BACKLOG_LIMIT, "no listener yet, dropping oldest buffered event");
                }
                backlog.push_back(event.clone());
                return;
            }
            guard.entries.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            listener(event);
        }
    }

    fn register(&self, id: u64, listener: Listener) {
        {
            let mut guard = self.listeners.lock();
            if guard.backlog.is_none() {
                guard.entries.push((id, listener));
                return;
            }
        }

        // First listener: take the dispatch slot so nothing new is delivered
        // until the buffered events have been replayed.
        let _order = self.dispatching.lock();
        let backlog = {
            let mut guard = self.listeners.lock();
            guard.entries.push((id, Arc::clone(&listener)));
            guard.backlog.take()
        };
        for event in backlog.into_iter().flatten() {
            listener(&event);
        }
    }
}

/// Registration handle returned by [`PlazaClient::subscribe`].
///
/// The listener stays registered until this is dropped or
/// [`unsubscribe`](Self::unsubscribe)d.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Remove the listener.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.listeners.lock().entries.retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// A connected participant.
///
/// `connect` resolves once the room's `init` has arrived, so
/// [`my_user_id`](Self::my_user_id) and [`init`](Self::init) are available
/// immediately. Later events go to subscribed listeners in arrival order.
pub struct PlazaClient {
    shared: Arc<Shared>,
    init: ServerMessage,
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl std::fmt::Debug for PlazaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlazaClient").finish_non_exhaustive()
    }
}

impl PlazaClient {
    /// Open a session at `url` (e.g. `ws://127.0.0.1:8787/ws`), presenting `origin`.
    pub async fn connect(url: &str, origin: &str) -> Result<Self, ClientError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| ClientError::Handshake(Box::new(e)))?;
        let origin_value = HeaderValue::from_str(origin)
            .map_err(|_| ClientError::InvalidOrigin(origin.to_string()))?;
        let _ = request.headers_mut().insert(ORIGIN, origin_value);

        let (stream, _response) = connect_async(request)
            .await
            .map_err(ClientError::from_handshake)?;
        let (mut sink, mut source) = stream.split();

        let init = tokio::time::timeout(INIT_TIMEOUT, wait_for_init(&mut source))
            .await
            .map_err(|_| ClientError::InitTimeout)??;

        let shared = Arc::new(Shared::new());
        shared.connected.store(true, Ordering::SeqCst);
        *shared.my_user_id.lock() = Some(init.user_id().clone());
        info!(url, user_id = %init.user_id(), "connected to plaza");

        let (outbound, mut rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if sink.send(message).await.is_err() || closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_shared = Arc::clone(&shared);
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(error) => {
                        debug!(%error, "plaza connection read failed");
                        break;
                    }
                };
                match ServerMessage::decode(text.as_str()) {
                    Ok(event) => reader_shared.dispatch(&event),
                    Err(error) => debug!(%error, "ignoring undecodable server message"),
                }
            }
            reader_shared.connected.store(false, Ordering::SeqCst);
            info!("disconnected from plaza");
        });

        Ok(Self {
            shared,
            init,
            outbound,
            reader,
            writer,
        })
    }

    /// Send an event to the room. Returns `false` without sending when the
    /// session is no longer open.
    pub fn send(&self, message: &ClientMessage) -> bool {
        if !self.is_connected() {
            return false;
        }
        match message.encode() {
            Ok(json) => self.outbound.send(Message::Text(json.into())).is_ok(),
            Err(error) => {
                warn!(%error, event_type = message.event_type(), "failed to serialize message");
                false
            }
        }
    }

    /// Register `listener` for every subsequent server event.
    ///
    /// Events that arrived after `init` but before the first subscription are
    /// buffered and replayed to the first listener before anything newer.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ServerMessage) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener.fetch_add(1, Ordering::Relaxed);
        self.shared.register(id, Arc::new(listener));
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Subscribe with a channel instead of a callback.
    pub fn events(&self) -> (Subscription, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (subscription, rx)
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.lock().entries.len()
    }

    /// Whether the session is open.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// The id the room assigned to this session.
    pub fn my_user_id(&self) -> Option<SessionId> {
        self.shared.my_user_id.lock().clone()
    }

    /// The `init` event the room greeted this session with.
    pub fn init(&self) -> &ServerMessage {
        &self.init
    }

    /// Close the session. Further `send`s return `false`.
    pub fn close(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        let _ = self.outbound.send(Message::Close(None));
    }
}

impl Drop for PlazaClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn wait_for_init<S>(source: &mut S) -> Result<ServerMessage, ClientError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => match ServerMessage::decode(text.as_str()) {
                Ok(event @ ServerMessage::Init { .. }) => return Ok(event),
                Ok(other) => debug!(event_type = other.event_type(), "event before init ignored"),
                Err(error) => debug!(%error, "ignoring undecodable server message"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(error) => {
                debug!(%error, "read failed before init");
                break;
            }
        }
    }
    Err(ClientError::Closed)
}
