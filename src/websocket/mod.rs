use crate::error::{AppError, AppResult};
use crate::models::User;
use crate::services::auth::Authenticator;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

pub mod handlers;
pub mod message_types;

use message_types::{events, ChatLine, InboundEnvelope, MessageSentPayload, OutboundEnvelope, UserPresence};

/// Unique identifier for a live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct ClientInner {
    id: ClientId,
    user: Arc<User>,
    sender: UnboundedSender<String>,
}

/// One open connection bound to its user. Outbound frames go to the
/// transport through `sender`.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(user: Arc<User>, sender: UnboundedSender<String>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                id: ClientId::new(),
                user,
                sender,
            }),
        }
    }

    pub fn id(&self) -> ClientId {
        self.inner.id
    }

    pub fn user(&self) -> &Arc<User> {
        &self.inner.user
    }

    pub fn name(&self) -> &str {
        self.inner.user.name()
    }

    pub fn is_open(&self) -> bool {
        !self.inner.sender.is_closed()
    }

    /// Serializes `{event, data}` and queues it for this connection.
    pub fn emit<T: Serialize>(&self, event: &str, data: &T) -> AppResult<()> {
        let text = serde_json::to_string(&OutboundEnvelope { event, data })
            .map_err(|e| AppError::Server(format!("failed to encode {event}: {e}")))?;
        self.inner
            .sender
            .send(text)
            .map_err(|_| AppError::Server(format!("connection {} is closed", self.id())))
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.inner.id)
            .field("user", &self.name())
            .finish()
    }
}

pub type HandlerFn<T> = Box<dyn Fn(&Client, &Arc<MessageHub>, T) -> AppResult<()> + Send + Sync>;

/// Inbound event handlers, one variant per payload shape.
pub enum Subscriber {
    MessageSent(HandlerFn<MessageSentPayload>),
}

impl Subscriber {
    fn dispatch(
        &self,
        client: &Client,
        hub: &Arc<MessageHub>,
        data: serde_json::Value,
    ) -> AppResult<()> {
        match self {
            Subscriber::MessageSent(handler) => {
                let payload = serde_json::from_value(data)
                    .map_err(|e| AppError::MsgBad(format!("malformed message-sent: {e}")))?;
                handler(client, hub, payload)
            }
        }
    }
}

/// Outbound event handlers, one variant per argument shape.
pub enum Emitter {
    Error(HandlerFn<AppError>),
    ClientCreated(HandlerFn<()>),
    UserJoined(HandlerFn<UserPresence>),
    UserLeft(HandlerFn<UserPresence>),
    ClientDisposed(HandlerFn<()>),
    MessageReceived(HandlerFn<ChatLine>),
}

/// Arguments handed to an [`Emitter`]; must match its variant.
#[derive(Debug, Clone)]
pub enum EmitArgs {
    Error(AppError),
    ClientCreated,
    UserJoined(UserPresence),
    UserLeft(UserPresence),
    ClientDisposed,
    MessageReceived(ChatLine),
}

impl Emitter {
    fn kind(&self) -> &'static str {
        match self {
            Emitter::Error(_) => events::ERROR,
            Emitter::ClientCreated(_) => events::CLIENT_CREATED,
            Emitter::UserJoined(_) => events::USER_JOINED,
            Emitter::UserLeft(_) => events::USER_LEFT,
            Emitter::ClientDisposed(_) => events::CLIENT_DISPOSED,
            Emitter::MessageReceived(_) => events::MESSAGE_RECEIVED,
        }
    }

    fn invoke(&self, client: &Client, hub: &Arc<MessageHub>, args: EmitArgs) -> AppResult<()> {
        match (self, args) {
            (Emitter::Error(f), EmitArgs::Error(err)) => f(client, hub, err),
            (Emitter::ClientCreated(f), EmitArgs::ClientCreated) => f(client, hub, ()),
            (Emitter::UserJoined(f), EmitArgs::UserJoined(p)) => f(client, hub, p),
            (Emitter::UserLeft(f), EmitArgs::UserLeft(p)) => f(client, hub, p),
            (Emitter::ClientDisposed(f), EmitArgs::ClientDisposed) => f(client, hub, ()),
            (Emitter::MessageReceived(f), EmitArgs::MessageReceived(line)) => f(client, hub, line),
            (emitter, args) => Err(AppError::Server(format!(
                "{} emitter cannot take {args:?}",
                emitter.kind()
            ))),
        }
    }
}

#[derive(Default)]
pub struct MessageHubBuilder {
    subscribers: HashMap<String, Subscriber>,
    emitters: HashMap<String, Emitter>,
}

impl MessageHubBuilder {
    pub fn subscriber(mut self, event: &str, subscriber: Subscriber) -> Self {
        self.subscribers.insert(event.to_string(), subscriber);
        self
    }

    pub fn emitter(mut self, event: &str, emitter: Emitter) -> Self {
        self.emitters.insert(event.to_string(), emitter);
        self
    }

    pub fn build(self, authenticator: Arc<dyn Authenticator>) -> AppResult<Arc<MessageHub>> {
        MessageHub::new(authenticator, self.subscribers, self.emitters)
    }
}

/// Live connections plus the event tables that drive them.
pub struct MessageHub {
    authenticator: Arc<dyn Authenticator>,
    clients: RwLock<Vec<Client>>,
    subscribers: HashMap<String, Subscriber>,
    emitters: HashMap<String, Emitter>,
}

impl MessageHub {
    pub fn builder() -> MessageHubBuilder {
        MessageHubBuilder::default()
    }

    /// Both tables must be non-empty and every lifecycle event needs an
    /// emitter of the matching variant.
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        subscribers: HashMap<String, Subscriber>,
        emitters: HashMap<String, Emitter>,
    ) -> AppResult<Arc<Self>> {
        if subscribers.is_empty() {
            return Err(AppError::Server("hub needs at least one subscriber".into()));
        }
        if emitters.is_empty() {
            return Err(AppError::Server("hub needs at least one emitter".into()));
        }
        for event in events::LIFECYCLE {
            match emitters.get(event) {
                Some(emitter) if emitter.kind() == event => {}
                Some(emitter) => {
                    return Err(AppError::Server(format!(
                        "emitter for {event} is a {} emitter",
                        emitter.kind()
                    )))
                }
                None => return Err(AppError::Server(format!("missing {event} emitter"))),
            }
        }

        Ok(Arc::new(Self {
            authenticator,
            clients: RwLock::new(Vec::new()),
            subscribers,
            emitters,
        }))
    }

    /// Authenticates and registers a connection, then announces it.
    pub fn accept(
        self: &Arc<Self>,
        credential: Option<&str>,
        sender: UnboundedSender<String>,
    ) -> AppResult<Client> {
        let user = self.authenticator.authenticate(credential).map_err(|e| {
            tracing::warn!(error = %e, "websocket connection rejected");
            AppError::AuthNo
        })?;

        let client = Client::new(user, sender);
        {
            let mut clients = self.clients.write();
            if clients.iter().any(|c| c.name() == client.name()) {
                tracing::warn!(user = client.name(), "duplicate websocket connection rejected");
                return Err(AppError::AuthDuplicateName);
            }
            clients.push(client.clone());
        }
        client.user().log_in();

        if let Err(e) = self.emit(events::CLIENT_CREATED, &client, EmitArgs::ClientCreated) {
            self.emit_error(&client, e);
        }
        let joined = EmitArgs::UserJoined(UserPresence {
            username: client.name().to_string(),
        });
        if let Err(e) = self.broadcast(events::USER_JOINED, &[client.id()], joined) {
            tracing::error!(error = %e, "user-joined broadcast failed");
        }

        tracing::info!(user = client.name(), client_id = %client.id(), "client connected");
        Ok(client)
    }

    /// Routes one inbound text frame. Failures go back to the sender through
    /// the `error` emitter; the connection stays open.
    pub fn handle_message(self: &Arc<Self>, client: &Client, text: &str) {
        if let Err(e) = self.dispatch(client, text) {
            self.emit_error(client, e);
        }
    }

    fn dispatch(self: &Arc<Self>, client: &Client, text: &str) -> AppResult<()> {
        let envelope: InboundEnvelope = serde_json::from_str(text)
            .map_err(|e| AppError::MsgBad(format!("malformed envelope: {e}")))?;
        let subscriber = self
            .subscribers
            .get(&envelope.event)
            .ok_or_else(|| AppError::MsgBad(format!("unknown event {}", envelope.event)))?;
        tracing::debug!(user = client.name(), event = %envelope.event, "inbound event");
        subscriber.dispatch(client, self, envelope.data)
    }

    /// Runs the `event` emitter once per connected client not in `exclude`.
    /// A failing recipient is reported to that recipient only.
    pub fn broadcast(
        self: &Arc<Self>,
        event: &str,
        exclude: &[ClientId],
        args: EmitArgs,
    ) -> AppResult<()> {
        let emitter = self
            .emitters
            .get(event)
            .ok_or_else(|| AppError::Server(format!("no emitter for {event}")))?;
        let recipients: Vec<Client> = self
            .clients
            .read()
            .iter()
            .filter(|c| !exclude.contains(&c.id()))
            .cloned()
            .collect();

        for client in recipients {
            if let Err(e) = emitter.invoke(&client, self, args.clone()) {
                tracing::debug!(user = client.name(), event, error = %e, "emit failed");
                self.emit_error(&client, e);
            }
        }
        Ok(())
    }

    /// Runs the `event` emitter for a single client.
    pub fn emit(self: &Arc<Self>, event: &str, client: &Client, args: EmitArgs) -> AppResult<()> {
        let emitter = self
            .emitters
            .get(event)
            .ok_or_else(|| AppError::Server(format!("no emitter for {event}")))?;
        emitter.invoke(client, self, args)
    }

    /// Best effort: a failure while reporting is logged and dropped.
    pub fn emit_error(self: &Arc<Self>, client: &Client, err: AppError) {
        if err.is_internal() {
            tracing::error!(user = client.name(), error = %err, "internal error on connection");
        }
        if let Err(e) = self.emit(events::ERROR, client, EmitArgs::Error(err)) {
            tracing::warn!(user = client.name(), error = %e, "failed to report error to client");
        }
    }

    /// Drops the connection, announces the departure and runs
    /// `client-disposed`.
    pub fn disconnect(self: &Arc<Self>, id: ClientId) -> Option<Client> {
        let client = {
            let mut clients = self.clients.write();
            let pos = clients.iter().position(|c| c.id() == id)?;
            clients.remove(pos)
        };

        let left = EmitArgs::UserLeft(UserPresence {
            username: client.name().to_string(),
        });
        if let Err(e) = self.broadcast(events::USER_LEFT, &[], left) {
            tracing::error!(error = %e, "user-left broadcast failed");
        }
        if let Err(e) = self.emit(events::CLIENT_DISPOSED, &client, EmitArgs::ClientDisposed) {
            tracing::warn!(user = client.name(), error = %e, "client-disposed failed");
        }

        tracing::info!(user = client.name(), client_id = %id, "client disconnected");
        Some(client)
    }

    pub fn client(&self, name: &str) -> Option<Client> {
        self.clients.read().iter().find(|c| c.name() == name).cloned()
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.clients.read().iter().any(|c| c.name() == name)
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::user_registry::UserRegistry;
    use tokio::sync::mpsc::unbounded_channel;

    /// Treats the credential as the user name.
    struct NameAuth(Arc<UserRegistry>);

    impl Authenticator for NameAuth {
        fn authenticate(&self, credential: Option<&str>) -> AppResult<Arc<User>> {
            self.0.get(credential.ok_or(AppError::AuthNo)?)
        }
    }

    fn noop<T>() -> HandlerFn<T> {
        Box::new(|_: &Client, _: &Arc<MessageHub>, _: T| Ok(()))
    }

    fn forward_presence(event: &'static str) -> HandlerFn<UserPresence> {
        Box::new(move |client: &Client, _: &Arc<MessageHub>, p: UserPresence| {
            client.emit(event, &p)
        })
    }

    fn hub(registry: &Arc<UserRegistry>) -> Arc<MessageHub> {
        MessageHub::builder()
            .subscriber(events::MESSAGE_SENT, Subscriber::MessageSent(noop()))
            .emitter(
                events::ERROR,
                Emitter::Error(Box::new(|client: &Client, _: &Arc<MessageHub>, err: AppError| {
                    client.emit(events::ERROR, &err.payload())
                })),
            )
            .emitter(events::CLIENT_CREATED, Emitter::ClientCreated(noop()))
            .emitter(events::USER_JOINED, Emitter::UserJoined(forward_presence(events::USER_JOINED)))
            .emitter(events::USER_LEFT, Emitter::UserLeft(forward_presence(events::USER_LEFT)))
            .emitter(events::CLIENT_DISPOSED, Emitter::ClientDisposed(noop()))
            .build(Arc::new(NameAuth(registry.clone())))
            .unwrap()
    }

    #[test]
    fn test_construction_requires_lifecycle_emitters() {
        let registry = Arc::new(UserRegistry::new());
        let auth: Arc<dyn Authenticator> = Arc::new(NameAuth(registry));

        let err = MessageHub::builder()
            .subscriber(events::MESSAGE_SENT, Subscriber::MessageSent(noop()))
            .emitter(events::ERROR, Emitter::Error(noop()))
            .build(auth.clone())
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Server(_)));

        let err = MessageHub::builder()
            .emitter(events::ERROR, Emitter::Error(noop()))
            .build(auth.clone())
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Server(_)));

        // right name, wrong variant
        let err = MessageHub::builder()
            .subscriber(events::MESSAGE_SENT, Subscriber::MessageSent(noop()))
            .emitter(events::ERROR, Emitter::Error(noop()))
            .emitter(events::CLIENT_CREATED, Emitter::ClientDisposed(noop()))
            .emitter(events::USER_JOINED, Emitter::UserJoined(noop()))
            .emitter(events::USER_LEFT, Emitter::UserLeft(noop()))
            .emitter(events::CLIENT_DISPOSED, Emitter::ClientDisposed(noop()))
            .build(auth)
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Server(_)));
    }

    #[test]
    fn test_accept_and_duplicate() {
        let registry = Arc::new(UserRegistry::new());
        registry.add("alice").unwrap();
        let hub = hub(&registry);

        let (tx1, _rx1) = unbounded_channel();
        let first = hub.accept(Some("alice"), tx1).unwrap();
        let (tx2, _rx2) = unbounded_channel();
        assert_eq!(
            hub.accept(Some("alice"), tx2).unwrap_err(),
            AppError::AuthDuplicateName
        );
        assert_eq!(hub.client_count(), 1);
        assert_eq!(hub.client("alice").unwrap().id(), first.id());

        let (tx3, _rx3) = unbounded_channel();
        assert_eq!(hub.accept(Some("ghost"), tx3).unwrap_err(), AppError::AuthNo);
        let (tx4, _rx4) = unbounded_channel();
        assert_eq!(hub.accept(None, tx4).unwrap_err(), AppError::AuthNo);
    }

    #[test]
    fn test_presence_and_disconnect() {
        let registry = Arc::new(UserRegistry::new());
        registry.add("alice").unwrap();
        registry.add("bob").unwrap();
        let hub = hub(&registry);

        let (tx_a, mut rx_a) = unbounded_channel();
        let alice = hub.accept(Some("alice"), tx_a).unwrap();
        let (tx_b, mut rx_b) = unbounded_channel();
        hub.accept(Some("bob"), tx_b).unwrap();

        let joined: serde_json::Value = serde_json::from_str(&rx_a.try_recv().unwrap()).unwrap();
        assert_eq!(joined["event"], "user-joined");
        assert_eq!(joined["data"]["username"], "bob");
        assert!(rx_b.try_recv().is_err());

        hub.disconnect(alice.id()).unwrap();
        assert!(!hub.is_connected("alice"));
        let left: serde_json::Value = serde_json::from_str(&rx_b.try_recv().unwrap()).unwrap();
        assert_eq!(left["event"], "user-left");
        assert_eq!(left["data"]["username"], "alice");
        assert!(hub.disconnect(alice.id()).is_none());
    }

    #[test]
    fn test_bad_frames_report_error_and_keep_connection() {
        let registry = Arc::new(UserRegistry::new());
        registry.add("alice").unwrap();
        let hub = hub(&registry);
        let (tx, mut rx) = unbounded_channel();
        let alice = hub.accept(Some("alice"), tx).unwrap();

        for frame in ["not json", r#"{"event":"nope","data":{}}"#, r#"{"event":"message-sent","data":{}}"#] {
            hub.handle_message(&alice, frame);
            let reply: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(reply["event"], "error");
            assert_eq!(reply["data"]["code"], "MSG_BAD");
        }
        assert!(hub.is_connected("alice"));
    }

    #[test]
    fn test_broadcast_unknown_event_and_mismatched_args() {
        let registry = Arc::new(UserRegistry::new());
        registry.add("alice").unwrap();
        let hub = hub(&registry);
        let (tx, mut rx) = unbounded_channel();
        hub.accept(Some("alice"), tx).unwrap();

        assert!(matches!(
            hub.broadcast("nope", &[], EmitArgs::ClientCreated),
            Err(AppError::Server(_))
        ));

        // a variant mismatch surfaces per recipient as an opaque server error
        hub.broadcast(events::USER_JOINED, &[], EmitArgs::ClientDisposed).unwrap();
        let reply: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(reply["data"]["code"], "SERVER");
        assert_eq!(reply["data"]["message"], "");
    }

    #[test]
    fn test_closed_recipient_does_not_block_others() {
        let registry = Arc::new(UserRegistry::new());
        for name in ["alice", "bob", "carol"] {
            registry.add(name).unwrap();
        }
        let hub = hub(&registry);
        let (tx_a, rx_a) = unbounded_channel();
        hub.accept(Some("alice"), tx_a).unwrap();
        let (tx_b, mut rx_b) = unbounded_channel();
        hub.accept(Some("bob"), tx_b).unwrap();
        drop(rx_a);

        let (tx_c, _rx_c) = unbounded_channel();
        hub.accept(Some("carol"), tx_c).unwrap();

        let joined: serde_json::Value = serde_json::from_str(&rx_b.try_recv().unwrap()).unwrap();
        assert_eq!(joined["data"]["username"], "carol");
    }
}
