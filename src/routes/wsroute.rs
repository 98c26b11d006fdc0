use crate::error::AppError;
use crate::middleware::guards::request_token;
use crate::state::AppState;
use crate::websocket::{Client, MessageHub};
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio_stream::wrappers::UnboundedReceiverStream;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

// One actor per connection; the hub holds the matching Client.
struct WsSession {
    hub: Arc<MessageHub>,
    client: Client,
    outbound: Option<UnboundedReceiver<String>>,
    hb: Instant,
}

impl WsSession {
    fn new(hub: Arc<MessageHub>, client: Client, outbound: UnboundedReceiver<String>) -> Self {
        Self {
            hub,
            client,
            outbound: Some(outbound),
            hb: Instant::now(),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(user = act.client.name(), "websocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::debug!(user = self.client.name(), client_id = %self.client.id(), "websocket session started");
        self.hb(ctx);
        if let Some(rx) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.hub.disconnect(self.client.id());
    }
}

// Outbound frames queued by the hub
impl StreamHandler<String> for WsSession {
    fn handle(&mut self, text: String, ctx: &mut Self::Context) {
        ctx.text(text);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                self.hub.handle_message(&self.client, &text);
            }
            Ok(ws::Message::Binary(_)) => {
                self.hub.emit_error(
                    &self.client,
                    AppError::MsgBad("binary frames are not supported".into()),
                );
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!(user = self.client.name(), ?reason, "websocket close received");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                tracing::warn!(user = self.client.name(), error = %e, "websocket protocol error");
                self.hub
                    .emit_error(&self.client, AppError::MsgBad(format!("protocol error: {e}")));
                ctx.stop();
            }
        }
    }
}

/// Upgrades to a WebSocket bound to the caller's user. The token comes from
/// `?token=` or the `Authorization` header.
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let token = query.token.as_deref().or_else(|| request_token(&req));

    let (tx, rx) = unbounded_channel();
    let client = state.hub.accept(token, tx)?;

    let session = WsSession::new(state.hub.clone(), client.clone(), rx);
    ws::start(session, &req, stream).map_err(|e| {
        tracing::warn!(user = client.name(), error = %e, "websocket handshake failed");
        state.hub.disconnect(client.id());
        e
    })
}
