// src/api/handlers/ws.rs
use actix::{Actor, StreamHandler, Handler, Message, Addr, AsyncContext};
use actix_web::{web, HttpRequest, HttpResponse, Error};
use actix_web_actors::ws;
use futures::StreamExt;
use futures::channel::mpsc::UnboundedReceiver;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::poller::PollTick;

/// One event of a running flow, pushed to every connected UI.
#[derive(Message, Clone, Debug, Serialize)]
#[rtype(result = "()")]
pub struct FlowUpdate {
    pub id: String,
    pub flow: &'static str,
    pub status: String,
    pub attempt: Option<u32>,
    pub detail: Option<String>,
}

impl FlowUpdate {
    pub fn new(id: impl Into<String>, flow: &'static str, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            flow,
            status: status.into(),
            attempt: None,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn from_tick(id: impl Into<String>, flow: &'static str, tick: PollTick) -> Self {
        match tick {
            PollTick::Pending { attempt } => Self {
                attempt: Some(attempt),
                ..Self::new(id, flow, "pending")
            },
            PollTick::TransportError { attempt, message } => Self {
                attempt: Some(attempt),
                detail: Some(message),
                ..Self::new(id, flow, "retrying")
            },
        }
    }
}

#[derive(Clone, Default)]
pub struct WsBroker {
    clients: Arc<RwLock<Vec<Addr<WsConnection>>>>,
}

impl WsBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, addr: Addr<WsConnection>) {
        let mut clients = self.clients.write().await;
        clients.push(addr);
    }

    pub async fn unregister(&self, addr: &Addr<WsConnection>) {
        let mut clients = self.clients.write().await;
        clients.retain(|c| c != addr);
    }

    pub async fn broadcast(&self, msg: FlowUpdate) {
        let clients = self.clients.read().await;
        for client in clients.iter() {
            client.do_send(msg.clone());
        }
    }
}

/// Relays poll progress of one flow to the WebSocket clients until the flow drops its sender.
pub fn forward_ticks(broker: WsBroker, id: String, flow: &'static str, mut ticks: UnboundedReceiver<PollTick>) {
    actix_web::rt::spawn(async move {
        while let Some(tick) = ticks.next().await {
            broker.broadcast(FlowUpdate::from_tick(id.clone(), flow, tick)).await;
        }
    });
}

pub struct WsConnection {
    broker: WsBroker,
}

impl WsConnection {
    pub fn new(broker: WsBroker) -> Self {
        Self { broker }
    }
}

impl Actor for WsConnection {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let addr = ctx.address();
        let broker = self.broker.clone();
        actix::spawn(async move {
            broker.register(addr).await;
        });
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        let addr = ctx.address();
        let broker = self.broker.clone();
        actix::spawn(async move {
            broker.unregister(&addr).await;
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsConnection {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Close(reason)) => ctx.close(reason),
            _ => (),
        }
    }
}

impl Handler<FlowUpdate> for WsConnection {
    type Result = ();

    fn handle(&mut self, msg: FlowUpdate, ctx: &mut Self::Context) {
        if let Ok(json) = serde_json::to_string(&msg) {
            ctx.text(json);
        }
    }
}

pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    broker: web::Data<WsBroker>,
) -> Result<HttpResponse, Error> {
    let conn = WsConnection::new(broker.get_ref().clone());
    ws::start(conn, &req, stream)
}
