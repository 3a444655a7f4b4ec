//! Integration tests for the channel against an in-process fake ship.
//!
//! The fake ship implements just enough of the channel API to exercise the
//! real HTTP transport: login, PUT of command batches, the SSE event stream
//! and DELETE.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{post, put};
use axum::Router;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use urbit_channel::{
    login, Channel, ChannelCommand, ChannelConfig, ChannelError, SubscriptionEvent,
};

const COOKIE: &str = "urbauth-~zod=0v1.test";

#[derive(Default)]
struct FakeShip {
    batches: Mutex<Vec<Vec<ChannelCommand>>>,
    cookies: Mutex<Vec<Option<String>>>,
    deleted: Mutex<bool>,
    next_event_id: Mutex<u64>,
    sink: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    source: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
}

impl FakeShip {
    fn new() -> Arc<Self> {
        let ship = Self::default();
        let (tx, rx) = mpsc::unbounded_channel();
        *ship.sink.lock().unwrap() = Some(tx);
        *ship.source.lock().unwrap() = Some(rx);
        Arc::new(ship)
    }

    fn push(&self, frame: Value) {
        let mut next = self.next_event_id.lock().unwrap();
        *next += 1;
        let event = Event::default()
            .id(next.to_string())
            .data(frame.to_string());
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            let _ = sink.send(event);
        }
    }
}

async fn handle_login(body: String) -> impl IntoResponse {
    if body == "password=lidlut-tabwed-pillex-ridrup" {
        (
            StatusCode::NO_CONTENT,
            [(header::SET_COOKIE, format!("{}; Path=/; Max-Age=604800", COOKIE))],
        )
            .into_response()
    } else {
        StatusCode::BAD_REQUEST.into_response()
    }
}

async fn handle_put(
    State(ship): State<Arc<FakeShip>>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let batch: Vec<ChannelCommand> = match serde_json::from_str(&body) {
        Ok(batch) => batch,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    ship.cookies.lock().unwrap().push(
        headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    );

    for command in &batch {
        match command {
            ChannelCommand::Poke { id, mark, .. } if mark == "reject" => {
                ship.push(json!({"response": "poke", "id": id, "err": "bad mark"}))
            }
            ChannelCommand::Poke { id, .. } => {
                ship.push(json!({"response": "poke", "id": id, "ok": "ok"}))
            }
            ChannelCommand::Subscribe { id, path, .. } => {
                ship.push(json!({"response": "subscribe", "id": id, "ok": "ok"}));
                ship.push(json!({"response": "diff", "id": id, "json": {"path": path}}));
            }
            ChannelCommand::Unsubscribe { subscription, .. } => {
                ship.push(json!({"response": "quit", "id": subscription}))
            }
            ChannelCommand::Ack { .. } => {}
        }
    }
    ship.batches.lock().unwrap().push(batch);
    StatusCode::OK
}

async fn handle_events(State(ship): State<Arc<FakeShip>>) -> impl IntoResponse {
    let Some(rx) = ship.source.lock().unwrap().take() else {
        return StatusCode::CONFLICT.into_response();
    };
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok::<_, Infallible>(event), rx))
    });
    Sse::new(stream).into_response()
}

async fn handle_delete(State(ship): State<Arc<FakeShip>>) -> StatusCode {
    *ship.deleted.lock().unwrap() = true;
    StatusCode::OK
}

async fn start_fake_ship() -> (Arc<FakeShip>, SocketAddr) {
    let ship = FakeShip::new();
    let app = Router::new()
        .route("/~/login", post(handle_login))
        .route(
            "/~/channel/:uid",
            put(handle_put).get(handle_events).delete(handle_delete),
        )
        .with_state(ship.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (ship, addr)
}

fn config_for(addr: SocketAddr) -> ChannelConfig {
    ChannelConfig::new("http://127.0.0.1", addr.port())
}

#[tokio::test]
async fn test_login_returns_session_cookie() {
    let (_ship, addr) = start_fake_ship().await;
    let cookies = login(&config_for(addr), "lidlut-tabwed-pillex-ridrup")
        .await
        .unwrap();
    assert_eq!(cookies, vec![COOKIE.to_string()]);
}

#[tokio::test]
async fn test_login_with_wrong_code_fails() {
    let (_ship, addr) = start_fake_ship().await;
    let result = login(&config_for(addr), "wrong-code").await;
    assert!(matches!(result, Err(ChannelError::Auth { .. })));
}

#[tokio::test]
async fn test_subscribe_and_poke_over_http() {
    let (ship, addr) = start_fake_ship().await;
    let config = config_for(addr).with_cookies(vec![COOKIE.to_string()]);
    let channel = Channel::new(&config).unwrap();

    let mut sub = channel
        .subscribe("zod", "language-server", "/primary")
        .await
        .unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), sub.next())
        .await
        .unwrap();
    assert_eq!(
        first,
        Some(SubscriptionEvent::Diff(json!({"path": "/primary"})))
    );

    tokio::time::timeout(
        Duration::from_secs(5),
        channel.poke("zod", "language-server", "noun", json!(1)),
    )
    .await
    .unwrap()
    .unwrap();

    let rejected = tokio::time::timeout(
        Duration::from_secs(5),
        channel.poke("zod", "language-server", "reject", json!(1)),
    )
    .await
    .unwrap();
    assert!(matches!(rejected, Err(ChannelError::PokeFailed { .. })));

    // The events seen so far were acknowledged with the pokes.
    let batches = ship.batches.lock().unwrap().clone();
    assert!(batches
        .iter()
        .skip(1)
        .any(|batch| matches!(batch.first(), Some(ChannelCommand::Ack { .. }))));
    assert!(ship
        .cookies
        .lock()
        .unwrap()
        .iter()
        .all(|cookie| cookie.as_deref() == Some(COOKIE)));

    channel.unsubscribe(sub.id()).await.unwrap();
    let quit = tokio::time::timeout(Duration::from_secs(5), sub.next())
        .await
        .unwrap();
    assert_eq!(quit, Some(SubscriptionEvent::Quit));

    channel.close().await.unwrap();
    assert!(*ship.deleted.lock().unwrap());
}
