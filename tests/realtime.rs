//! End-to-end tests for the WebSocket fan-out.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

mod common;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn subscribe(addr: SocketAddr) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    socket
}

/// Next JSON event, skipping control frames.
async fn next_event(socket: &mut Socket) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended before an event arrived: {other:?}"),
            }
        }
    })
    .await
    .expect("no event within 5s")
}

#[tokio::test]
async fn test_order_created_reaches_subscribers() {
    let legacy = common::unreachable_addr().await;
    let modern = common::start_programmable_backend(|_, path| async move {
        assert_eq!(path, "/orders");
        (201, r#"{"id":42,"status":"new"}"#.to_string())
    })
    .await;
    let (gateway, _shutdown) = common::start_gateway(common::gateway_config(legacy, modern)).await;
    let addr = gateway.local_addr();

    let mut first = subscribe(addr).await;
    let mut second = subscribe(addr).await;
    common::wait_for_subscribers(addr, 2).await;

    let res = common::client()
        .post(format!("http://{addr}/api/modern/orders"))
        .header("content-type", "application/json")
        .body(r#"{"sku":"A-1"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201);

    for socket in [&mut first, &mut second] {
        let event = next_event(socket).await;
        assert_eq!(event["type"], "order.created");
        assert_eq!(event["source"], "modern");
        assert_eq!(event["data"]["backend"], "modern");
        assert_eq!(event["data"]["order"]["id"], 42);
        assert!(event["timestamp"].as_str().is_some());
    }
}

#[tokio::test]
async fn test_breaker_events_are_published() {
    let legacy = common::start_programmable_backend(|_, _| async { (500, "down".to_string()) }).await;
    let modern = common::unreachable_addr().await;
    let mut config = common::gateway_config(legacy, modern);
    config.breakers.default.max_failures = 1;
    let (gateway, _shutdown) = common::start_gateway(config).await;
    let addr = gateway.local_addr();

    let mut socket = subscribe(addr).await;
    common::wait_for_subscribers(addr, 1).await;

    let client = common::client();
    let _ = client
        .get(format!("http://{addr}/api/legacy/orders"))
        .send()
        .await
        .unwrap();

    let opened = next_event(&mut socket).await;
    assert_eq!(opened["type"], "breaker.state_changed");
    assert_eq!(opened["data"]["name"], "legacy");
    assert_eq!(opened["data"]["from"], "closed");
    assert_eq!(opened["data"]["to"], "open");

    let res = client
        .post(format!("http://{addr}/admin/breakers/reset"))
        .bearer_auth(common::ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let reset = next_event(&mut socket).await;
    assert_eq!(reset["type"], "breaker.reset");
    assert_eq!(reset["source"], "admin");
    assert_eq!(reset["data"]["all"], true);
}

#[tokio::test]
async fn test_disconnected_subscriber_is_removed() {
    let legacy = common::unreachable_addr().await;
    let modern = common::unreachable_addr().await;
    let (gateway, _shutdown) = common::start_gateway(common::gateway_config(legacy, modern)).await;
    let addr = gateway.local_addr();

    let mut leaving = subscribe(addr).await;
    let _staying = subscribe(addr).await;
    common::wait_for_subscribers(addr, 2).await;

    leaving.close(None).await.unwrap();
    drop(leaving);
    common::wait_for_subscribers(addr, 1).await;
}

#[tokio::test]
async fn test_shutdown_closes_subscribers() {
    let legacy = common::unreachable_addr().await;
    let modern = common::unreachable_addr().await;
    let (gateway, shutdown) = common::start_gateway(common::gateway_config(legacy, modern)).await;
    let addr = gateway.local_addr();

    let mut socket = subscribe(addr).await;
    common::wait_for_subscribers(addr, 1).await;

    shutdown.trigger();

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "subscriber was not closed on shutdown");

    tokio::time::timeout(Duration::from_secs(5), gateway.wait())
        .await
        .expect("gateway did not stop")
        .unwrap();
}
