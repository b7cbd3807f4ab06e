//! Subscriber connection lifecycle.
//!
//! # Data Flow
//! ```text
//!                 ┌──────────────────┐
//!  hub outbox ──▶ │  delivery loop   │ ──▶ text frames, pings ──▶ peer
//!                 └──────────────────┘
//!                 ┌──────────────────┐
//!  peer ────────▶ │  liveness loop   │  (pongs refresh the read deadline)
//!                 └──────────────────┘
//! ```
//!
//! # Design Decisions
//! - Liveness runs as its own task; delivery runs on the connection task
//! - Whichever loop ends first cancels the other; teardown happens once
//! - Messages queued since the last write go out as one burst, one flush
//! - A write burst that misses the write deadline is fatal to the subscriber

use std::fmt::Display;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::HubConfig;
use crate::hub::fanout::{FanoutHub, Subscription};
use crate::hub::message::Message;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("no pong received within {0:?}")]
    ReadTimeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Timing for one subscriber connection.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub ping_interval: Duration,
    pub pong_wait: Duration,
    pub write_wait: Duration,
}

impl From<&HubConfig> for ConnectionSettings {
    fn from(config: &HubConfig) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            pong_wait: config.pong_wait(),
            write_wait: config.write_wait(),
        }
    }
}

/// Register an upgraded websocket with the hub and pump messages until
/// either side fails.
pub async fn serve_subscriber(socket: WebSocket, hub: FanoutHub, settings: ConnectionSettings) {
    let mut subscription = match hub.subscribe().await {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting subscriber");
            return;
        }
    };
    let id = subscription.id();
    tracing::info!(subscriber = %id, "Subscriber connected");

    let (mut sink, stream) = socket.split();
    let mut liveness = tokio::spawn(liveness_loop(stream, settings.pong_wait));

    let outcome = tokio::select! {
        result = delivery_loop(&mut sink, &mut subscription, &settings) => result,
        joined = &mut liveness => joined
            .unwrap_or_else(|e| Err(ConnectionError::Transport(e.to_string()))),
    };

    liveness.abort();
    hub.unsubscribe(id);

    match outcome {
        Ok(()) => tracing::info!(subscriber = %id, "Subscriber disconnected"),
        Err(e) => tracing::warn!(subscriber = %id, error = %e, "Subscriber dropped"),
    }
}

/// Drain the outbox to the peer, pinging every `ping_interval`.
///
/// Returns `Ok(())` after sending a Close frame once the hub closes the
/// outbox (eviction or shutdown).
pub async fn delivery_loop<S, E>(
    sink: &mut S,
    subscription: &mut Subscription,
    settings: &ConnectionSettings,
) -> Result<(), ConnectionError>
where
    S: Sink<WsMessage, Error = E> + Unpin,
    E: Display,
{
    let mut ping = tokio::time::interval_at(
        Instant::now() + settings.ping_interval,
        settings.ping_interval,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = subscription.recv() => {
                let Some(first) = message else {
                    let _ = write_burst(sink, [WsMessage::Close(None)], settings.write_wait).await;
                    return Ok(());
                };

                let mut burst: Vec<WsMessage> = encode(&first).into_iter().collect();
                while let Some(more) = subscription.try_recv() {
                    burst.extend(encode(&more));
                }
                write_burst(sink, burst, settings.write_wait).await?;
            }
            _ = ping.tick() => {
                write_burst(sink, [WsMessage::Ping(Bytes::new())], settings.write_wait).await?;
            }
        }
    }
}

/// Read from the peer only to notice it going away. A pong pushes the read
/// deadline out by `pong_wait`; other frames are ignored.
pub async fn liveness_loop<S, E>(mut stream: S, pong_wait: Duration) -> Result<(), ConnectionError>
where
    S: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    let mut deadline = Instant::now() + pong_wait;
    loop {
        match tokio::time::timeout_at(deadline, stream.next()).await {
            Err(_) => return Err(ConnectionError::ReadTimeout(pong_wait)),
            Ok(None) | Ok(Some(Ok(WsMessage::Close(_)))) => return Ok(()),
            Ok(Some(Err(e))) => return Err(ConnectionError::Transport(e.to_string())),
            Ok(Some(Ok(WsMessage::Pong(_)))) => deadline = Instant::now() + pong_wait,
            Ok(Some(Ok(_))) => {}
        }
    }
}

fn encode(message: &Message) -> Option<WsMessage> {
    match message.to_json() {
        Ok(json) => Some(WsMessage::Text(json.into())),
        Err(e) => {
            tracing::warn!(kind = message.kind(), error = %e, "Skipping unencodable message");
            None
        }
    }
}

async fn write_burst<S, E>(
    sink: &mut S,
    frames: impl IntoIterator<Item = WsMessage>,
    limit: Duration,
) -> Result<(), ConnectionError>
where
    S: Sink<WsMessage, Error = E> + Unpin,
    E: Display,
{
    let write = async {
        for frame in frames {
            sink.feed(frame).await?;
        }
        sink.flush().await
    };

    match tokio::time::timeout(limit, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Transport(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use futures_util::stream;
    use std::convert::Infallible;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    #[derive(Default)]
    struct Recorder {
        frames: Vec<WsMessage>,
        flushes: usize,
    }

    impl Sink<WsMessage> for Recorder {
        type Error = Infallible;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(mut self: Pin<&mut Self>, item: WsMessage) -> Result<(), Infallible> {
            self.frames.push(item);
            Ok(())
        }

        fn poll_flush(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            self.flushes += 1;
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }
    }

    /// A peer that never accepts a frame.
    struct Stalled;

    impl Sink<WsMessage> for Stalled {
        type Error = Infallible;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _: WsMessage) -> Result<(), Infallible> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }
    }

    fn settings() -> ConnectionSettings {
        ConnectionSettings::from(&HubConfig::default())
    }

    #[tokio::test]
    async fn queued_messages_go_out_as_one_burst_then_close() {
        let shutdown = Shutdown::new();
        let (hub, task) = FanoutHub::spawn(&HubConfig::default(), shutdown.subscribe());
        let mut subscription = hub.subscribe().await.unwrap();

        for i in 0..3 {
            hub.broadcast("order.created", i, "test");
        }
        while hub.stats().delivered < 3 {
            tokio::task::yield_now().await;
        }
        shutdown.trigger();
        task.await.unwrap();

        let mut recorder = Recorder::default();
        let result = delivery_loop(&mut recorder, &mut subscription, &settings()).await;
        assert_eq!(result, Ok(()));

        assert_eq!(recorder.frames.len(), 4);
        for (i, frame) in recorder.frames[..3].iter().enumerate() {
            let WsMessage::Text(text) = frame else {
                panic!("expected text frame, got {frame:?}");
            };
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(value["type"], "order.created");
            assert_eq!(value["data"], i);
        }
        assert!(matches!(recorder.frames[3], WsMessage::Close(None)));
        assert_eq!(recorder.flushes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_is_pinged() {
        let shutdown = Shutdown::new();
        let (hub, _task) = FanoutHub::spawn(&HubConfig::default(), shutdown.subscribe());
        let mut subscription = hub.subscribe().await.unwrap();
        let mut recorder = Recorder::default();
        let settings = settings();

        let run = delivery_loop(&mut recorder, &mut subscription, &settings);
        let _ = tokio::time::timeout(Duration::from_secs(120), run).await;

        let pings = recorder
            .frames
            .iter()
            .filter(|f| matches!(f, WsMessage::Ping(_)))
            .count();
        assert_eq!(pings, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_peer_hits_write_deadline() {
        let shutdown = Shutdown::new();
        let (hub, _task) = FanoutHub::spawn(&HubConfig::default(), shutdown.subscribe());
        let mut subscription = hub.subscribe().await.unwrap();
        hub.broadcast("order.created", 1, "test");

        let result = delivery_loop(&mut Stalled, &mut subscription, &settings()).await;
        assert_eq!(result, Err(ConnectionError::WriteTimeout(Duration::from_secs(10))));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let silent = stream::pending::<Result<WsMessage, Infallible>>();
        let result = liveness_loop(silent, Duration::from_secs(60)).await;
        assert_eq!(result, Err(ConnectionError::ReadTimeout(Duration::from_secs(60))));
    }

    #[tokio::test(start_paused = true)]
    async fn pongs_extend_the_read_deadline() {
        let start = Instant::now();
        let pongs = stream::unfold(0u32, |n| async move {
            if n == 3 {
                return None;
            }
            tokio::time::sleep(Duration::from_secs(40)).await;
            Some((Ok::<_, Infallible>(WsMessage::Pong(Bytes::new())), n + 1))
        })
        .chain(stream::pending());

        let result = liveness_loop(Box::pin(pongs), Duration::from_secs(60)).await;
        assert_eq!(result, Err(ConnectionError::ReadTimeout(Duration::from_secs(60))));
        assert!(start.elapsed() >= Duration::from_secs(180));
    }

    #[tokio::test]
    async fn close_frame_ends_liveness_cleanly() {
        let frames = stream::iter(vec![
            Ok::<_, Infallible>(WsMessage::Text("hello".into())),
            Ok(WsMessage::Close(None)),
        ]);
        assert_eq!(liveness_loop(frames, Duration::from_secs(60)).await, Ok(()));
    }
}
