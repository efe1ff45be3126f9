//! Lifecycle supervisor
//!
//! Owns the accept loop and service teardown. Every connection runs in its
//! own task; a failing or panicking task is logged and reaped, nothing more.

use std::future::Future;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::delivery::DeliveryEngine;
use crate::error::RelayError;
use crate::handler::handle_connection;
use crate::server::RelayHandle;

/// Channel buffer size for relay commands
pub const CHANNEL_BUFFER_SIZE: usize = 256;

pub struct Supervisor {
    relay: RelayHandle,
    delivery: DeliveryEngine,
    shutdown_grace: Duration,
    connections: JoinSet<()>,
}

impl Supervisor {
    /// Start the relay actor for `config`
    pub fn new(config: &RelayConfig) -> Self {
        let delivery = DeliveryEngine::new(config.overflow_policy, config.queue_capacity);
        Self {
            relay: RelayHandle::spawn(delivery, CHANNEL_BUFFER_SIZE),
            delivery,
            shutdown_grace: config.shutdown_grace,
            connections: JoinSet::new(),
        }
    }

    pub fn relay(&self) -> &RelayHandle {
        &self.relay
    }

    /// Accept connections until `shutdown` resolves, then tear everything down
    pub async fn run(
        mut self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), RelayError> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("Accepted TCP connection from {}", addr);
                        let relay = self.relay.clone();
                        let delivery = self.delivery;
                        self.connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, relay, delivery).await {
                                warn!("Connection from {} ended with error: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                Some(joined) = self.connections.join_next() => {
                    if let Err(e) = joined {
                        error!("Connection task failed: {}", e);
                    }
                }
            }
        }

        drop(listener);
        self.shutdown().await
    }

    /// Close every connection, clear the directory, and wait for tasks to drain
    async fn shutdown(mut self) -> Result<(), RelayError> {
        match self.relay.shutdown().await {
            Ok(closed) => info!("Closed {} connections", closed),
            Err(e) => warn!("Relay already stopped: {}", e),
        }

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while self.connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} connection tasks still running after {:?}, aborting",
                self.connections.len(),
                self.shutdown_grace
            );
            self.connections.shutdown().await;
        }

        info!("Relay stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    use super::*;
    use crate::server::RelayStats;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    type RunTask = tokio::task::JoinHandle<Result<(), RelayError>>;

    async fn start() -> (SocketAddr, RelayHandle, oneshot::Sender<()>, RunTask) {
        start_with(RelayConfig::default()).await
    }

    async fn start_with(
        config: RelayConfig,
    ) -> (SocketAddr, RelayHandle, oneshot::Sender<()>, RunTask) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let supervisor = Supervisor::new(&config);
        let relay = supervisor.relay().clone();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(supervisor.run(listener, async move {
            let _ = stop_rx.await;
        }));
        (addr, relay, stop_tx, task)
    }

    async fn recv_json(client: &mut Client) -> Option<Value> {
        loop {
            let next = tokio::time::timeout(Duration::from_secs(2), client.next())
                .await
                .ok()??;
            match next.ok()? {
                Message::Text(text) => return serde_json::from_str(&text).ok(),
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let hello = recv_json(&mut client).await.unwrap();
        assert_eq!(hello["event"], "connected");
        client
    }

    async fn send(client: &mut Client, value: Value) {
        client.send(Message::text(value.to_string())).await.unwrap();
    }

    /// Read until the server closes the socket; false if it stays open
    async fn wait_closed(client: &mut Client) -> bool {
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(Ok(msg)) = client.next().await {
                if msg.is_close() {
                    break;
                }
            }
        })
        .await;
        drained.is_ok()
    }

    async fn wait_for(relay: &RelayHandle, expected: RelayStats) {
        for _ in 0..300 {
            if relay.stats().await.unwrap() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("relay never reached {:?}", expected);
    }

    #[tokio::test]
    async fn test_end_to_end_room_relay() {
        let (addr, relay, stop, task) = start().await;

        let mut a = connect(addr).await;
        send(&mut a, json!({"event": "join", "room": "lobby"})).await;
        let mut b = connect(addr).await;
        send(&mut b, json!({"event": "join", "room": "lobby"})).await;
        wait_for(&relay, RelayStats { connections: 2, rooms: 1 }).await;

        send(&mut a, json!({"event": "message", "room": "lobby", "payload": {"text": "hi"}})).await;
        let got = recv_json(&mut b).await.unwrap();
        assert_eq!(got["event"], "message");
        assert_eq!(got["payload"], json!({"text": "hi"}));

        // Per-connection order survives the round trip
        for n in 0..20 {
            send(&mut b, json!({"event": "message", "room": "lobby", "payload": n})).await;
        }
        for n in 0..20 {
            assert_eq!(recv_json(&mut a).await.unwrap()["payload"], json!(n));
        }

        a.close(None).await.unwrap();
        wait_for(&relay, RelayStats { connections: 1, rooms: 1 }).await;
        b.close(None).await.unwrap();
        wait_for(&relay, RelayStats { connections: 0, rooms: 0 }).await;

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frame_only_drops_sender() {
        let (addr, relay, stop, task) = start().await;

        let mut a = connect(addr).await;
        let mut b = connect(addr).await;
        send(&mut b, json!({"event": "join", "room": "r"})).await;
        wait_for(&relay, RelayStats { connections: 2, rooms: 1 }).await;

        a.send(Message::text("{not json")).await.unwrap();
        assert_eq!(recv_json(&mut a).await, None);
        wait_for(&relay, RelayStats { connections: 1, rooms: 1 }).await;

        let mut c = connect(addr).await;
        send(&mut c, json!({"event": "message", "room": "r", "payload": "still here"})).await;
        assert_eq!(recv_json(&mut b).await.unwrap()["payload"], "still here");

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_invalid_room_keeps_connection_open() {
        let (addr, relay, stop, task) = start().await;

        let mut a = connect(addr).await;
        send(&mut a, json!({"event": "join", "room": ""})).await;
        let err = recv_json(&mut a).await.unwrap();
        assert_eq!(err["event"], "error");
        assert_eq!(err["code"], "invalid_room_name");
        assert_eq!(relay.stats().await.unwrap().connections, 1);

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_clients() {
        let (addr, relay, stop, task) = start().await;

        let mut a = connect(addr).await;
        send(&mut a, json!({"event": "join", "room": "lobby"})).await;
        wait_for(&relay, RelayStats { connections: 1, rooms: 1 }).await;

        stop.send(()).unwrap();
        assert_eq!(recv_json(&mut a).await, None);
        task.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slow_consumer_socket_is_dropped() {
        let config = RelayConfig {
            queue_capacity: 2,
            shutdown_grace: Duration::from_secs(3),
            ..RelayConfig::default()
        };
        let (addr, relay, stop, task) = start_with(config).await;

        // Joins and then never reads
        let mut slow = connect(addr).await;
        send(&mut slow, json!({"event": "join", "room": "lobby"})).await;
        let mut flood = connect(addr).await;
        wait_for(&relay, RelayStats { connections: 2, rooms: 1 }).await;

        let chunk = "x".repeat(256 * 1024);
        for _ in 0..80 {
            send(
                &mut flood,
                json!({"event": "message", "room": "lobby", "payload": chunk.as_str()}),
            )
            .await;
        }
        wait_for(&relay, RelayStats { connections: 1, rooms: 0 }).await;

        assert!(wait_closed(&mut slow).await);

        let started = std::time::Instant::now();
        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_senders_keep_their_order() {
        const SENDERS: usize = 4;
        const PER_SENDER: i64 = 50;
        let config = RelayConfig {
            queue_capacity: 1024,
            ..RelayConfig::default()
        };
        let (addr, relay, stop, task) = start_with(config).await;

        let mut receiver = connect(addr).await;
        send(&mut receiver, json!({"event": "join", "room": "fan-in"})).await;
        wait_for(&relay, RelayStats { connections: 1, rooms: 1 }).await;

        let expected = SENDERS * PER_SENDER as usize;
        let collector = tokio::spawn(async move {
            let mut received = Vec::with_capacity(expected);
            while received.len() < expected {
                match recv_json(&mut receiver).await {
                    Some(value) => received.push(value["payload"].clone()),
                    None => break,
                }
            }
            received
        });

        let senders: Vec<_> = (0..SENDERS)
            .map(|from| {
                tokio::spawn(async move {
                    let mut client = connect(addr).await;
                    for n in 0..PER_SENDER {
                        let payload = json!({"from": from, "n": n});
                        send(
                            &mut client,
                            json!({"event": "message", "room": "fan-in", "payload": payload}),
                        )
                        .await;
                    }
                    client
                })
            })
            .collect();
        let mut clients = Vec::new();
        for sender in senders {
            clients.push(sender.await.unwrap());
        }

        let received = collector.await.unwrap();
        assert_eq!(received.len(), expected);
        for from in 0..SENDERS {
            let seq: Vec<i64> = received
                .iter()
                .filter(|p| p["from"] == from)
                .map(|p| p["n"].as_i64().unwrap())
                .collect();
            assert_eq!(seq, (0..PER_SENDER).collect::<Vec<i64>>());
        }

        drop(clients);
        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
