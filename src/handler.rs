//! WebSocket connection handler
//!
//! Handles one client connection: WebSocket handshake, registration with the
//! relay actor, and the read/write tasks. Whatever happens to this connection
//! stays here and is reported to the actor as a disconnect.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::connection::Connection;
use crate::delivery::{DeliveryEngine, OutboxReceiver};
use crate::error::RelayError;
use crate::message::{decode_client_event, Frame, ServerEvent};
use crate::server::RelayHandle;
use crate::types::ConnectionId;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Frames written per flush
const WRITE_BATCH: usize = 32;

/// How long a torn-down connection's writer may keep flushing
const CLOSE_DRAIN: Duration = Duration::from_millis(500);

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake, registers the connection, and pumps
/// events in both directions until either side ends or the relay tears the
/// connection down.
pub async fn handle_connection(
    stream: TcpStream,
    relay: RelayHandle,
    delivery: DeliveryEngine,
) -> Result<(), RelayError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, ws_receiver) = ws_stream.split();

    let connection_id = ConnectionId::new();
    let (outbox, outbox_rx) = delivery.open();
    let teardown = outbox.clone();

    // Register with RelayServer
    if let Err(e) = relay
        .connect(Connection::new(connection_id, outbox))
        .await
    {
        error!("Failed to register {} from {}: {}", connection_id, peer_addr, e);
        let _ = ws_sender.close().await;
        return Err(e);
    }
    info!("Connection {} established from {}", connection_id, peer_addr);

    let connected = Frame::encode(&ServerEvent::Connected {
        id: connection_id.to_string(),
    })?;
    if let Err(e) = ws_sender.send(Message::text(connected.as_str())).await {
        let _ = relay.disconnect(connection_id).await;
        return Err(e.into());
    }

    let mut read_task = tokio::spawn(read_loop(connection_id, ws_receiver, relay.clone()));
    let mut write_task = tokio::spawn(write_loop(connection_id, ws_sender, outbox_rx));

    // Wait for either task to complete
    tokio::select! {
        _ = &mut read_task => {
            debug!("Read task completed for {}", connection_id);
            write_task.abort();
        }
        _ = &mut write_task => {
            debug!("Write task completed for {}", connection_id);
            read_task.abort();
        }
        _ = teardown.closed() => {
            // Torn down by the relay; the writer may be stuck on a full socket
            debug!("Connection {} closed by relay", connection_id);
            read_task.abort();
            if tokio::time::timeout(CLOSE_DRAIN, &mut write_task).await.is_err() {
                debug!("Writer for {} did not drain, dropping socket", connection_id);
                write_task.abort();
            }
        }
    }

    // Always report, even if the relay already tore this connection down
    let _ = relay.disconnect(connection_id).await;

    info!("Connection {} closed", connection_id);

    Ok(())
}

/// WebSocket -> RelayServer, in arrival order
async fn read_loop(connection_id: ConnectionId, mut ws_receiver: WsSource, relay: RelayHandle) {
    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match decode_client_event(&text) {
                Ok(event) => {
                    if relay.event(connection_id, event).await.is_err() {
                        debug!("Relay closed, ending read task for {}", connection_id);
                        break;
                    }
                }
                Err(e) => {
                    warn!("Malformed frame from {}: {}", connection_id, e);
                    let _ = relay.fault(connection_id, e).await;
                    break;
                }
            },
            Ok(Message::Close(_)) => {
                debug!("Connection {} sent close frame", connection_id);
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // Pong replies are queued by tungstenite itself
            }
            Ok(_) => {
                debug!("Ignoring non-text frame from {}", connection_id);
            }
            Err(e) => {
                error!("WebSocket error for {}: {}", connection_id, e);
                break;
            }
        }
    }
    debug!("Read task ended for {}", connection_id);
}

/// Outbound queue -> WebSocket
///
/// Frames already queued are written in batches with a single flush. Ends
/// when the queue is closed and drained, or the socket fails.
async fn write_loop(connection_id: ConnectionId, mut ws_sender: WsSink, mut outbox: OutboxReceiver) {
    while let Some(frame) = outbox.recv().await {
        if let Err(e) = write_batch(&mut ws_sender, &mut outbox, frame).await {
            debug!("WebSocket send failed for {}: {}", connection_id, e);
            return;
        }
    }
    debug!("Write task ended for {}", connection_id);

    // Send close frame when done
    let _ = ws_sender.close().await;
}

async fn write_batch(
    ws_sender: &mut WsSink,
    outbox: &mut OutboxReceiver,
    first: Frame,
) -> Result<(), RelayError> {
    ws_sender.feed(Message::text(first.as_str())).await?;
    for _ in 1..WRITE_BATCH {
        let Some(frame) = outbox.try_recv() else {
            break;
        };
        ws_sender.feed(Message::text(frame.as_str())).await?;
    }
    ws_sender.flush().await?;
    Ok(())
}
