//! RelayServer actor implementation
//!
//! The central actor that owns all shared state: the connection registry and
//! the room directory. Connection handlers talk to it over an mpsc channel, so
//! every mutation is applied one command at a time without locks.

use std::ops::ControlFlow;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::connection::Connection;
use crate::delivery::DeliveryEngine;
use crate::error::RelayError;
use crate::message::ClientEvent;
use crate::router::Router;
use crate::types::ConnectionId;

/// Point-in-time relay counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub connections: usize,
    pub rooms: usize,
}

/// Commands sent from handlers to the RelayServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New connection accepted
    Connect {
        connection: Connection,
        reply: oneshot::Sender<Result<ConnectionId, RelayError>>,
    },
    /// Inbound event from a connection, in arrival order
    Event {
        connection_id: ConnectionId,
        event: ClientEvent,
    },
    /// Per-connection fault reported by its handler
    Fault {
        connection_id: ConnectionId,
        error: RelayError,
    },
    /// Connection closed by the peer or the transport
    Disconnect { connection_id: ConnectionId },
    /// Current counters
    Stats { reply: oneshot::Sender<RelayStats> },
    /// Close every connection, clear all rooms and stop
    Shutdown { reply: oneshot::Sender<usize> },
}

/// The main RelayServer actor
pub struct RelayServer {
    router: Router,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
}

impl RelayServer {
    /// Create a new RelayServer with the given delivery policy and command receiver
    pub fn new(delivery: DeliveryEngine, receiver: mpsc::Receiver<ServerCommand>) -> Self {
        Self {
            router: Router::new(delivery),
            receiver,
        }
    }

    /// Run the RelayServer event loop
    ///
    /// Processes commands until a `Shutdown` arrives or all senders are dropped.
    pub async fn run(mut self) {
        info!(
            "RelayServer started (overflow policy {})",
            self.router.delivery().policy()
        );

        while let Some(cmd) = self.receiver.recv().await {
            if self.handle_command(cmd).is_break() {
                info!("RelayServer shutting down");
                return;
            }
        }

        // Senders dropped without an explicit shutdown
        let closed = self.router.shutdown();
        info!("RelayServer shutting down, closed {} connections", closed);
    }

    /// Process a single command
    ///
    /// Breaks after `Shutdown`; nothing else stops the loop.
    fn handle_command(&mut self, cmd: ServerCommand) -> ControlFlow<()> {
        match cmd {
            ServerCommand::Connect { connection, reply } => {
                let result = self.router.connect(connection);
                if let Err(e) = &result {
                    error!("Registration rejected: {}", e);
                }
                let _ = reply.send(result);
            }
            ServerCommand::Event {
                connection_id,
                event,
            } => {
                if let Err(e) = self.router.handle_event(connection_id, event) {
                    self.router.reject(connection_id, &e);
                }
            }
            ServerCommand::Fault {
                connection_id,
                error,
            } => {
                self.router.reject(connection_id, &error);
            }
            ServerCommand::Disconnect { connection_id } => {
                if !self.router.disconnect(connection_id) {
                    debug!("Connection {} already torn down", connection_id);
                }
            }
            ServerCommand::Stats { reply } => {
                let _ = reply.send(RelayStats {
                    connections: self.router.registry().len(),
                    rooms: self.router.directory().room_count(),
                });
            }
            ServerCommand::Shutdown { reply } => {
                let closed = self.router.shutdown();
                info!("RelayServer closed {} connections", closed);
                let _ = reply.send(closed);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }
}

/// Cloneable client for the RelayServer actor
#[derive(Debug, Clone)]
pub struct RelayHandle {
    sender: mpsc::Sender<ServerCommand>,
}

impl RelayHandle {
    pub fn new(sender: mpsc::Sender<ServerCommand>) -> Self {
        Self { sender }
    }

    /// Spawn a RelayServer actor and return its handle
    pub fn spawn(delivery: DeliveryEngine, buffer: usize) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(buffer);
        tokio::spawn(RelayServer::new(delivery, cmd_rx).run());
        Self::new(cmd_tx)
    }

    async fn send(&self, cmd: ServerCommand) -> Result<(), RelayError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| RelayError::ChannelSend)
    }

    /// Register a connection and wait for the registry's answer
    pub async fn connect(&self, connection: Connection) -> Result<ConnectionId, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(ServerCommand::Connect { connection, reply }).await?;
        rx.await.map_err(|_| RelayError::ChannelSend)?
    }

    pub async fn event(
        &self,
        connection_id: ConnectionId,
        event: ClientEvent,
    ) -> Result<(), RelayError> {
        self.send(ServerCommand::Event {
            connection_id,
            event,
        })
        .await
    }

    pub async fn fault(
        &self,
        connection_id: ConnectionId,
        error: RelayError,
    ) -> Result<(), RelayError> {
        self.send(ServerCommand::Fault {
            connection_id,
            error,
        })
        .await
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) -> Result<(), RelayError> {
        self.send(ServerCommand::Disconnect { connection_id }).await
    }

    pub async fn stats(&self) -> Result<RelayStats, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(ServerCommand::Stats { reply }).await?;
        rx.await.map_err(|_| RelayError::ChannelSend)
    }

    /// Close all connections and stop the actor
    ///
    /// Returns how many connections were closed.
    pub async fn shutdown(&self) -> Result<usize, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(ServerCommand::Shutdown { reply }).await?;
        rx.await.map_err(|_| RelayError::ChannelSend)
    }
}
