//! Room-based WebSocket Message Relay Library
//!
//! A WebSocket relay built with tokio-tungstenite: clients join named rooms
//! and broadcast JSON payloads to the other members of a room.
//!
//! # Features
//! - WebSocket connection handling
//! - Lazily created rooms, removed when their last member leaves
//! - One room per connection; joining another room replaces the membership
//! - Broadcast to any room by name, excluding the sender
//! - Bounded per-connection outbound queues with a slow-consumer policy
//! - Per-connection fault isolation and graceful shutdown
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `RelayServer` is the central actor owning the registry and room directory
//! - Each connection has a `handler` task communicating with the actor
//! - Outbound frames go through per-connection queues drained by writer tasks
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use room_relay::{RelayConfig, Supervisor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RelayConfig::from_env();
//!     let listener = TcpListener::bind(config.listen_addr()).await.unwrap();
//!
//!     Supervisor::new(&config)
//!         .run(listener, async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod config;
pub mod connection;
pub mod delivery;
pub mod error;
pub mod handler;
pub mod message;
pub mod registry;
pub mod room;
pub mod router;
pub mod server;
pub mod supervisor;
pub mod types;

// Re-export main types for convenience
pub use config::RelayConfig;
pub use connection::{Connection, ConnectionState};
pub use delivery::{DeliveryEngine, OverflowPolicy};
pub use error::RelayError;
pub use handler::handle_connection;
pub use message::{ClientEvent, ErrorCode, Frame, ServerEvent};
pub use registry::ConnectionRegistry;
pub use room::{Room, RoomDirectory};
pub use router::Router;
pub use server::{RelayHandle, RelayServer, RelayStats, ServerCommand};
pub use supervisor::Supervisor;
pub use types::{ConnectionId, RoomName};
