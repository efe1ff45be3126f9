//! Delivery engine
//!
//! One bounded FIFO outbound queue per connection. The relay actor pushes
//! frames without ever waiting; the connection's writer task drains them.
//! What happens when a queue is full is decided by [`OverflowPolicy`].

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{watch, Notify};
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::RelayError;
use crate::message::Frame;

/// Default per-connection queue bound
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Slow-consumer policy for a full outbound queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Discard the oldest queued frame to make room
    DropOldest,
    /// Discard the incoming frame
    DropNewest,
    /// Tear the slow connection down
    #[default]
    DisconnectConsumer,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OverflowPolicy::DropOldest => "drop-oldest",
            OverflowPolicy::DropNewest => "drop-newest",
            OverflowPolicy::DisconnectConsumer => "disconnect-consumer",
        })
    }
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop-oldest" => Ok(OverflowPolicy::DropOldest),
            "drop-newest" => Ok(OverflowPolicy::DropNewest),
            "disconnect-consumer" => Ok(OverflowPolicy::DisconnectConsumer),
            other => Err(format!("unknown overflow policy {:?}", other)),
        }
    }
}

/// Result of a successful push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Frame appended
    Queued,
    /// Frame appended after evicting the oldest queued frame
    DisplacedOldest,
    /// Queue full, frame discarded
    Rejected,
}

impl Admission {
    /// Whether the frame ended up in the queue
    pub fn accepted(self) -> bool {
        !matches!(self, Admission::Rejected)
    }
}

#[derive(Debug)]
struct QueueState {
    frames: VecDeque<Frame>,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
    /// Flips to true once the queue is closed from either side
    teardown: watch::Sender<bool>,
    capacity: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Producer half of a connection's outbound queue
#[derive(Debug, Clone)]
pub struct Outbox {
    shared: Arc<Shared>,
}

/// Consumer half, owned by the connection's writer task
#[derive(Debug)]
pub struct OutboxReceiver {
    shared: Arc<Shared>,
}

/// Create a bounded outbound queue
pub fn outbox(capacity: usize) -> (Outbox, OutboxReceiver) {
    let shared = Arc::new(Shared {
        state: Mutex::new(QueueState {
            frames: VecDeque::with_capacity(capacity),
            closed: false,
        }),
        notify: Notify::new(),
        teardown: watch::channel(false).0,
        capacity: capacity.max(1),
    });
    (
        Outbox {
            shared: shared.clone(),
        },
        OutboxReceiver { shared },
    )
}

/// Reasons a push can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// Consumer gone or queue closed
    Closed,
    /// Full under `DisconnectConsumer`
    Full,
}

impl Outbox {
    /// Append a frame, applying `policy` if the queue is full
    pub fn push(&self, frame: Frame, policy: OverflowPolicy) -> Result<Admission, PushError> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(PushError::Closed);
        }

        let admission = if state.frames.len() < self.shared.capacity {
            state.frames.push_back(frame);
            Admission::Queued
        } else {
            match policy {
                OverflowPolicy::DropOldest => {
                    state.frames.pop_front();
                    state.frames.push_back(frame);
                    Admission::DisplacedOldest
                }
                OverflowPolicy::DropNewest => Admission::Rejected,
                OverflowPolicy::DisconnectConsumer => return Err(PushError::Full),
            }
        };
        drop(state);

        self.shared.notify.notify_one();
        Ok(admission)
    }

    /// Stop accepting frames; the receiver drains what is queued, then ends
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.notify.notify_one();
        self.shared.teardown.send_replace(true);
    }

    /// Resolves once the queue has been closed
    ///
    /// Unlike [`OutboxReceiver::recv`], this does not depend on the writer
    /// making progress, so it also fires for a writer stuck on a full socket.
    pub async fn closed(&self) {
        let mut teardown = self.shared.teardown.subscribe();
        // The sender lives in `Shared`, so this only ends when the flag is set
        let _ = teardown.wait_for(|closed| *closed).await;
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Number of frames waiting to be written
    pub fn len(&self) -> usize {
        self.shared.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

impl OutboxReceiver {
    /// Next frame in FIFO order
    ///
    /// Returns None once the queue is closed and fully drained.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.lock();
                if let Some(frame) = state.frames.pop_front() {
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Next queued frame, if any, without waiting
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.shared.lock().frames.pop_front()
    }
}

impl Drop for OutboxReceiver {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.closed = true;
            state.frames.clear();
        }
        self.shared.teardown.send_replace(true);
    }
}

/// Applies the configured slow-consumer policy to every enqueue
#[derive(Debug, Clone, Copy)]
pub struct DeliveryEngine {
    policy: OverflowPolicy,
    capacity: usize,
}

impl Default for DeliveryEngine {
    fn default() -> Self {
        Self::new(OverflowPolicy::default(), DEFAULT_QUEUE_CAPACITY)
    }
}

impl DeliveryEngine {
    pub fn new(policy: OverflowPolicy, capacity: usize) -> Self {
        Self {
            policy,
            capacity: capacity.max(1),
        }
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Open a queue sized for a new connection
    pub fn open(&self) -> (Outbox, OutboxReceiver) {
        outbox(self.capacity)
    }

    /// Queue a frame for one connection
    ///
    /// `Err` means the connection must be torn down. Dropped frames under the
    /// drop policies are reported through the returned [`Admission`].
    pub fn enqueue(&self, conn: &Connection, frame: Frame) -> Result<Admission, RelayError> {
        match conn.outbox().push(frame, self.policy) {
            Ok(Admission::Queued) => Ok(Admission::Queued),
            Ok(admission) => {
                debug!("Queue full for {}, {} applied", conn.id, self.policy);
                Ok(admission)
            }
            Err(PushError::Closed) => Err(RelayError::TransportSendFailure(conn.id)),
            Err(PushError::Full) => {
                warn!("Slow consumer {} exceeded {} queued frames", conn.id, self.capacity);
                Err(RelayError::QueueOverflow {
                    id: conn.id,
                    policy: self.policy,
                })
            }
        }
    }
}
