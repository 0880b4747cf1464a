//! Surface Registry - Connected UI Surfaces
//!
//! Tracks every surface listening to a Conductor and fans `ConductorMessage`s
//! out to them.
//!
//! # Architecture
//!
//! ```text
//!   Conductor ── broadcast(ConductorMessage) ──► SurfaceRegistry
//!                                                 │ id -> SurfaceHandle
//!                                                 │ (Arc<RwLock<HashMap>>)
//!            ┌────────────────────┬───────────────┴─────┐
//!            ▼                    ▼                     ▼
//!   `npc-studio chat`    socket client A       socket client B
//!        (conn-1)             (conn-2)              (conn-3)
//! ```
//!
//! [`SurfaceRegistry::subscribe`] is the usual entry point: it registers a
//! fresh channel and returns a [`Subscription`] guard that unregisters the
//! surface when dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::events::SurfaceType;
use crate::messages::ConductorMessage;

/// Capacity of the channel created by [`SurfaceRegistry::subscribe`]
pub const SURFACE_CHANNEL_CAPACITY: usize = 256;

/// Unique identifier for a surface connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection id
    #[must_use]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Raw counter value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Sending side of one registered surface
#[derive(Debug)]
pub struct SurfaceHandle {
    /// Registry key
    pub id: ConnectionId,
    /// Outbound message channel
    pub tx: mpsc::Sender<ConductorMessage>,
    /// Type of surface
    pub surface_type: SurfaceType,
    /// Registration time
    pub connected_at: Instant,
}

impl SurfaceHandle {
    /// Wrap a sender as a handle
    #[must_use]
    pub fn new(
        id: ConnectionId,
        tx: mpsc::Sender<ConductorMessage>,
        surface_type: SurfaceType,
    ) -> Self {
        Self {
            id,
            tx,
            surface_type,
            connected_at: Instant::now(),
        }
    }

    /// Non-blocking send; `false` if the channel is full or closed
    #[must_use]
    pub fn try_send(&self, message: ConductorMessage) -> bool {
        self.tx.try_send(message).is_ok()
    }

    /// Whether the receiving side is still alive
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Delivery tally of one broadcast
#[derive(Debug, Clone, Default)]
pub struct BroadcastResult {
    /// Surfaces that received the message
    pub successful: usize,
    /// Surfaces whose channel was closed or full
    pub failed_ids: Vec<ConnectionId>,
}

impl BroadcastResult {
    /// Whether every surface received the message
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed_ids.is_empty()
    }
}

/// Registry of connected surfaces
///
/// Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct SurfaceRegistry {
    inner: Arc<RwLock<HashMap<ConnectionId, SurfaceHandle>>>,
}

impl SurfaceRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a surface
    pub fn register(&self, handle: SurfaceHandle) -> ConnectionId {
        let id = handle.id;
        let surface = handle.surface_type.name().to_string();
        self.inner.write().insert(id, handle);
        tracing::info!(connection_id = %id, surface = %surface, "Surface registered");
        id
    }

    /// Remove a surface
    pub fn unregister(&self, id: &ConnectionId) -> Option<SurfaceHandle> {
        let handle = self.inner.write().remove(id);
        if handle.is_some() {
            tracing::info!(connection_id = %id, "Surface unregistered");
        }
        handle
    }

    /// Register a fresh channel and return its receiving end
    ///
    /// The surface stays registered until the returned guard is dropped.
    #[must_use]
    pub fn subscribe(
        &self,
        surface_type: SurfaceType,
    ) -> (Subscription, mpsc::Receiver<ConductorMessage>) {
        let (tx, rx) = mpsc::channel(SURFACE_CHANNEL_CAPACITY);
        let id = self.register(SurfaceHandle::new(ConnectionId::new(), tx, surface_type));
        let subscription = Subscription {
            id,
            registry: self.clone(),
        };
        (subscription, rx)
    }

    /// Number of registered surfaces
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether a connection is registered
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.inner.read().contains_key(id)
    }

    /// Change the recorded type of a surface
    pub fn update_surface_type(&self, id: &ConnectionId, surface_type: SurfaceType) {
        if let Some(handle) = self.inner.write().get_mut(id) {
            handle.surface_type = surface_type;
            tracing::debug!(connection_id = %id, "Surface type updated");
        }
    }

    /// Send to every surface without waiting
    ///
    /// A surface whose channel is full or closed misses the message and is
    /// unregistered. Its receiver drains what was queued, then ends.
    pub fn broadcast(&self, message: &ConductorMessage) -> BroadcastResult {
        let mut result = BroadcastResult::default();
        {
            let inner = self.inner.read();
            for (id, handle) in inner.iter() {
                if handle.try_send(message.clone()) {
                    result.successful += 1;
                } else {
                    result.failed_ids.push(*id);
                }
            }
        }

        for id in &result.failed_ids {
            tracing::warn!(connection_id = %id, "Surface not keeping up, unregistering");
            self.unregister(id);
        }
        result
    }
}

/// Keeps a surface registered; unregisters it on drop
#[derive(Debug)]
pub struct Subscription {
    id: ConnectionId,
    registry: SurfaceRegistry,
}

impl Subscription {
    /// Connection id of this surface
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
    }
}

impl fmt::Debug for SurfaceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceRegistry")
            .field("count", &self.count())
            .finish()
    }
}
