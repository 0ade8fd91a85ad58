//! Shared run-time state of one channel.
//!
//! The slot ring (and, for link sinks, the join state) sits behind one
//! async mutex. Every acquire is a check-and-reserve under that mutex; a
//! caller that cannot be served registers with the channel's [`Notify`]
//! *before* checking, so a release that lands in between is never lost.

use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::time::Instant;

use crate::error::MeshError;
use crate::fifo::{ChannelDecl, Port, RingError, SlotRing};
use crate::link::JoinState;
use crate::sim::StallPolicy;
use crate::tile::TileCoord;

pub(crate) struct ChannelCell {
    pub ring: SlotRing,
    pub join: Option<JoinState>,
}

/// Which side of the channel a task is acting on, for error reports.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Side {
    pub coord: TileCoord,
    pub port: Port,
}

pub(crate) struct ChannelRuntime {
    pub decl: ChannelDecl,
    cell: Mutex<ChannelCell>,
    notify: Notify,
}

impl ChannelRuntime {
    pub fn new(decl: ChannelDecl, join: Option<JoinState>) -> Self {
        let ring = SlotRing::new(decl.depth, decl.element.len(), decl.consumers.len());
        Self {
            decl,
            cell: Mutex::new(ChannelCell { ring, join }),
            notify: Notify::new(),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, ChannelCell> {
        self.cell.lock().await
    }

    /// Run `f` under the lock, then wake every waiter. Never waits for
    /// capacity; releases and closes go through here.
    pub async fn update<T>(&self, f: impl FnOnce(&mut ChannelCell) -> T) -> T {
        let out = {
            let mut cell = self.cell.lock().await;
            f(&mut *cell)
        };
        self.notify.notify_waiters();
        out
    }

    /// Retry `attempt` until it yields a value, suspending between tries
    /// until the opposite side changes the channel. A stall limit bounds
    /// the time spent without any change, not the whole acquire.
    pub async fn wait<T>(
        &self,
        side: Side,
        policy: StallPolicy,
        mut attempt: impl FnMut(&mut ChannelCell) -> Result<Option<T>, MeshError>,
    ) -> Result<T, MeshError> {
        let mut idle_since = Instant::now();
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let served = {
                let mut cell = self.cell.lock().await;
                attempt(&mut *cell)?
            };
            if let Some(value) = served {
                // a grant on one side may be what another waiter needs
                self.notify.notify_waiters();
                return Ok(value);
            }

            tracing::trace!(
                channel = %self.decl.name,
                tile = %side.coord,
                port = %side.port,
                "acquire suspended"
            );
            match policy {
                StallPolicy::Block => notified.await,
                StallPolicy::FailAfter(limit) => {
                    if tokio::time::timeout_at(idle_since + limit, notified).await.is_err() {
                        let waited_ms = idle_since.elapsed().as_millis() as u64;
                        tracing::warn!(
                            channel = %self.decl.name,
                            tile = %side.coord,
                            port = %side.port,
                            waited_ms,
                            "acquire stalled"
                        );
                        return Err(MeshError::Stalled {
                            coord: side.coord,
                            channel: self.decl.name.clone(),
                            port: side.port,
                            waited_ms,
                        });
                    }
                    idle_since = Instant::now();
                }
            }
        }
    }

    /// Attach tile and channel context to a ring violation.
    pub fn ring_error(&self, side: Side, err: RingError) -> MeshError {
        match err {
            RingError::CapacityExceeded {
                requested,
                held,
                depth,
            } => MeshError::CapacityExceeded {
                coord: side.coord,
                channel: self.decl.name.clone(),
                port: side.port,
                requested,
                held,
                depth,
            },
            RingError::ReleaseMismatch { requested, held } => MeshError::ReleaseMismatch {
                coord: side.coord,
                channel: self.decl.name.clone(),
                port: side.port,
                requested,
                held,
            },
        }
    }
}
