use std::{collections::VecDeque, fmt};

use bytes::Bytes;

use crate::{
    MAX_CONNECTIONS,
    error::{Error, Result},
    handler::SharedMessageHandler,
};

/// Index of a slot in the pool. Stable for the lifetime of a connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(usize);

impl ConnectionId {
    #[must_use]
    pub fn slot(self) -> usize { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Accepted, waiting for the upgrade request.
    AwaitingHandshake,
    Open,
    /// A Close frame is queued; becomes `Closed` once the queue drains.
    Closing,
    /// Terminal. The slot may be reused by the next accept.
    Closed,
}

/// Bounded FIFO of encoded frames waiting for the transport.
pub(crate) struct OutboundQueue {
    frames: VecDeque<Bytes>,
    depth: usize,
}

impl OutboundQueue {
    fn new(depth: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(depth),
            depth,
        }
    }

    pub(crate) fn push(&mut self, frame: Bytes) -> Result<()> {
        if self.frames.len() >= self.depth {
            return Err(Error::QueueFull);
        }
        self.frames.push_back(frame);
        Ok(())
    }

    /// Close frames are queued past the bound so a saturated connection can still be closed.
    pub(crate) fn push_close(&mut self, frame: Bytes) { self.frames.push_back(frame); }

    pub(crate) fn front(&self) -> Option<&Bytes> { self.frames.front() }

    pub(crate) fn pop_front(&mut self) -> Option<Bytes> { self.frames.pop_front() }

    pub(crate) fn clear(&mut self) { self.frames.clear(); }

    pub(crate) fn len(&self) -> usize { self.frames.len() }

    pub(crate) fn is_empty(&self) -> bool { self.frames.is_empty() }
}

/// One accepted transport session.
pub struct Connection<H> {
    handle: H,
    phase: Phase,
    pub(crate) outbound: OutboundQueue,
    pub(crate) on_message: Option<SharedMessageHandler>,
}

impl<H> Connection<H> {
    pub fn handle(&self) -> &H { &self.handle }

    #[must_use]
    pub fn phase(&self) -> Phase { self.phase }

    /// Frames queued but not yet accepted by the transport.
    #[must_use]
    pub fn pending(&self) -> usize { self.outbound.len() }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        tracing::trace!(from = ?self.phase, to = ?phase, "phase transition");
        self.phase = phase;
    }
}

impl<H: fmt::Debug> fmt::Debug for Connection<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("handle", &self.handle)
            .field("phase", &self.phase)
            .field("pending", &self.outbound.len())
            .finish_non_exhaustive()
    }
}

/// Fixed table of `N` connection records. Records are only overwritten when a
/// new accept reuses a `Closed` slot, so late events still find them.
pub struct ConnectionPool<H, const N: usize = MAX_CONNECTIONS> {
    slots: [Option<Connection<H>>; N],
    queue_depth: usize,
}

impl<H: Eq + fmt::Debug, const N: usize> ConnectionPool<H, N> {
    #[must_use]
    pub fn new(queue_depth: usize) -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Takes the first empty or `Closed` slot and puts it in `AwaitingHandshake`.
    pub fn allocate(
        &mut self,
        handle: H,
        on_message: Option<SharedMessageHandler>,
    ) -> Result<ConnectionId> {
        let Some(slot) = self
            .slots
            .iter()
            .position(|s| s.as_ref().is_none_or(|c| c.phase == Phase::Closed))
        else {
            tracing::warn!(capacity = N, "no free connection slot");
            return Err(Error::CapacityExceeded);
        };

        tracing::debug!(slot, handle = ?handle, "slot allocated");
        self.slots[slot] = Some(Connection {
            handle,
            phase: Phase::AwaitingHandshake,
            outbound: OutboundQueue::new(self.queue_depth),
            on_message,
        });
        Ok(ConnectionId(slot))
    }

    /// Looks a session up by handle identity. A live record wins over a
    /// `Closed` one holding an equal handle.
    pub fn find(&self, handle: &H) -> Result<ConnectionId> {
        let mut closed = None;
        for (slot, conn) in self.slots.iter().enumerate() {
            let Some(conn) = conn else { continue };
            if conn.handle == *handle {
                if conn.phase != Phase::Closed {
                    return Ok(ConnectionId(slot));
                }
                closed.get_or_insert(ConnectionId(slot));
            }
        }
        closed.ok_or(Error::NotFound)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection<H>> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection<H>> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Sets the slot to `Closed` and drops anything still queued. The record
    /// stays in place. Returns the phase it left, or `None` for an empty slot.
    pub fn mark_closed(&mut self, id: ConnectionId) -> Option<Phase> {
        let conn = self.get_mut(id)?;
        let previous = conn.phase;
        conn.set_phase(Phase::Closed);
        conn.outbound.clear();
        Some(previous)
    }

    #[must_use]
    pub fn count_open(&self) -> usize { self.open_ids().count() }

    pub fn open_ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.slots.iter().enumerate().filter_map(|(slot, conn)| {
            conn.as_ref()
                .filter(|c| c.phase == Phase::Open)
                .map(|_| ConnectionId(slot))
        })
    }
}
