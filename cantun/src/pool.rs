//! Reusable pool of frame slots for the UDP transmit path.

use crate::frame::CanTunnelFrame;

/// Number of slots seeded when a worker starts.
pub const INITIAL_POOL_SIZE: usize = 16;

/// Grow-only pool of CAN frame slots.
///
/// Slots move between the pool and the outbound buffer as plain values, so a
/// take is a pop from the free list and never allocates once the pool has
/// grown. An empty pool refills by its current total allocation (doubling).
/// Nothing is released until the pool is dropped.
#[derive(Default)]
pub struct FramePool {
    free: Vec<CanTunnelFrame>,
    total_allocated: usize,
}

impl FramePool {
    /// An empty pool. Call [`FramePool::grow`] to seed it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` fresh slots.
    pub fn grow(&mut self, count: usize) {
        self.free
            .resize(self.free.len() + count, CanTunnelFrame::default());
        self.total_allocated += count;
    }

    /// Take one slot, doubling the pool first when it has run dry.
    pub fn take(&mut self) -> CanTunnelFrame {
        if self.free.is_empty() {
            let step = if self.total_allocated == 0 {
                INITIAL_POOL_SIZE
            } else {
                self.total_allocated
            };
            self.grow(step);
        }
        self.free.pop().expect("pool refilled above")
    }

    /// Return a drained batch of slots, leaving `slots` empty.
    pub fn absorb(&mut self, slots: &mut Vec<CanTunnelFrame>) {
        self.free.append(slots);
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Slots allocated over the pool's lifetime.
    pub fn total_allocated(&self) -> usize {
        self.total_allocated
    }
}
