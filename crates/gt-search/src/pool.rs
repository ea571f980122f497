//! Pool of grid variants shared by concurrent leaf evaluations.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use tracing::debug;

use gt_types::{config_error, internal_error, GridState, RaoResult};

/// Fixed set of grid variants cloned from a base snapshot.
///
/// A variant is checked out exclusively with [`GridStatePool::acquire`] and
/// goes back to the pool, reset to the base snapshot, when the returned
/// guard is dropped.
pub struct GridStatePool {
    base: GridState,
    slots: Vec<Mutex<GridState>>,
    free_tx: Sender<usize>,
    free_rx: Receiver<usize>,
}

impl GridStatePool {
    pub fn new(base: &GridState, size: usize) -> RaoResult<Self> {
        if size == 0 {
            return Err(config_error!("grid state pool needs at least one slot"));
        }
        let (free_tx, free_rx) = bounded(size);
        let mut slots = Vec::with_capacity(size);
        for index in 0..size {
            slots.push(Mutex::new(
                base.variant(format!("{}-variant-{index}", base.variant_id)),
            ));
            free_tx
                .send(index)
                .map_err(|e| internal_error!("cannot register pool slot {}: {}", index, e))?;
        }
        debug!("Created grid state pool with {} variants", size);
        Ok(Self {
            base: base.clone(),
            slots,
            free_tx,
            free_rx,
        })
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn available(&self) -> usize {
        self.free_rx.len()
    }

    pub fn base(&self) -> &GridState {
        &self.base
    }

    /// Blocks until a variant is free.
    pub fn acquire(&self) -> RaoResult<PooledGrid<'_>> {
        let slot = self
            .free_rx
            .recv()
            .map_err(|e| internal_error!("grid state pool is closed: {}", e))?;
        Ok(self.checkout(slot))
    }

    pub fn try_acquire(&self) -> Option<PooledGrid<'_>> {
        self.free_rx.try_recv().ok().map(|slot| self.checkout(slot))
    }

    fn checkout(&self, slot: usize) -> PooledGrid<'_> {
        PooledGrid {
            pool: self,
            slot,
            grid: self.slots[slot].lock(),
        }
    }
}

/// Exclusive access to one pooled variant.
pub struct PooledGrid<'a> {
    pool: &'a GridStatePool,
    slot: usize,
    grid: MutexGuard<'a, GridState>,
}

impl PooledGrid<'_> {
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Deref for PooledGrid<'_> {
    type Target = GridState;

    fn deref(&self) -> &GridState {
        &self.grid
    }
}

impl DerefMut for PooledGrid<'_> {
    fn deref_mut(&mut self) -> &mut GridState {
        &mut self.grid
    }
}

impl Drop for PooledGrid<'_> {
    fn drop(&mut self) {
        self.grid.reset_to(&self.pool.base);
        // The receiver lives in the pool, so the channel cannot be closed here.
        let _ = self.pool.free_tx.send(self.slot);
    }
}
