//! Registry of live guards, addressed by small generation-checked ids.
//!
//! Compiled scripts carry the id of their guard and look it up on the hot
//! path. Lookups are lock-free: the slot table is swapped wholesale when it
//! grows, so a reader always sees a complete table. Allocation and release
//! serialize on a mutex; both happen once per compiled script.

use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::{Arc, LazyLock};

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;

use crate::error::{BoxError, Result};
use crate::runtime::guard::{GuardHandle, RuntimeGuard};
use crate::runtime::limits::GuardLimits;

const INITIAL_SLOTS: usize = 16;
const GROWTH_FACTOR: f64 = 1.2;

/// Identifies a live guard.
///
/// The index is reused after the guard is freed; the generation is bumped on
/// every reuse so stale ids are rejected instead of resolving to a stranger's
/// guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuardId {
    index: NonZeroU32,
    generation: u32,
}

impl GuardId {
    /// Slot index, never zero.
    pub fn index(self) -> u32 {
        self.index.get()
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for GuardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gid:{}.{}", self.index, self.generation)
    }
}

struct Entry {
    generation: u32,
    guard: GuardHandle,
}

struct State {
    free: VecDeque<NonZeroU32>,
    next_index: Option<NonZeroU32>,
    /// Current generation per index.
    generations: Vec<u32>,
    live: usize,
}

pub struct GuardRegistry {
    slots: ArcSwap<Vec<ArcSwapOption<Entry>>>,
    state: Mutex<State>,
}

impl fmt::Debug for GuardRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardRegistry")
            .field("live", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl Default for GuardRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardRegistry {
    pub fn new() -> Self {
        Self {
            slots: ArcSwap::from_pointee(empty_slots(INITIAL_SLOTS)),
            state: Mutex::new(State {
                free: VecDeque::new(),
                next_index: NonZeroU32::new(1),
                generations: vec![0; INITIAL_SLOTS],
                live: 0,
            }),
        }
    }

    /// Create and register a guard initialized with `limits`.
    ///
    /// Released indexes are reused before new ones are minted.
    pub fn allocate(&self, limits: &GuardLimits) -> Result<(GuardId, GuardHandle)> {
        let mut state = self.state.lock();

        let index = match state.free.pop_front() {
            Some(index) => index,
            None => {
                let index = state.next_index.ok_or(BoxError::RegistryFull)?;
                state.next_index = index.checked_add(1);
                index
            }
        };

        let slot = index.get() as usize;
        self.ensure_capacity(slot);
        if state.generations.len() <= slot {
            state.generations.resize(slot + 1, 0);
        }

        let gid = GuardId {
            index,
            generation: state.generations[slot],
        };
        let guard = Arc::new(RuntimeGuard::new(limits));
        self.slots.load()[slot].store(Some(Arc::new(Entry {
            generation: gid.generation,
            guard: Arc::clone(&guard),
        })));
        state.live += 1;

        tracing::trace!(%gid, "guard allocated");
        Ok((gid, guard))
    }

    /// Allocate a guard whose id is freed when the reservation is dropped.
    pub fn reserve(self: &Arc<Self>, limits: &GuardLimits) -> Result<GidReservation> {
        let (gid, guard) = self.allocate(limits)?;
        Ok(GidReservation {
            registry: Arc::clone(self),
            gid,
            guard,
        })
    }

    /// Look up a live guard.
    pub fn get(&self, gid: GuardId) -> Result<GuardHandle> {
        let slots = self.slots.load();
        slots
            .get(gid.index() as usize)
            .and_then(|slot| {
                slot.load()
                    .as_ref()
                    .filter(|entry| entry.generation == gid.generation)
                    .map(|entry| Arc::clone(&entry.guard))
            })
            .ok_or(BoxError::InvalidGuardId(gid))
    }

    /// Release a guard. Its index becomes available for reuse.
    pub fn free(&self, gid: GuardId) -> Result<()> {
        let mut state = self.state.lock();
        let slot = gid.index() as usize;

        let slots = self.slots.load();
        let current = slots.get(slot).and_then(|s| s.load_full());
        match current {
            Some(entry) if entry.generation == gid.generation => {}
            _ => return Err(BoxError::InvalidGuardId(gid)),
        }

        slots[slot].store(None);
        state.generations[slot] = gid.generation.wrapping_add(1);
        state.free.push_back(gid.index);
        state.live -= 1;

        tracing::trace!(%gid, "guard freed");
        Ok(())
    }

    /// Number of live guards.
    pub fn len(&self) -> usize {
        self.state.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current size of the slot table.
    pub fn capacity(&self) -> usize {
        self.slots.load().len()
    }

    /// Grow the slot table until `slot` fits. Callers hold the state lock.
    fn ensure_capacity(&self, slot: usize) {
        let current = self.slots.load_full();
        if slot < current.len() {
            return;
        }

        let mut len = current.len();
        while len <= slot {
            len = ((len as f64 * GROWTH_FACTOR) as usize).max(len + 1);
        }

        let mut grown = Vec::with_capacity(len);
        grown.extend(current.iter().map(|s| ArcSwapOption::new(s.load_full())));
        grown.resize_with(len, ArcSwapOption::empty);
        self.slots.store(Arc::new(grown));
    }
}

fn empty_slots(len: usize) -> Vec<ArcSwapOption<Entry>> {
    let mut slots = Vec::with_capacity(len);
    slots.resize_with(len, ArcSwapOption::empty);
    slots
}

static GLOBAL_REGISTRY: LazyLock<Arc<GuardRegistry>> =
    LazyLock::new(|| Arc::new(GuardRegistry::new()));

/// The process-wide registry used when a compiler is not given its own.
pub fn global_registry() -> Arc<GuardRegistry> {
    Arc::clone(&GLOBAL_REGISTRY)
}

/// Owns a guard id for as long as a compiled script lives.
pub struct GidReservation {
    registry: Arc<GuardRegistry>,
    gid: GuardId,
    guard: GuardHandle,
}

impl GidReservation {
    pub fn gid(&self) -> GuardId {
        self.gid
    }

    pub fn guard(&self) -> &GuardHandle {
        &self.guard
    }

    pub fn registry(&self) -> &Arc<GuardRegistry> {
        &self.registry
    }
}

impl fmt::Debug for GidReservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GidReservation")
            .field("gid", &self.gid)
            .finish_non_exhaustive()
    }
}

impl Drop for GidReservation {
    fn drop(&mut self) {
        if let Err(e) = self.registry.free(self.gid) {
            tracing::warn!(gid = %self.gid, error = %e, "failed to release guard id");
        }
    }
}
