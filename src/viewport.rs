//! Viewport controller: decides when scrolling needs new data.
//!
//! Visible-region events are debounced through an explicit
//! `Idle -> Pending -> Idle` state machine. The controller never reads the
//! clock itself; callers pass `Instant`s, which keeps it deterministic under test.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::types::Viewport;

/// Default quiet period before a scroll burst turns into a fetch.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Extra rows/columns loaded around the visible region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buffer {
    pub rows: u32,
    pub cols: u32,
}

/// Memory pressure level reported by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MemoryState {
    #[default]
    Normal,
    Warning,
    Critical,
}

impl MemoryState {
    pub fn from_flags(warning: bool, critical: bool) -> Self {
        if critical {
            Self::Critical
        } else if warning {
            Self::Warning
        } else {
            Self::Normal
        }
    }

    pub const fn buffer(self) -> Buffer {
        match self {
            Self::Normal => Buffer { rows: 100, cols: 30 },
            Self::Warning => Buffer { rows: 50, cols: 20 },
            Self::Critical => Buffer { rows: 30, cols: 15 },
        }
    }
}

/// Source of memory-pressure signals.
pub trait MemoryPressure: Send + Sync {
    fn warning(&self) -> bool;
    fn critical(&self) -> bool;

    fn state(&self) -> MemoryState {
        MemoryState::from_flags(self.warning(), self.critical())
    }
}

/// Flag-based [`MemoryPressure`] the host flips from its observer.
#[derive(Debug, Default)]
pub struct MemorySignals {
    warning: AtomicBool,
    critical: AtomicBool,
}

impl MemorySignals {
    pub fn set_warning(&self, on: bool) {
        self.warning.store(on, Ordering::Relaxed);
    }

    pub fn set_critical(&self, on: bool) {
        self.critical.store(on, Ordering::Relaxed);
    }
}

impl MemoryPressure for MemorySignals {
    fn warning(&self) -> bool {
        self.warning.load(Ordering::Relaxed)
    }

    fn critical(&self) -> bool {
        self.critical.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DebounceState {
    Idle,
    Pending { deadline: Instant, region: Viewport },
}

/// One fetch to issue. Results must be applied with [`ViewportController::apply_result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    pub seq: u64,
    /// Region the user can see
    pub visible: Viewport,
    /// Visible region grown by the adaptive buffer
    pub region: Viewport,
}

#[derive(Debug)]
pub struct ViewportController {
    debounce: Duration,
    state: DebounceState,
    last_requested: Option<Viewport>,
    last_loaded: Option<Viewport>,
    next_seq: u64,
    applied_seq: u64,
    memory: MemoryState,
}

impl Default for ViewportController {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl ViewportController {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            state: DebounceState::Idle,
            last_requested: None,
            last_loaded: None,
            next_seq: 0,
            applied_seq: 0,
            memory: MemoryState::Normal,
        }
    }

    pub fn set_memory_state(&mut self, memory: MemoryState) {
        if memory != self.memory {
            tracing::debug!(?memory, "Viewport buffer resized for memory pressure");
            self.memory = memory;
        }
    }

    pub fn memory_state(&self) -> MemoryState {
        self.memory
    }

    pub fn last_loaded(&self) -> Option<Viewport> {
        self.last_loaded
    }

    /// When the pending debounce fires, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Idle => None,
            DebounceState::Pending { deadline, .. } => Some(deadline),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, DebounceState::Pending { .. })
    }

    /// Record a visible-region event. Returns `false` when the region equals
    /// the last requested one and nothing was scheduled.
    pub fn on_visible_region(&mut self, region: Viewport, now: Instant) -> bool {
        if self.last_requested == Some(region) {
            return false;
        }
        self.last_requested = Some(region);
        self.state = DebounceState::Pending {
            deadline: now + self.debounce,
            region,
        };
        true
    }

    /// Fire the debounce if its deadline has passed, returning a fetch when
    /// the region is not already covered by loaded data.
    pub fn poll(&mut self, now: Instant) -> Option<FetchRequest> {
        let DebounceState::Pending { deadline, region } = self.state else {
            return None;
        };
        if now < deadline {
            return None;
        }
        self.state = DebounceState::Idle;

        if !self.needs_reload(region) {
            tracing::trace!(?region, "Visible region already loaded");
            return None;
        }
        Some(self.begin_fetch(region))
    }

    /// Whether `region` has any edge outside the loaded data.
    pub fn needs_reload(&self, region: Viewport) -> bool {
        self.last_loaded.map_or(true, |loaded| !loaded.contains(&region))
    }

    /// Issue a fetch immediately, bypassing the debounce.
    pub fn begin_fetch(&mut self, visible: Viewport) -> FetchRequest {
        let buffer = self.memory.buffer();
        self.next_seq += 1;
        FetchRequest {
            seq: self.next_seq,
            visible,
            region: visible.expand(buffer.rows, buffer.cols),
        }
    }

    /// Accept a completed fetch unless a newer one was already applied.
    pub fn apply_result(&mut self, request: &FetchRequest) -> bool {
        if request.seq <= self.applied_seq {
            tracing::debug!(
                seq = request.seq,
                applied = self.applied_seq,
                "Discarding stale viewport result"
            );
            return false;
        }
        self.applied_seq = request.seq;
        self.last_loaded = Some(request.region);
        true
    }

    /// Drop a pending debounce without firing it.
    pub fn cancel(&mut self) {
        self.state = DebounceState::Idle;
    }

    /// Forget all per-sheet state. Sequence numbers keep counting so results
    /// from the previous sheet stay stale.
    pub fn reset(&mut self) {
        self.cancel();
        self.last_requested = None;
        self.last_loaded = None;
        self.applied_seq = self.next_seq;
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_burst_keeps_only_latest() {
        let t0 = Instant::now();
        let mut vc = ViewportController::default();
        vc.on_visible_region(Viewport::new(1, 1, 40, 10), t0);
        vc.on_visible_region(Viewport::new(50, 1, 90, 10), t0 + ms(100));
        assert!(vc.poll(t0 + ms(350)).is_none());
        let fetch = vc.poll(t0 + ms(400)).unwrap();
        assert_eq!(fetch.visible, Viewport::new(50, 1, 90, 10));
        assert_eq!(fetch.region, Viewport::new(0, 0, 190, 40));
        assert!(vc.poll(t0 + ms(1000)).is_none());
    }

    #[test]
    fn test_identical_region_is_noop() {
        let t0 = Instant::now();
        let mut vc = ViewportController::default();
        let region = Viewport::new(1, 1, 40, 10);
        assert!(vc.on_visible_region(region, t0));
        let fetch = vc.poll(t0 + DEFAULT_DEBOUNCE).unwrap();
        vc.apply_result(&fetch);
        assert!(!vc.on_visible_region(region, t0 + ms(500)));
        assert!(vc.poll(t0 + ms(2000)).is_none());
    }

    #[test]
    fn test_contained_region_skips_fetch() {
        let t0 = Instant::now();
        let mut vc = ViewportController::default();
        vc.apply_result(&FetchRequest {
            seq: 1,
            visible: Viewport::new(0, 0, 1000, 50),
            region: Viewport::new(0, 0, 1000, 50),
        });
        vc.on_visible_region(Viewport::new(200, 0, 600, 20), t0);
        assert!(vc.poll(t0 + DEFAULT_DEBOUNCE).is_none());

        vc.on_visible_region(Viewport::new(950, 0, 1100, 20), t0);
        assert!(vc.poll(t0 + DEFAULT_DEBOUNCE).is_some());
    }

    #[test]
    fn test_last_writer_wins_by_sequence() {
        let mut vc = ViewportController::default();
        let first = vc.begin_fetch(Viewport::new(1, 1, 10, 10));
        let second = vc.begin_fetch(Viewport::new(500, 1, 510, 10));
        assert!(vc.apply_result(&second));
        assert!(!vc.apply_result(&first));
        assert_eq!(vc.last_loaded(), Some(second.region));
    }

    #[test]
    fn test_cancel_and_reset() {
        let t0 = Instant::now();
        let mut vc = ViewportController::default();
        let stale = vc.begin_fetch(Viewport::new(1, 1, 10, 10));
        vc.on_visible_region(Viewport::new(1, 1, 20, 10), t0);
        vc.cancel();
        assert!(vc.deadline().is_none());
        assert!(vc.poll(t0 + ms(1000)).is_none());

        vc.reset();
        assert!(!vc.apply_result(&stale));
        assert!(vc.needs_reload(Viewport::new(1, 1, 1, 1)));
        assert!(vc.on_visible_region(Viewport::new(1, 1, 20, 10), t0));
    }

    #[test]
    fn test_memory_pressure_shrinks_buffer() {
        let signals = MemorySignals::default();
        signals.set_warning(true);
        let mut vc = ViewportController::default();
        vc.set_memory_state(signals.state());
        let fetch = vc.begin_fetch(Viewport::new(100, 100, 120, 110));
        assert_eq!(fetch.region, Viewport::new(50, 80, 170, 130));

        signals.set_critical(true);
        assert_eq!(signals.state(), MemoryState::Critical);
        assert_eq!(signals.state().buffer(), Buffer { rows: 30, cols: 15 });
    }
}
