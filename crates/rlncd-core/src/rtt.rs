//! RTT / control-kind outstanding tracker.
//!
//! Grounded in `ctrl_tracker.hpp`: a low-level tracker accumulates an
//! outstanding-wait count and a running (ever-expanding, not EWMA) average
//! sample, and a per-kind state machine (ACK/REQ) arms/disarms it on top.

use std::sync::Mutex;
use std::time::Duration;

use quanta::Instant;

/// Which control traffic kind a [`ControlTracker`] slot is tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    Ack,
    Req,
}

/// Low-level outstanding-count + running-average tracker, one per control
/// kind, shared across every decoder in the process. Thread-safe behind a
/// single mutex (mirrors the original's separate atomic count / mutexed
/// rtt pair, unified here since both are always touched together).
pub struct RttTracker {
    inner: Mutex<Inner>,
    fallback_ms: f64,
}

struct Inner {
    outstanding: usize,
    sample_count: u64,
    sample_sum_ms: f64,
}

impl RttTracker {
    /// `fallback_ms` seeds `avg()` until at least one sample has landed.
    pub fn new(fallback_ms: f64) -> RttTracker {
        RttTracker {
            inner: Mutex::new(Inner {
                outstanding: 0,
                sample_count: 0,
                sample_sum_ms: 0.0,
            }),
            fallback_ms,
        }
    }

    pub fn wait(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.outstanding += 1;
    }

    pub fn done(&self, sample_ms: f64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.outstanding = inner.outstanding.saturating_sub(1);
        inner.sample_count += 1;
        inner.sample_sum_ms += sample_ms;
    }

    pub fn outstanding(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).outstanding
    }

    /// Running average of every sample ever recorded, or the fallback seed
    /// while no samples have landed yet.
    pub fn avg(&self) -> f64 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.sample_count == 0 {
            self.fallback_ms
        } else {
            inner.sample_sum_ms / inner.sample_count as f64
        }
    }
}

/// ACTIVE/WAITING state machine layered over a pair of [`RttTracker`]s (one
/// per [`ControlKind`]), shared by every decoder. Grounded in
/// `ctrl_tracker_api`: calling a kind's `wait()` while ACTIVE arms the
/// underlying tracker and transitions to WAITING; repeated `wait()` calls
/// while already WAITING are no-ops (counted by the caller as repeats, not
/// re-armed here). `done()` while WAITING disarms and folds the elapsed time
/// since `wait()` into the tracker's running average; `done()` while already
/// ACTIVE is a no-op.
pub struct ControlTracker {
    ack: RttTracker,
    req: RttTracker,
    ack_state: Mutex<KindState>,
    req_state: Mutex<KindState>,
}

struct KindState {
    waiting: bool,
    armed_at: Option<Instant>,
}

impl ControlTracker {
    pub fn new(fallback_ms: f64) -> ControlTracker {
        ControlTracker {
            ack: RttTracker::new(fallback_ms),
            req: RttTracker::new(fallback_ms),
            ack_state: Mutex::new(KindState {
                waiting: false,
                armed_at: None,
            }),
            req_state: Mutex::new(KindState {
                waiting: false,
                armed_at: None,
            }),
        }
    }

    fn tracker(&self, kind: ControlKind) -> &RttTracker {
        match kind {
            ControlKind::Ack => &self.ack,
            ControlKind::Req => &self.req,
        }
    }

    fn state(&self, kind: ControlKind) -> &Mutex<KindState> {
        match kind {
            ControlKind::Ack => &self.ack_state,
            ControlKind::Req => &self.req_state,
        }
    }

    pub fn wait(&self, kind: ControlKind) {
        let mut state = self.state(kind).lock().unwrap_or_else(|e| e.into_inner());
        if state.waiting {
            return;
        }
        self.tracker(kind).wait();
        state.waiting = true;
        state.armed_at = Some(Instant::now());
    }

    pub fn done(&self, kind: ControlKind) {
        let mut state = self.state(kind).lock().unwrap_or_else(|e| e.into_inner());
        if !state.waiting {
            return;
        }
        let elapsed_ms = state
            .armed_at
            .map(|t| t.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        self.tracker(kind).done(elapsed_ms);
        state.waiting = false;
        state.armed_at = None;
    }

    pub fn outstanding(&self, kind: ControlKind) -> usize {
        self.tracker(kind).outstanding()
    }

    pub fn avg(&self, kind: ControlKind) -> f64 {
        self.tracker(kind).avg()
    }

    pub fn is_waiting(&self, kind: ControlKind) -> bool {
        self.state(kind).lock().unwrap_or_else(|e| e.into_inner()).waiting
    }

    /// Adaptive timeout for `kind`, §4.B: `avg(kind) / (1 + sum of all
    /// outstanding counts)`, optionally scaled. The `1 +` bias avoids
    /// dividing by zero when nothing is outstanding.
    pub fn adaptive_timeout(&self, kind: ControlKind, scale: f64) -> Duration {
        let blocked = 1 + self.outstanding(ControlKind::Ack) + self.outstanding(ControlKind::Req);
        let timeout_ms = scale * self.avg(kind) / blocked as f64;
        Duration::from_secs_f64((timeout_ms / 1000.0).max(0.0))
    }
}
