//! Bar-graph indicator display.
//!
//! Two mutually exclusive modes: loudness (driven from the audio tick) and
//! an idle chase animation (driven by its own fixed-period timer task, so it
//! keeps running while playback is stopped or silent).  Every mode switch
//! clears all indicators so the two drivers can never leave a stale pattern
//! behind.
//!
//! The hardware seam is the [`IndicatorSink`] trait; implementations must
//! not block, since loudness updates arrive on the audio thread.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::trace;

/// Receives the full indicator pattern after every display update.
pub trait IndicatorSink: Send + Sync {
    fn apply(&self, states: &[bool]);
}

/// Sink that traces transitions instead of touching hardware.  Useful on
/// development machines without indicator wiring.
pub struct TraceSink;

impl IndicatorSink for TraceSink {
    fn apply(&self, states: &[bool]) {
        trace!(on = states.iter().filter(|s| **s).count(), total = states.len(), "indicators");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Loudness,
    Idle,
}

struct DisplayState {
    mode: Mode,
    cursor: usize,
    states: Vec<bool>,
}

pub struct DisplayDriver {
    sink: Box<dyn IndicatorSink>,
    inner: Mutex<DisplayState>,
    count: usize,
}

impl DisplayDriver {
    pub fn new(count: usize, sink: Box<dyn IndicatorSink>) -> Self {
        let count = count.max(1);
        Self {
            sink,
            inner: Mutex::new(DisplayState {
                mode: Mode::Loudness,
                cursor: 0,
                states: vec![false; count],
            }),
            count,
        }
    }

    fn lock(&self) -> MutexGuard<'_, DisplayState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Loudness-mode update from the audio tick.  Non-blocking: if the lock
    /// is contended (idle timer mid-switch) the update is skipped — the next
    /// tick brings a fresh level anyway.  Ignored entirely while idle mode
    /// is active.
    pub fn set_level(&self, level: f32) {
        let Ok(mut st) = self.inner.try_lock() else {
            return;
        };
        if st.mode != Mode::Loudness {
            return;
        }
        let on_count = (level.clamp(0.0, 1.0) * self.count as f32) as usize;
        for (idx, s) in st.states.iter_mut().enumerate() {
            *s = idx < on_count;
        }
        self.sink.apply(&st.states);
    }

    /// Switch to the idle animation.  No-op if already idle.
    pub fn start_idle(&self) {
        let mut st = self.lock();
        if st.mode == Mode::Idle {
            return;
        }
        st.mode = Mode::Idle;
        st.cursor = 0;
        Self::clear(&mut st);
        self.sink.apply(&st.states);
    }

    /// Leave idle mode and hand the display back to loudness updates.
    /// All indicators are turned off; the next `set_level` repaints them.
    pub fn stop_idle(&self) {
        let mut st = self.lock();
        if st.mode == Mode::Loudness {
            return;
        }
        st.mode = Mode::Loudness;
        Self::clear(&mut st);
        self.sink.apply(&st.states);
    }

    /// One step of the chase animation: a single lit indicator walking
    /// circularly.  Called by the idle ticker task; no-op outside idle mode.
    pub fn advance_idle(&self) {
        let mut st = self.lock();
        if st.mode != Mode::Idle {
            return;
        }
        let cursor = st.cursor;
        for (idx, s) in st.states.iter_mut().enumerate() {
            *s = idx == cursor;
        }
        st.cursor = (cursor + 1) % self.count;
        self.sink.apply(&st.states);
    }

    fn clear(st: &mut DisplayState) {
        st.states.iter_mut().for_each(|s| *s = false);
    }

    /// Spawn the idle ticker.  It runs for the life of the process and
    /// only acts while idle mode is active, which keeps the animation timer
    /// fully decoupled from the audio clock.
    pub fn spawn_idle_ticker(self: Arc<Self>, period: Duration) -> tokio::task::AbortHandle {
        let driver = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                driver.advance_idle();
            }
        })
        .abort_handle()
    }
}
