//! Shared engine state and the per-tick render path.
//!
//! The audio device calls [`EngineShared::render_block`] once per block and
//! that call must finish inside the block period, so everything it touches
//! is either an atomic or sits behind a `try_lock`.  A tick that cannot get
//! a consistent view emits silence instead of waiting.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use glowbox_proto::protocol::{clamp_volume, PlaybackState, PlayerStatus, Source};
use tracing::{debug, info};

use crate::display::DisplayDriver;
use crate::loudness::LoudnessMeter;
use crate::pipeline::PcmTap;

const BYTES_PER_SAMPLE: usize = 2;

/// State shared between the player command loop (writer) and the audio tick
/// (reader).  Playback state and volume are plain atomics; the tap slot is a
/// mutex the tick only ever `try_lock`s, so a control-side swap can never
/// stall the audio thread.
pub struct EngineShared {
    state: AtomicU8,
    /// Volume as f32 bit pattern, already clamped on store.
    volume: AtomicU32,
    tap: Mutex<Option<PcmTap>>,
    /// Current source, for status reporting only — never read on the tick.
    source: Mutex<Option<Source>>,
    underruns: AtomicU64,
    short_reads: AtomicU64,
    /// Latch so stream end is logged once, not once per tick.
    ended_logged: AtomicBool,
}

impl EngineShared {
    pub fn new(initial_volume: f32) -> Self {
        Self {
            state: AtomicU8::new(PlaybackState::Stopped.to_bits()),
            volume: AtomicU32::new(clamp_volume(initial_volume).to_bits()),
            tap: Mutex::new(None),
            source: Mutex::new(None),
            underruns: AtomicU64::new(0),
            short_reads: AtomicU64::new(0),
            ended_logged: AtomicBool::new(false),
        }
    }

    pub fn playback_state(&self) -> PlaybackState {
        PlaybackState::from_bits(self.state.load(Ordering::Acquire))
    }

    pub fn set_playback_state(&self, state: PlaybackState) {
        self.state.store(state.to_bits(), Ordering::Release);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Clamp and store; returns the value actually applied.
    pub fn set_volume(&self, v: f32) -> f32 {
        let clamped = clamp_volume(v);
        self.volume.store(clamped.to_bits(), Ordering::Relaxed);
        clamped
    }

    fn lock_control<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Install the tap of a freshly started pipeline.  From the tick's point
    /// of view the swap is atomic: it sees the old tap, `None`, or the new
    /// tap, never anything in between.
    pub fn install_tap(&self, tap: PcmTap) {
        *Self::lock_control(&self.tap) = Some(tap);
        self.ended_logged.store(false, Ordering::Relaxed);
    }

    /// Remove the active tap (stop / replacement).  Any bytes the old
    /// pipeline had buffered go with it.
    pub fn clear_tap(&self) {
        *Self::lock_control(&self.tap) = None;
    }

    pub fn set_source(&self, source: Option<Source>) {
        *Self::lock_control(&self.source) = source;
    }

    pub fn status(&self) -> PlayerStatus {
        PlayerStatus {
            state: self.playback_state(),
            volume: self.volume(),
            source: Self::lock_control(&self.source).clone(),
            underruns: self.underruns.load(Ordering::Relaxed),
            short_reads: self.short_reads.load(Ordering::Relaxed),
        }
    }

    /// Fill one output block.  Called from the audio callback; bounded time,
    /// no allocation once `scratch` has grown to the block size.
    ///
    /// `out` is interleaved stereo f32; every path writes all of it.
    pub fn render_block(
        &self,
        out: &mut [f32],
        scratch: &mut Vec<u8>,
        meter: &mut LoudnessMeter,
        display: &DisplayDriver,
    ) {
        if self.playback_state() != PlaybackState::Playing {
            out.fill(0.0);
            return;
        }

        let Ok(mut slot) = self.tap.try_lock() else {
            // Control side is mid-swap; skip this block rather than wait.
            out.fill(0.0);
            return;
        };
        let Some(tap) = slot.as_mut() else {
            out.fill(0.0);
            return;
        };

        let bytes_needed = out.len() * BYTES_PER_SAMPLE;
        if scratch.len() < bytes_needed {
            scratch.resize(bytes_needed, 0);
        }

        let got = tap.read(&mut scratch[..bytes_needed]);
        if got == 0 {
            out.fill(0.0);
            if tap.ended() {
                if !self.ended_logged.swap(true, Ordering::Relaxed) {
                    info!("decode stream ended, emitting silence");
                }
            } else {
                self.underruns.fetch_add(1, Ordering::Relaxed);
            }
            return;
        }
        if got < bytes_needed {
            self.short_reads.fetch_add(1, Ordering::Relaxed);
            debug!(missing = bytes_needed - got, "short read, zero-padding block");
            scratch[got..bytes_needed].fill(0);
        }
        drop(slot);

        let volume = self.volume();
        for (i, sample) in out.iter_mut().enumerate() {
            let raw = i16::from_le_bytes([scratch[i * 2], scratch[i * 2 + 1]]);
            *sample = raw as f32 / 32768.0 * volume;
        }

        let level = meter.observe(out);
        display.set_level(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{DisplayDriver, IndicatorSink};
    use crossbeam_channel::{bounded, Sender};

    struct NullSink;
    impl IndicatorSink for NullSink {
        fn apply(&self, _: &[bool]) {}
    }

    fn display() -> DisplayDriver {
        DisplayDriver::new(8, Box::new(NullSink))
    }

    fn meter() -> LoudnessMeter {
        LoudnessMeter::new(0.0, 1.0)
    }

    /// Wire a raw channel into the shared state as if a pipeline were live.
    fn shared_with_feed(volume: f32) -> (EngineShared, Sender<Vec<u8>>) {
        let shared = EngineShared::new(volume);
        let (tx, rx) = bounded::<Vec<u8>>(64);
        shared.install_tap(PcmTap::new(rx));
        shared.set_playback_state(PlaybackState::Playing);
        (shared, tx)
    }

    fn le_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_silence_when_stopped() {
        let shared = EngineShared::new(1.0);
        let mut out = vec![0.77f32; 64];
        shared.render_block(&mut out, &mut Vec::new(), &mut meter(), &display());
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_silence_when_paused_without_reading() {
        let (shared, tx) = shared_with_feed(1.0);
        shared.set_playback_state(PlaybackState::Paused);
        tx.send(le_bytes(&[1000; 128])).unwrap();

        let mut out = vec![0.5f32; 128];
        let mut scratch = Vec::new();
        shared.render_block(&mut out, &mut scratch, &mut meter(), &display());
        assert!(out.iter().all(|&s| s == 0.0));

        // The queued bytes are untouched: resuming picks them up.
        shared.set_playback_state(PlaybackState::Playing);
        shared.render_block(&mut out, &mut scratch, &mut meter(), &display());
        assert!((out[0] - 1000.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn test_full_block_scaled_by_volume() {
        let (shared, tx) = shared_with_feed(0.5);
        let raw: Vec<i16> = (0..256).map(|i| (i * 100 - 12800) as i16).collect();
        tx.send(le_bytes(&raw)).unwrap();

        let mut out = vec![0.0f32; 256];
        shared.render_block(&mut out, &mut Vec::new(), &mut meter(), &display());
        for (got, want) in out.iter().zip(raw.iter()) {
            assert!((got - *want as f32 / 32768.0 * 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_volume_is_clamped_on_store() {
        let shared = EngineShared::new(1.0);
        assert_eq!(shared.set_volume(9.9), 2.0);
        assert_eq!(shared.volume(), 2.0);
        assert_eq!(shared.set_volume(-3.0), 0.0);
        assert_eq!(shared.volume(), 0.0);
    }

    #[test]
    fn test_short_read_zero_pads_tail() {
        let (shared, tx) = shared_with_feed(1.0);
        // 64 samples requested (128 bytes), only 40 bytes (20 samples) queued.
        tx.send(le_bytes(&[8000; 20])).unwrap();

        let mut out = vec![0.9f32; 64];
        shared.render_block(&mut out, &mut Vec::new(), &mut meter(), &display());

        for &s in &out[..20] {
            assert!((s - 8000.0 / 32768.0).abs() < 1e-6);
        }
        for &s in &out[20..] {
            assert_eq!(s, 0.0, "padded tail must be exact silence");
        }
        assert_eq!(shared.status().short_reads, 1);
    }

    #[test]
    fn test_stream_end_yields_silence_forever_without_error() {
        let (shared, tx) = shared_with_feed(1.0);
        tx.send(le_bytes(&[5000; 32])).unwrap();
        drop(tx);

        let mut out = vec![0.0f32; 32];
        let mut scratch = Vec::new();
        shared.render_block(&mut out, &mut scratch, &mut meter(), &display());
        assert!(out.iter().any(|&s| s != 0.0));

        for _ in 0..10 {
            shared.render_block(&mut out, &mut scratch, &mut meter(), &display());
            assert!(out.iter().all(|&s| s == 0.0));
        }
        // End of stream does not change playback state by itself.
        assert_eq!(shared.playback_state(), PlaybackState::Playing);
    }

    #[test]
    fn test_underrun_counted_when_feed_is_starved() {
        let (shared, _tx) = shared_with_feed(1.0);
        let mut out = vec![0.0f32; 64];
        shared.render_block(&mut out, &mut Vec::new(), &mut meter(), &display());
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(shared.status().underruns, 1);
    }

    #[test]
    fn test_tap_replacement_discards_old_bytes() {
        let (shared, tx_a) = shared_with_feed(1.0);
        tx_a.send(le_bytes(&[111; 512])).unwrap();

        let mut out = vec![0.0f32; 64];
        let mut scratch = Vec::new();
        shared.render_block(&mut out, &mut scratch, &mut meter(), &display());
        assert!((out[0] - 111.0 / 32768.0).abs() < 1e-6);

        // Replace the pipeline; hundreds of A-bytes are still queued.
        let (tx_b, rx_b) = bounded::<Vec<u8>>(64);
        shared.clear_tap();
        shared.install_tap(PcmTap::new(rx_b));
        tx_b.send(le_bytes(&[-222; 64])).unwrap();

        shared.render_block(&mut out, &mut scratch, &mut meter(), &display());
        for &s in &out {
            assert!((s - (-222.0) / 32768.0).abs() < 1e-6, "stale bytes leaked");
        }
    }

    #[test]
    fn test_loudness_fed_post_volume() {
        let (shared, tx) = shared_with_feed(0.0);
        tx.send(le_bytes(&[i16::MAX; 128])).unwrap();

        let mut m = meter();
        let mut out = vec![0.0f32; 128];
        shared.render_block(&mut out, &mut Vec::new(), &mut m, &display());
        // Volume 0 means the audible signal is silence, so the display
        // level must be 0 even though the raw stream is full-scale.
        assert_eq!(m.level(), 0.0);
    }
}
