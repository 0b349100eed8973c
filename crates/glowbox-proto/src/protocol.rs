use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Hard volume ceiling.  The HTTP surface and the engine both clamp against
/// this, so a value can never sneak past either layer.
pub const VOLUME_MAX: f32 = 2.0;

/// Step size for relative volume commands (`value=up` / `value=down`).
pub const VOLUME_STEP: f32 = 0.1;

pub fn clamp_volume(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, VOLUME_MAX)
    }
}

/// Playback state of the engine.  Mutated only by the player command loop,
/// read on every audio tick (stored as an atomic u8 there — see
/// `to_bits`/`from_bits`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl PlaybackState {
    /// Encoding for the engine's atomic state cell.
    pub fn to_bits(self) -> u8 {
        match self {
            PlaybackState::Stopped => 0,
            PlaybackState::Playing => 1,
            PlaybackState::Paused => 2,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits {
            1 => PlaybackState::Playing,
            2 => PlaybackState::Paused,
            _ => PlaybackState::Stopped,
        }
    }
}

/// What the engine is (or was last asked to be) playing.  Exactly one source
/// is active at a time; starting a new one replaces the decode pipeline of
/// the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Source {
    Remote { url: String },
    Local { path: PathBuf },
}

impl Source {
    /// Short human-readable form for logs and the status page.
    pub fn describe(&self) -> String {
        match self {
            Source::Remote { url } => url.clone(),
            Source::Local { path } => path.display().to_string(),
        }
    }
}

/// Snapshot of the player, served by `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlayerStatus {
    pub state: PlaybackState,
    pub volume: f32,
    pub source: Option<Source>,
    /// Ticks that found no data queued while playing.
    #[serde(default)]
    pub underruns: u64,
    /// Ticks that had to zero-pad a partial block.
    #[serde(default)]
    pub short_reads: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_bits_roundtrip() {
        for state in [
            PlaybackState::Stopped,
            PlaybackState::Playing,
            PlaybackState::Paused,
        ] {
            assert_eq!(PlaybackState::from_bits(state.to_bits()), state);
        }
        // Unknown encodings decay to Stopped rather than panicking.
        assert_eq!(PlaybackState::from_bits(250), PlaybackState::Stopped);
    }

    #[test]
    fn test_clamp_volume() {
        assert_eq!(clamp_volume(-0.5), 0.0);
        assert_eq!(clamp_volume(0.7), 0.7);
        assert_eq!(clamp_volume(9.0), VOLUME_MAX);
        assert_eq!(clamp_volume(f32::NAN), 0.0);
        assert_eq!(clamp_volume(f32::INFINITY), VOLUME_MAX);
    }

    #[test]
    fn test_source_serde_tag() {
        let src = Source::Remote {
            url: "https://example.com/watch?v=abc".into(),
        };
        let json = serde_json::to_string(&src).unwrap();
        assert!(json.contains("\"kind\":\"remote\""));
        let back: Source = serde_json::from_str(&json).unwrap();
        assert_eq!(back, src);
    }
}
