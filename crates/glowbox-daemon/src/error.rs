use std::path::PathBuf;

/// Player-facing error taxonomy.
///
/// Everything on the audio tick path is deliberately absent here: tick-time
/// conditions (stream end, short reads, underruns) resolve to silence inside
/// the engine and never propagate as errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{stage} binary not found (install it or set the matching *_PATH env var)")]
    BinaryMissing { stage: &'static str },

    #[error("failed to spawn {stage}: {source}")]
    Spawn {
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("source not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("no audio output device available")]
    NoOutputDevice,

    #[error("failed to start output stream: {0}")]
    OutputStream(String),

    #[error("player command channel closed")]
    ChannelClosed,
}
