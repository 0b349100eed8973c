//! External decode pipeline.
//!
//! A remote source runs `yt-dlp | ffmpeg`, a local file runs ffmpeg alone;
//! either way the final stage emits raw interleaved s16le stereo PCM at the
//! configured rate on stdout.  A pump task drains that stdout into a bounded
//! chunk channel; the audio tick consumes the other end through [`PcmTap`],
//! which never blocks.
//!
//! Lifecycle: the [`DecodePipeline`] handle owns the child processes
//! (`kill_on_drop`) and the pump task.  Dropping or shutting it down signals
//! the children and aborts the pump without waiting for either — the tap
//! simply observes end-of-stream.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use glowbox_proto::config::AudioConfig;
use glowbox_proto::platform;
use glowbox_proto::protocol::Source;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info};

use crate::error::Error;

/// Read granularity of the pump task.
const PUMP_CHUNK_BYTES: usize = 16 * 1024;

/// Ring depth.  64 x 16 KiB ≈ 1 MiB ≈ 5.5 s of 48 kHz stereo s16, enough to
/// ride out fetch hiccups without unbounded memory growth.
const RING_CHUNKS: usize = 64;

/// Back-off while the ring is full; backpressure then propagates into the
/// pipe chain and stalls the decoder.
const PUMP_FULL_BACKOFF: Duration = Duration::from_millis(5);

// ── PcmTap ────────────────────────────────────────────────────────────────────

/// Non-blocking read end of the decode pipeline, consumed by the audio tick.
pub struct PcmTap {
    rx: Receiver<Vec<u8>>,
    remainder: Vec<u8>,
    remainder_pos: usize,
    ended: bool,
}

impl PcmTap {
    pub(crate) fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            remainder: Vec::new(),
            remainder_pos: 0,
            ended: false,
        }
    }

    /// Copy up to `buf.len()` queued bytes into `buf` and return how many
    /// were copied.  Returns immediately with whatever is available — 0 when
    /// nothing is queued, whether that is a momentary underrun or the end of
    /// the stream (see [`ended`](Self::ended)).
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut filled = 0;
        while filled < buf.len() {
            if self.remainder_pos < self.remainder.len() {
                let take = (self.remainder.len() - self.remainder_pos).min(buf.len() - filled);
                buf[filled..filled + take]
                    .copy_from_slice(&self.remainder[self.remainder_pos..self.remainder_pos + take]);
                self.remainder_pos += take;
                filled += take;
                continue;
            }
            match self.rx.try_recv() {
                Ok(chunk) => {
                    self.remainder = chunk;
                    self.remainder_pos = 0;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.ended = true;
                    break;
                }
            }
        }
        filled
    }

    /// True once the pump has finished (stream end or process death) and
    /// every queued byte has been drained.
    pub fn ended(&self) -> bool {
        self.ended
    }
}

// ── DecodePipeline ────────────────────────────────────────────────────────────

/// Owns the child process chain and the pump task for one active source.
pub struct DecodePipeline {
    children: Vec<Child>,
    pump: tokio::task::AbortHandle,
}

impl DecodePipeline {
    /// Spawn the process chain for `source` and return the pipeline handle
    /// together with the tap the audio tick will read from.
    ///
    /// A spawn failure of any stage kills the stages already started and
    /// returns an error with no pipeline left behind.
    pub fn start(source: &Source, audio: &AudioConfig) -> Result<(Self, PcmTap), Error> {
        if let Source::Local { path } = source {
            if !path.is_file() {
                return Err(Error::SourceNotFound(path.clone()));
            }
        }

        let ffmpeg = platform::find_ffmpeg_binary().ok_or(Error::BinaryMissing { stage: "ffmpeg" })?;

        let mut children = Vec::with_capacity(2);

        let mut transcode = match source {
            Source::Remote { url } => {
                let yt_dlp =
                    platform::find_yt_dlp_binary().ok_or(Error::BinaryMissing { stage: "yt-dlp" })?;

                let mut fetch = Command::new(yt_dlp)
                    .args(fetch_args(url))
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|source| Error::Spawn {
                        stage: "yt-dlp",
                        source,
                    })?;

                let fetch_stdout = fetch
                    .stdout
                    .take()
                    .expect("stdout was requested piped")
                    .try_into()
                    .map_err(|source| Error::Spawn {
                        stage: "yt-dlp",
                        source,
                    });
                let fetch_stdout: Stdio = match fetch_stdout {
                    Ok(io) => io,
                    Err(e) => {
                        let _ = fetch.start_kill();
                        return Err(e);
                    }
                };

                let transcode = Command::new(&ffmpeg)
                    .args(transcode_args(TranscodeInput::Stdin, audio.sample_rate))
                    .stdin(fetch_stdout)
                    .stdout(Stdio::piped())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .spawn();
                match transcode {
                    Ok(child) => {
                        children.push(fetch);
                        child
                    }
                    Err(source) => {
                        let _ = fetch.start_kill();
                        return Err(Error::Spawn {
                            stage: "ffmpeg",
                            source,
                        });
                    }
                }
            }
            Source::Local { path } => Command::new(&ffmpeg)
                .args(transcode_args(TranscodeInput::File(path), audio.sample_rate))
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|source| Error::Spawn {
                    stage: "ffmpeg",
                    source,
                })?,
        };

        let stdout = transcode.stdout.take().expect("stdout was requested piped");
        children.push(transcode);

        let (tx, rx) = bounded::<Vec<u8>>(RING_CHUNKS);
        let pump = tokio::spawn(pump_stdout(stdout, tx)).abort_handle();

        info!(source = %source.describe(), "decode pipeline started");
        Ok((Self { children, pump }, PcmTap::new(rx)))
    }

    /// Fire-and-forget teardown: signal every child and abort the pump.
    /// Reaping happens in the background (`kill_on_drop`); nothing here
    /// waits on the processes.
    pub fn shutdown(&mut self) {
        for child in &mut self.children {
            let _ = child.start_kill();
        }
        self.pump.abort();
    }
}

impl Drop for DecodePipeline {
    fn drop(&mut self) {
        self.shutdown();
        debug!("decode pipeline dropped");
    }
}

// ── pump task ─────────────────────────────────────────────────────────────────

/// Drain the final stage's stdout into the ring.  Dropping the sender on
/// exit is what turns into `PcmTap::ended()` on the consumer side, so a
/// process crash and a clean end of stream look identical to the tick.
async fn pump_stdout(mut stdout: ChildStdout, tx: Sender<Vec<u8>>) {
    let mut buf = vec![0u8; PUMP_CHUNK_BYTES];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let mut chunk = buf[..n].to_vec();
                loop {
                    match tx.try_send(chunk) {
                        Ok(()) => break,
                        Err(TrySendError::Full(back)) => {
                            chunk = back;
                            tokio::time::sleep(PUMP_FULL_BACKOFF).await;
                        }
                        Err(TrySendError::Disconnected(_)) => return,
                    }
                }
            }
            Err(e) => {
                debug!("pipeline pump read error: {}", e);
                break;
            }
        }
    }
    debug!("pipeline pump finished");
}

// ── command lines ─────────────────────────────────────────────────────────────

enum TranscodeInput<'a> {
    /// Fed from the fetch stage's stdout.
    Stdin,
    /// Read straight from a local file, rate-limited to realtime so the
    /// ring does not swallow an entire album at once.
    File(&'a Path),
}

fn fetch_args(url: &str) -> Vec<String> {
    vec![
        "--no-playlist".into(),
        "-f".into(),
        "bestaudio".into(),
        "-o".into(),
        "-".into(),
        url.into(),
    ]
}

fn transcode_args(input: TranscodeInput<'_>, sample_rate: u32) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-nostdin".into(),
    ];
    match input {
        TranscodeInput::Stdin => {
            // -nostdin must not apply when the input *is* stdin.
            args.pop();
            args.push("-i".into());
            args.push("pipe:0".into());
        }
        TranscodeInput::File(path) => {
            args.push("-re".into());
            args.push("-i".into());
            args.push(path.display().to_string());
        }
    }
    args.extend(
        [
            "-vn",
            "-acodec",
            "pcm_s16le",
            "-ar",
            &sample_rate.to_string(),
            "-ac",
            "2",
            "-f",
            "s16le",
            "pipe:1",
        ]
        .map(String::from),
    );
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_args_shape() {
        let args = fetch_args("https://example.com/v/xyz");
        assert_eq!(args[0], "--no-playlist");
        assert!(args.windows(2).any(|w| w == ["-f", "bestaudio"]));
        assert!(args.windows(2).any(|w| w == ["-o", "-"]));
        assert_eq!(args.last().unwrap(), "https://example.com/v/xyz");
    }

    #[test]
    fn test_transcode_args_remote() {
        let args = transcode_args(TranscodeInput::Stdin, 48_000);
        assert!(args.windows(2).any(|w| w == ["-i", "pipe:0"]));
        assert!(args.windows(2).any(|w| w == ["-ar", "48000"]));
        assert!(args.windows(2).any(|w| w == ["-ac", "2"]));
        assert!(args.windows(2).any(|w| w == ["-f", "s16le"]));
        assert_eq!(args.last().unwrap(), "pipe:1");
        assert!(!args.contains(&"-nostdin".to_string()));
        assert!(!args.contains(&"-re".to_string()));
    }

    #[test]
    fn test_transcode_args_local() {
        let args = transcode_args(TranscodeInput::File(Path::new("/music/a.mp3")), 44_100);
        assert!(args.contains(&"-re".to_string()));
        assert!(args.contains(&"-nostdin".to_string()));
        assert!(args.windows(2).any(|w| w == ["-i", "/music/a.mp3"]));
        assert!(args.windows(2).any(|w| w == ["-ar", "44100"]));
    }

    #[test]
    fn test_tap_reads_across_chunk_boundaries() {
        let (tx, rx) = bounded::<Vec<u8>>(8);
        let mut tap = PcmTap::new(rx);

        tx.send(vec![1, 2, 3]).unwrap();
        tx.send(vec![4, 5, 6, 7]).unwrap();

        let mut buf = [0u8; 5];
        assert_eq!(tap.read(&mut buf), 5);
        assert_eq!(buf, [1, 2, 3, 4, 5]);

        // Remainder of the second chunk is carried over.
        let mut buf = [0u8; 5];
        assert_eq!(tap.read(&mut buf), 2);
        assert_eq!(&buf[..2], &[6, 7]);
    }

    #[test]
    fn test_tap_short_read_when_starved() {
        let (tx, rx) = bounded::<Vec<u8>>(8);
        let mut tap = PcmTap::new(rx);

        tx.send(vec![9; 10]).unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(tap.read(&mut buf), 10);
        assert!(!tap.ended(), "empty-but-alive channel is not end of stream");
        assert_eq!(tap.read(&mut buf), 0);
        assert!(!tap.ended());
    }

    #[test]
    fn test_tap_end_of_stream() {
        let (tx, rx) = bounded::<Vec<u8>>(8);
        let mut tap = PcmTap::new(rx);

        tx.send(vec![1, 2]).unwrap();
        drop(tx);

        let mut buf = [0u8; 8];
        assert_eq!(tap.read(&mut buf), 2);
        assert!(tap.ended(), "drained + disconnected means ended");
        assert_eq!(tap.read(&mut buf), 0);
        assert!(tap.ended());
    }

    #[test]
    fn test_missing_local_file_is_rejected_before_spawn() {
        let audio = AudioConfig::default();
        let source = Source::Local {
            path: "/definitely/not/here.flac".into(),
        };
        match DecodePipeline::start(&source, &audio) {
            Err(Error::SourceNotFound(p)) => {
                assert_eq!(p, std::path::PathBuf::from("/definitely/not/here.flac"));
            }
            other => panic!("expected SourceNotFound, got {:?}", other.map(|_| ())),
        }
    }
}
