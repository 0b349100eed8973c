//! cpal output stream — the clock of the whole engine.
//!
//! The stream lives on a dedicated OS thread because cpal streams are not
//! `Send`; the thread builds the stream, reports the result back, then parks
//! forever to keep it alive.  The device calls the data callback once per
//! block and the callback delegates straight to `EngineShared::render_block`.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use glowbox_proto::config::AudioConfig;
use tracing::{error, info, warn};

use crate::display::DisplayDriver;
use crate::engine::EngineShared;
use crate::error::Error;
use crate::loudness::LoudnessMeter;

const CHANNELS: u16 = 2;

/// How long to wait for the audio thread to report stream startup.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Spawn the output thread and block until the stream is running (or the
/// attempt failed).  The thread — and with it the stream — lives for the
/// rest of the process.
pub fn spawn(
    shared: Arc<EngineShared>,
    display: Arc<DisplayDriver>,
    audio: AudioConfig,
    meter: LoudnessMeter,
) -> Result<(), Error> {
    let (ready_tx, ready_rx) = mpsc::channel::<Result<(), Error>>();

    std::thread::Builder::new()
        .name("audio-output".into())
        .spawn(move || match build_stream(shared, display, &audio, meter) {
            Ok(stream) => {
                let _ = ready_tx.send(Ok(()));
                // The stream stops when dropped, so this thread holds it
                // for the life of the process.
                let _keepalive = stream;
                loop {
                    std::thread::park();
                }
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        })
        .map_err(|e| Error::OutputStream(format!("failed to spawn audio thread: {e}")))?;

    ready_rx
        .recv_timeout(STARTUP_TIMEOUT)
        .map_err(|_| Error::OutputStream("audio thread did not report startup".into()))?
}

fn build_stream(
    shared: Arc<EngineShared>,
    display: Arc<DisplayDriver>,
    audio: &AudioConfig,
    mut meter: LoudnessMeter,
) -> Result<cpal::Stream, Error> {
    let host = cpal::default_host();
    let device = pick_device(&host, audio.device.as_deref())?;
    info!(
        device = device.name().unwrap_or_else(|_| "unknown".into()).as_str(),
        sample_rate = audio.sample_rate,
        block_frames = audio.block_frames,
        "opening audio output"
    );

    let config = StreamConfig {
        channels: CHANNELS,
        sample_rate: SampleRate(audio.sample_rate),
        buffer_size: if audio.block_frames > 0 {
            BufferSize::Fixed(audio.block_frames)
        } else {
            BufferSize::Default
        },
    };

    let mut scratch: Vec<u8> = Vec::new();
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                shared.render_block(data, &mut scratch, &mut meter, &display);
            },
            move |err| {
                error!("audio output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| Error::OutputStream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::OutputStream(e.to_string()))?;

    Ok(stream)
}

fn pick_device(host: &cpal::Host, wanted: Option<&str>) -> Result<cpal::Device, Error> {
    if let Some(name) = wanted {
        match host.output_devices() {
            Ok(mut devices) => {
                if let Some(device) =
                    devices.find(|d| d.name().map(|n| n == name).unwrap_or(false))
                {
                    return Ok(device);
                }
                warn!(device = name, "configured output device not found, using default");
            }
            Err(e) => warn!("could not enumerate output devices: {}", e),
        }
    }
    host.default_output_device().ok_or(Error::NoOutputDevice)
}
