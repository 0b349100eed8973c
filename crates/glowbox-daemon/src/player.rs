//! Player command loop — single owner of the decode pipeline and of all
//! playback state transitions.
//!
//! Every control surface funnels into this loop through a `PlayerCommand`
//! channel; nothing else mutates the pipeline or the playback state.  `play`
//! carries a oneshot reply so spawn failures reach the caller instead of
//! disappearing into a log line.

use std::sync::Arc;

use glowbox_proto::config::AudioConfig;
use glowbox_proto::protocol::{PlaybackState, PlayerStatus, Source, VOLUME_STEP};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::display::DisplayDriver;
use crate::engine::EngineShared;
use crate::error::Error;
use crate::pipeline::DecodePipeline;

#[derive(Debug, Clone, Copy)]
pub enum VolumeChange {
    Set(f32),
    Up,
    Down,
}

/// All inputs into the player loop.
pub enum PlayerCommand {
    Play {
        source: Source,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Pause,
    Resume,
    Stop,
    SetVolume {
        change: VolumeChange,
        /// Receives the volume actually applied after clamping.
        reply: oneshot::Sender<f32>,
    },
}

pub struct Player {
    audio: AudioConfig,
    shared: Arc<EngineShared>,
    display: Arc<DisplayDriver>,
    active: Option<DecodePipeline>,
}

impl Player {
    pub fn new(audio: AudioConfig, shared: Arc<EngineShared>, display: Arc<DisplayDriver>) -> Self {
        Self {
            audio,
            shared,
            display,
            active: None,
        }
    }

    /// Run until the command channel closes, then tear everything down.
    pub async fn run(mut self, mut rx: mpsc::Receiver<PlayerCommand>) {
        info!("player loop started");
        while let Some(cmd) = rx.recv().await {
            match cmd {
                PlayerCommand::Play { source, reply } => {
                    let _ = reply.send(self.play(source));
                }
                PlayerCommand::Pause => self.pause(),
                PlayerCommand::Resume => self.resume(),
                PlayerCommand::Stop => self.stop(),
                PlayerCommand::SetVolume { change, reply } => {
                    let _ = reply.send(self.set_volume(change));
                }
            }
        }
        info!("player loop exiting");
        self.stop();
    }

    fn play(&mut self, source: Source) -> Result<(), Error> {
        // Replacement always tears the previous chain down first, so at most
        // one pipeline exists at any instant.
        self.teardown_pipeline();

        match DecodePipeline::start(&source, &self.audio) {
            Ok((pipeline, tap)) => {
                self.display.stop_idle();
                self.shared.install_tap(tap);
                self.shared.set_source(Some(source.clone()));
                self.active = Some(pipeline);
                self.shared.set_playback_state(PlaybackState::Playing);
                info!(source = %source.describe(), "playing");
                Ok(())
            }
            Err(e) => {
                // The old pipeline is already gone; settle into Stopped
                // rather than pretending the previous source is still live.
                warn!(source = %source.describe(), error = %e, "failed to start source");
                self.shared.set_source(None);
                self.shared.set_playback_state(PlaybackState::Stopped);
                self.display.start_idle();
                Err(e)
            }
        }
    }

    fn pause(&mut self) {
        if self.shared.playback_state() == PlaybackState::Playing {
            self.shared.set_playback_state(PlaybackState::Paused);
            info!("paused");
        }
    }

    fn resume(&mut self) {
        if self.shared.playback_state() == PlaybackState::Paused {
            self.shared.set_playback_state(PlaybackState::Playing);
            info!("resumed");
        }
    }

    fn stop(&mut self) {
        if self.active.is_none() && self.shared.playback_state() == PlaybackState::Stopped {
            debug!("stop: already stopped");
            return;
        }
        self.teardown_pipeline();
        self.shared.set_playback_state(PlaybackState::Stopped);
        self.shared.set_source(None);
        self.display.start_idle();
        info!("stopped");
    }

    fn set_volume(&mut self, change: VolumeChange) -> f32 {
        let current = self.shared.volume();
        let target = match change {
            VolumeChange::Set(v) => v,
            VolumeChange::Up => current + VOLUME_STEP,
            VolumeChange::Down => current - VOLUME_STEP,
        };
        let applied = self.shared.set_volume(target);
        debug!(volume = applied, "volume changed");
        applied
    }

    /// Remove the tap first so the tick can never read from a pipeline that
    /// is being killed, then signal the processes.
    fn teardown_pipeline(&mut self) {
        self.shared.clear_tap();
        if let Some(mut pipeline) = self.active.take() {
            pipeline.shutdown();
        }
    }
}

// ── handle for control surfaces ───────────────────────────────────────────────

/// Cloneable entry point into the player loop, used by the HTTP layer.
#[derive(Clone)]
pub struct PlayerHandle {
    tx: mpsc::Sender<PlayerCommand>,
    shared: Arc<EngineShared>,
}

impl PlayerHandle {
    pub fn new(tx: mpsc::Sender<PlayerCommand>, shared: Arc<EngineShared>) -> Self {
        Self { tx, shared }
    }

    pub async fn play(&self, source: Source) -> Result<(), Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PlayerCommand::Play {
                source,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        reply_rx.await.map_err(|_| Error::ChannelClosed)?
    }

    pub async fn pause(&self) -> Result<(), Error> {
        self.send(PlayerCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<(), Error> {
        self.send(PlayerCommand::Resume).await
    }

    pub async fn stop(&self) -> Result<(), Error> {
        self.send(PlayerCommand::Stop).await
    }

    pub async fn set_volume(&self, change: VolumeChange) -> Result<f32, Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(PlayerCommand::SetVolume {
            change,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| Error::ChannelClosed)
    }

    pub fn status(&self) -> PlayerStatus {
        self.shared.status()
    }

    async fn send(&self, cmd: PlayerCommand) -> Result<(), Error> {
        self.tx.send(cmd).await.map_err(|_| Error::ChannelClosed)
    }
}
