//! Audio playback subsystem.
//!
//! [`AudioPlayer`] owns at most one playback at a time. Starting a new one
//! aborts the previous task first; there is no mixing and no queueing.
//! The "currently speaking" marker is published on a `watch` channel so a
//! front end can wait for playback to finish.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ChatError, ChatResult};
use crate::types::MessageId;

/// Decoded, playable audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// Samples in [-1.0, 1.0), interleaved when multi-channel
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioClip {
    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() as f64 / f64::from(self.channels.max(1));
        Duration::from_secs_f64(frames / f64::from(self.sample_rate.max(1)))
    }
}

/// Decode raw little-endian 16-bit mono PCM.
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32) -> ChatResult<AudioClip> {
    if bytes.is_empty() {
        return Err(ChatError::AudioDecode("empty audio payload".to_string()));
    }
    if bytes.len() % 2 != 0 {
        return Err(ChatError::AudioDecode(format!(
            "odd byte count {} for 16-bit samples",
            bytes.len()
        )));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect();

    Ok(AudioClip {
        samples,
        sample_rate,
        channels: 1,
    })
}

/// Where clips are rendered.
///
/// `play` resolves when playback finishes naturally. Dropping the future
/// must stop playback.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, message_id: MessageId, clip: AudioClip) -> ChatResult<()>;
}

/// Renders each clip to `<dir>/<message-id>.wav`
pub struct WavFileSink {
    dir: PathBuf,
}

impl WavFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, message_id: &str) -> PathBuf {
        self.dir.join(format!("{}.wav", message_id))
    }
}

#[async_trait]
impl AudioSink for WavFileSink {
    async fn play(&self, message_id: MessageId, clip: AudioClip) -> ChatResult<()> {
        let path = self.path_for(&message_id);
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || -> ChatResult<()> {
            std::fs::create_dir_all(&dir)?;
            write_wav(&path, &clip)?;
            info!("Wrote {:.1}s of speech to {}", clip.duration().as_secs_f32(), path.display());
            Ok(())
        })
        .await
        .map_err(|e| ChatError::AudioOutput(e.to_string()))?
    }
}

fn write_wav(path: &Path, clip: &AudioClip) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: clip.channels,
        sample_rate: clip.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in &clip.samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16)?;
    }
    writer.finalize()
}

/// Proof that a playback slot was claimed; stale tickets are refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackTicket {
    message_id: MessageId,
    generation: u64,
}

impl PlaybackTicket {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }
}

#[derive(Default)]
struct PlaybackState {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

/// Singleton playback handle
#[derive(Clone)]
pub struct AudioPlayer {
    sink: Arc<dyn AudioSink>,
    state: Arc<Mutex<PlaybackState>>,
    speaking: Arc<watch::Sender<Option<MessageId>>>,
}

impl AudioPlayer {
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        let (speaking, _) = watch::channel(None);
        Self {
            sink,
            state: Arc::new(Mutex::new(PlaybackState::default())),
            speaking: Arc::new(speaking),
        }
    }

    /// Message currently marked as speaking
    pub fn speaking(&self) -> Option<MessageId> {
        self.speaking.borrow().clone()
    }

    /// Observe the speaking marker
    pub fn watch(&self) -> watch::Receiver<Option<MessageId>> {
        self.speaking.subscribe()
    }

    /// Stop any playback and clear the marker. Safe to call when idle.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        Self::halt(&mut state);
        self.speaking.send_replace(None);
    }

    fn halt(state: &mut PlaybackState) {
        state.generation += 1;
        if let Some(handle) = state.handle.take() {
            debug!("Aborting playback");
            handle.abort();
        }
    }

    /// Stop whatever plays and mark `message_id` as speaking before its
    /// audio is ready.
    pub fn claim(&self, message_id: impl Into<MessageId>) -> PlaybackTicket {
        let message_id = message_id.into();
        let mut state = self.state.lock();
        Self::halt(&mut state);
        self.speaking.send_replace(Some(message_id.clone()));
        PlaybackTicket {
            message_id,
            generation: state.generation,
        }
    }

    /// Begin playback for a claimed slot. Returns `false` when the claim
    /// was superseded or stopped in the meantime.
    pub fn start(&self, ticket: &PlaybackTicket, clip: AudioClip) -> bool {
        let mut state = self.state.lock();
        if state.generation != ticket.generation {
            return false;
        }

        let sink = Arc::clone(&self.sink);
        let shared = Arc::clone(&self.state);
        let speaking = Arc::clone(&self.speaking);
        let generation = ticket.generation;
        let message_id = ticket.message_id.clone();

        state.handle = Some(tokio::spawn(async move {
            if let Err(e) = sink.play(message_id.clone(), clip).await {
                warn!("Playback of {} failed: {}", message_id, e);
            }
            let mut state = shared.lock();
            if state.generation == generation {
                state.handle = None;
                speaking.send_replace(None);
            }
        }));
        true
    }

    /// Release a claim whose audio never arrived.
    pub fn release(&self, ticket: &PlaybackTicket) {
        let state = self.state.lock();
        if state.generation == ticket.generation {
            self.speaking.send_replace(None);
        }
    }

    /// Claim and start in one step.
    pub fn play(&self, message_id: impl Into<MessageId>, clip: AudioClip) {
        let ticket = self.claim(message_id);
        self.start(&ticket, clip);
    }

    /// Wait until nothing is marked as speaking.
    pub async fn wait_idle(&self) {
        let mut rx = self.watch();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|speaking| speaking.is_none()).await;
    }
}
