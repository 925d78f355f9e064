//! Source session manager
//!
//! The single transport state machine unifying four source kinds — remote
//! URL, decoded file, generative chord stream, triggerable instrument —
//! behind one engine clock and one control surface. All transitions run on
//! the control context; the render side is reached only through one-way
//! commands, and asynchronous work (fetch, decode) completes via a loader
//! thread whose result is applied by `poll()` with a generation check.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};

use crate::analysis::AnalysisTap;
use crate::clock::TransportClock;
use crate::engine::{
    AudioOutput, EngineHandle, InstrumentBank, MediaVoice, RenderCommand, RenderEngine,
    RenderSource,
};
use crate::error::DeckError;
use crate::keys;
use crate::media::{self, LoadedAudio};
use crate::chord::ChordSynth;

/// Cadence at which callers are expected to `poll()` for displayed time.
pub const POLL_INTERVAL_MS: u64 = 200;

/// Transport states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Error,
}

/// Which kind of source is currently bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    None,
    Url,
    File,
    Stream,
    Instrument,
}

/// Input to `load_source`.
pub enum SourceDescriptor {
    Url { url: String },
    File { bytes: Vec<u8> },
    Stream,
    Instrument,
}

/// Observable state, recomputed on every `poll()`.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub state: SessionState,
    pub active_source_kind: SourceKind,
    pub current_time: f64,
    pub duration: f64,
    pub volume: f32,
    pub error_message: Option<String>,
}

/// Remote-stream backend. The render-side position counter is the media
/// element's own clock and is authoritative for elapsed time.
struct UrlBackend {
    position: Arc<AtomicU64>,
    playing: Arc<AtomicBool>,
    total_frames: u64,
    duration: f64,
}

/// Decoded-buffer backend: logical offset plus start instant, and the
/// finished flag of the currently sounding playback instance (if any).
struct FileBackend {
    samples: Arc<Vec<f32>>,
    duration: f64,
    clock: TransportClock,
    voice_finished: Option<Arc<AtomicBool>>,
}

/// Chord-stream backend: open-ended, offset never clamped.
struct StreamBackend {
    clock: TransportClock,
}

/// The kind-specific payload bound to the session. Exactly one (or none) at
/// a time; every operation matches exhaustively so a fifth kind is a
/// compile-time exercise.
enum Backend {
    Url(UrlBackend),
    File(FileBackend),
    Stream(StreamBackend),
    Instrument,
}

enum LoadOutcome {
    Loaded(LoadedAudio),
    Failed(DeckError),
}

/// An in-flight loader thread. A stale generation means the load was
/// superseded; its result is discarded unseen.
struct PendingLoad {
    generation: u64,
    kind: SourceKind,
    rx: Receiver<LoadOutcome>,
}

/// The session: one active playback context.
pub struct Session {
    state: SessionState,
    volume: f32,
    error_message: Option<String>,
    backend: Option<Backend>,
    generation: u64,
    pending: Option<PendingLoad>,
    handle: EngineHandle,
    output: Option<AudioOutput>,
    tap: AnalysisTap,
}

impl Session {
    /// Open the default audio device and start a live session.
    ///
    /// Created lazily by callers on first user interaction; the output
    /// stream must not start before a user gesture.
    pub fn new() -> Result<Session, DeckError> {
        let (output, handle, tap) = AudioOutput::start()
            .map_err(|e| DeckError::load(format!("audio output unavailable: {e}")))?;
        Ok(Self::with_engine(handle, Some(output), tap))
    }

    /// Session over an undriven render engine. The caller owns the engine
    /// and pumps `process_block` itself; used for offline operation and
    /// tests.
    pub fn headless(sample_rate: u32) -> (Session, RenderEngine) {
        let (engine, handle, tap) = RenderEngine::new(sample_rate);
        (Self::with_engine(handle, None, tap), engine)
    }

    fn with_engine(handle: EngineHandle, output: Option<AudioOutput>, tap: AnalysisTap) -> Session {
        Session {
            state: SessionState::Idle,
            volume: 1.0,
            error_message: None,
            backend: None,
            generation: 0,
            pending: None,
            handle,
            output,
            tap,
        }
    }

    /// The visualization tap on the shared output stage.
    pub fn analysis(&mut self) -> &mut AnalysisTap {
        &mut self.tap
    }

    /// Bind a new source, tearing down the previous one first.
    ///
    /// Invalid descriptors are rejected before anything is touched; the
    /// session keeps its current source and state in that case. URL and
    /// file sources finish loading asynchronously — the transition to
    /// `Ready` (or `Error`) is applied by `poll()`.
    pub fn load_source(&mut self, descriptor: SourceDescriptor) -> Result<(), DeckError> {
        match &descriptor {
            SourceDescriptor::Url { url } => media::validate_url(url)?,
            SourceDescriptor::File { bytes } => {
                if !media::looks_like_audio(bytes) {
                    return Err(DeckError::invalid(
                        "file does not contain recognizable audio".to_string(),
                    ));
                }
            }
            SourceDescriptor::Stream | SourceDescriptor::Instrument => {}
        }

        self.teardown_backend();
        let sample_rate = self.handle.sample_rate();

        match descriptor {
            SourceDescriptor::Url { url } => {
                info!("loading url source");
                self.state = SessionState::Loading;
                self.spawn_loader(SourceKind::Url, move || {
                    let bytes = media::fetch_url(&url)?;
                    if !media::looks_like_audio(&bytes) {
                        return Err(DeckError::load("remote resource is not audio".to_string()));
                    }
                    media::decode_audio(&bytes, sample_rate)
                });
            }
            SourceDescriptor::File { bytes } => {
                info!("loading file source ({} bytes)", bytes.len());
                self.state = SessionState::Loading;
                self.spawn_loader(SourceKind::File, move || {
                    media::decode_audio(&bytes, sample_rate)
                });
            }
            SourceDescriptor::Stream => {
                self.handle.send(RenderCommand::SetSource(RenderSource::Chord(
                    ChordSynth::new(sample_rate as f32),
                )));
                self.backend = Some(Backend::Stream(StreamBackend {
                    clock: TransportClock::new(),
                }));
                self.enter_ready();
            }
            SourceDescriptor::Instrument => {
                self.handle
                    .send(RenderCommand::SetSource(RenderSource::Instrument(
                        InstrumentBank::new(sample_rate as f32),
                    )));
                self.backend = Some(Backend::Instrument);
                self.enter_ready();
            }
        }
        Ok(())
    }

    /// Start or resume playback. No-op while a source is still loading.
    pub fn play(&mut self) {
        if self.state == SessionState::Loading {
            debug!("play ignored while loading");
            return;
        }
        if self.state == SessionState::Playing {
            return;
        }

        // The host may auto-suspend output until a user gesture; resume on
        // every call.
        if let Some(output) = &self.output {
            if let Err(e) = output.resume() {
                warn!("could not resume audio output: {e}");
            }
        }

        let now = self.handle.now();
        match self.backend.as_mut() {
            None => {}
            Some(Backend::Url(_)) => {
                self.handle.send(RenderCommand::MediaPlaying(true));
                self.state = SessionState::Playing;
            }
            Some(Backend::File(file)) => {
                let finished = Arc::new(AtomicBool::new(false));
                file.voice_finished = Some(Arc::clone(&finished));
                let offset_frames =
                    (file.clock.offset() * self.handle.sample_rate() as f64) as u64;
                self.handle.send(RenderCommand::StartBuffer {
                    samples: Arc::clone(&file.samples),
                    offset_frames,
                    finished,
                });
                file.clock.start(now);
                self.state = SessionState::Playing;
            }
            Some(Backend::Stream(stream)) => {
                self.handle.send(RenderCommand::ChordActive(true));
                stream.clock.start(now);
                self.state = SessionState::Playing;
            }
            Some(Backend::Instrument) => {
                // No timeline; triggers work from Ready
                self.state = SessionState::Ready;
            }
        }
    }

    /// Pause playback, freezing elapsed time. Idempotent.
    pub fn pause(&mut self) {
        if self.state != SessionState::Playing {
            return;
        }
        let now = self.handle.now();
        match self.backend.as_mut() {
            None => {}
            Some(Backend::Url(_)) => {
                self.handle.send(RenderCommand::MediaPlaying(false));
                self.state = SessionState::Paused;
            }
            Some(Backend::File(file)) => {
                self.handle.send(RenderCommand::StopBuffer);
                file.voice_finished = None;
                file.clock.pause(now, Some(file.duration));
                self.state = SessionState::Paused;
            }
            Some(Backend::Stream(stream)) => {
                self.handle.send(RenderCommand::ChordActive(false));
                // Open-ended source: the offset accumulates unclamped
                stream.clock.pause(now, None);
                self.state = SessionState::Paused;
            }
            Some(Backend::Instrument) => {}
        }
    }

    /// Stop playback and rewind to zero. Idempotent.
    pub fn stop(&mut self) {
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        match backend {
            Backend::Url(_) => {
                self.handle.send(RenderCommand::MediaPlaying(false));
                self.handle.send(RenderCommand::MediaSeek(0));
            }
            Backend::File(file) => {
                self.handle.send(RenderCommand::StopBuffer);
                file.voice_finished = None;
                file.clock.reset();
            }
            Backend::Stream(stream) => {
                self.handle.send(RenderCommand::ChordActive(false));
                stream.clock.reset();
            }
            Backend::Instrument => {}
        }
        if matches!(
            self.state,
            SessionState::Playing | SessionState::Paused | SessionState::Ready
        ) {
            self.state = SessionState::Ready;
        }
    }

    /// Jump to an absolute position, clamped to the source duration.
    ///
    /// Silent no-op for stream and instrument sources: they have no
    /// meaningful absolute position, and gating the affordance is routine,
    /// not an error.
    pub fn seek(&mut self, target_seconds: f64) {
        let sample_rate = self.handle.sample_rate() as f64;
        let now = self.handle.now();
        let playing = self.state == SessionState::Playing;
        match self.backend.as_mut() {
            Some(Backend::Url(url)) => {
                let target = target_seconds.clamp(0.0, url.duration);
                self.handle
                    .send(RenderCommand::MediaSeek((target * sample_rate) as u64));
                if playing {
                    // Repositioning does not guarantee continuity; resume
                    // explicitly
                    self.handle.send(RenderCommand::MediaPlaying(true));
                }
            }
            Some(Backend::File(file)) => {
                let target = target_seconds.clamp(0.0, file.duration);
                file.clock.set_offset(target);
                if playing {
                    // A buffer cannot be repositioned in place; replace the
                    // playback instance with one starting at the new offset
                    let finished = Arc::new(AtomicBool::new(false));
                    file.voice_finished = Some(Arc::clone(&finished));
                    self.handle.send(RenderCommand::StopBuffer);
                    self.handle.send(RenderCommand::StartBuffer {
                        samples: Arc::clone(&file.samples),
                        offset_frames: (target * sample_rate) as u64,
                        finished,
                    });
                    file.clock.start(now);
                }
            }
            Some(Backend::Stream(_)) | Some(Backend::Instrument) | None => {
                debug!("seek ignored for this source");
            }
        }
    }

    /// Set master volume, ramped at the gain stage to avoid clicks.
    /// Independent of state and source kind.
    pub fn set_volume(&mut self, value: f32) {
        let value = value.clamp(0.0, 1.0);
        self.volume = value;
        self.handle.send(RenderCommand::SetGain(value));
    }

    /// Fire a one-shot instrument note. Only meaningful when the active
    /// source is the instrument; ignored otherwise.
    pub fn trigger_instrument_note(&mut self, key_index: usize) {
        if !matches!(self.backend, Some(Backend::Instrument)) {
            debug!("note trigger ignored; active source is not the instrument");
            return;
        }
        match keys::key_frequency(key_index) {
            Some(frequency) => self.handle.send(RenderCommand::NoteOn {
                frequency: frequency as f32,
            }),
            None => warn!("note trigger for key {key_index} outside the keyboard"),
        }
    }

    /// The periodic sampler: applies loader completions, observes natural
    /// end-of-source, and recomputes displayed time. Call roughly every
    /// `POLL_INTERVAL_MS`.
    pub fn poll(&mut self) -> Snapshot {
        self.apply_load_completion();
        self.observe_playback_end();
        Snapshot {
            state: self.state,
            active_source_kind: self.active_source_kind(),
            current_time: self.current_time(),
            duration: self.duration(),
            volume: self.volume,
            error_message: self.error_message.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn active_source_kind(&self) -> SourceKind {
        match (&self.backend, &self.pending) {
            (Some(Backend::Url(_)), _) => SourceKind::Url,
            (Some(Backend::File(_)), _) => SourceKind::File,
            (Some(Backend::Stream(_)), _) => SourceKind::Stream,
            (Some(Backend::Instrument), _) => SourceKind::Instrument,
            (None, Some(pending)) => pending.kind,
            (None, None) => SourceKind::None,
        }
    }

    fn duration(&self) -> f64 {
        match &self.backend {
            Some(Backend::Url(url)) => url.duration,
            Some(Backend::File(file)) => file.duration,
            // Open-ended or non-linear sources report no duration
            Some(Backend::Stream(_)) | Some(Backend::Instrument) | None => 0.0,
        }
    }

    fn current_time(&self) -> f64 {
        let now = self.handle.now();
        let sample_rate = self.handle.sample_rate() as f64;
        match &self.backend {
            Some(Backend::Url(url)) => {
                url.position.load(Ordering::Relaxed) as f64 / sample_rate
            }
            Some(Backend::File(file)) => file.clock.elapsed(now).clamp(0.0, file.duration),
            Some(Backend::Stream(stream)) => stream.clock.elapsed(now),
            Some(Backend::Instrument) | None => 0.0,
        }
    }

    fn enter_ready(&mut self) {
        self.state = SessionState::Ready;
        self.error_message = None;
    }

    fn fail(&mut self, error: DeckError) {
        warn!("source load failed: {error}");
        self.error_message = Some(error.message().to_string());
        self.state = SessionState::Error;
    }

    /// Tear down the bound backend: stop it, disconnect it from the output,
    /// and invalidate any in-flight loader.
    fn teardown_backend(&mut self) {
        self.generation += 1;
        self.pending = None;
        self.backend = None;
        self.handle
            .send(RenderCommand::SetSource(RenderSource::Silence));
    }

    fn spawn_loader<F>(&mut self, kind: SourceKind, job: F)
    where
        F: FnOnce() -> Result<LoadedAudio, DeckError> + Send + 'static,
    {
        let (tx, rx) = channel();
        thread::spawn(move || {
            let outcome = match job() {
                Ok(audio) => LoadOutcome::Loaded(audio),
                Err(e) => LoadOutcome::Failed(e),
            };
            // The receiver may be gone if this load was superseded
            let _ = tx.send(outcome);
        });
        self.pending = Some(PendingLoad {
            generation: self.generation,
            kind,
            rx,
        });
    }

    fn apply_load_completion(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        if pending.generation != self.generation {
            // Superseded load; drop the result unseen
            return;
        }
        match pending.rx.try_recv() {
            Ok(LoadOutcome::Loaded(audio)) => self.install_loaded(pending.kind, audio),
            Ok(LoadOutcome::Failed(error)) => self.fail(error),
            Err(TryRecvError::Empty) => self.pending = Some(pending),
            Err(TryRecvError::Disconnected) => {
                self.fail(DeckError::load("loader thread vanished".to_string()))
            }
        }
    }

    fn install_loaded(&mut self, kind: SourceKind, audio: LoadedAudio) {
        let duration = audio.duration_seconds();
        match kind {
            SourceKind::Url => {
                let position = Arc::new(AtomicU64::new(0));
                let playing = Arc::new(AtomicBool::new(false));
                let total_frames = audio.samples.len() as u64;
                self.handle
                    .send(RenderCommand::SetSource(RenderSource::Media(MediaVoice {
                        samples: Arc::clone(&audio.samples),
                        position: Arc::clone(&position),
                        playing: Arc::clone(&playing),
                    })));
                self.backend = Some(Backend::Url(UrlBackend {
                    position,
                    playing,
                    total_frames,
                    duration,
                }));
            }
            SourceKind::File => {
                self.handle
                    .send(RenderCommand::SetSource(RenderSource::buffer_slot()));
                self.backend = Some(Backend::File(FileBackend {
                    samples: audio.samples,
                    duration,
                    clock: TransportClock::new(),
                    voice_finished: None,
                }));
            }
            _ => unreachable!("only url and file sources load asynchronously"),
        }
        info!("source ready ({duration:.2}s)");
        self.enter_ready();
    }

    /// Detect a source that played to its natural end and treat it as a
    /// stop: back to `Ready` at time zero.
    fn observe_playback_end(&mut self) {
        if self.state != SessionState::Playing {
            return;
        }
        match self.backend.as_mut() {
            Some(Backend::File(file)) => {
                let ended = file
                    .voice_finished
                    .as_ref()
                    .is_some_and(|f| f.load(Ordering::Relaxed));
                if ended {
                    file.voice_finished = None;
                    file.clock.reset();
                    self.state = SessionState::Ready;
                }
            }
            Some(Backend::Url(url)) => {
                let at_end = url.position.load(Ordering::Relaxed) >= url.total_frames;
                if at_end && !url.playing.load(Ordering::Relaxed) {
                    self.handle.send(RenderCommand::MediaSeek(0));
                    self.state = SessionState::Ready;
                }
            }
            _ => {}
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Synchronous teardown: disconnect the backend and orphan any
        // in-flight loader before the handle goes away
        self.teardown_backend();
    }
}
