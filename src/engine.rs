//! Render-context engine and audio output
//!
//! The engine owns everything that runs inside the audio callback: the
//! active render source, the master gain smoother, the frame clock, and the
//! analysis tap writer. The control side talks to it through a one-way
//! command channel drained at the start of every block; the engine never
//! replies synchronously. Replacing the source is always wholesale, so at
//! most one backend is ever connected to the output.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, info, warn};

use crate::analysis::{AnalysisTap, TapWriter};
use crate::chord::{ChordSynth, Gain};

/// Master gain ramp length in seconds (avoids clicks on volume changes).
const GAIN_RAMP_SECONDS: f32 = 0.03;

/// Instrument note envelope: linear attack, exponential decay.
const NOTE_ATTACK_SECONDS: f32 = 0.01;
const NOTE_DECAY_SECONDS: f32 = 1.2;

/// Per-note amplitude before the soft clip.
const NOTE_LEVEL: f32 = 0.4;

/// Simultaneous instrument notes kept before the oldest is stolen.
const MAX_NOTE_VOICES: usize = 24;

/// Commands from the control context, applied at block boundaries.
pub enum RenderCommand {
    /// Replace the active source wholesale (includes tearing down to silence).
    SetSource(RenderSource),
    /// Start a buffer-playback voice at the given frame offset.
    StartBuffer {
        samples: Arc<Vec<f32>>,
        offset_frames: u64,
        finished: Arc<AtomicBool>,
    },
    /// Stop the current buffer-playback voice, if any.
    StopBuffer,
    /// Resume or pause the media handle in place.
    MediaPlaying(bool),
    /// Reposition the media handle.
    MediaSeek(u64),
    /// Activate or deactivate the chord stream.
    ChordActive(bool),
    /// Fire-and-forget instrument note.
    NoteOn { frequency: f32 },
    /// Master gain target; ramped, never stepped.
    SetGain(f32),
}

/// Media handle playback state, shared with the control side through
/// atomics: the render-side position counter is the element's own clock and
/// is authoritative for elapsed time.
pub struct MediaVoice {
    pub samples: Arc<Vec<f32>>,
    pub position: Arc<AtomicU64>,
    pub playing: Arc<AtomicBool>,
}

/// One playback instance over a decoded buffer. Buffers cannot be
/// repositioned in place; seeking creates a new voice at the new offset.
pub struct BufferVoice {
    samples: Arc<Vec<f32>>,
    position: usize,
    finished: Arc<AtomicBool>,
}

/// A short-lived enveloped sine, self-disposing when the decay ends.
struct NoteVoice {
    phase: f32,
    step: f32,
    t: usize,
    attack: usize,
    total: usize,
}

impl NoteVoice {
    fn new(frequency: f32, sample_rate: f32) -> Self {
        let attack = (NOTE_ATTACK_SECONDS * sample_rate) as usize;
        let decay = (NOTE_DECAY_SECONDS * sample_rate) as usize;
        Self {
            phase: 0.0,
            step: TAU * frequency / sample_rate,
            t: 0,
            attack: attack.max(1),
            total: attack.max(1) + decay.max(1),
        }
    }

    fn is_finished(&self) -> bool {
        self.t >= self.total
    }

    fn next_sample(&mut self) -> f32 {
        if self.is_finished() {
            return 0.0;
        }
        let env = if self.t < self.attack {
            self.t as f32 / self.attack as f32
        } else {
            let progress = (self.t - self.attack) as f32 / (self.total - self.attack) as f32;
            (-5.0 * progress).exp()
        };
        self.t += 1;
        self.phase += self.step;
        self.phase %= TAU;
        self.phase.sin() * env * NOTE_LEVEL
    }
}

/// Pool of live instrument notes.
pub struct InstrumentBank {
    voices: Vec<NoteVoice>,
    sample_rate: f32,
}

impl InstrumentBank {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            voices: Vec::new(),
            sample_rate,
        }
    }

    fn note_on(&mut self, frequency: f32) {
        if self.voices.len() >= MAX_NOTE_VOICES {
            // Steal the oldest voice
            self.voices.remove(0);
        }
        self.voices.push(NoteVoice::new(frequency, self.sample_rate));
    }

    fn next_sample(&mut self) -> f32 {
        let mut sum = 0.0;
        for voice in self.voices.iter_mut() {
            sum += voice.next_sample();
        }
        // Soft clip so stacked notes cannot blow past full scale
        sum.tanh()
    }

    fn reap(&mut self) {
        self.voices.retain(|v| !v.is_finished());
    }
}

/// The kind-specific object currently connected to the output.
pub enum RenderSource {
    Silence,
    Media(MediaVoice),
    /// Slot for buffer-playback voices; empty while paused or stopped.
    Buffer(Option<BufferVoice>),
    Chord(ChordSynth),
    Instrument(InstrumentBank),
}

impl RenderSource {
    /// Empty buffer slot (the voice arrives with `StartBuffer`).
    pub fn buffer_slot() -> Self {
        RenderSource::Buffer(None)
    }
}

/// Linear ramp toward a target gain.
struct GainSmoother {
    current: f32,
    target: f32,
    step: f32,
}

impl GainSmoother {
    fn new(initial: f32) -> Self {
        Self {
            current: initial,
            target: initial,
            step: 0.0,
        }
    }

    fn set_target(&mut self, target: f32, ramp_samples: usize) {
        self.target = target;
        self.step = if ramp_samples == 0 {
            0.0
        } else {
            (target - self.current) / ramp_samples as f32
        };
    }

    fn next(&mut self) -> f32 {
        if self.current != self.target {
            if self.step == 0.0 {
                self.current = self.target;
            } else {
                self.current += self.step;
                let overshot = (self.step > 0.0 && self.current >= self.target)
                    || (self.step < 0.0 && self.current <= self.target);
                if overshot {
                    self.current = self.target;
                }
            }
        }
        self.current
    }
}

/// Control-side handle to the render engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: Sender<RenderCommand>,
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl EngineHandle {
    /// Fire-and-forget; a dead engine just swallows commands.
    pub fn send(&self, command: RenderCommand) {
        if self.commands.send(command).is_err() {
            warn!("render engine is gone; command dropped");
        }
    }

    /// Monotonic engine clock in seconds (frames rendered so far).
    pub fn now(&self) -> f64 {
        self.frames.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// The render-context half of the deck. Lives inside the audio callback in
/// production; tests drive `process_block` directly.
pub struct RenderEngine {
    sample_rate: u32,
    commands: Receiver<RenderCommand>,
    source: RenderSource,
    gain: GainSmoother,
    frames: Arc<AtomicU64>,
    tap: TapWriter,
    mono: Vec<f32>,
    gains: Vec<f32>,
}

impl RenderEngine {
    pub fn new(sample_rate: u32) -> (RenderEngine, EngineHandle, AnalysisTap) {
        let (tx, rx) = channel();
        let frames = Arc::new(AtomicU64::new(0));
        let (tap, writer) = AnalysisTap::new();
        let engine = RenderEngine {
            sample_rate,
            commands: rx,
            source: RenderSource::Silence,
            gain: GainSmoother::new(1.0),
            frames: Arc::clone(&frames),
            tap: writer,
            mono: Vec::new(),
            gains: Vec::new(),
        };
        let handle = EngineHandle {
            commands: tx,
            frames,
            sample_rate,
        };
        (engine, handle, tap)
    }

    fn apply_command(&mut self, command: RenderCommand) {
        match command {
            RenderCommand::SetSource(source) => {
                // Dropping the previous source disconnects it; exactly one
                // backend can feed the output
                self.source = source;
            }
            RenderCommand::StartBuffer {
                samples,
                offset_frames,
                finished,
            } => match &mut self.source {
                RenderSource::Buffer(slot) => {
                    *slot = Some(BufferVoice {
                        samples,
                        position: offset_frames as usize,
                        finished,
                    });
                }
                _ => debug!("StartBuffer without a buffer source; ignored"),
            },
            RenderCommand::StopBuffer => {
                if let RenderSource::Buffer(slot) = &mut self.source {
                    *slot = None;
                }
            }
            RenderCommand::MediaPlaying(playing) => {
                if let RenderSource::Media(media) = &self.source {
                    media.playing.store(playing, Ordering::Relaxed);
                }
            }
            RenderCommand::MediaSeek(frame) => {
                if let RenderSource::Media(media) = &self.source {
                    let clamped = frame.min(media.samples.len() as u64);
                    media.position.store(clamped, Ordering::Relaxed);
                }
            }
            RenderCommand::ChordActive(active) => {
                if let RenderSource::Chord(synth) = &mut self.source {
                    synth.set_active(active);
                }
            }
            RenderCommand::NoteOn { frequency } => match &mut self.source {
                RenderSource::Instrument(bank) => bank.note_on(frequency),
                _ => debug!("NoteOn without an instrument source; ignored"),
            },
            RenderCommand::SetGain(target) => {
                let ramp = (GAIN_RAMP_SECONDS * self.sample_rate as f32) as usize;
                self.gain.set_target(target.clamp(0.0, 1.0), ramp);
            }
        }
    }

    /// Render one block: drain commands, produce mono, apply gain, duplicate
    /// across channels, feed the tap, and advance the frame clock.
    pub fn process_block<T>(&mut self, output: &mut [T], channels: usize)
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        while let Ok(command) = self.commands.try_recv() {
            self.apply_command(command);
        }

        let frames = if channels > 0 { output.len() / channels } else { 0 };
        if frames == 0 {
            return;
        }
        self.mono.resize(frames, 0.0);
        self.gains.resize(frames, 0.0);
        for g in self.gains.iter_mut() {
            *g = self.gain.next();
        }

        match &mut self.source {
            RenderSource::Silence => self.mono.fill(0.0),
            RenderSource::Media(media) => {
                let mut pos = media.position.load(Ordering::Relaxed) as usize;
                let playing = media.playing.load(Ordering::Relaxed);
                for (i, slot) in self.mono.iter_mut().enumerate() {
                    if playing && pos < media.samples.len() {
                        *slot = media.samples[pos] * self.gains[i];
                        pos += 1;
                    } else {
                        *slot = 0.0;
                    }
                }
                if playing && pos >= media.samples.len() {
                    // Reached the end of the element; its clock stays put
                    media.playing.store(false, Ordering::Relaxed);
                }
                media.position.store(pos as u64, Ordering::Relaxed);
            }
            RenderSource::Buffer(slot) => {
                let mut done = false;
                if let Some(voice) = slot.as_mut() {
                    for (i, out) in self.mono.iter_mut().enumerate() {
                        if voice.position < voice.samples.len() {
                            *out = voice.samples[voice.position] * self.gains[i];
                            voice.position += 1;
                        } else {
                            *out = 0.0;
                        }
                    }
                    if voice.position >= voice.samples.len() {
                        voice.finished.store(true, Ordering::Relaxed);
                        done = true;
                    }
                } else {
                    self.mono.fill(0.0);
                }
                if done {
                    *slot = None;
                }
            }
            RenderSource::Chord(synth) => {
                synth.render(&mut self.mono, Gain::PerSample(&self.gains));
            }
            RenderSource::Instrument(bank) => {
                for (i, slot) in self.mono.iter_mut().enumerate() {
                    *slot = bank.next_sample() * self.gains[i];
                }
                bank.reap();
            }
        }

        for (frame, &sample) in output.chunks_mut(channels).zip(self.mono.iter()) {
            for channel in frame.iter_mut() {
                *channel = T::from_sample(sample);
            }
        }

        self.tap.push(&self.mono);
        self.frames.fetch_add(frames as u64, Ordering::Relaxed);
    }
}

/// The live audio output: a cpal stream driving a `RenderEngine`.
pub struct AudioOutput {
    stream: cpal::Stream,
}

impl AudioOutput {
    /// Open the default output device and start rendering.
    pub fn start() -> Result<(AudioOutput, EngineHandle, AnalysisTap), Box<dyn std::error::Error>>
    {
        let host = cpal::default_host();
        info!("Audio host: {:?}", host.id());

        let device = host
            .default_output_device()
            .ok_or("No audio output device found")?;
        info!("Audio device: {}", device.name()?);

        let config = device.default_output_config()?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;

        let (engine, handle, tap) = RenderEngine::new(sample_rate);

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config.into(), engine, channels)
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config.into(), engine, channels)
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config.into(), engine, channels)
            }
            _ => return Err("Unsupported sample format".into()),
        }?;

        stream.play()?;
        info!("Audio stream started at {} Hz", sample_rate);

        Ok((AudioOutput { stream }, handle, tap))
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut engine: RenderEngine,
        channels: usize,
    ) -> Result<cpal::Stream, Box<dyn std::error::Error>>
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                engine.process_block(data, channels);
            },
            |err| tracing::error!("Audio stream error: {}", err),
            None,
        )?;
        Ok(stream)
    }

    /// (Re)start the stream. The host may auto-suspend output until a user
    /// gesture, so the session calls this on every `play`.
    pub fn resume(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.stream.play()?;
        Ok(())
    }
}
