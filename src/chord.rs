//! Generative chord stream
//!
//! Runs on the render path: one triad of sine voices, replaced wholesale
//! every few seconds with a new random root and voicing. The synth knows
//! nothing about transport state — it is gated by one activation flag and
//! scaled by one gain parameter.

use std::f32::consts::TAU;

/// Seconds each generated triad is held before being replaced.
const CHORD_SECONDS: f32 = 4.0;

/// Number of voices in every chord.
const VOICE_COUNT: usize = 3;

/// Root candidates: one octave of C major starting at C4.
const SCALE_HZ: [f32; 7] = [261.63, 293.66, 329.63, 349.23, 392.00, 440.00, 493.88];

/// Triad interval patterns in semitones: major, minor, added-sixth.
const VOICINGS: [[f32; VOICE_COUNT]; 3] = [[0.0, 4.0, 7.0], [0.0, 3.0, 7.0], [0.0, 4.0, 9.0]];

/// Gain applied to a rendered block: a single scalar, or one value per sample.
#[derive(Clone, Copy)]
pub enum Gain<'a> {
    Scalar(f32),
    PerSample(&'a [f32]),
}

impl Gain<'_> {
    fn at(&self, i: usize) -> f32 {
        match self {
            Gain::Scalar(g) => *g,
            Gain::PerSample(values) => values.get(i).copied().unwrap_or(0.0),
        }
    }
}

/// One sine voice of the current chord. Phase persists across samples and
/// wraps modulo a full cycle so it never grows without bound.
#[derive(Debug, Clone, Copy)]
struct ChordVoice {
    frequency: f32,
    phase: f32,
}

/// The chord stream generator. All state lives in the render context;
/// activation arrives as an asynchronous message from the control side.
pub struct ChordSynth {
    sample_rate: f32,
    active: bool,
    /// Samples rendered since the current chord started.
    samples_elapsed: usize,
    chord_samples: usize,
    voices: [ChordVoice; VOICE_COUNT],
    /// Count of chords generated since construction; a fresh synth starts at
    /// 0 and the first active sample bumps it to 1.
    serial: u64,
    rng: fastrand::Rng,
}

impl ChordSynth {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            active: false,
            samples_elapsed: 0,
            chord_samples: (CHORD_SECONDS * sample_rate) as usize,
            voices: [ChordVoice { frequency: 0.0, phase: 0.0 }; VOICE_COUNT],
            serial: 0,
            rng: fastrand::Rng::new(),
        }
    }

    /// Apply an activation message.
    ///
    /// Deactivation resets the elapsed-sample counter, so the next activation
    /// starts a chord held for a full window rather than a remainder.
    pub fn set_active(&mut self, active: bool) {
        if !active {
            // Next activation starts a full window, not a partial remainder
            self.samples_elapsed = 0;
        } else if self.serial == 0 {
            // Very first activation: nothing is sounding yet
            self.next_chord();
        }
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Frequencies of the triad currently sounding.
    pub fn current_chord(&self) -> [f32; VOICE_COUNT] {
        [
            self.voices[0].frequency,
            self.voices[1].frequency,
            self.voices[2].frequency,
        ]
    }

    /// How many chords have been generated so far.
    pub fn chord_serial(&self) -> u64 {
        self.serial
    }

    fn next_chord(&mut self) {
        let root = SCALE_HZ[self.rng.usize(0..SCALE_HZ.len())];
        let voicing = VOICINGS[self.rng.usize(0..VOICINGS.len())];
        let octave = if self.rng.bool() { 2.0 } else { 1.0 };
        for (voice, semitones) in self.voices.iter_mut().zip(voicing.iter()) {
            voice.frequency = root * octave * (2.0_f32).powf(semitones / 12.0);
            // Random phase seed avoids a click from synchronized zero-crossings
            voice.phase = self.rng.f32() * TAU;
        }
        self.samples_elapsed = 0;
        self.serial += 1;
    }

    /// Produce one mono sample (before gain).
    fn next_sample(&mut self) -> f32 {
        if !self.active {
            return 0.0;
        }
        self.samples_elapsed += 1;
        if self.samples_elapsed >= self.chord_samples {
            self.next_chord();
        }

        let mut sum = 0.0;
        for voice in self.voices.iter_mut() {
            voice.phase += TAU * voice.frequency / self.sample_rate;
            voice.phase %= TAU;
            sum += voice.phase.sin();
        }
        // Mean across voices keeps amplitude independent of voice count
        sum / VOICE_COUNT as f32
    }

    /// Render a mono block into `out`, applying `gain` per output sample.
    /// No-op on an empty buffer.
    pub fn render(&mut self, out: &mut [f32], gain: Gain) {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.next_sample() * gain.at(i);
        }
    }
}
