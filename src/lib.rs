//! # Tonedeck - Multi-Source Audio Session Engine
//!
//! Tonedeck feeds audio into one playback/synthesis pipeline from four
//! heterogeneous sources and exposes a single uniform transport contract —
//! play, pause, stop, seek, volume, elapsed time — regardless of source.
//!
//! ## Source kinds
//!
//! - **URL**: a remote resource fetched and decoded on a loader thread; its
//!   media handle's own clock is authoritative for elapsed time
//! - **File**: a locally decoded in-memory buffer, tracked with a logical
//!   offset and start instant against the engine clock
//! - **Stream**: a procedurally generated chord triad, replaced every few
//!   seconds; open-ended, with no fixed duration
//! - **Instrument**: a 17-key virtual keyboard of fire-and-forget enveloped
//!   tones, independent of the timeline
//!
//! ## Architecture
//!
//! Two execution contexts. The *control context* runs the [`Session`]
//! state machine (`idle → loading → ready ⇄ playing ⇄ paused`, plus
//! `error`), the loader threads, and the [`ScoreSequencer`]. The *render
//! context* is the audio callback: it owns the active render source, the
//! gain smoother, and the chord synthesizer, and receives one-way commands
//! drained at block boundaries — it never blocks on the control side.
//!
//! ## Quick start
//!
//! ```no_run
//! use tonedeck::{Session, SourceDescriptor};
//!
//! let mut session = Session::new().expect("audio output");
//! session.load_source(SourceDescriptor::Stream).expect("stream source");
//! session.play();
//! std::thread::sleep(std::time::Duration::from_secs(8));
//! session.stop();
//! ```
//!
//! Headless operation (no audio device) drives the render engine by hand:
//!
//! ```
//! use tonedeck::{Session, SourceDescriptor};
//!
//! let (mut session, mut engine) = Session::headless(44100);
//! session.load_source(SourceDescriptor::Instrument).unwrap();
//! session.trigger_instrument_note(0);
//! let mut block = vec![0.0f32; 1024];
//! engine.process_block(&mut block, 2);
//! ```

pub mod analysis;
pub mod chord;
pub mod clock;
pub mod engine;
pub mod error;
pub mod keys;
pub mod media;
pub mod sequencer;
pub mod session;

pub use analysis::AnalysisTap;
pub use chord::{ChordSynth, Gain};
pub use clock::TransportClock;
pub use engine::{AudioOutput, EngineHandle, RenderCommand, RenderEngine, RenderSource};
pub use error::DeckError;
pub use sequencer::{Score, ScoreEntry, ScoreSequencer, SequencerEvent, BASE_UNIT_MS};
pub use session::{
    Session, SessionState, Snapshot, SourceDescriptor, SourceKind, POLL_INTERVAL_MS,
};
