//! Score sequencer
//!
//! Translates a finite score into timed instrument triggers. Each entry is a
//! pitch code (note name or `"-"` for a rest) and a duration counted in base
//! units: 1/16 of a quarter note at the 120 BPM reference tempo, 31.25 ms.
//! Scheduling is a chain of deferred steps on a worker thread; every step
//! checks a generation counter before acting, so stopping mid-sequence
//! cancels all pending triggers without tracking individual timers.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DeckError;
use crate::keys::key_index_for_code;

/// Milliseconds per duration unit: a 1/16 subdivision of a quarter note at
/// the 120 BPM reference tempo.
pub const BASE_UNIT_MS: f64 = 31.25;

/// Cancellation-check granularity while a step waits out its duration.
const SLEEP_SLICE_MS: u64 = 5;

/// One score entry as the external editor emits it. The duration is a
/// string-encoded integer count of base units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub code: String,
    pub duration: String,
}

impl ScoreEntry {
    pub fn duration_units(&self) -> Result<u32, DeckError> {
        self.duration.trim().parse::<u32>().map_err(|_| {
            DeckError::invalid(format!(
                "bad duration '{}' for entry '{}'",
                self.duration, self.code
            ))
        })
    }
}

/// An ordered sequence of entries.
#[derive(Debug, Clone, Default)]
pub struct Score {
    pub entries: Vec<ScoreEntry>,
}

impl Score {
    /// Parse the editor's JSON array of `{code, duration}` objects,
    /// validating every duration upfront.
    pub fn from_json(json: &str) -> Result<Score, DeckError> {
        let entries: Vec<ScoreEntry> = serde_json::from_str(json)
            .map_err(|e| DeckError::invalid(format!("score parse failed: {e}")))?;
        for entry in &entries {
            entry.duration_units()?;
        }
        Ok(Score { entries })
    }
}

/// Events emitted while a score runs. `Trigger` is forwarded to the
/// session's instrument trigger; the highlight events drive a UI
/// collaborator and need no timer of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerEvent {
    Highlight(usize),
    ClearHighlight,
    Trigger(usize),
    Finished,
}

/// The sequencer: holds only the currently scheduled run (generation +
/// cursor); it is rebuilt from the score on every `play`.
pub struct ScoreSequencer {
    generation: Arc<AtomicU64>,
    cursor: Arc<AtomicUsize>,
    events: Sender<SequencerEvent>,
}

impl ScoreSequencer {
    pub fn new() -> (ScoreSequencer, Receiver<SequencerEvent>) {
        let (tx, rx) = channel();
        (
            ScoreSequencer {
                generation: Arc::new(AtomicU64::new(0)),
                cursor: Arc::new(AtomicUsize::new(0)),
                events: tx,
            },
            rx,
        )
    }

    /// Entry index the scheduler is currently holding at.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Start the score from the top, cancelling any run already in flight.
    ///
    /// Per entry: a resolvable pitch code emits `Highlight` + `Trigger`; a
    /// rest or unknown code emits `ClearHighlight` only. After the final
    /// entry's duration the highlight is cleared and `Finished` is emitted.
    pub fn play(&mut self, score: &Score) -> Result<(), DeckError> {
        // Resolve and validate everything before the first trigger fires
        let steps: Vec<(Option<usize>, u64)> = score
            .entries
            .iter()
            .map(|entry| {
                let units = entry.duration_units()?;
                let ms = (units as f64 * BASE_UNIT_MS).round() as u64;
                Ok((key_index_for_code(&entry.code), ms))
            })
            .collect::<Result<_, DeckError>>()?;

        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.cursor.store(0, Ordering::Relaxed);

        let generation = Arc::clone(&self.generation);
        let cursor = Arc::clone(&self.cursor);
        let events = self.events.clone();
        thread::spawn(move || {
            for (i, (key, ms)) in steps.iter().enumerate() {
                if generation.load(Ordering::SeqCst) != my_generation {
                    return;
                }
                cursor.store(i, Ordering::Relaxed);
                match key {
                    Some(k) => {
                        let _ = events.send(SequencerEvent::Highlight(*k));
                        let _ = events.send(SequencerEvent::Trigger(*k));
                    }
                    None => {
                        let _ = events.send(SequencerEvent::ClearHighlight);
                    }
                }
                if !sleep_cancellable(*ms, &generation, my_generation) {
                    return;
                }
            }
            if generation.load(Ordering::SeqCst) == my_generation {
                cursor.store(0, Ordering::Relaxed);
                let _ = events.send(SequencerEvent::ClearHighlight);
                let _ = events.send(SequencerEvent::Finished);
            }
        });
        Ok(())
    }

    /// Cancel every pending step, clear the highlight, and rewind the
    /// cursor. Safe to call at any point, including when already idle.
    pub fn stop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cursor.store(0, Ordering::Relaxed);
        let _ = self.events.send(SequencerEvent::ClearHighlight);
        debug!("sequencer stopped");
    }
}

impl Drop for ScoreSequencer {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sleep `ms`, waking every few milliseconds to check for cancellation.
/// Returns false if the run was superseded mid-wait.
fn sleep_cancellable(ms: u64, generation: &AtomicU64, my_generation: u64) -> bool {
    let mut remaining = ms;
    while remaining > 0 {
        if generation.load(Ordering::SeqCst) != my_generation {
            return false;
        }
        let slice = remaining.min(SLEEP_SLICE_MS);
        thread::sleep(Duration::from_millis(slice));
        remaining -= slice;
    }
    generation.load(Ordering::SeqCst) == my_generation
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(code: &str, duration: &str) -> ScoreEntry {
        ScoreEntry {
            code: code.to_string(),
            duration: duration.to_string(),
        }
    }

    #[test]
    fn score_parses_editor_json() {
        let score = Score::from_json(
            r#"[{"code":"C4","duration":"16"},{"code":"-","duration":"8"},{"code":"E4","duration":"16"}]"#,
        )
        .unwrap();
        assert_eq!(score.entries.len(), 3);
        assert_eq!(score.entries[0].code, "C4");
        assert_eq!(score.entries[1].duration_units().unwrap(), 8);
    }

    #[test]
    fn malformed_duration_is_invalid_input() {
        let err = Score::from_json(r#"[{"code":"C4","duration":"lots"}]"#).unwrap_err();
        assert!(matches!(err, DeckError::InvalidInput(_)));

        let score = Score {
            entries: vec![entry("C4", "x")],
        };
        let (mut seq, _rx) = ScoreSequencer::new();
        assert!(seq.play(&score).is_err());
    }

    #[test]
    fn malformed_json_is_invalid_input() {
        assert!(matches!(
            Score::from_json("not json"),
            Err(DeckError::InvalidInput(_))
        ));
    }

    #[test]
    fn stop_is_idempotent_when_idle() {
        let (mut seq, rx) = ScoreSequencer::new();
        seq.stop();
        seq.stop();
        assert_eq!(seq.cursor(), 0);
        // Only highlight-clears, never triggers
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event, SequencerEvent::ClearHighlight);
        }
    }
}
