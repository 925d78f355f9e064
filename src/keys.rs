//! Instrument key layout and pitch math
//!
//! The virtual instrument is a 17-key keyboard spanning C4 to E5 (MIDI 60
//! through 76, every semitone). Score pitch codes are standard note names
//! ("C4", "F#4", "Bb4"); `"-"` is the rest marker.

/// Number of playable instrument keys.
pub const KEY_COUNT: usize = 17;

/// MIDI note of the lowest key (C4).
const LOW_MIDI: i32 = 60;

/// Frequency of A4 in Hz.
const TUNING_PITCH: f64 = 440.0;

/// Convert a MIDI note number to frequency: `440 * 2^((midi - 69) / 12)`.
pub fn midi_to_frequency(midi: i32) -> f64 {
    TUNING_PITCH * (2.0_f64).powf((midi as f64 - 69.0) / 12.0)
}

/// Parse a note name (e.g. "C4", "F#3", "Bb5") into a MIDI note number.
pub fn note_to_midi(note: &str) -> Option<i32> {
    let bytes = note.as_bytes();
    if bytes.is_empty() {
        return None;
    }

    let base_semitone = match bytes[0] as char {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let mut idx = 1;
    let mut semitone = base_semitone;
    if idx < bytes.len() {
        match bytes[idx] as char {
            '#' => {
                semitone += 1;
                idx += 1;
            }
            'b' => {
                semitone -= 1;
                idx += 1;
            }
            _ => {}
        }
    }

    let octave: i32 = note[idx..].parse().ok()?;

    // MIDI note number: C4 = 60
    Some((octave + 1) * 12 + semitone)
}

/// Frequency of an instrument key, or `None` if the index is off the keyboard.
pub fn key_frequency(index: usize) -> Option<f64> {
    if index >= KEY_COUNT {
        return None;
    }
    Some(midi_to_frequency(LOW_MIDI + index as i32))
}

/// Resolve a score pitch code to a key index.
///
/// Returns `None` for the rest marker, unknown names, and notes outside the
/// 17-key range — the sequencer treats all three the same way.
pub fn key_index_for_code(code: &str) -> Option<usize> {
    if code == "-" {
        return None;
    }
    let midi = note_to_midi(code)?;
    let rel = midi - LOW_MIDI;
    if (0..KEY_COUNT as i32).contains(&rel) {
        Some(rel as usize)
    } else {
        None
    }
}
