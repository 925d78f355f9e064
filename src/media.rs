//! Source material loading: sniffing, decoding, fetching
//!
//! Everything here runs on a loader worker thread, never on the control
//! context. Decoded audio is downmixed to mono f32 and resampled to the
//! engine rate so the render side only ever deals in engine-rate frames.

use std::io::Cursor;
use std::sync::Arc;

use lazy_static::lazy_static;
use minimp3::{Decoder as Mp3Decoder, Error as Mp3Error};
use regex::Regex;
use tracing::{debug, info};

use crate::error::DeckError;

lazy_static! {
    static ref HTTP_URL: Regex = Regex::new(r"^https?://\S+$").unwrap();
}

/// Decoded, mono, engine-rate audio ready for a render voice.
pub struct LoadedAudio {
    pub samples: Arc<Vec<f32>>,
    pub sample_rate: u32,
}

impl LoadedAudio {
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Check URL syntax before any backend is touched.
pub fn validate_url(url: &str) -> Result<(), DeckError> {
    if HTTP_URL.is_match(url) {
        Ok(())
    } else {
        Err(DeckError::invalid(format!("not an http(s) URL: {url}")))
    }
}

/// Container sniff standing in for a content-type check: the descriptor
/// carries raw bytes, so we look at the magic instead of a MIME string.
pub fn looks_like_audio(bytes: &[u8]) -> bool {
    is_wav(bytes) || is_mp3(bytes)
}

fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

fn is_mp3(bytes: &[u8]) -> bool {
    if bytes.len() < 3 {
        return false;
    }
    // ID3 tag, or a bare MPEG frame sync
    &bytes[0..3] == b"ID3" || (bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0)
}

/// Decode audio bytes to mono at `target_rate`.
///
/// Callers validate with `looks_like_audio` first; a recognized container
/// that still fails to decode is a `LoadFailure`, not `InvalidInput`.
pub fn decode_audio(bytes: &[u8], target_rate: u32) -> Result<LoadedAudio, DeckError> {
    let (samples, source_rate) = if is_wav(bytes) {
        decode_wav(bytes)?
    } else if is_mp3(bytes) {
        decode_mp3(bytes)?
    } else {
        return Err(DeckError::load("unrecognized audio container".to_string()));
    };

    if samples.is_empty() {
        return Err(DeckError::load("decoded audio is empty".to_string()));
    }

    let samples = resample_linear(&samples, source_rate, target_rate);
    debug!(
        "decoded {} frames at {} Hz (source {} Hz)",
        samples.len(),
        target_rate,
        source_rate
    );
    Ok(LoadedAudio {
        samples: Arc::new(samples),
        sample_rate: target_rate,
    })
}

fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32), DeckError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| DeckError::load(format!("WAV decode failed: {e}")))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| DeckError::load(format!("WAV decode failed: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()
                .map_err(|e| DeckError::load(format!("WAV decode failed: {e}")))?
        }
    };

    Ok((downmix(&interleaved, channels), spec.sample_rate))
}

fn decode_mp3(bytes: &[u8]) -> Result<(Vec<f32>, u32), DeckError> {
    let mut decoder = Mp3Decoder::new(Cursor::new(bytes));
    let mut mono = Vec::new();
    let mut sample_rate = 0_u32;
    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = frame.sample_rate as u32;
                let channels = frame.channels.max(1);
                for chunk in frame.data.chunks(channels) {
                    let sum: i32 = chunk.iter().map(|&s| s as i32).sum();
                    mono.push(sum as f32 / (channels as f32 * 32768.0));
                }
            }
            Err(Mp3Error::Eof) => break,
            Err(e) => return Err(DeckError::load(format!("MP3 decode failed: {e}"))),
        }
    }
    if sample_rate == 0 {
        return Err(DeckError::load("MP3 stream held no frames".to_string()));
    }
    Ok((mono, sample_rate))
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linear-interpolation resampler, same approach as a variable-speed voice.
fn resample_linear(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from as f64 / to as f64;
    let out_len = (samples.len() as f64 / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let a = samples[idx];
        let b = if idx + 1 < samples.len() { samples[idx + 1] } else { a };
        out.push(a * (1.0 - frac) + b * frac);
    }
    out
}

/// Fetch a remote resource. Runs on the loader thread.
pub fn fetch_url(url: &str) -> Result<Vec<u8>, DeckError> {
    info!("fetching {url}");
    let response = reqwest::blocking::get(url)
        .map_err(|e| DeckError::load(format!("request failed: {e}")))?
        .error_for_status()
        .map_err(|e| DeckError::load(format!("server rejected the request: {e}")))?;
    let bytes = response
        .bytes()
        .map_err(|e| DeckError::load(format!("download failed: {e}")))?;
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(spec: hound::WavSpec, samples: &[i16]) -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        bytes
    }

    #[test]
    fn url_validation() {
        assert!(validate_url("http://example.com/a.mp3").is_ok());
        assert!(validate_url("https://example.com/a.wav").is_ok());
        assert!(validate_url("ftp://example.com/a.wav").is_err());
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("").is_err());
    }

    #[test]
    fn sniffing() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        assert!(looks_like_audio(&wav_bytes(spec, &[0, 1, 2])));
        assert!(looks_like_audio(b"ID3\x04rest-of-tag"));
        assert!(looks_like_audio(&[0xFF, 0xFB, 0x90, 0x00]));
        assert!(!looks_like_audio(b"<html><body>nope</body></html>"));
        assert!(!looks_like_audio(&[]));
    }

    #[test]
    fn wav_roundtrip_mono() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = wav_bytes(spec, &[0, 16384, -16384, 0]);
        let loaded = decode_audio(&bytes, 44100).unwrap();
        assert_eq!(loaded.samples.len(), 4);
        assert!((loaded.samples[1] - 0.5).abs() < 1e-3);
        assert!((loaded.samples[2] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn stereo_downmixes_to_mono() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        // L=1.0-ish, R=0 should average to ~0.5
        let bytes = wav_bytes(spec, &[32767, 0, 32767, 0]);
        let loaded = decode_audio(&bytes, 44100).unwrap();
        assert_eq!(loaded.samples.len(), 2);
        assert!((loaded.samples[0] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn resampling_scales_the_length() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = wav_bytes(spec, &vec![1000_i16; 22050]);
        let loaded = decode_audio(&bytes, 44100).unwrap();
        let expected = 44100;
        assert!(
            (loaded.samples.len() as i64 - expected).abs() <= 2,
            "1s at 22050 should become ~44100 frames, got {}",
            loaded.samples.len()
        );
        assert!((loaded.duration_seconds() - 1.0).abs() < 0.001);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(decode_audio(b"definitely not audio", 44100).is_err());
        // Recognized container, corrupt payload
        let mut bytes = b"RIFF\x00\x00\x00\x00WAVE".to_vec();
        bytes.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(matches!(
            decode_audio(&bytes, 44100),
            Err(DeckError::LoadFailure(_))
        ));
    }
}
