//! Visualization tap on the shared output stage
//!
//! The render callback pushes post-gain mono samples into a shared window;
//! an external renderer reads time-domain samples and frequency-bin
//! magnitudes from it. Strictly read-only with respect to the engine.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::{Arc, Mutex};

use realfft::RealFftPlanner;

/// Samples retained for the tap (~46 ms at 44.1 kHz).
pub const TAP_WINDOW: usize = 2048;

/// Render-side half: appends samples without ever blocking.
#[derive(Clone)]
pub struct TapWriter {
    window: Arc<Mutex<VecDeque<f32>>>,
}

impl TapWriter {
    /// Append a block. Uses `try_lock`; if a reader holds the window this
    /// block is simply skipped, which a visual tap can tolerate.
    pub fn push(&self, samples: &[f32]) {
        if let Ok(mut window) = self.window.try_lock() {
            for &s in samples {
                if window.len() == TAP_WINDOW {
                    window.pop_front();
                }
                window.push_back(s);
            }
        }
    }
}

/// Control-side half: snapshots of the waveform and its spectrum.
pub struct AnalysisTap {
    window: Arc<Mutex<VecDeque<f32>>>,
    planner: RealFftPlanner<f32>,
}

impl AnalysisTap {
    pub fn new() -> (AnalysisTap, TapWriter) {
        let window = Arc::new(Mutex::new(VecDeque::with_capacity(TAP_WINDOW)));
        (
            AnalysisTap {
                window: Arc::clone(&window),
                planner: RealFftPlanner::new(),
            },
            TapWriter { window },
        )
    }

    /// Most recent time-domain samples, oldest first. Shorter than
    /// `TAP_WINDOW` until the window has filled once.
    pub fn waveform(&self) -> Vec<f32> {
        let window = self.window.lock().unwrap();
        window.iter().copied().collect()
    }

    /// Frequency-bin magnitudes of the captured window, Hann-windowed.
    /// Returns `TAP_WINDOW / 2 + 1` bins; all zeros while the tap is empty.
    pub fn spectrum(&mut self) -> Vec<f32> {
        let mut input = vec![0.0_f32; TAP_WINDOW];
        {
            let window = self.window.lock().unwrap();
            let start = TAP_WINDOW - window.len();
            for (i, &s) in window.iter().enumerate() {
                input[start + i] = s;
            }
        }
        for (i, s) in input.iter_mut().enumerate() {
            let hann = 0.5 * (1.0 - (2.0 * PI * i as f32 / (TAP_WINDOW - 1) as f32).cos());
            *s *= hann;
        }

        let fft = self.planner.plan_fft_forward(TAP_WINDOW);
        let mut bins = fft.make_output_vec();
        if fft.process(&mut input, &mut bins).is_err() {
            return vec![0.0; TAP_WINDOW / 2 + 1];
        }
        bins.iter().map(|c| c.norm() / TAP_WINDOW as f32).collect()
    }
}
