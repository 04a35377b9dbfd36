//! Sine synthesis for the output callback
//!
//! Each effect is one [`Voice`]: a sine at its configured frequency whose
//! amplitude ramps linearly across the block from where the previous block
//! ended to the current target. Phase is carried between blocks, so block
//! boundaries are inaudible regardless of amplitude changes.

use std::f64::consts::TAU;
use std::sync::Arc;

use crate::constants::SAMPLE_RATE;
use crate::effects::EffectId;
use crate::state::SharedState;

/// Synthesis parameters of one effect for one block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voice {
    pub id: EffectId,
    pub frequency: f64,
    /// Index into the output channels; `None` when the channel is not present
    pub channel: Option<usize>,
    pub amplitude: f32,
    pub prev_amplitude: f32,
    /// Radians, kept in `[0, 2π)`
    pub phase: f64,
}

impl Voice {
    /// Add this voice into its channel of an interleaved block and advance the phase.
    /// Non-finite amplitudes render as silence.
    pub fn render_into(&mut self, out: &mut [f32], channels: usize, sample_rate: u32) {
        if !self.frequency.is_finite() || channels == 0 {
            return;
        }
        if !self.amplitude.is_finite() {
            self.amplitude = 0.0;
        }
        if !self.prev_amplitude.is_finite() {
            self.prev_amplitude = 0.0;
        }
        let frames = out.len() / channels;
        let step = TAU * self.frequency / sample_rate as f64;

        let audible = self.amplitude != 0.0 || self.prev_amplitude != 0.0;
        if let Some(channel) = self.channel.filter(|&c| c < channels && audible) {
            for n in 0..frames {
                let gain = ramp_gain(self.prev_amplitude, self.amplitude, n, frames) as f64;
                let sample = gain * (step * n as f64 + self.phase).sin();
                out[n * channels + channel] += sample as f32;
            }
        }

        self.phase = advance_phase(self.phase, self.frequency, frames, sample_rate);
    }
}

/// Gain of frame `n` when ramping from `from` to `to` over `frames`; both ends included
pub fn ramp_gain(from: f32, to: f32, n: usize, frames: usize) -> f32 {
    if frames <= 1 {
        return from;
    }
    let t = n as f32 / (frames - 1) as f32;
    from + (to - from) * t
}

/// Phase after `frames` samples at `frequency`
pub fn advance_phase(phase: f64, frequency: f64, frames: usize, sample_rate: u32) -> f64 {
    (phase + TAU * frequency * frames as f64 / sample_rate as f64).rem_euclid(TAU)
}

/// Render every voice into an interleaved block, summing per channel and
/// clipping to `[-1, 1]`. Non-finite sums come out as silence.
pub fn render_block(voices: &mut [Voice], out: &mut [f32], channels: usize, sample_rate: u32) {
    out.fill(0.0);
    for voice in voices.iter_mut() {
        voice.render_into(out, channels, sample_rate);
    }
    for sample in out.iter_mut() {
        *sample = clip(*sample);
    }
}

fn clip(sample: f32) -> f32 {
    if sample.is_finite() {
        sample.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Callback-side renderer bound to the shared state.
///
/// The voice list is copied out under the lock, rendered outside it and the
/// advanced phases are written back under the lock.
pub struct Renderer {
    state: Arc<SharedState>,
    voices: Vec<Voice>,
    channels: usize,
    sample_rate: u32,
}

impl Renderer {
    pub fn new(state: Arc<SharedState>, channels: usize) -> Self {
        Self {
            state,
            voices: Vec::with_capacity(64),
            channels,
            sample_rate: SAMPLE_RATE,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Fill one interleaved output block
    pub fn render(&mut self, out: &mut [f32]) {
        self.state.snapshot_voices(&mut self.voices);
        render_block(&mut self.voices, out, self.channels, self.sample_rate);
        self.state.commit_block(&self.voices, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{EffectConfig, RangeParams};
    use proptest::prelude::*;
    use uuid::Uuid;

    fn voice(frequency: f64, prev: f32, amplitude: f32, channel: usize) -> Voice {
        Voice {
            id: Uuid::new_v4(),
            frequency,
            channel: Some(channel),
            amplitude,
            prev_amplitude: prev,
            phase: 0.0,
        }
    }

    fn render_blocks(mut v: Voice, blocks: usize, block_size: usize) -> Vec<f32> {
        let mut all = Vec::new();
        let mut out = vec![0.0f32; block_size];
        for _ in 0..blocks {
            let mut voices = [v];
            render_block(&mut voices, &mut out, 1, SAMPLE_RATE);
            v = voices[0];
            all.extend_from_slice(&out);
        }
        all
    }

    #[test]
    fn test_ramp_endpoints() {
        assert_eq!(ramp_gain(0.2, 0.8, 0, 64), 0.2);
        assert!((ramp_gain(0.2, 0.8, 63, 64) - 0.8).abs() < 1e-6);
        assert_eq!(ramp_gain(0.2, 0.8, 0, 1), 0.2);
    }

    #[test]
    fn test_in_phase_sum_is_clipped_not_wrapped() {
        let mut voices = [voice(100.0, 0.8, 0.8, 0), voice(100.0, 0.8, 0.8, 0)];
        let mut out = vec![0.0f32; 480];
        render_block(&mut voices, &mut out, 1, SAMPLE_RATE);

        assert!(out.iter().all(|s| s.abs() <= 1.0));
        // Peak of 1.6 clips to exactly full scale, with the sign intact
        assert!(out.iter().any(|&s| s == 1.0));
        assert!(out.iter().any(|&s| s == -1.0));
    }

    #[test]
    fn test_non_finite_voice_does_not_poison_channel() {
        let mut voices = [
            voice(100.0, 0.0, f32::INFINITY, 0),
            voice(100.0, 0.5, 0.5, 0),
        ];
        let mut out = vec![0.0f32; 128];
        render_block(&mut voices, &mut out, 1, SAMPLE_RATE);
        assert!(out.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
        assert!(out.iter().any(|&s| s != 0.0));
        assert_eq!(voices[0].amplitude, 0.0);
    }

    #[test]
    fn test_clip_maps_nan_to_silence() {
        assert_eq!(clip(f32::NAN), 0.0);
        assert_eq!(clip(f32::NEG_INFINITY), 0.0);
        assert_eq!(clip(1.5), 1.0);
        assert_eq!(clip(-0.25), -0.25);
    }

    #[test]
    fn test_voices_land_on_their_channel() {
        let mut voices = [voice(50.0, 0.5, 0.5, 1)];
        let mut out = vec![0.0f32; 2 * 256];
        render_block(&mut voices, &mut out, 2, SAMPLE_RATE);
        assert!(out.iter().step_by(2).all(|&s| s == 0.0));
        assert!(out.iter().skip(1).step_by(2).any(|&s| s != 0.0));
    }

    #[test]
    fn test_missing_channel_is_silent_but_phase_advances() {
        let mut v = voice(100.0, 0.5, 0.5, 0);
        v.channel = None;
        let mut voices = [v];
        let mut out = vec![0.0f32; 120];
        render_block(&mut voices, &mut out, 1, SAMPLE_RATE);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!((voices[0].phase - advance_phase(0.0, 100.0, 120, SAMPLE_RATE)).abs() < 1e-12);
    }

    #[test]
    fn test_renderer_commits_state() {
        let state = SharedState::shared(16);
        state.set_channels(vec!["channel_1".into(), "channel_2".into()]);
        let mut effect = EffectConfig::range("test", &["speed"], RangeParams::default());
        effect.frequency = 40.0;
        let id = effect.id;
        state.add_effect(effect).unwrap();
        state.set_amplitude(id, 0.6);

        let mut renderer = Renderer::new(state.clone(), 2);
        let mut out = vec![0.0f32; 2 * 128];
        renderer.render(&mut out);

        let runtime = state.runtime(id).unwrap();
        assert_eq!(runtime.prev_amplitude, 0.6);
        assert!((runtime.phase - advance_phase(0.0, 40.0, 128, SAMPLE_RATE)).abs() < 1e-12);
        // First sample starts the ramp from silence
        assert_eq!(out[0], 0.0);
    }

    proptest! {
        #[test]
        fn prop_split_blocks_match_one_long_block(
            frequency in 1.0f64..500.0,
            amplitude in 0.0f32..1.0,
            blocks in 1usize..8,
            block_size in prop::sample::select(vec![64usize, 128, 256]),
        ) {
            let v = voice(frequency, amplitude, amplitude, 0);
            let split = render_blocks(v, blocks, block_size);
            let whole = render_blocks(v, 1, blocks * block_size);
            prop_assert_eq!(split.len(), whole.len());
            for (a, b) in split.iter().zip(&whole) {
                prop_assert!((a - b).abs() < 1e-4);
            }
        }

        #[test]
        fn prop_ramp_is_monotonic_and_bounded(
            from in 0.0f32..1.0,
            to in 0.0f32..1.0,
            frames in 2usize..1024,
        ) {
            let lo = from.min(to);
            let hi = from.max(to);
            let mut previous = ramp_gain(from, to, 0, frames);
            for n in 0..frames {
                let gain = ramp_gain(from, to, n, frames);
                prop_assert!(gain >= lo - 1e-6 && gain <= hi + 1e-6);
                if to >= from {
                    prop_assert!(gain >= previous - 1e-6);
                } else {
                    prop_assert!(gain <= previous + 1e-6);
                }
                previous = gain;
            }
        }

        #[test]
        fn prop_ramped_block_stays_within_envelope(
            from in 0.0f32..1.0,
            to in 0.0f32..1.0,
            frequency in 1.0f64..300.0,
        ) {
            let mut voices = [voice(frequency, from, to, 0)];
            let mut out = vec![0.0f32; 256];
            render_block(&mut voices, &mut out, 1, SAMPLE_RATE);
            let bound = from.max(to) + 1e-6;
            prop_assert!(out.iter().all(|s| s.abs() <= bound));
        }
    }
}
