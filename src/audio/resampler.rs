//! Audio resampling via the rubato FFT resampler.
//!
//! Streaming resampling is used on the capture path (device rate -> 16 kHz
//! for the recognizer); batch resampling prepares TTS output for playback.

use anyhow::{Context, Result};
use audioadapter_buffers::direct::InterleavedSlice;
use parking_lot::Mutex;
use rubato::{Fft, FixedSync, Resampler};
use std::sync::Arc;

/// Chunk size for FFT-based resampling.
const CHUNK_SIZE: usize = 1024;

/// Number of sub-chunks for FFT processing.
const SUB_CHUNKS: usize = 2;

/// Streaming resampler state shared with the capture callback.
///
/// Samples arrive in variable-size chunks from the audio device; they are
/// accumulated internally until a full chunk can be processed.
pub struct ResamplerState {
    resampler: Fft<f32>,
    output_buffer: Vec<f32>,
    output_frames_max: usize,
    pending: Vec<f32>,
}

impl ResamplerState {
    /// Create a streaming resampler converting `from_rate` to `to_rate`.
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Arc<Mutex<Self>>> {
        let resampler = Fft::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1, FixedSync::Input)
            .context("Failed to create resampler")?;

        let output_frames_max = resampler.output_frames_max();

        Ok(Arc::new(Mutex::new(Self {
            resampler,
            output_buffer: vec![0.0f32; output_frames_max],
            output_frames_max,
            pending: Vec::with_capacity(CHUNK_SIZE * 2),
        })))
    }

    /// Feed samples, returning resampled audio once a full chunk is ready.
    pub fn process_samples(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        if self.pending.len() < CHUNK_SIZE {
            return None;
        }

        let chunk: Vec<f32> = self.pending.drain(..CHUNK_SIZE).collect();

        let input = InterleavedSlice::new(&chunk, 1, CHUNK_SIZE).ok()?;
        let mut output = InterleavedSlice::new_mut(&mut self.output_buffer, 1, self.output_frames_max).ok()?;

        let (_, frames_written) = self.resampler.process_into_buffer(&input, &mut output, None).ok()?;

        if frames_written > 0 { Some(self.output_buffer[..frames_written].to_vec()) } else { None }
    }
}

/// Resample a complete buffer from one sample rate to another.
///
/// Used for non-realtime work such as converting synthesized speech to the
/// output device rate. The final chunk is zero-padded and the padding is
/// trimmed from the result.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let mut resampler = Fft::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1, FixedSync::Input)
        .context("Failed to create resampler")?;

    let output_frames_max = resampler.output_frames_max();
    let mut output_buffer = vec![0.0f32; output_frames_max];

    let estimated_len = (samples.len() as f64 * to_rate as f64 / from_rate as f64) as usize + CHUNK_SIZE;
    let mut output = Vec::with_capacity(estimated_len);

    for chunk in samples.chunks(CHUNK_SIZE) {
        let input_chunk: Vec<f32> = if chunk.len() < CHUNK_SIZE {
            let mut padded = chunk.to_vec();
            padded.resize(CHUNK_SIZE, 0.0);
            padded
        } else {
            chunk.to_vec()
        };

        let input = InterleavedSlice::new(&input_chunk, 1, CHUNK_SIZE).context("Failed to create input adapter")?;
        let mut out = InterleavedSlice::new_mut(&mut output_buffer, 1, output_frames_max).context("Failed to create output adapter")?;

        let (_, frames_written) = resampler
            .process_into_buffer(&input, &mut out, None)
            .map_err(|e| anyhow::anyhow!("Resampling error: {}", e))?;

        output.extend_from_slice(&output_buffer[..frames_written]);
    }

    // Trim padding from the final chunk, keeping a small safety margin
    let expected_len = (samples.len() as f64 * to_rate as f64 / from_rate as f64) as usize;
    output.truncate(expected_len + 100);

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_noop_when_rates_match() {
        let samples = vec![0.5f32; 1000];
        let result = resample(&samples, 16000, 16000).unwrap();
        assert_eq!(result, samples);
    }

    #[test]
    fn test_resample_upsampling() {
        let samples = vec![0.0; 16000]; // 1 second at 16kHz
        let result = resample(&samples, 16000, 48000).unwrap();
        assert!(result.len() >= 48000 && result.len() <= 48100);
    }

    #[test]
    fn test_resample_downsampling() {
        let samples = vec![0.0; 48000]; // 1 second at 48kHz
        let result = resample(&samples, 48000, 16000).unwrap();
        assert!(result.len() >= 15900 && result.len() <= 16100, "Expected length 15900-16100, got {}", result.len());
    }
}
