//! Shared audio utilities for capture and playback.

use anyhow::Result;
use cpal::traits::DeviceTrait;
use cpal::{Device, SampleFormat, SupportedStreamConfig, SupportedStreamConfigRange};

/// Get a human-readable device name.
pub fn device_name(device: &Device) -> String {
    device.description().ok().map(|desc| desc.name().to_string()).unwrap_or_else(|| "Unknown".to_string())
}

/// Find the best matching audio configuration.
///
/// Accepts only mono/stereo F32 configurations and prefers one whose rate
/// range contains the target sample rate; otherwise the closest available
/// rate is used and the caller resamples.
pub fn find_best_config(configs: impl Iterator<Item = SupportedStreamConfigRange>, target_sample_rate: u32) -> Result<SupportedStreamConfig> {
    let f32_configs: Vec<SupportedStreamConfigRange> =
        configs.filter(|c| c.channels() <= 2 && c.sample_format() == SampleFormat::F32).collect();

    if f32_configs.is_empty() {
        anyhow::bail!("No F32 audio configuration found - this is unexpected on modern hardware");
    }

    for config in &f32_configs {
        if target_sample_rate >= config.min_sample_rate() && target_sample_rate <= config.max_sample_rate() {
            return Ok((*config).with_sample_rate(target_sample_rate));
        }
    }

    // No exact match: clamp to the first config's supported range
    let config = &f32_configs[0];
    let rate = if target_sample_rate < config.min_sample_rate() { config.min_sample_rate() } else { config.max_sample_rate() };
    Ok((*config).with_sample_rate(rate))
}

/// Mix interleaved f32 samples down to mono.
///
/// Mono input is returned as-is; stereo frames are averaged.
pub fn mix_to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        data.to_vec()
    } else {
        data.chunks(channels).map(|frame| frame.iter().sum::<f32>() / channels as f32).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_passthrough() {
        let data = vec![0.25f32, -0.25, 1.0];
        assert_eq!(mix_to_mono(&data, 1), data);
    }

    #[test]
    fn test_stereo_downmix() {
        let data = vec![0.5f32, 1.0, -0.5, -1.0];
        let result = mix_to_mono(&data, 2);
        assert_eq!(result, vec![0.75, -0.75]);
    }
}
