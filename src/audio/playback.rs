//! Audio playback module using cpal.
//!
//! Plays synthesized speech through the default output device. The audio
//! callback pops from a lock-free ring buffer, so the high-priority audio
//! thread never contends on a mutex. The microphone is paused while the
//! assistant speaks, so playback has no barge-in interruption path; the
//! interrupt flag only exists for shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use tracing::{debug, info, warn};

use super::resampler::resample;
use super::util::{device_name, find_best_config};

/// Playback ring buffer capacity in samples (~11 seconds at 48 kHz),
/// sized for long formatted clinical responses.
const PLAYBACK_RING_SIZE: usize = 524288;

/// Audio player for synthesized responses.
pub struct Player {
    /// Kept alive to maintain the audio stream
    _stream: Stream,
    /// Sample rate of the output device
    device_sample_rate: u32,
    /// Sample rate of the synthesized audio
    input_sample_rate: u32,
    /// Ring buffer producer (mutex serializes multi-threaded queuing)
    producer: Mutex<ringbuf::HeapProd<f32>>,
    /// Set to stop playback immediately (shutdown)
    interrupt: Arc<AtomicBool>,
    /// True while samples remain to be played
    playing: Arc<AtomicBool>,
    /// Condvar pair for waiting on playback completion
    playing_mutex: Arc<StdMutex<()>>,
    playback_complete: Arc<Condvar>,
}

impl Player {
    /// Create a player for audio synthesized at `sample_rate`.
    ///
    /// # Errors
    /// Returns an error if no output device is available or the stream
    /// cannot be built.
    pub fn new(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device().context("No output device available")?;

        info!("Using output device: {}", device_name(&device));

        // Prefer the device's own default rate and resample into it
        let device_sample_rate = match device.default_output_config() {
            Ok(default_config) => default_config.sample_rate(),
            Err(_) => {
                let supported = device.supported_output_configs().context("Failed to get supported output configs")?;
                find_best_config(supported, 48000)?.sample_rate()
            }
        };

        let supported = device.supported_output_configs().context("Failed to get supported output configs")?;
        let config = find_best_config(supported, device_sample_rate)?;

        if device_sample_rate != sample_rate {
            info!("Device sample rate {} Hz differs from TTS {} Hz - resampling will be applied", device_sample_rate, sample_rate);
        }

        let ring = HeapRb::<f32>::new(PLAYBACK_RING_SIZE);
        let (producer, mut consumer) = ring.split();

        let interrupt = Arc::new(AtomicBool::new(false));
        let playing = Arc::new(AtomicBool::new(false));
        let playing_mutex = Arc::new(StdMutex::new(()));
        let playback_complete = Arc::new(Condvar::new());

        let interrupt_cb = interrupt.clone();
        let playing_cb = playing.clone();
        let playing_mutex_cb = playing_mutex.clone();
        let playback_complete_cb = playback_complete.clone();

        let channels = config.channels() as usize;
        let stream_config: StreamConfig = config.config();

        let stream = device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let interrupted = interrupt_cb.load(Ordering::Relaxed);

                for frame in data.chunks_mut(channels) {
                    let sample = if interrupted { 0.0 } else { consumer.try_pop().unwrap_or(0.0) };

                    // Duplicate the mono sample across all channels
                    for channel in frame.iter_mut() {
                        *channel = sample;
                    }
                }

                if consumer.is_empty() || interrupted {
                    playing_cb.store(false, Ordering::SeqCst);
                    let _guard = playing_mutex_cb.lock().unwrap();
                    playback_complete_cb.notify_all();
                }
            },
            |err| {
                tracing::error!("Audio playback error: {}", err);
            },
            None,
        )?;

        stream.play().context("Failed to start playback stream")?;

        info!("Audio playback configured: TTS {} Hz -> device {} Hz", sample_rate, device_sample_rate);

        Ok(Self {
            _stream: stream,
            device_sample_rate,
            input_sample_rate: sample_rate,
            producer: Mutex::new(producer),
            interrupt,
            playing,
            playing_mutex,
            playback_complete,
        })
    }

    /// Play audio samples, blocking until playback finishes.
    ///
    /// # Returns
    /// `true` if playback completed, `false` if it was stopped early.
    pub fn play(&self, samples: &[f32]) -> bool {
        if samples.is_empty() {
            return true;
        }

        self.interrupt.store(false, Ordering::SeqCst);

        let samples_to_play = if self.device_sample_rate != self.input_sample_rate {
            match resample(samples, self.input_sample_rate, self.device_sample_rate) {
                Ok(resampled) => resampled,
                Err(e) => {
                    tracing::error!("Resampling failed: {}, playing without resampling", e);
                    samples.to_vec()
                }
            }
        } else {
            samples.to_vec()
        };

        {
            let mut producer = self.producer.lock();
            let written = producer.push_slice(&samples_to_play);
            if written < samples_to_play.len() {
                warn!("Playback buffer overflow, dropped {} samples", samples_to_play.len() - written);
            }
        }

        self.playing.store(true, Ordering::SeqCst);

        debug!("Playing {} samples at {} Hz", samples_to_play.len(), self.device_sample_rate);

        // Deadline derived from the audio duration plus a safety margin
        let duration_secs = samples_to_play.len() as f64 / self.device_sample_rate as f64;
        let deadline = std::time::Instant::now() + Duration::from_secs_f64(duration_secs + 1.0);

        while self.playing.load(Ordering::Relaxed) {
            if self.interrupt.load(Ordering::Relaxed) {
                debug!("Playback stopped");
                self.clear();
                return false;
            }

            if std::time::Instant::now() > deadline {
                warn!("Playback timeout exceeded");
                self.clear();
                return false;
            }

            let guard = self.playing_mutex.lock().unwrap();
            let (_guard, _timeout) = self.playback_complete.wait_timeout(guard, Duration::from_millis(50)).unwrap();
        }

        debug!("Playback completed");
        true
    }

    /// Stop playback immediately (used on shutdown).
    pub fn stop(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    /// Drain any queued samples by letting the callback output silence.
    fn clear(&self) {
        let _producer = self.producer.lock();
        self.interrupt.store(true, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
        drop(_producer);

        std::thread::sleep(Duration::from_millis(20));
        self.interrupt.store(false, Ordering::SeqCst);
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.interrupt.store(true, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
    }
}
