//! Audio capture module using cpal.
//!
//! Captures audio from the default input device and feeds mono samples at
//! the recognizer's sample rate to a caller-supplied callback. The audio
//! callback pushes into a lock-free ring buffer; a drain thread moves data
//! into a bounded channel consumed by the callback thread, so the device
//! callback never blocks on VAD locks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use tracing::{debug, info, warn};

use super::resampler::ResamplerState;
use super::util::{device_name, find_best_config, mix_to_mono};

/// Ring buffer capacity in samples (~4 seconds at 16 kHz).
const CAPTURE_RING_SIZE: usize = 65536;

/// Bounded channel depth between drain and callback threads (~1s of audio).
const CHANNEL_DEPTH: usize = 32;

/// Audio capturer streaming microphone samples into the recognizer.
pub struct Capturer {
    stream: Stream,                                       // cpal stream, kept alive
    running: Arc<AtomicBool>,                             // pause/resume flag (half-duplex)
    shutdown: Arc<AtomicBool>,                            // permanent shutdown flag
    drain_handle: Option<std::thread::JoinHandle<()>>,    // thread draining the ring buffer
    callback_handle: Option<std::thread::JoinHandle<()>>, // thread invoking the user callback
    consumer: Option<ringbuf::HeapCons<f32>>,             // taken when the drain thread starts
    sender: Option<SyncSender<Vec<f32>>>,                 // taken when the drain thread starts
}

impl Capturer {
    /// Create a capturer delivering mono f32 samples at `sample_rate`.
    ///
    /// # Errors
    /// Returns an error if no input device is available or the stream
    /// cannot be built.
    pub fn new<F>(sample_rate: u32, callback: F) -> Result<Self>
    where
        F: Fn(&[f32]) + Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel::<Vec<f32>>(CHANNEL_DEPTH);

        // The callback thread is where VAD runs; keeping it off the drain
        // thread means a slow VAD pass only exerts channel backpressure.
        let callback_handle = std::thread::spawn(move || {
            while let Ok(samples) = receiver.recv() {
                callback(&samples);
            }
            debug!("Audio callback thread exiting");
        });

        let host = cpal::default_host();
        let device = host.default_input_device().context("No input device available")?;

        info!("Using input device: {}", device_name(&device));

        let supported_configs = device.supported_input_configs().context("Failed to get supported input configs")?;
        let config = find_best_config(supported_configs, sample_rate)?;
        let device_sample_rate = config.sample_rate();

        if device_sample_rate != sample_rate {
            info!("Device sample rate {} Hz differs from target {} Hz - resampling will be applied", device_sample_rate, sample_rate);
        }

        debug!("Audio capture config: {} Hz, {} channels, {:?}", device_sample_rate, config.channels(), config.sample_format());

        let running = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let running_in_callback = running.clone();
        let channels = config.channels() as usize;
        let stream_config: StreamConfig = config.config();

        let ring = HeapRb::<f32>::new(CAPTURE_RING_SIZE);
        let (mut producer, consumer) = ring.split();

        let resampler_state =
            if device_sample_rate != sample_rate { Some(ResamplerState::new(device_sample_rate, sample_rate)?) } else { None };

        let stream = device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !running_in_callback.load(Ordering::Relaxed) {
                    return;
                }

                let mono = mix_to_mono(data, channels);

                let resampled = match &resampler_state {
                    Some(state) => state.lock().process_samples(&mono),
                    None => Some(mono),
                };

                if let Some(samples) = resampled {
                    let written = producer.push_slice(&samples);
                    if written < samples.len() {
                        // Ring buffer full: drop and count, warn occasionally
                        use std::sync::atomic::AtomicU64;
                        static DROP_COUNT: AtomicU64 = AtomicU64::new(0);
                        let count = DROP_COUNT.fetch_add(1, Ordering::Relaxed);
                        if count.is_multiple_of(100) {
                            warn!("Capture ring buffer full, dropped {} audio chunks", count + 1);
                        }
                    }
                }
            },
            |err| {
                tracing::error!("Audio capture error: {}", err);
            },
            None,
        )?;

        info!("Audio capture configured: device {} Hz -> recognizer {} Hz", device_sample_rate, sample_rate);

        Ok(Self {
            stream,
            running,
            shutdown,
            drain_handle: None,
            callback_handle: Some(callback_handle),
            consumer: Some(consumer),
            sender: Some(sender),
        })
    }

    /// Start (or resume) capturing audio.
    pub fn start(&mut self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        self.stream.play().context("Failed to start audio stream")?;

        if self.drain_handle.is_some() {
            debug!("Audio capture resumed (threads already running)");
            return Ok(());
        }

        let mut consumer = self.consumer.take().context("Consumer already taken")?;
        let sender = self.sender.take().context("Sender already taken")?;
        let running = self.running.clone();
        let shutdown = self.shutdown.clone();

        let drain_handle = std::thread::spawn(move || {
            let mut read_buffer = vec![0.0f32; 2048];

            loop {
                if shutdown.load(Ordering::Relaxed) {
                    debug!("Drain thread shutting down");
                    return;
                }

                if !running.load(Ordering::Relaxed) {
                    // Paused while the assistant is speaking
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    continue;
                }

                let available = consumer.occupied_len();
                if available == 0 {
                    // Short sleep keeps latency low without busy-waiting
                    std::thread::sleep(std::time::Duration::from_micros(100));
                    continue;
                }

                let to_read = available.min(read_buffer.len());
                let read = consumer.pop_slice(&mut read_buffer[..to_read]);

                if read > 0 && sender.send(read_buffer[..read].to_vec()).is_err() {
                    debug!("Audio channel closed, drain thread exiting");
                    return;
                }
            }
        });

        self.drain_handle = Some(drain_handle);
        info!("Audio capture started");
        Ok(())
    }

    /// Permanently stop capture and join the worker threads.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        let _ = self.stream.pause();

        // Dropping the sender wakes the callback thread out of recv()
        drop(self.sender.take());

        for (label, handle) in [("drain", self.drain_handle.take()), ("callback", self.callback_handle.take())] {
            if let Some(handle) = handle {
                std::thread::sleep(std::time::Duration::from_millis(100));
                if !handle.is_finished() {
                    warn!("Capture {} thread didn't exit in time", label);
                }
                if let Err(e) = handle.join() {
                    warn!("Failed to join capture {} thread: {:?}", label, e);
                }
            }
        }

        info!("Audio capture stopped");
    }

    /// Get a clone of the running flag for half-duplex mic control.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }
}

impl Drop for Capturer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
