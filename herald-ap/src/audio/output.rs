//! Audio output using cpal
//!
//! Opens the default output device and plays a [`PlaybackCursor`] through it.
//! Volume, pause and loop accounting are applied inside the device callback.

use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Read position over an in-memory stereo clip
///
/// Shared between the device callback and the session handle.
pub struct PlaybackCursor {
    samples: Vec<f32>,
    frame: AtomicUsize,
    /// Remaining passes; negative loops forever
    loops_left: AtomicI32,
    paused: AtomicBool,
    finished: AtomicBool,
    volume_bits: AtomicU32,
}

impl PlaybackCursor {
    /// `samples` is interleaved stereo; `loop_count` 0 is treated as 1
    pub fn new(samples: Vec<f32>, loop_count: i32, volume: f32) -> Self {
        let loops = if loop_count == 0 { 1 } else { loop_count };
        Self {
            finished: AtomicBool::new(samples.len() < 2),
            samples,
            frame: AtomicUsize::new(0),
            loops_left: AtomicI32::new(loops),
            paused: AtomicBool::new(false),
            volume_bits: AtomicU32::new(volume.clamp(0.0, 1.0).to_bits()),
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::SeqCst);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::SeqCst))
    }

    fn total_frames(&self) -> usize {
        self.samples.len() / 2
    }

    /// Next stereo frame, or `None` when paused or finished
    ///
    /// Returns `(frame, just_finished)`; `just_finished` is true exactly once,
    /// on the call that consumed the last frame of the last pass.
    pub fn next_frame(&self) -> (Option<(f32, f32)>, bool) {
        if self.is_paused() || self.is_finished() {
            return (None, false);
        }

        let idx = self.frame.load(Ordering::Relaxed);
        let left = self.samples[idx * 2];
        let right = self.samples[idx * 2 + 1];

        let mut just_finished = false;
        if idx + 1 >= self.total_frames() {
            self.frame.store(0, Ordering::Relaxed);
            let remaining = self.loops_left.load(Ordering::Relaxed);
            if remaining > 0 {
                self.loops_left.store(remaining - 1, Ordering::Relaxed);
                if remaining == 1 {
                    self.finished.store(true, Ordering::SeqCst);
                    just_finished = true;
                }
            }
        } else {
            self.frame.store(idx + 1, Ordering::Relaxed);
        }

        let gain = self.volume();
        (Some((left * gain, right * gain)), just_finished)
    }

    /// Fill an interleaved device buffer of `channels` width
    ///
    /// Returns true if the clip finished during this buffer.
    pub fn fill<T: SizedSample + FromSample<f32>>(&self, data: &mut [T], channels: usize) -> bool {
        let mut finished = false;
        for frame in data.chunks_mut(channels.max(1)) {
            let (value, done) = self.next_frame();
            finished |= done;
            let (left, right) = value.unwrap_or((0.0, 0.0));
            match frame.len() {
                1 => frame[0] = T::from_sample(((left + right) * 0.5).clamp(-1.0, 1.0)),
                _ => {
                    for (ch, out) in frame.iter_mut().enumerate() {
                        let v = match ch {
                            0 => left,
                            1 => right,
                            _ => 0.0,
                        };
                        *out = T::from_sample(v.clamp(-1.0, 1.0));
                    }
                }
            }
        }
        finished
    }
}

/// The chosen output device and stream configuration
pub struct OutputDevice {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
}

impl OutputDevice {
    /// Open the system default output device
    pub fn open_default() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Playback("No default output device found".to_string()))?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let supported = device
            .default_output_config()
            .map_err(|e| Error::Playback(format!("Failed to get default config: {}", e)))?;
        let sample_format = supported.sample_format();
        let config = supported.config();

        info!(
            "Using audio device {}: {}Hz, {} channels, {:?}",
            name, config.sample_rate.0, config.channels, sample_format
        );
        Ok(Self {
            device,
            config,
            sample_format,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Build a stream that plays `cursor`; `on_finished` runs on the audio
    /// thread once the last pass completes
    pub fn build_stream<F>(&self, cursor: Arc<PlaybackCursor>, on_finished: F) -> Result<Stream>
    where
        F: FnMut() + Send + 'static,
    {
        match self.sample_format {
            SampleFormat::F32 => self.build::<f32, F>(cursor, on_finished),
            SampleFormat::I16 => self.build::<i16, F>(cursor, on_finished),
            SampleFormat::U16 => self.build::<u16, F>(cursor, on_finished),
            other => Err(Error::Playback(format!(
                "Unsupported sample format: {:?}",
                other
            ))),
        }
    }

    fn build<T, F>(&self, cursor: Arc<PlaybackCursor>, mut on_finished: F) -> Result<Stream>
    where
        T: SizedSample + FromSample<f32>,
        F: FnMut() + Send + 'static,
    {
        let channels = self.config.channels as usize;
        debug!("Building {}-channel output stream", channels);

        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if cursor.fill(data, channels) {
                        on_finished();
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| Error::Playback(format!("Failed to build stream: {}", e)))
    }
}
