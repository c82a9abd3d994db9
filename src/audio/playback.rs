//! Audio playback of a received stream

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{create_shared_queue, SharedSampleQueue};
use crate::audio::convert::{check_convertible, decode_samples};
use crate::audio::device::{get_default_device, get_device_by_id, DeviceMode};
use crate::error::AudioError;
use crate::protocol::AudioFormat;

/// Smallest queue ever allocated, in samples
const MIN_QUEUE_SAMPLES: usize = 1024;

/// Plays bytes in a negotiated `AudioFormat` on an output device
pub struct AudioPlayback {
    device_id: String,
    format: AudioFormat,
    queue: SharedSampleQueue,
    running: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    /// Bytes of an incomplete frame carried into the next push
    pending: Vec<u8>,
}

impl AudioPlayback {
    /// Create playback for `format`, buffering up to `buffer_ms` of audio
    pub fn new(device_id: &str, format: AudioFormat, buffer_ms: u32) -> Result<Self, AudioError> {
        check_convertible(&format)?;

        let samples =
            format.bytes_for_duration(buffer_ms as u64 * 1000) / format.bytes_per_sample();
        let queue = create_shared_queue(
            samples.max(MIN_QUEUE_SAMPLES),
            format.channel_count as usize,
        );

        Ok(Self {
            device_id: device_id.to_string(),
            queue,
            format,
            running: Arc::new(AtomicBool::new(false)),
            muted: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            pending: Vec::new(),
        })
    }

    /// Open the output stream and start pulling from the queue
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = if self.device_id.is_empty() || self.device_id == "default" {
            get_default_device(DeviceMode::Output)?
        } else {
            get_device_by_id(&self.device_id)?
        };
        let config = StreamConfig {
            channels: self.format.channel_count,
            sample_rate: cpal::SampleRate(self.format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let running = self.running.clone();
        let queue = self.queue.clone();
        let muted = self.muted.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let stream = cpal_device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        queue.fill(data);
                        if muted.load(Ordering::Relaxed) {
                            data.iter_mut().for_each(|s| *s = 0.0);
                        }
                    },
                    |err| tracing::error!("Playback stream error: {}", err),
                    None,
                );

                let stream = match stream.map_err(|e| e.to_string()).and_then(|s| {
                    s.play().map_err(|e| e.to_string())?;
                    Ok(s)
                }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        running.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(AudioError::Playback(e)));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                drop(stream);
            })
            .map_err(|e| AudioError::Playback(e.to_string()))?;
        self.thread_handle = Some(handle);

        let outcome = ready_rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap_or_else(|_| Err(AudioError::Playback("stream did not start in time".into())));
        if let Err(e) = outcome {
            self.stop();
            return Err(e);
        }
        tracing::info!("Playback started ({})", self.format);
        Ok(())
    }

    /// Queue received bytes for playback. Returns the number of samples
    /// accepted.
    pub fn push_bytes(&mut self, data: &[u8]) -> Result<usize, AudioError> {
        let width = self.format.bytes_per_frame();
        self.pending.extend_from_slice(data);
        let whole = self.pending.len() - self.pending.len() % width;
        let samples = decode_samples(&self.pending[..whole], &self.format)?;
        self.pending.drain(..whole);
        Ok(self.queue.push_slice(&samples))
    }

    /// Stop the output stream and drop queued audio
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        self.queue.clear();
        self.pending.clear();
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Capacity of the playback queue in bytes of the wire format
    pub fn buffer_size(&self) -> usize {
        self.queue.capacity() * self.format.bytes_per_sample()
    }

    /// Microseconds of audio handed to the device so far
    pub fn processed_usec(&self) -> u64 {
        let played = self.queue.samples_played() as usize * self.format.bytes_per_sample();
        self.format.duration_for_bytes(played)
    }

    pub fn queue(&self) -> &SharedSampleQueue {
        &self.queue
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}
