//! Audio capture from input devices
//!
//! A capture handle owns one cpal input stream. The stream is not `Send`,
//! so it lives on a dedicated thread; converted bytes and state changes
//! travel back to the control task through a bounded channel.

use bytes::Bytes;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::audio::convert::{check_convertible, encode_samples};
use crate::audio::device::{get_default_device, get_device_by_id, AudioDevice, DeviceMode};
use crate::error::AudioError;
use crate::protocol::AudioFormat;

/// How long `open` waits for the stream to start playing
const START_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of a capture stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaptureState {
    Active,
    Suspended,
    Idle,
    Stopped,
}

/// Payload of a capture event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEventKind {
    Data(Bytes),
    StateChanged {
        state: CaptureState,
        error: Option<String>,
    },
}

/// Event emitted by a capture handle.
///
/// `generation` identifies the handle; events from a released handle are
/// stale and must be ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureEvent {
    pub generation: u64,
    pub kind: CaptureEventKind,
}

/// Where a capture handle delivers its events
#[derive(Clone)]
pub struct CaptureSink {
    tx: mpsc::Sender<CaptureEvent>,
    generation: u64,
    dropped: Arc<AtomicU64>,
}

impl CaptureSink {
    pub fn new(tx: mpsc::Sender<CaptureEvent>, generation: u64) -> Self {
        Self {
            tx,
            generation,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Forward a chunk of captured bytes without blocking.
    /// Returns false if the chunk was dropped.
    pub fn push_data(&self, data: Bytes) -> bool {
        let event = CaptureEvent {
            generation: self.generation,
            kind: CaptureEventKind::Data(data),
        };
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Report a state change of the capture stream
    pub fn report_state(&self, state: CaptureState, error: Option<String>) {
        let event = CaptureEvent {
            generation: self.generation,
            kind: CaptureEventKind::StateChanged { state, error },
        };
        if self.tx.try_send(event).is_err() {
            tracing::warn!(
                "Capture event queue full, lost state change to {:?} (generation {})",
                state,
                self.generation
            );
        }
    }

    /// Chunks dropped because the control task fell behind
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// An open capture stream
pub trait CaptureHandle: Send {
    fn state(&self) -> CaptureState;

    /// Stop the stream and release the device. Idempotent.
    fn stop(&mut self);
}

/// Factory for capture streams
pub trait CaptureBackend: Send {
    /// Open and start a capture stream. Succeeds only once the stream is
    /// active.
    fn open(
        &mut self,
        device_id: &str,
        format: &AudioFormat,
        sink: CaptureSink,
    ) -> Result<Box<dyn CaptureHandle>, AudioError>;
}

/// Capture backend on top of cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalCaptureBackend;

impl CaptureBackend for CpalCaptureBackend {
    fn open(
        &mut self,
        device_id: &str,
        format: &AudioFormat,
        sink: CaptureSink,
    ) -> Result<Box<dyn CaptureHandle>, AudioError> {
        let mut capture = AudioCapture::new(device_id, format.clone(), sink)?;
        capture.start()?;
        Ok(Box::new(capture))
    }
}

/// Resolve a device id, where an empty id or `default` means the host's
/// default input
pub fn resolve_input_device(device_id: &str) -> Result<AudioDevice, AudioError> {
    if device_id.is_empty() || device_id == "default" {
        get_default_device(DeviceMode::Input)
    } else {
        get_device_by_id(device_id)
    }
}

/// Audio capture instance for a single device
pub struct AudioCapture {
    /// Device identifier
    device_id: String,

    /// Format the captured bytes are converted to
    format: AudioFormat,

    /// Whether capture is running
    running: Arc<AtomicBool>,

    /// Last known stream state
    state: Arc<Mutex<CaptureState>>,

    /// Destination for captured bytes
    sink: CaptureSink,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Total samples captured
    samples_captured: Arc<AtomicU64>,

    /// Stream configuration
    config: StreamConfig,
}

impl AudioCapture {
    /// Create a new audio capture for the specified device
    pub fn new(
        device_id: &str,
        format: AudioFormat,
        sink: CaptureSink,
    ) -> Result<Self, AudioError> {
        check_convertible(&format)?;

        let config = StreamConfig {
            channels: format.channel_count,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device_id: device_id.to_string(),
            format,
            running: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(CaptureState::Idle)),
            sink,
            thread_handle: None,
            samples_captured: Arc::new(AtomicU64::new(0)),
            config,
        })
    }

    /// Start capturing audio and wait until the stream is playing
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = resolve_input_device(&self.device_id)?;
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running = self.running.clone();
        let state = self.state.clone();
        let sink = self.sink.clone();
        let samples_captured = self.samples_captured.clone();
        let config = self.config.clone();
        let format = self.format.clone();

        self.samples_captured.store(0, Ordering::SeqCst);
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name(format!("capture-{}", sink.generation()))
            .spawn(move || {
                let cpal_device = device.into_inner();
                let data_sink = sink.clone();
                let error_sink = sink.clone();
                let error_state = state.clone();
                let data_running = running.clone();

                let stream = cpal_device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !data_running.load(Ordering::Relaxed) {
                            return;
                        }
                        samples_captured.fetch_add(data.len() as u64, Ordering::Relaxed);
                        match encode_samples(data, &format) {
                            Ok(bytes) => {
                                data_sink.push_data(Bytes::from(bytes));
                            }
                            Err(e) => tracing::error!("Sample conversion failed: {}", e),
                        }
                    },
                    move |err| {
                        *error_state.lock() = CaptureState::Stopped;
                        error_sink.report_state(CaptureState::Stopped, Some(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        running.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(AudioError::CaptureStart(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    running.store(false, Ordering::SeqCst);
                    let _ = ready_tx.send(Err(AudioError::CaptureStart(e.to_string())));
                    return;
                }

                *state.lock() = CaptureState::Active;
                sink.report_state(CaptureState::Active, None);
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                drop(stream);
                let mut current = state.lock();
                if *current != CaptureState::Stopped {
                    *current = CaptureState::Stopped;
                    sink.report_state(CaptureState::Stopped, None);
                }
            })
            .map_err(|e| AudioError::CaptureStart(e.to_string()))?;
        self.thread_handle = Some(handle);

        let outcome = ready_rx.recv_timeout(START_TIMEOUT).unwrap_or_else(|_| {
            Err(AudioError::CaptureStart("stream did not start in time".into()))
        });
        if let Err(e) = outcome {
            self.stop();
            return Err(e);
        }

        tracing::info!(
            "Capture started on {} ({})",
            if self.device_id.is_empty() { "default input" } else { self.device_id.as_str() },
            self.format
        );
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    /// Check if capture is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get total samples captured
    pub fn samples_captured(&self) -> u64 {
        self.samples_captured.load(Ordering::Relaxed)
    }

    /// Get the stream configuration
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

impl CaptureHandle for AudioCapture {
    fn state(&self) -> CaptureState {
        *self.state.lock()
    }

    fn stop(&mut self) {
        AudioCapture::stop(self);
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SampleType;

    #[test]
    fn test_sink_counts_dropped_chunks() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = CaptureSink::new(tx, 7);

        assert!(sink.push_data(Bytes::from_static(b"ab")));
        assert!(!sink.push_data(Bytes::from_static(b"cd")));
        assert_eq!(sink.dropped_chunks(), 1);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.generation, 7);
        assert_eq!(event.kind, CaptureEventKind::Data(Bytes::from_static(b"ab")));
    }

    #[test]
    fn test_unknown_sample_type_rejected_before_opening() {
        let (tx, _rx) = mpsc::channel(1);
        let format = AudioFormat {
            sample_type: SampleType::Unknown,
            ..AudioFormat::default()
        };
        assert!(matches!(
            AudioCapture::new("", format, CaptureSink::new(tx, 0)),
            Err(AudioError::UnsupportedFormat(_))
        ));
    }
}
