//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod convert;
pub mod device;
pub mod playback;

pub use buffer::SampleQueue;
pub use capture::{
    AudioCapture, CaptureBackend, CaptureEvent, CaptureEventKind, CaptureHandle, CaptureSink,
    CaptureState, CpalCaptureBackend,
};
pub use device::{get_device_by_id, list_devices, AudioDevice, DeviceDescriptor, DeviceMode};
pub use playback::AudioPlayback;
