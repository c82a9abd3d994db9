//! Form state behind the control UI
//!
//! Sender and receiver share one form: a device picker, the six audio
//! format fields and the endpoint. While `Editable` the view offers the
//! selectable options; once a peer is connected it turns `ReadOnly` and
//! only shows the values in effect.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::audio::device::{DeviceDescriptor, DeviceMode};
use crate::network::{Endpoint, ReceiverEvent, SessionEvent};
use crate::protocol::format::SUPPORTED_SAMPLE_SIZES;
use crate::protocol::{AudioFormat, ByteOrder, SampleType};

/// Rates offered when the device reports none
const FALLBACK_SAMPLE_RATES: [u32; 4] = [8000, 22050, 44100, 48000];

/// Whether the form can be edited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UiMode {
    Editable,
    ReadOnly,
}

/// Selectable values for each format field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatOptions {
    pub sample_rates: Vec<u32>,
    pub channel_counts: Vec<u16>,
    pub sample_sizes: Vec<u16>,
    pub codecs: Vec<String>,
    pub byte_orders: Vec<String>,
    pub sample_types: Vec<String>,
}

/// Format fields rendered as display strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatLabels {
    pub sample_rate: String,
    pub channel_count: String,
    pub sample_size: String,
    pub codec: String,
    pub byte_order: String,
    pub sample_type: String,
}

impl From<&AudioFormat> for FormatLabels {
    fn from(format: &AudioFormat) -> Self {
        Self {
            sample_rate: format.sample_rate.to_string(),
            channel_count: format.channel_count.to_string(),
            sample_size: format.sample_size_bits.to_string(),
            codec: format.codec.clone(),
            byte_order: format.byte_order.to_string(),
            sample_type: format.sample_type.to_string(),
        }
    }
}

/// What the UI renders
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormView {
    pub mode: UiMode,
    pub device_mode: DeviceMode,
    pub device_id: String,
    pub format: FormatLabels,
    /// Present only while editable
    pub options: Option<FormatOptions>,
    /// Present only while editable
    pub devices: Option<Vec<DeviceDescriptor>>,
    pub endpoint: Option<String>,
    pub info: String,
    pub details: BTreeMap<&'static str, String>,
}

/// Form data shared by every layout
#[derive(Debug, Clone)]
pub struct FormState {
    mode: UiMode,
    device_mode: DeviceMode,
    devices: Vec<DeviceDescriptor>,
    device_id: String,
    format: AudioFormat,
    endpoint: Option<String>,
    info: String,
}

impl FormState {
    pub fn new(
        device_mode: DeviceMode,
        devices: Vec<DeviceDescriptor>,
        format: AudioFormat,
    ) -> Self {
        let device_id = devices
            .iter()
            .find(|d| d.is_default)
            .or_else(|| devices.first())
            .map(|d| d.id.clone())
            .unwrap_or_default();
        Self {
            mode: UiMode::Editable,
            device_mode,
            devices,
            device_id,
            format,
            endpoint: None,
            info: String::new(),
        }
    }

    pub fn mode(&self) -> UiMode {
        self.mode
    }

    pub fn device_mode(&self) -> DeviceMode {
        self.device_mode
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn set_mode(&mut self, mode: UiMode) {
        self.mode = mode;
    }

    pub fn set_info(&mut self, info: impl Into<String>) {
        self.info = info.into();
    }

    pub fn set_endpoint(&mut self, endpoint: impl ToString) {
        self.endpoint = Some(endpoint.to_string());
    }

    pub fn set_devices(&mut self, devices: Vec<DeviceDescriptor>) {
        self.devices = devices;
    }

    /// Pick a device and adapt the format to what it supports
    pub fn select_device(&mut self, device_id: &str) -> Result<(), String> {
        if self.mode == UiMode::ReadOnly {
            return Err("device cannot change while connected".into());
        }
        if !self.devices.is_empty() && !self.devices.iter().any(|d| d.id == device_id) {
            return Err(format!("unknown device {}", device_id));
        }
        self.device_id = device_id.to_string();
        if let Some(device) = self.current_device() {
            self.format = preferred_format(device, &self.format);
        }
        Ok(())
    }

    /// Replace the format after validating it
    pub fn set_format(&mut self, format: AudioFormat) -> Result<(), String> {
        if self.mode == UiMode::ReadOnly {
            return Err("format cannot change while connected".into());
        }
        format.validate()?;
        self.format = format;
        Ok(())
    }

    /// Show a format chosen by the other side, regardless of mode
    pub fn show_format(&mut self, format: AudioFormat) {
        self.format = format;
    }

    fn current_device(&self) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.id == self.device_id)
    }

    /// Options for the current device
    pub fn options(&self) -> FormatOptions {
        let device = self.current_device();
        let sample_rates = device
            .map(|d| d.sample_rates.clone())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| FALLBACK_SAMPLE_RATES.to_vec());
        let channel_counts = device
            .map(|d| d.channels.clone())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| vec![1, 2]);

        FormatOptions {
            sample_rates,
            channel_counts,
            sample_sizes: SUPPORTED_SAMPLE_SIZES.to_vec(),
            codecs: vec![crate::constants::DEFAULT_CODEC.to_string()],
            byte_orders: ByteOrder::ALL.iter().map(|o| o.to_string()).collect(),
            sample_types: SampleType::ALL
                .iter()
                .filter(|t| **t != SampleType::Unknown)
                .map(|t| t.to_string())
                .collect(),
        }
    }

    pub fn view(&self, details: BTreeMap<&'static str, String>) -> FormView {
        let editable = self.mode == UiMode::Editable;
        FormView {
            mode: self.mode,
            device_mode: self.device_mode,
            device_id: self.device_id.clone(),
            format: FormatLabels::from(&self.format),
            options: editable.then(|| self.options()),
            devices: editable.then(|| self.devices.clone()),
            endpoint: self.endpoint.clone(),
            info: self.info.clone(),
            details,
        }
    }
}

/// Keep what the device supports from `current`, otherwise take the
/// device's first supported value
pub fn preferred_format(device: &DeviceDescriptor, current: &AudioFormat) -> AudioFormat {
    let mut format = current.clone();
    if !device.sample_rates.is_empty() && !device.sample_rates.contains(&format.sample_rate) {
        format.sample_rate = device.sample_rates[0];
    }
    if !device.channels.is_empty() && !device.channels.contains(&format.channel_count) {
        format.channel_count = device.channels[0];
    }
    format
}

/// Reactions of a layout to user actions and stream events.
///
/// Hooks a variant has no use for stay no-ops.
pub trait LayoutHandler: Send {
    fn form(&self) -> &FormState;
    fn form_mut(&mut self) -> &mut FormState;

    fn on_start(&mut self) {}
    fn on_stop(&mut self) {}

    fn on_connect(&mut self) {
        self.form_mut().set_mode(UiMode::ReadOnly);
    }

    fn on_disconnect(&mut self) {
        self.form_mut().set_mode(UiMode::Editable);
    }

    fn on_mute(&mut self, _muted: bool) {}
    fn on_bad_configure(&mut self, _reason: &str) {}
    fn on_good_configure(&mut self) {}
    fn on_stopped(&mut self) {}
    fn on_buffer_size_changed(&mut self, _bytes: usize) {}
    fn on_processed_usec(&mut self, _usec: u64) {}

    /// Variant-specific lines shown under the form
    fn details(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::new()
    }

    fn view(&self) -> FormView {
        self.form().view(self.details())
    }
}

/// Layout of the capturing side
pub struct SenderLayout {
    form: FormState,
    streaming: bool,
}

impl SenderLayout {
    pub fn new(devices: Vec<DeviceDescriptor>, format: AudioFormat, endpoint: Endpoint) -> Self {
        let mut form = FormState::new(DeviceMode::Input, devices, format);
        form.set_endpoint(endpoint);
        form.set_info(format!("Waiting for a receiver on {}", endpoint));
        Self {
            form,
            streaming: false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }
}

impl LayoutHandler for SenderLayout {
    fn form(&self) -> &FormState {
        &self.form
    }

    fn form_mut(&mut self) -> &mut FormState {
        &mut self.form
    }

    fn on_start(&mut self) {
        self.streaming = true;
        self.form.set_info("Streaming");
    }

    fn on_stop(&mut self) {
        self.streaming = false;
        self.form.set_info("Stopped");
    }

    fn on_connect(&mut self) {
        self.form.set_mode(UiMode::ReadOnly);
        self.form.set_info("Receiver connected");
    }

    fn on_disconnect(&mut self) {
        self.streaming = false;
        self.form.set_mode(UiMode::Editable);
        self.form.set_info("Receiver disconnected");
    }

    fn on_bad_configure(&mut self, reason: &str) {
        self.form.set_info(format!("Error: {}", reason));
    }

    fn on_good_configure(&mut self) {
        self.form.set_info("Format accepted");
    }

    fn details(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([("streaming", self.streaming.to_string())])
    }
}

/// Layout of the playing side
pub struct ReceiverLayout {
    form: FormState,
    muted: bool,
    buffer_size: usize,
    processed_usec: u64,
}

impl ReceiverLayout {
    pub fn new(devices: Vec<DeviceDescriptor>, format: AudioFormat) -> Self {
        let mut form = FormState::new(DeviceMode::Output, devices, format);
        form.set_info("Not connected");
        Self {
            form,
            muted: false,
            buffer_size: 0,
            processed_usec: 0,
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn processed_usec(&self) -> u64 {
        self.processed_usec
    }
}

impl LayoutHandler for ReceiverLayout {
    fn form(&self) -> &FormState {
        &self.form
    }

    fn form_mut(&mut self) -> &mut FormState {
        &mut self.form
    }

    fn on_connect(&mut self) {
        self.form.set_mode(UiMode::ReadOnly);
        self.form.set_info("Connected, waiting for audio settings");
    }

    fn on_disconnect(&mut self) {
        self.form.set_mode(UiMode::Editable);
        self.form.set_info("Sender disconnected");
        self.processed_usec = 0;
    }

    fn on_mute(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn on_bad_configure(&mut self, reason: &str) {
        self.form.set_info(format!("Cannot play stream: {}", reason));
    }

    fn on_good_configure(&mut self) {
        self.form.set_info("Playing");
    }

    fn on_stopped(&mut self) {
        self.form.set_info("Sender stopped streaming");
    }

    fn on_buffer_size_changed(&mut self, bytes: usize) {
        self.buffer_size = bytes;
    }

    fn on_processed_usec(&mut self, usec: u64) {
        self.processed_usec = usec;
    }

    fn details(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("muted", self.muted.to_string()),
            ("buffer_size", self.buffer_size.to_string()),
            ("processed_ms", (self.processed_usec / 1000).to_string()),
        ])
    }
}

/// Route a session event to the matching hook
pub fn apply_session_event(layout: &mut dyn LayoutHandler, event: &SessionEvent) {
    match event {
        SessionEvent::Connected { .. } => layout.on_connect(),
        SessionEvent::Disconnected { .. } => layout.on_disconnect(),
        SessionEvent::Started { format } => {
            layout.form_mut().show_format(format.clone());
            layout.on_start();
        }
        SessionEvent::Stopped => layout.on_stop(),
        SessionEvent::CaptureError { message } => layout.on_bad_configure(message),
    }
}

/// Route a receiver event to the matching hook. Audio chunks and the
/// outcome of a new format are handled by whoever owns playback.
pub fn apply_receiver_event(layout: &mut dyn LayoutHandler, event: &ReceiverEvent) {
    match event {
        ReceiverEvent::Configured(format) => layout.form_mut().show_format(format.clone()),
        ReceiverEvent::Audio(_) => {}
        ReceiverEvent::Stopped => layout.on_stopped(),
        ReceiverEvent::Disconnected => layout.on_disconnect(),
    }
}
