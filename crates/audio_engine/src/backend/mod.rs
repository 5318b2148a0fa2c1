//! Audio backend implementations
//!
//! Platform-independent abstraction over the native playback layer:
//! device/context lifetime, PCM buffers, sources with gain and state,
//! and ring-buffer-fed stream sources.

pub mod cpal_backend;
pub mod null_backend;

use std::sync::Arc;

use ringbuf::HeapCons;
use slotmap::new_key_type;

use crate::config::AudioSettings;
use crate::decoder::BackendCaps;
use crate::error::AudioError;

new_key_type! {
    /// Stable handle to a decoded PCM buffer
    pub struct BufferHandle;
}

new_key_type! {
    /// Stable handle to a playing source
    pub struct SourceHandle;
}

/// Decoded PCM data, interleaved, already at the device sample rate
#[derive(Clone)]
pub struct PcmBuffer {
    /// Interleaved sample data shared with the mix callback
    pub samples: Arc<[f32]>,
    /// Channel count of the interleaved data
    pub channels: u16,
}

impl PcmBuffer {
    /// Number of frames in the buffer
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }
}

/// Snapshot of a source's playback flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceStatus {
    /// Source is currently producing audio
    pub playing: bool,
    /// Source restarts from the beginning when it runs out of data
    pub looping: bool,
}

/// Configuration for an audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Preferred sample rate in Hz (the device may override)
    pub sample_rate: u32,
    /// Preferred output channel count
    pub channels: u16,
    /// Cadence reported to stream feed loops, iterations per second
    pub refresh_hz: u32,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            refresh_hz: 60,
        }
    }
}

impl From<&AudioSettings> for AudioBackendConfig {
    fn from(settings: &AudioSettings) -> Self {
        Self {
            sample_rate: settings.sample_rate,
            channels: settings.channels,
            refresh_hz: settings.refresh_hz,
        }
    }
}

/// Native playback abstraction.
///
/// Implementations are driven from the tick thread only; the contract
/// with their internal mixing path is that source control never blocks
/// audio rendering.
pub trait AudioBackend {
    /// Open the device/context
    fn initialize(&mut self, config: &AudioBackendConfig) -> Result<(), AudioError>;

    /// Release the device/context; idempotent
    fn shutdown(&mut self);

    /// Whether the device is open
    fn is_initialized(&self) -> bool;

    /// Sample formats the backend accepts, for decode negotiation
    fn caps(&self) -> BackendCaps;

    /// Actual output sample rate after initialization
    fn sample_rate(&self) -> u32;

    /// Cadence stream feed loops should run at
    fn refresh_hz(&self) -> u32;

    /// Upload a fully decoded buffer
    fn create_buffer(&mut self, pcm: PcmBuffer) -> Result<BufferHandle, AudioError>;

    /// Delete a buffer. Sources still bound to it are a programming
    /// error; stop them first.
    fn delete_buffer(&mut self, buffer: BufferHandle) -> Result<(), AudioError>;

    /// Start a new source playing `buffer`
    fn play_buffer(
        &mut self,
        buffer: BufferHandle,
        looping: bool,
        gain: f32,
    ) -> Result<SourceHandle, AudioError>;

    /// Start a source pulling interleaved samples from `consumer`
    fn play_stream(
        &mut self,
        consumer: HeapCons<f32>,
        channels: u16,
        gain: f32,
    ) -> Result<SourceHandle, AudioError>;

    /// Stop a source and release it
    fn stop_source(&mut self, source: SourceHandle) -> Result<(), AudioError>;

    /// Set a source's gain
    fn set_gain(&mut self, source: SourceHandle, gain: f32) -> Result<(), AudioError>;

    /// Read a source's gain
    fn gain(&self, source: SourceHandle) -> Result<f32, AudioError>;

    /// Playback flags; `Default` (stopped, non-looping) for unknown handles
    fn status(&self, source: SourceHandle) -> SourceStatus;

    /// Seconds of audio the source has rendered
    fn playback_secs(&self, source: SourceHandle) -> Result<f32, AudioError>;

    /// Stop and release every source
    fn stop_all(&mut self);
}

/// Open the default backend for this platform.
///
/// Device-open failure is not fatal to the process: the engine degrades
/// to the silent [`null_backend::NullBackend`] with a logged warning.
pub fn create_backend(config: &AudioBackendConfig) -> Box<dyn AudioBackend> {
    let mut backend = Box::new(cpal_backend::CpalBackend::new());
    match backend.initialize(config) {
        Ok(()) => backend,
        Err(e) => {
            log::warn!("audio device unavailable ({e}); continuing silently");
            let mut null = Box::new(null_backend::NullBackend::new());
            // Initialization of the null backend cannot fail.
            let _ = null.initialize(config);
            null
        }
    }
}
