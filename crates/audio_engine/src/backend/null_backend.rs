//! Bookkeeping-only backend
//!
//! Stands in for the native device when none is available (CI, servers,
//! devices with no audio hardware) and drives the engine's unit tests.
//! Sources keep their reported state until told otherwise; a test control
//! handle can finish sources and drain stream rings to simulate playback.

use std::sync::{Arc, Mutex, PoisonError};

use ringbuf::traits::Consumer;
use ringbuf::HeapCons;
use slotmap::SlotMap;

use crate::decoder::BackendCaps;
use crate::error::AudioError;

use super::{
    AudioBackend, AudioBackendConfig, BufferHandle, PcmBuffer, SourceHandle, SourceStatus,
};

struct NullSource {
    gain: f32,
    looping: bool,
    playing: bool,
    consumer: Option<HeapCons<f32>>,
    frames_rendered: u64,
    channels: u16,
}

struct NullState {
    buffers: SlotMap<BufferHandle, PcmBuffer>,
    sources: SlotMap<SourceHandle, NullSource>,
    sample_rate: u32,
}

/// Silent backend with full handle bookkeeping
pub struct NullBackend {
    state: Arc<Mutex<NullState>>,
    refresh_hz: u32,
    initialized: bool,
}

/// Test/diagnostic control over a [`NullBackend`]'s sources
#[derive(Clone)]
pub struct NullControl {
    state: Arc<Mutex<NullState>>,
}

fn lock(state: &Arc<Mutex<NullState>>) -> std::sync::MutexGuard<'_, NullState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl NullBackend {
    /// Create an uninitialized null backend
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NullState {
                buffers: SlotMap::with_key(),
                sources: SlotMap::with_key(),
                sample_rate: 44_100,
            })),
            refresh_hz: 60,
            initialized: false,
        }
    }

    /// Handle for finishing and draining sources from outside
    pub fn control(&self) -> NullControl {
        NullControl {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NullControl {
    /// Mark a source as no longer playing, as if its data ran out
    pub fn finish(&self, source: SourceHandle) {
        if let Some(src) = lock(&self.state).sources.get_mut(source) {
            src.playing = false;
        }
    }

    /// Pop up to `max_samples` from a stream source's ring, simulating
    /// the device consuming audio. Returns the number of samples taken.
    pub fn drain(&self, source: SourceHandle, max_samples: usize) -> usize {
        let mut state = lock(&self.state);
        let Some(src) = state.sources.get_mut(source) else {
            return 0;
        };
        let Some(consumer) = src.consumer.as_mut() else {
            return 0;
        };
        let mut scratch = vec![0.0f32; max_samples];
        let popped = consumer.pop_slice(&mut scratch);
        src.frames_rendered += (popped / usize::from(src.channels.max(1))) as u64;
        popped
    }

    /// Number of live sources
    pub fn source_count(&self) -> usize {
        lock(&self.state).sources.len()
    }

    /// Number of live buffers
    pub fn buffer_count(&self) -> usize {
        lock(&self.state).buffers.len()
    }
}

impl AudioBackend for NullBackend {
    fn initialize(&mut self, config: &AudioBackendConfig) -> Result<(), AudioError> {
        lock(&self.state).sample_rate = config.sample_rate;
        self.refresh_hz = config.refresh_hz;
        self.initialized = true;
        log::info!("null audio backend initialized (silent output)");
        Ok(())
    }

    fn shutdown(&mut self) {
        if !self.initialized {
            return;
        }
        let mut state = lock(&self.state);
        state.sources.clear();
        state.buffers.clear();
        drop(state);
        self.initialized = false;
        log::info!("null audio backend shutdown");
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn caps(&self) -> BackendCaps {
        BackendCaps {
            float32: true,
            adpcm: false,
        }
    }

    fn sample_rate(&self) -> u32 {
        lock(&self.state).sample_rate
    }

    fn refresh_hz(&self) -> u32 {
        self.refresh_hz
    }

    fn create_buffer(&mut self, pcm: PcmBuffer) -> Result<BufferHandle, AudioError> {
        if !self.initialized {
            return Err(AudioError::BackendNotInitialized);
        }
        Ok(lock(&self.state).buffers.insert(pcm))
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) -> Result<(), AudioError> {
        lock(&self.state)
            .buffers
            .remove(buffer)
            .map(|_| ())
            .ok_or(AudioError::InvalidHandle)
    }

    fn play_buffer(
        &mut self,
        buffer: BufferHandle,
        looping: bool,
        gain: f32,
    ) -> Result<SourceHandle, AudioError> {
        if !self.initialized {
            return Err(AudioError::BackendNotInitialized);
        }
        let mut state = lock(&self.state);
        let channels = state
            .buffers
            .get(buffer)
            .ok_or(AudioError::InvalidHandle)?
            .channels;
        Ok(state.sources.insert(NullSource {
            gain: gain.max(0.0),
            looping,
            playing: true,
            consumer: None,
            frames_rendered: 0,
            channels,
        }))
    }

    fn play_stream(
        &mut self,
        consumer: HeapCons<f32>,
        channels: u16,
        gain: f32,
    ) -> Result<SourceHandle, AudioError> {
        if !self.initialized {
            return Err(AudioError::BackendNotInitialized);
        }
        Ok(lock(&self.state).sources.insert(NullSource {
            gain: gain.max(0.0),
            looping: false,
            playing: true,
            consumer: Some(consumer),
            frames_rendered: 0,
            channels,
        }))
    }

    fn stop_source(&mut self, source: SourceHandle) -> Result<(), AudioError> {
        lock(&self.state)
            .sources
            .remove(source)
            .map(|_| ())
            .ok_or(AudioError::InvalidHandle)
    }

    fn set_gain(&mut self, source: SourceHandle, gain: f32) -> Result<(), AudioError> {
        lock(&self.state)
            .sources
            .get_mut(source)
            .map(|src| src.gain = gain.max(0.0))
            .ok_or(AudioError::InvalidHandle)
    }

    fn gain(&self, source: SourceHandle) -> Result<f32, AudioError> {
        lock(&self.state)
            .sources
            .get(source)
            .map(|src| src.gain)
            .ok_or(AudioError::InvalidHandle)
    }

    fn status(&self, source: SourceHandle) -> SourceStatus {
        lock(&self.state)
            .sources
            .get(source)
            .map(|src| SourceStatus {
                playing: src.playing,
                looping: src.looping,
            })
            .unwrap_or_default()
    }

    fn playback_secs(&self, source: SourceHandle) -> Result<f32, AudioError> {
        let state = lock(&self.state);
        let src = state.sources.get(source).ok_or(AudioError::InvalidHandle)?;
        Ok(src.frames_rendered as f32 / state.sample_rate as f32)
    }

    fn stop_all(&mut self) {
        lock(&self.state).sources.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pcm(frames: usize) -> PcmBuffer {
        PcmBuffer {
            samples: Arc::from(vec![0.25f32; frames * 2]),
            channels: 2,
        }
    }

    #[test]
    fn uninitialized_backend_rejects_playback() {
        let mut backend = NullBackend::new();
        assert!(matches!(
            backend.create_buffer(pcm(16)),
            Err(AudioError::BackendNotInitialized)
        ));
    }

    #[test]
    fn source_lifecycle_and_status() {
        let mut backend = NullBackend::new();
        backend.initialize(&AudioBackendConfig::default()).unwrap();
        let control = backend.control();

        let buffer = backend.create_buffer(pcm(16)).unwrap();
        let source = backend.play_buffer(buffer, true, 0.5).unwrap();

        assert_eq!(
            backend.status(source),
            SourceStatus {
                playing: true,
                looping: true
            }
        );
        assert_eq!(backend.gain(source).unwrap(), 0.5);

        control.finish(source);
        assert!(!backend.status(source).playing);

        backend.stop_source(source).unwrap();
        assert!(matches!(backend.gain(source), Err(AudioError::InvalidHandle)));
        assert_eq!(backend.status(source), SourceStatus::default());
    }

    #[test]
    fn shutdown_clears_everything() {
        let mut backend = NullBackend::new();
        backend.initialize(&AudioBackendConfig::default()).unwrap();
        let control = backend.control();

        let buffer = backend.create_buffer(pcm(8)).unwrap();
        backend.play_buffer(buffer, false, 1.0).unwrap();
        backend.shutdown();

        assert_eq!(control.source_count(), 0);
        assert_eq!(control.buffer_count(), 0);
        assert!(!backend.is_initialized());

        // Shutdown twice is safe.
        backend.shutdown();
    }
}
