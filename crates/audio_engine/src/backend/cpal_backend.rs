//! cpal audio backend
//!
//! One cpal output stream with a mix callback that sums every active
//! voice. The tick thread controls voices through a command channel and
//! per-source shared atomics; the callback drains commands with
//! `try_iter` and reads the ring buffers, so it never takes a lock and
//! never blocks.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::Consumer;
use ringbuf::HeapCons;
use slotmap::SlotMap;

use crate::decoder::BackendCaps;
use crate::error::AudioError;

use super::{
    AudioBackend, AudioBackendConfig, BufferHandle, PcmBuffer, SourceHandle, SourceStatus,
};

/// State shared between the control side and the mix callback
struct SourceShared {
    playing: AtomicBool,
    looping: AtomicBool,
    gain_bits: AtomicU32,
    frames_rendered: AtomicU64,
}

impl SourceShared {
    fn new(looping: bool, gain: f32) -> Self {
        Self {
            playing: AtomicBool::new(true),
            looping: AtomicBool::new(looping),
            gain_bits: AtomicU32::new(gain.max(0.0).to_bits()),
            frames_rendered: AtomicU64::new(0),
        }
    }

    fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }

    fn set_gain(&self, gain: f32) {
        self.gain_bits.store(gain.max(0.0).to_bits(), Ordering::Relaxed);
    }
}

enum MixerCommand {
    PlayBuffer {
        key: SourceHandle,
        pcm: PcmBuffer,
        shared: Arc<SourceShared>,
    },
    PlayStream {
        key: SourceHandle,
        consumer: HeapCons<f32>,
        channels: u16,
        shared: Arc<SourceShared>,
    },
    Stop(SourceHandle),
    StopAll,
}

enum VoiceKind {
    Buffer { pcm: PcmBuffer, cursor: usize },
    Stream {
        consumer: HeapCons<f32>,
        channels: u16,
        scratch: Vec<f32>,
    },
}

struct Voice {
    key: SourceHandle,
    kind: VoiceKind,
    shared: Arc<SourceShared>,
}

/// Callback-side mixer: owns the voice table, fed by the command channel
struct Mixer {
    rx: mpsc::Receiver<MixerCommand>,
    voices: Vec<Voice>,
    out_channels: usize,
}

impl Mixer {
    fn new(rx: mpsc::Receiver<MixerCommand>, out_channels: usize) -> Self {
        Self {
            rx,
            voices: Vec::new(),
            out_channels,
        }
    }

    fn render(&mut self, out: &mut [f32]) {
        for command in self.rx.try_iter() {
            match command {
                MixerCommand::PlayBuffer { key, pcm, shared } => self.voices.push(Voice {
                    key,
                    kind: VoiceKind::Buffer { pcm, cursor: 0 },
                    shared,
                }),
                MixerCommand::PlayStream {
                    key,
                    consumer,
                    channels,
                    shared,
                } => self.voices.push(Voice {
                    key,
                    kind: VoiceKind::Stream {
                        consumer,
                        channels,
                        scratch: Vec::new(),
                    },
                    shared,
                }),
                MixerCommand::Stop(key) => self.voices.retain(|v| v.key != key),
                MixerCommand::StopAll => self.voices.clear(),
            }
        }

        out.fill(0.0);
        let out_channels = self.out_channels;
        self.voices.retain_mut(|voice| {
            if !voice.shared.playing.load(Ordering::Acquire) {
                return false;
            }
            match &mut voice.kind {
                VoiceKind::Buffer { pcm, cursor } => {
                    mix_buffer(out, out_channels, pcm, cursor, &voice.shared)
                }
                VoiceKind::Stream {
                    consumer,
                    channels,
                    scratch,
                } => {
                    mix_stream(out, out_channels, consumer, *channels, scratch, &voice.shared);
                    true
                }
            }
        });
    }
}

fn mix_buffer(
    out: &mut [f32],
    out_channels: usize,
    pcm: &PcmBuffer,
    cursor: &mut usize,
    shared: &SourceShared,
) -> bool {
    let gain = shared.gain();
    let src_channels = usize::from(pcm.channels.max(1));
    let total_frames = pcm.frames();
    let frames = out.len() / out_channels;
    let mut rendered = 0u64;

    for frame in 0..frames {
        if *cursor >= total_frames {
            if shared.looping.load(Ordering::Relaxed) {
                *cursor = 0;
            } else {
                shared.playing.store(false, Ordering::Release);
                break;
            }
        }
        let base = *cursor * src_channels;
        for c in 0..out_channels {
            let sample = if out_channels == 1 && src_channels == 2 {
                0.5 * (pcm.samples[base] + pcm.samples[base + 1])
            } else {
                pcm.samples[base + (c % src_channels)]
            };
            out[frame * out_channels + c] += sample * gain;
        }
        *cursor += 1;
        rendered += 1;
    }

    shared.frames_rendered.fetch_add(rendered, Ordering::Relaxed);
    shared.playing.load(Ordering::Relaxed)
}

fn mix_stream(
    out: &mut [f32],
    out_channels: usize,
    consumer: &mut HeapCons<f32>,
    channels: u16,
    scratch: &mut Vec<f32>,
    shared: &SourceShared,
) {
    let gain = shared.gain();
    let src_channels = usize::from(channels.max(1));
    let frames = out.len() / out_channels;
    let want = frames * src_channels;

    if scratch.len() < want {
        scratch.resize(want, 0.0);
    }
    // An underrun (or a finished decode) simply mixes fewer frames; the
    // rest of the period stays silent.
    let popped = consumer.pop_slice(&mut scratch[..want]);
    let popped_frames = popped / src_channels;

    for frame in 0..popped_frames {
        let base = frame * src_channels;
        for c in 0..out_channels {
            let sample = if out_channels == 1 && src_channels == 2 {
                0.5 * (scratch[base] + scratch[base + 1])
            } else {
                scratch[base + (c % src_channels)]
            };
            out[frame * out_channels + c] += sample * gain;
        }
    }

    shared
        .frames_rendered
        .fetch_add(popped_frames as u64, Ordering::Relaxed);
}

/// cpal-based audio backend
pub struct CpalBackend {
    stream: Option<cpal::Stream>,
    tx: Option<mpsc::Sender<MixerCommand>>,
    sources: SlotMap<SourceHandle, Arc<SourceShared>>,
    buffers: SlotMap<BufferHandle, PcmBuffer>,
    sample_rate: u32,
    refresh_hz: u32,
    initialized: bool,
}

impl CpalBackend {
    /// Create an uninitialized backend
    pub fn new() -> Self {
        Self {
            stream: None,
            tx: None,
            sources: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            sample_rate: 44_100,
            refresh_hz: 60,
            initialized: false,
        }
    }

    fn sender(&self) -> Result<&mpsc::Sender<MixerCommand>, AudioError> {
        self.tx.as_ref().ok_or(AudioError::BackendNotInitialized)
    }

    fn send(&self, command: MixerCommand) -> Result<(), AudioError> {
        self.sender()?
            .send(command)
            .map_err(|_| AudioError::PlaybackFailed("mixer callback is gone".into()))
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn build_stream(
    device: &cpal::Device,
    supported: cpal::SupportedStreamConfig,
    mut mixer: Mixer,
) -> Result<cpal::Stream, AudioError> {
    let err_fn = |err| log::error!("audio stream error: {err}");

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => {
            let config = supported.into();
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        mixer.render(data);
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| AudioError::BackendInitFailed(e.to_string()))?
        }
        cpal::SampleFormat::I16 => {
            let config = supported.into();
            let mut temp: Vec<f32> = Vec::new();
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        if temp.len() < data.len() {
                            temp.resize(data.len(), 0.0);
                        }
                        mixer.render(&mut temp[..data.len()]);
                        for (d, &s) in data.iter_mut().zip(&temp) {
                            *d = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| AudioError::BackendInitFailed(e.to_string()))?
        }
        cpal::SampleFormat::U16 => {
            let config = supported.into();
            let mut temp: Vec<f32> = Vec::new();
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                        if temp.len() < data.len() {
                            temp.resize(data.len(), 0.0);
                        }
                        mixer.render(&mut temp[..data.len()]);
                        for (d, &s) in data.iter_mut().zip(&temp) {
                            *d = ((s * 32767.0 + 32768.0).clamp(0.0, 65535.0)) as u16;
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| AudioError::BackendInitFailed(e.to_string()))?
        }
        other => {
            return Err(AudioError::BackendInitFailed(format!(
                "unsupported sample format: {other:?}"
            )));
        }
    };

    Ok(stream)
}

impl AudioBackend for CpalBackend {
    fn initialize(&mut self, config: &AudioBackendConfig) -> Result<(), AudioError> {
        if self.initialized {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::NoOutputDevice)?;
        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::BackendInitFailed(e.to_string()))?;

        self.sample_rate = supported.sample_rate().0;
        let out_channels = usize::from(supported.channels());

        let (tx, rx) = mpsc::channel();
        let mixer = Mixer::new(rx, out_channels.max(1));
        let stream = build_stream(&device, supported, mixer)?;
        stream
            .play()
            .map_err(|e| AudioError::BackendInitFailed(e.to_string()))?;

        self.stream = Some(stream);
        self.tx = Some(tx);
        self.refresh_hz = config.refresh_hz;
        self.initialized = true;
        log::info!(
            "cpal audio backend initialized at {} Hz, {} output channels",
            self.sample_rate,
            out_channels
        );
        Ok(())
    }

    fn shutdown(&mut self) {
        if !self.initialized {
            return;
        }
        self.stop_all();
        self.stream = None;
        self.tx = None;
        self.sources.clear();
        self.buffers.clear();
        self.initialized = false;
        log::info!("cpal audio backend shutdown");
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
        self.sample_rate
    }

    fn refresh_hz(&self) -> u32 {
        self.refresh_hz
    }

    fn create_buffer(&mut self, pcm: PcmBuffer) -> Result<BufferHandle, AudioError> {
        if !self.initialized {
            return Err(AudioError::BackendNotInitialized);
        }
        Ok(self.buffers.insert(pcm))
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) -> Result<(), AudioError> {
        self.buffers
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
        let pcm = self
            .buffers
            .get(buffer)
            .ok_or(AudioError::InvalidHandle)?
            .clone();
        let shared = Arc::new(SourceShared::new(looping, gain));
        let key = self.sources.insert(Arc::clone(&shared));
        self.send(MixerCommand::PlayBuffer { key, pcm, shared })?;
        Ok(key)
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
        let shared = Arc::new(SourceShared::new(false, gain));
        let key = self.sources.insert(Arc::clone(&shared));
        self.send(MixerCommand::PlayStream {
            key,
            consumer,
            channels,
            shared,
        })?;
        Ok(key)
    }

    fn stop_source(&mut self, source: SourceHandle) -> Result<(), AudioError> {
        let shared = self
            .sources
            .remove(source)
            .ok_or(AudioError::InvalidHandle)?;
        shared.playing.store(false, Ordering::Release);
        // Best effort; the retain in the callback also drops the voice.
        let _ = self.send(MixerCommand::Stop(source));
        Ok(())
    }

    fn set_gain(&mut self, source: SourceHandle, gain: f32) -> Result<(), AudioError> {
        self.sources
            .get(source)
            .map(|shared| shared.set_gain(gain))
            .ok_or(AudioError::InvalidHandle)
    }

    fn gain(&self, source: SourceHandle) -> Result<f32, AudioError> {
        self.sources
            .get(source)
            .map(|shared| shared.gain())
            .ok_or(AudioError::InvalidHandle)
    }

    fn status(&self, source: SourceHandle) -> SourceStatus {
        self.sources
            .get(source)
            .map(|shared| SourceStatus {
                playing: shared.playing.load(Ordering::Acquire),
                looping: shared.looping.load(Ordering::Relaxed),
            })
            .unwrap_or_default()
    }

    fn playback_secs(&self, source: SourceHandle) -> Result<f32, AudioError> {
        let shared = self.sources.get(source).ok_or(AudioError::InvalidHandle)?;
        Ok(shared.frames_rendered.load(Ordering::Relaxed) as f32 / self.sample_rate as f32)
    }

    fn stop_all(&mut self) {
        for (_, shared) in &self.sources {
            shared.playing.store(false, Ordering::Release);
        }
        self.sources.clear();
        if let Some(tx) = &self.tx {
            let _ = tx.send(MixerCommand::StopAll);
        }
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
