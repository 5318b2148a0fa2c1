//! Audio file decoding
//!
//! Thin wrapper over Symphonia: probe a file once, then either decode it
//! fully up front (one-shot sound effects) or pull fixed-size blocks on
//! demand (streamed music). All output is interleaved `f32` at the file's
//! native rate; [`resample_linear`] converts blocks to the device rate so
//! the mix callback never resamples.

use std::fs::File;
use std::io;
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, SampleBuffer, SignalSpec};
use symphonia::core::codecs::{
    CodecType, Decoder as SymphoniaDecoder, DecoderOptions, CODEC_TYPE_ADPCM_IMA_WAV,
    CODEC_TYPE_ADPCM_MS, CODEC_TYPE_PCM_F32BE, CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_F64BE,
    CODEC_TYPE_PCM_F64LE,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::error::AudioError;

/// Most channels the engine will mix
pub const MAX_CHANNELS: u16 = 2;

/// Cap on fully decoded assets, in interleaved samples (five minutes of
/// stereo at 44.1 kHz). Anything longer belongs in a stream.
pub const MAX_DECODE_SAMPLES: usize = 26_460_000;

/// Sample representation of a decoded asset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleLayout {
    /// 32-bit float PCM
    Float32,
    /// 16-bit integer PCM
    Int16,
    /// Microsoft ADPCM, block-aligned
    MsAdpcm,
    /// IMA ADPCM, block-aligned
    ImaAdpcm,
}

/// What the backend can accept beyond plain 16-bit PCM
#[derive(Debug, Clone, Copy)]
pub struct BackendCaps {
    /// Backend accepts 32-bit float sample data
    pub float32: bool,
    /// Backend accepts block-aligned ADPCM sample data
    pub adpcm: bool,
}

impl SampleLayout {
    /// Pick the richest representation the backend supports for an asset
    /// with the given native layout and channel count.
    ///
    /// Fixed-order capability rules, first match wins; anything that
    /// falls through lands on 16-bit PCM.
    pub fn negotiate(native: Self, channels: u16, caps: BackendCaps) -> Self {
        match native {
            Self::Float32 if caps.float32 => Self::Float32,
            Self::MsAdpcm if caps.adpcm && channels <= 2 => Self::MsAdpcm,
            Self::ImaAdpcm if caps.adpcm && channels <= 2 => Self::ImaAdpcm,
            _ => Self::Int16,
        }
    }
}

fn native_layout(codec: CodecType) -> SampleLayout {
    if codec == CODEC_TYPE_PCM_F32LE
        || codec == CODEC_TYPE_PCM_F32BE
        || codec == CODEC_TYPE_PCM_F64LE
        || codec == CODEC_TYPE_PCM_F64BE
    {
        SampleLayout::Float32
    } else if codec == CODEC_TYPE_ADPCM_MS {
        SampleLayout::MsAdpcm
    } else if codec == CODEC_TYPE_ADPCM_IMA_WAV {
        SampleLayout::ImaAdpcm
    } else {
        SampleLayout::Int16
    }
}

/// One open audio file with progressive decode state
pub struct AudioFile {
    path: String,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn SymphoniaDecoder>,
    track_id: u32,
    channels: u16,
    sample_rate: u32,
    total_frames: Option<u64>,
    duration_secs: Option<f64>,
    native: SampleLayout,
    layout: SampleLayout,
    sample_buf: Option<SampleBuffer<f32>>,
    pending: Vec<f32>,
    frames_read: u64,
}

impl AudioFile {
    /// Probe and open `path`.
    ///
    /// Fails on unreadable files, unsupported channel layouts, and
    /// assets known to contain zero frames. The caller treats any of
    /// these as "asset unavailable" rather than a crash.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AudioError> {
        let path_str = path.as_ref().display().to_string();
        let unavailable = |reason: String| AudioError::AssetUnavailable {
            path: path_str.clone(),
            reason,
        };

        let mut hint = Hint::new();
        if let Some(ext) = path.as_ref().extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let file = File::open(path.as_ref()).map_err(|e| unavailable(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| unavailable(format!("probe failed: {e}")))?;

        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| unavailable("missing default audio track".into()))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let channels = params
            .channels
            .as_ref()
            .map(|c| c.count() as u16)
            .ok_or_else(|| unavailable("missing channel layout".into()))?;
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(AudioError::UnsupportedChannels(channels));
        }

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| unavailable("missing sample rate".into()))?;

        if params.n_frames == Some(0) {
            return Err(AudioError::EmptyAsset(path_str));
        }
        let duration_secs = match (params.time_base, params.n_frames) {
            (Some(tb), Some(frames)) => {
                let t = tb.calc_time(frames);
                Some(t.seconds as f64 + t.frac)
            }
            _ => None,
        };

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| unavailable(format!("decoder init failed: {e}")))?;

        let native = native_layout(params.codec);

        Ok(Self {
            path: path_str,
            format,
            decoder,
            track_id,
            channels,
            sample_rate,
            total_frames: params.n_frames,
            duration_secs,
            native,
            layout: native,
            sample_buf: None,
            pending: Vec::new(),
            frames_read: 0,
        })
    }

    /// Path the file was opened from
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Channel count of the decoded audio
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Native sample rate of the file in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Total duration, when the container reports it
    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_secs
    }

    /// Decode position in seconds of audio handed out so far
    pub fn position_secs(&self) -> f64 {
        self.frames_read as f64 / f64::from(self.sample_rate)
    }

    /// Sample layout the file is natively encoded in
    pub fn native_layout(&self) -> SampleLayout {
        self.native
    }

    /// Negotiate the decode representation against backend capabilities
    /// and remember the choice for subsequent reads.
    pub fn negotiate_layout(&mut self, caps: BackendCaps) -> SampleLayout {
        let chosen = SampleLayout::negotiate(self.native, self.channels, caps);
        if chosen != self.native {
            log::debug!(
                "`{}`: falling back from {:?} to {:?}",
                self.path,
                self.native,
                chosen
            );
        }
        self.layout = chosen;
        chosen
    }

    /// Decode up to `frames` frames of interleaved samples.
    ///
    /// Returns `Ok(None)` once the file is exhausted.
    pub fn read_block(&mut self, frames: usize) -> Result<Option<Vec<f32>>, AudioError> {
        let channels = usize::from(self.channels);
        let want_samples = frames.saturating_mul(channels).max(channels);

        while self.pending.len() < want_samples {
            match self.format.next_packet() {
                Ok(packet) => {
                    if packet.track_id() != self.track_id {
                        continue;
                    }
                    match self.decoder.decode(&packet) {
                        Ok(audio_buf) => {
                            append_decoded(&mut self.sample_buf, &mut self.pending, audio_buf);
                        }
                        Err(SymphoniaError::DecodeError(_)) => continue,
                        Err(SymphoniaError::ResetRequired) => {
                            self.decoder.reset();
                            continue;
                        }
                        Err(e) => return Err(AudioError::DecodeFailed(e.to_string())),
                    }
                }
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(e) => return Err(AudioError::DecodeFailed(e.to_string())),
            }
        }

        if self.pending.is_empty() {
            return Ok(None);
        }

        let take = want_samples.min(self.pending.len());
        let mut out: Vec<f32> = self.pending.drain(..take).collect();
        if self.layout == SampleLayout::Int16 {
            // 16-bit PCM fallback: quantize to what the narrower
            // representation can carry.
            for s in &mut out {
                *s = (*s * 32767.0).round() / 32767.0;
            }
        }
        self.frames_read += (out.len() / channels) as u64;
        Ok(Some(out))
    }

    /// Decode the whole file into one interleaved buffer.
    ///
    /// Assets beyond [`MAX_DECODE_SAMPLES`] are rejected; the check runs
    /// up front when the container reports its length and incrementally
    /// otherwise.
    pub fn decode_all(&mut self) -> Result<Vec<f32>, AudioError> {
        if let Some(total) = self.total_frames {
            if total.saturating_mul(u64::from(self.channels)) > MAX_DECODE_SAMPLES as u64 {
                return Err(AudioError::AssetTooLarge(self.path.clone()));
            }
        }

        let mut samples = Vec::new();
        while let Some(block) = self.read_block(4096)? {
            samples.extend_from_slice(&block);
            if samples.len() > MAX_DECODE_SAMPLES {
                return Err(AudioError::AssetTooLarge(self.path.clone()));
            }
        }
        if samples.is_empty() {
            return Err(AudioError::EmptyAsset(self.path.clone()));
        }
        Ok(samples)
    }

    /// Rewind decode position to the start without reopening the file
    pub fn rewind(&mut self) -> Result<(), AudioError> {
        self.format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::new(0, 0.0),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| AudioError::DecodeFailed(format!("rewind failed: {e}")))?;
        self.decoder.reset();
        self.pending.clear();
        self.frames_read = 0;
        Ok(())
    }
}

fn append_decoded(
    sample_buf: &mut Option<SampleBuffer<f32>>,
    pending: &mut Vec<f32>,
    audio_buf: AudioBufferRef<'_>,
) {
    let spec = SignalSpec::new(audio_buf.spec().rate, audio_buf.spec().channels);
    let capacity = audio_buf.capacity() as u64;
    let needs_realloc = sample_buf
        .as_ref()
        .map_or(true, |buf| buf.capacity() < audio_buf.capacity());
    if needs_realloc {
        *sample_buf = Some(SampleBuffer::<f32>::new(capacity, spec));
    }

    if let Some(buf) = sample_buf.as_mut() {
        buf.copy_interleaved_ref(audio_buf);
        pending.extend_from_slice(buf.samples());
    }
}

/// Linearly resample interleaved frames from `from_rate` to `to_rate`.
///
/// Returns the input unchanged when the rates already match.
pub fn resample_linear(samples: &[f32], channels: u16, from_rate: u32, to_rate: u32) -> Vec<f32> {
    let channels = usize::from(channels.max(1));
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let frames_in = samples.len() / channels;
    if frames_in == 0 {
        return Vec::new();
    }
    let frames_out =
        ((frames_in as u64 * u64::from(to_rate)) / u64::from(from_rate)).max(1) as usize;

    let step = f64::from(from_rate) / f64::from(to_rate);
    let mut out = Vec::with_capacity(frames_out * channels);
    for i in 0..frames_out {
        let pos = i as f64 * step;
        let i0 = (pos as usize).min(frames_in - 1);
        let i1 = (i0 + 1).min(frames_in - 1);
        let frac = (pos - i0 as f64) as f32;
        for c in 0..channels {
            let a = samples[i0 * channels + c];
            let b = samples[i1 * channels + c];
            out.push(a + (b - a) * frac);
        }
    }
    out
}
