//! Streamed playback
//!
//! A [`StreamPlayer`] progressively decodes one audio file into a
//! fixed-capacity lock-free ring buffer. The feed thread is the single
//! producer; the backend's mix callback is the single consumer. Cursor
//! updates go through the ring buffer's atomics, so the callback side
//! never takes a lock and never blocks.

use ringbuf::traits::{Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::decoder::{resample_linear, AudioFile};
use crate::error::AudioError;

/// Frames pulled from the decoder per top-up iteration
const DECODE_BLOCK_FRAMES: usize = 1024;

/// Lower bound on ring capacity, in frames at the device rate
const MIN_RING_FRAMES: usize = 2048;

/// Lifecycle of a named stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No usable decoder is attached
    NotReady,
    /// Opened and rewound; playback may start
    Ready,
    /// A feed thread is keeping the ring buffer topped up
    Playing,
    /// The decoder ran out of data and the feed loop exited
    Ended,
}

/// Progressive decode state for one streamed file
pub struct StreamPlayer {
    file: AudioFile,
    device_rate: u32,
    ring_frames: usize,
    producer: Option<HeapProd<f32>>,
    /// Resampled samples that did not fit the ring on the last top-up
    leftover: Vec<f32>,
    eof: bool,
}

impl StreamPlayer {
    /// Open `path` for streaming toward a device running at `device_rate`.
    pub fn open(path: &str, device_rate: u32, ring_frames: usize) -> Result<Self, AudioError> {
        let file = AudioFile::open(path)?;
        Ok(Self {
            file,
            device_rate,
            ring_frames: ring_frames.max(MIN_RING_FRAMES),
            producer: None,
            leftover: Vec::new(),
            eof: false,
        })
    }

    /// Channel count fed into the ring
    pub fn channels(&self) -> u16 {
        self.file.channels()
    }

    /// The open decoder, for format negotiation and position queries
    pub fn file(&self) -> &AudioFile {
        &self.file
    }

    /// Mutable decoder access (format negotiation happens before play)
    pub fn file_mut(&mut self) -> &mut AudioFile {
        &mut self.file
    }

    /// Seconds of audio decoded so far
    pub fn position_secs(&self) -> f64 {
        self.file.position_secs()
    }

    /// Seconds of audio left to decode, when the total is known
    pub fn remaining_secs(&self) -> Option<f64> {
        self.file
            .duration_secs()
            .map(|total| (total - self.file.position_secs()).max(0.0))
    }

    /// Allocate the ring buffer, prime it with initial blocks, and hand
    /// back the consumer half for source binding.
    ///
    /// Fails if the decoder yields no frames at all.
    pub fn prepare(&mut self) -> Result<HeapCons<f32>, AudioError> {
        let capacity = self.ring_frames * usize::from(self.channels().max(1));
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        self.producer = Some(producer);
        self.leftover.clear();
        self.eof = false;

        let primed = self.fill()?;
        if primed == 0 {
            return Err(AudioError::EmptyAsset(self.file.path().to_string()));
        }
        Ok(consumer)
    }

    /// Top up the ring buffer with newly decoded frames.
    ///
    /// Non-blocking; called from the stream's feed thread at the device
    /// refresh cadence. Returns `false` once decode has reached the end
    /// of the file and everything has been handed to the ring.
    pub fn update(&mut self) -> Result<bool, AudioError> {
        self.fill()?;
        Ok(!(self.eof && self.leftover.is_empty()))
    }

    /// Rewind decode and ring cursors to the start without reopening.
    ///
    /// The ring itself is re-allocated on the next [`Self::prepare`];
    /// dropping the producer here lets the consumer side drain out.
    pub fn reset(&mut self) -> Result<(), AudioError> {
        self.file.rewind()?;
        self.producer = None;
        self.leftover.clear();
        self.eof = false;
        Ok(())
    }

    fn fill(&mut self) -> Result<usize, AudioError> {
        let Some(producer) = self.producer.as_mut() else {
            return Ok(0);
        };
        let channels = usize::from(self.file.channels().max(1));
        let mut fed = 0;

        loop {
            if !self.leftover.is_empty() {
                let pushed = producer.push_slice(&self.leftover);
                self.leftover.drain(..pushed);
                fed += pushed;
                if !self.leftover.is_empty() {
                    break; // ring is full
                }
            }
            if self.eof || producer.vacant_len() < channels {
                break;
            }
            match self.file.read_block(DECODE_BLOCK_FRAMES)? {
                Some(block) => {
                    self.leftover = resample_linear(
                        &block,
                        self.file.channels(),
                        self.file.sample_rate(),
                        self.device_rate,
                    );
                }
                None => self.eof = true,
            }
        }

        Ok(fed)
    }
}
