//! Shared fixtures for unit tests

use std::path::PathBuf;

/// Write a 16-bit PCM WAV file with a sine payload into the system temp
/// directory and return its path. Each call site uses a distinct `tag` so
/// parallel tests never collide.
pub fn write_test_wav(tag: &str, frames: u32, sample_rate: u32, channels: u16) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "audio_engine_{}_{}_{}.wav",
        tag,
        std::process::id(),
        frames
    ));

    let data_len = frames * u32::from(channels) * 2;
    let mut bytes = Vec::with_capacity(44 + data_len as usize);

    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * u32::from(channels) * 2).to_le_bytes());
    bytes.extend_from_slice(&(channels * 2).to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());

    for i in 0..frames {
        let sample = ((i as f32 * 0.05).sin() * 12_000.0) as i16;
        for _ in 0..channels {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
    }

    std::fs::write(&path, bytes).expect("failed to write test wav");
    path
}
