//! Audio configuration
//!
//! Settings are plain serde types loadable from TOML or RON files, with
//! validation applied before the engine consumes them.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tunable parameters for the audio engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Preferred output sample rate in Hz (the device may override this)
    pub sample_rate: u32,

    /// Preferred output channel count (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Per-stream ring buffer capacity in frames
    pub ring_buffer_frames: usize,

    /// Cadence of the stream feed loops, in iterations per second
    pub refresh_hz: u32,

    /// Silence between background-music tracks, in seconds
    pub music_gap_secs: f32,

    /// Tracks eligible for the relaxing background-music rotation
    pub relaxing_tracks: Vec<String>,

    /// Tracks eligible for the fighting background-music rotation
    pub fighting_tracks: Vec<String>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            ring_buffer_frames: 4_410,
            refresh_hz: 60,
            music_gap_secs: 6.0,
            relaxing_tracks: Vec::new(),
            fighting_tracks: Vec::new(),
        }
    }
}

impl AudioSettings {
    /// Load settings from a TOML or RON file, selected by extension
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        let settings: Self = if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to a TOML or RON file, selected by extension
    pub fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, Default::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }

    /// Reject values the engine cannot operate with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be non-zero".into()));
        }
        if self.channels == 0 || self.channels > 2 {
            return Err(ConfigError::Invalid(format!(
                "channels must be 1 or 2, got {}",
                self.channels
            )));
        }
        if self.ring_buffer_frames == 0 {
            return Err(ConfigError::Invalid(
                "ring_buffer_frames must be non-zero".into(),
            ));
        }
        if self.refresh_hz == 0 {
            return Err(ConfigError::Invalid("refresh_hz must be non-zero".into()));
        }
        if self.music_gap_secs < 0.0 {
            return Err(ConfigError::Invalid(
                "music_gap_secs must not be negative".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        assert!(AudioSettings::default().validate().is_ok());
    }

    #[test]
    fn toml_round_trip() {
        let mut settings = AudioSettings::default();
        settings.refresh_hz = 120;
        settings.relaxing_tracks = vec!["calm_1".into(), "calm_2".into()];

        let text = toml::to_string_pretty(&settings).unwrap();
        let parsed: AudioSettings = toml::from_str(&text).unwrap();

        assert_eq!(parsed.refresh_hz, 120);
        assert_eq!(parsed.relaxing_tracks, settings.relaxing_tracks);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let parsed: AudioSettings = toml::from_str("sample_rate = 48000\n").unwrap();
        assert_eq!(parsed.sample_rate, 48_000);
        assert_eq!(parsed.channels, 2);
        assert_eq!(parsed.refresh_hz, 60);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut settings = AudioSettings::default();
        settings.channels = 6;
        assert!(settings.validate().is_err());

        let mut settings = AudioSettings::default();
        settings.sample_rate = 0;
        assert!(settings.validate().is_err());

        let mut settings = AudioSettings::default();
        settings.music_gap_secs = -1.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(matches!(
            AudioSettings::load_from_file("audio.yaml"),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
