//! # Audio Engine
//!
//! The audio subsystem of a real-time 2D game: one-shot sound effects,
//! streamed music with dedicated feed threads, quadratic volume fades,
//! and an automatic background-music rotation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use audio_engine::prelude::*;
//!
//! fn main() -> Result<(), AudioError> {
//!     let mut engine = SoundEngine::new(AudioSettings::default())?;
//!
//!     engine.load_sound("hit", "assets/audio/hit.wav", 0.8)?;
//!     engine.load_stream("calm_1", "assets/audio/calm_1.ogg", 0.6)?;
//!
//!     engine.play_sound("hit", false, None)?;
//!     engine.start_background_music(MusicCategory::Relaxing);
//!
//!     // Once per frame:
//!     engine.update(1.0 / 60.0);
//!
//!     engine.clear();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod backend;
pub mod config;
pub mod decoder;
pub mod error;
pub mod fade;
pub mod music;
pub mod stream;
pub mod threads;

mod engine;

#[cfg(test)]
mod test_support;

pub use engine::SoundEngine;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        backend::{AudioBackend, AudioBackendConfig, BufferHandle, SourceHandle},
        config::AudioSettings,
        error::{AudioError, ConfigError},
        music::MusicCategory,
        stream::StreamState,
        SoundEngine,
    };
}
