//! Sound engine orchestrator
//!
//! One explicitly constructed [`SoundEngine`] owns the backend, the
//! one-shot sound and stream tables, the fade schedules, the feed-thread
//! registry, and the background-music rotation. All engine methods are
//! called from the game's tick thread; the only state shared with feed
//! threads is each stream's player and the stream-state table, both
//! behind coarse mutexes. Lock the state table briefly and never while
//! calling into the backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::backend::{
    create_backend, AudioBackend, AudioBackendConfig, BufferHandle, PcmBuffer, SourceHandle,
};
use crate::config::AudioSettings;
use crate::decoder::{resample_linear, AudioFile};
use crate::error::AudioError;
use crate::fade::VolumeFade;
use crate::music::{MusicCategory, MusicRotation};
use crate::stream::{StreamPlayer, StreamState};
use crate::threads::{ThreadRegistry, WorkerId};

struct SoundAsset {
    buffer: BufferHandle,
    default_volume: f32,
}

struct StreamEntry {
    player: Arc<Mutex<StreamPlayer>>,
    source: Option<SourceHandle>,
    default_volume: f32,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Referencing a name that was never loaded is caller misuse, not a
/// runtime condition. Loud in debug builds, logged early-return in
/// release.
fn unknown_name(name: &str) -> AudioError {
    log::error!("lookup of unknown audio asset `{name}`");
    debug_assert!(false, "unknown audio asset `{name}`");
    AudioError::UnknownName(name.to_string())
}

/// Central audio engine: one-shot sounds, streamed music, fades, and
/// the background rotation.
pub struct SoundEngine {
    backend: Box<dyn AudioBackend>,
    settings: AudioSettings,
    sounds: HashMap<String, SoundAsset>,
    /// Per-name playing instances; the last element is the addressable one
    instances: HashMap<String, Vec<SourceHandle>>,
    play_counts: HashMap<String, u32>,
    streams: HashMap<String, StreamEntry>,
    stream_states: Arc<Mutex<HashMap<String, StreamState>>>,
    source_fades: HashMap<SourceHandle, VolumeFade>,
    stream_fades: HashMap<String, VolumeFade>,
    threads: ThreadRegistry,
    feed_threads: HashMap<String, WorkerId>,
    music: MusicRotation,
}

impl SoundEngine {
    /// Build the engine on the default backend for this platform.
    ///
    /// A missing audio device is not an error here: the engine comes up
    /// on the silent backend and every operation keeps working.
    pub fn new(settings: AudioSettings) -> Result<Self, AudioError> {
        settings.validate()?;
        let backend = create_backend(&AudioBackendConfig::from(&settings));
        Ok(Self::build(settings, backend))
    }

    /// Build the engine on a caller-supplied backend (tests, headless)
    pub fn with_backend(
        settings: AudioSettings,
        mut backend: Box<dyn AudioBackend>,
    ) -> Result<Self, AudioError> {
        settings.validate()?;
        if !backend.is_initialized() {
            backend.initialize(&AudioBackendConfig::from(&settings))?;
        }
        Ok(Self::build(settings, backend))
    }

    fn build(settings: AudioSettings, backend: Box<dyn AudioBackend>) -> Self {
        let mut music = MusicRotation::new(settings.music_gap_secs);
        music.set_tracks(MusicCategory::Relaxing, settings.relaxing_tracks.clone());
        music.set_tracks(MusicCategory::Fighting, settings.fighting_tracks.clone());

        Self {
            backend,
            settings,
            sounds: HashMap::new(),
            instances: HashMap::new(),
            play_counts: HashMap::new(),
            streams: HashMap::new(),
            stream_states: Arc::new(Mutex::new(HashMap::new())),
            source_fades: HashMap::new(),
            stream_fades: HashMap::new(),
            threads: ThreadRegistry::new(),
            feed_threads: HashMap::new(),
            music,
        }
    }

    // ---- one-shot sounds ----

    /// Decode `path` fully and register it under `name`.
    ///
    /// Reloading an existing name stops its instances and replaces the
    /// buffer.
    pub fn load_sound(
        &mut self,
        name: &str,
        path: &str,
        default_volume: f32,
    ) -> Result<(), AudioError> {
        let mut file = AudioFile::open(path)?;
        file.negotiate_layout(self.backend.caps());
        let samples = file.decode_all()?;
        let samples = resample_linear(
            &samples,
            file.channels(),
            file.sample_rate(),
            self.backend.sample_rate(),
        );
        let buffer = self.backend.create_buffer(PcmBuffer {
            samples: Arc::from(samples),
            channels: file.channels(),
        })?;

        if let Some(old) = self.sounds.remove(name) {
            self.remove_instances(name);
            let _ = self.backend.delete_buffer(old.buffer);
        }
        self.sounds.insert(
            name.to_string(),
            SoundAsset {
                buffer,
                default_volume,
            },
        );
        log::info!("loaded sound `{name}` from `{path}`");
        Ok(())
    }

    /// Drop a loaded sound, stopping every instance of it first
    pub fn unload_sound(&mut self, name: &str) -> Result<(), AudioError> {
        let Some(asset) = self.sounds.remove(name) else {
            return Err(unknown_name(name));
        };
        self.remove_instances(name);
        self.play_counts.remove(name);
        self.backend.delete_buffer(asset.buffer)
    }

    /// Start a new instance of a loaded sound.
    ///
    /// `volume` of `None` uses the default recorded at load time. There
    /// is no cap on concurrent instances per name; callers rate-limit
    /// themselves.
    pub fn play_sound(
        &mut self,
        name: &str,
        looping: bool,
        volume: Option<f32>,
    ) -> Result<(), AudioError> {
        let (buffer, default_volume) = match self.sounds.get(name) {
            Some(asset) => (asset.buffer, asset.default_volume),
            None => return Err(unknown_name(name)),
        };
        let gain = volume.unwrap_or(default_volume);
        let source = self.backend.play_buffer(buffer, looping, gain)?;

        self.instances.entry(name.to_string()).or_default().push(source);
        *self.play_counts.entry(name.to_string()).or_insert(0) += 1;
        Ok(())
    }

    /// Force-stop and release every instance playing under `name`
    pub fn stop_sound(&mut self, name: &str) -> Result<(), AudioError> {
        if !self.instances.contains_key(name) {
            return Err(unknown_name(name));
        }
        self.remove_instances(name);
        Ok(())
    }

    /// Reclaim finished sources.
    ///
    /// With `force` every tracked instance goes; otherwise only those
    /// that are neither playing nor looping. The backend never reclaims
    /// on its own, so this runs once per tick.
    pub fn cleanup_sources(&mut self, force: bool) {
        let mut drained = Vec::new();
        for (name, handles) in &mut self.instances {
            handles.retain(|&handle| {
                let status = self.backend.status(handle);
                let keep = !force && (status.playing || status.looping);
                if !keep {
                    self.source_fades.remove(&handle);
                    let _ = self.backend.stop_source(handle);
                }
                keep
            });
            if handles.is_empty() {
                drained.push(name.clone());
            }
        }
        for name in drained {
            self.instances.remove(&name);
        }
    }

    // ---- streams ----

    /// Open a streamed asset and register it under `name`.
    ///
    /// Failure leaves no entry behind.
    pub fn load_stream(
        &mut self,
        name: &str,
        path: &str,
        default_volume: f32,
    ) -> Result<(), AudioError> {
        let mut player = StreamPlayer::open(
            path,
            self.backend.sample_rate(),
            self.settings.ring_buffer_frames,
        )?;
        player.file_mut().negotiate_layout(self.backend.caps());

        self.streams.insert(
            name.to_string(),
            StreamEntry {
                player: Arc::new(Mutex::new(player)),
                source: None,
                default_volume,
            },
        );
        lock(&self.stream_states).insert(name.to_string(), StreamState::Ready);
        log::info!("loaded stream `{name}` from `{path}`");
        Ok(())
    }

    /// Start (or restart) streamed playback of `name`.
    ///
    /// A stream that is already playing or has ended is reset first. The
    /// previous feed thread, if any, is always joined before a new one
    /// spawns, so at most one feed loop is ever alive per name. If
    /// priming fails the stream is closed and the error propagated.
    pub fn play_stream(&mut self, name: &str, volume: Option<f32>) -> Result<(), AudioError> {
        if !self.streams.contains_key(name) {
            return Err(unknown_name(name));
        }

        let state = lock(&self.stream_states).get(name).copied();
        if matches!(state, Some(StreamState::Playing | StreamState::Ended)) {
            self.reset_stream(name)?;
        }
        if let Some(id) = self.feed_threads.remove(name) {
            self.threads.join(id);
        }

        let (player, gain) = match self.streams.get(name) {
            Some(entry) => (
                Arc::clone(&entry.player),
                volume.unwrap_or(entry.default_volume),
            ),
            None => return Err(unknown_name(name)),
        };

        let consumer = match lock(&player).prepare() {
            Ok(consumer) => consumer,
            Err(e) => {
                // No usable frames: close the stream rather than keep a
                // dead entry around.
                self.streams.remove(name);
                self.stream_fades.remove(name);
                lock(&self.stream_states).remove(name);
                return Err(e);
            }
        };
        let channels = lock(&player).channels();
        let source = self.backend.play_stream(consumer, channels, gain)?;
        if let Some(entry) = self.streams.get_mut(name) {
            entry.source = Some(source);
        }
        lock(&self.stream_states).insert(name.to_string(), StreamState::Playing);

        let states = Arc::clone(&self.stream_states);
        let feed_name = name.to_string();
        let interval = Duration::from_secs_f64(1.0 / f64::from(self.backend.refresh_hz().max(1)));
        let id = self.threads.spawn(&format!("stream-feed:{name}"), move |token| {
            while !token.is_cancelled() {
                match lock(&player).update() {
                    Ok(true) => std::thread::sleep(interval),
                    Ok(false) => {
                        lock(&states).insert(feed_name.clone(), StreamState::Ended);
                        break;
                    }
                    Err(e) => {
                        log::error!("stream `{feed_name}` feed failed: {e}");
                        lock(&states).insert(feed_name.clone(), StreamState::Ended);
                        break;
                    }
                }
            }
        });
        self.feed_threads.insert(name.to_string(), id);
        Ok(())
    }

    /// Rewind a playing or ended stream back to `Ready`.
    ///
    /// A stream that is merely loaded is left untouched.
    pub fn reset_stream(&mut self, name: &str) -> Result<(), AudioError> {
        if !self.streams.contains_key(name) {
            return Err(unknown_name(name));
        }
        let state = lock(&self.stream_states).get(name).copied();
        if !matches!(state, Some(StreamState::Playing | StreamState::Ended)) {
            return Ok(());
        }

        if let Some(id) = self.feed_threads.remove(name) {
            self.threads.join(id);
        }
        if let Some(entry) = self.streams.get_mut(name) {
            if let Some(source) = entry.source.take() {
                let _ = self.backend.stop_source(source);
            }
            lock(&entry.player).reset()?;
        }
        self.stream_fades.remove(name);
        lock(&self.stream_states).insert(name.to_string(), StreamState::Ready);
        Ok(())
    }

    // ---- fades ----

    /// Fade the last-started instance of `name` to `target` over
    /// `duration` seconds
    pub fn gradually_change_volume(
        &mut self,
        name: &str,
        target: f32,
        duration: f32,
    ) -> Result<(), AudioError> {
        let Some(&handle) = self.instances.get(name).and_then(|list| list.last()) else {
            return Err(unknown_name(name));
        };
        let current = self.backend.gain(handle)?;
        self.source_fades
            .insert(handle, VolumeFade::new(current, duration, target));
        Ok(())
    }

    /// Fade a stream to `target` over `duration` seconds; silently does
    /// nothing unless the stream is currently playing
    pub fn gradually_change_stream_volume(&mut self, name: &str, target: f32, duration: f32) {
        let playing = matches!(
            lock(&self.stream_states).get(name),
            Some(StreamState::Playing)
        );
        if !playing {
            return;
        }
        let Some(source) = self.streams.get(name).and_then(|entry| entry.source) else {
            return;
        };
        let Ok(current) = self.backend.gain(source) else {
            return;
        };
        self.stream_fades
            .insert(name.to_string(), VolumeFade::new(current, duration, target));
    }

    /// Advance one-shot fades by `dt`, pruning fades whose source is gone
    pub fn update_sources_volume(&mut self, dt: f32) {
        let handles: Vec<SourceHandle> = self.source_fades.keys().copied().collect();
        for handle in handles {
            let Ok(current) = self.backend.gain(handle) else {
                self.source_fades.remove(&handle);
                continue;
            };
            let step = self.source_fades[&handle].advance(current, dt);
            let _ = self.backend.set_gain(handle, step.volume);
            if step.finished {
                self.source_fades.remove(&handle);
            }
        }
    }

    /// Advance stream fades by `dt`, pruning fades whose stream is gone
    pub fn update_streams_volume(&mut self, dt: f32) {
        let names: Vec<String> = self.stream_fades.keys().cloned().collect();
        for name in names {
            let Some(source) = self.streams.get(&name).and_then(|entry| entry.source) else {
                self.stream_fades.remove(&name);
                continue;
            };
            let Ok(current) = self.backend.gain(source) else {
                self.stream_fades.remove(&name);
                continue;
            };
            let step = self.stream_fades[&name].advance(current, dt);
            let _ = self.backend.set_gain(source, step.volume);
            if step.finished {
                self.stream_fades.remove(&name);
            }
        }
    }

    // ---- background music ----

    /// Switch the background rotation to `category` and start its first
    /// track.
    ///
    /// A no-op when the rotation is already in that category. Track
    /// names refer to previously loaded streams; a track that fails to
    /// start is logged and simply leaves no music playing.
    pub fn start_background_music(&mut self, category: MusicCategory) {
        if self.music.category() == Some(category) {
            return;
        }
        if let Some(current) = self.music.current_track().map(String::from) {
            if self.streams.contains_key(&current) {
                let _ = self.reset_stream(&current);
            }
        }
        if let Some(track) = self.music.start(category) {
            self.play_rotation_track(&track);
        }
    }

    /// Advance the rotation by one tick, starting the next track once
    /// the current one has been over for the configured gap
    pub fn refresh_background_music(&mut self, dt: f32) {
        if self.music.category().is_none() {
            return;
        }
        let ended = self.music.current_track().map_or(true, |track| {
            !matches!(
                lock(&self.stream_states).get(track),
                Some(StreamState::Playing | StreamState::Ready)
            )
        });
        if let Some(track) = self.music.on_tick(dt, ended, &mut rand::thread_rng()) {
            self.play_rotation_track(&track);
        }
    }

    /// Rotation track names come from configuration, so an entry that
    /// was never loaded is degraded-but-not-fatal: log it and leave no
    /// music playing.
    fn play_rotation_track(&mut self, track: &str) {
        if !self.streams.contains_key(track) {
            log::warn!("background music track `{track}` is not a loaded stream; skipping");
            return;
        }
        if let Err(e) = self.play_stream(track, None) {
            log::warn!("background music `{track}` failed to start: {e}");
        }
    }

    /// Stop the rotation without interrupting whatever track is audible;
    /// it simply will not be replaced when it ends
    pub fn do_not_play_next_background_music(&mut self) {
        self.music.stop();
    }

    /// Replace one category's candidate tracks.
    ///
    /// Track names refer to loaded streams. Takes effect on the next
    /// rotation pick; the current track keeps playing.
    pub fn set_background_tracks(&mut self, category: MusicCategory, tracks: Vec<String>) {
        self.music.set_tracks(category, tracks);
    }

    // ---- queries ----

    /// Whether any instance of a one-shot sound is audible
    pub fn is_playing(&self, name: &str) -> bool {
        self.instances.get(name).is_some_and(|handles| {
            handles.iter().any(|&h| self.backend.status(h).playing)
        })
    }

    /// Whether a stream is in its `Playing` state
    pub fn is_stream_playing(&self, name: &str) -> bool {
        matches!(
            lock(&self.stream_states).get(name),
            Some(StreamState::Playing)
        )
    }

    /// Times a sound has been started since load
    pub fn play_count(&self, name: &str) -> u32 {
        self.play_counts.get(name).copied().unwrap_or(0)
    }

    /// Seconds of audio a stream's source has rendered
    pub fn playback_position(&self, name: &str) -> Option<f64> {
        let source = self.streams.get(name)?.source?;
        self.backend.playback_secs(source).ok().map(f64::from)
    }

    /// Seconds of audio left to decode in a stream, when known
    pub fn remaining_time(&self, name: &str) -> Option<f64> {
        let entry = self.streams.get(name)?;
        lock(&entry.player).remaining_secs()
    }

    /// Current lifecycle state of a stream
    pub fn stream_state(&self, name: &str) -> Option<StreamState> {
        lock(&self.stream_states).get(name).copied()
    }

    // ---- lifecycle ----

    /// Per-tick convenience: fades, source GC, music rotation
    pub fn update(&mut self, dt: f32) {
        self.update_sources_volume(dt);
        self.update_streams_volume(dt);
        self.cleanup_sources(false);
        self.refresh_background_music(dt);
    }

    /// Tear everything down: reset streams, join feed threads, release
    /// sources and buffers, shut the backend down. Safe to call more
    /// than once.
    pub fn clear(&mut self) {
        self.music.stop();

        let names: Vec<String> = self.streams.keys().cloned().collect();
        for name in &names {
            let _ = self.reset_stream(name);
        }
        self.threads.join_all();
        self.feed_threads.clear();

        self.cleanup_sources(true);
        for asset in self.sounds.values() {
            let _ = self.backend.delete_buffer(asset.buffer);
        }
        self.sounds.clear();
        self.streams.clear();
        self.play_counts.clear();
        self.source_fades.clear();
        self.stream_fades.clear();
        lock(&self.stream_states).clear();

        self.backend.stop_all();
        self.backend.shutdown();
    }

    fn remove_instances(&mut self, name: &str) {
        if let Some(handles) = self.instances.remove(name) {
            for handle in handles {
                self.source_fades.remove(&handle);
                let _ = self.backend.stop_source(handle);
            }
        }
    }
}

impl Drop for SoundEngine {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null_backend::{NullBackend, NullControl};
    use crate::test_support::write_test_wav;

    fn engine() -> (SoundEngine, NullControl) {
        engine_with(AudioSettings::default())
    }

    fn engine_with(settings: AudioSettings) -> (SoundEngine, NullControl) {
        let backend = NullBackend::new();
        let control = backend.control();
        let engine = SoundEngine::with_backend(settings, Box::new(backend)).unwrap();
        (engine, control)
    }

    fn wait_for_state(engine: &SoundEngine, name: &str, state: StreamState) -> bool {
        for _ in 0..400 {
            if engine.stream_state(name) == Some(state) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn load_play_query_cleanup_round() {
        let (mut engine, control) = engine();
        let path = write_test_wav("engine_hit", 2_000, 44_100, 2);

        engine.load_sound("hit", path.to_str().unwrap(), 0.8).unwrap();
        engine.play_sound("hit", false, None).unwrap();

        assert!(engine.is_playing("hit"));
        assert_eq!(engine.play_count("hit"), 1);

        engine.play_sound("hit", false, None).unwrap();
        assert_eq!(engine.play_count("hit"), 2);
        assert_eq!(control.source_count(), 2);

        engine.cleanup_sources(true);
        assert!(!engine.is_playing("hit"));
        assert!(engine.instances.is_empty());
        assert_eq!(control.source_count(), 0);
    }

    #[test]
    fn cleanup_without_force_keeps_live_instances() {
        let (mut engine, control) = engine();
        let path = write_test_wav("engine_gc", 2_000, 44_100, 1);

        engine.load_sound("gc", path.to_str().unwrap(), 1.0).unwrap();
        engine.play_sound("gc", true, None).unwrap(); // looping survives
        engine.play_sound("gc", false, None).unwrap();

        // Finish the non-looping instance only.
        let finished = *engine.instances["gc"].last().unwrap();
        control.finish(finished);

        engine.cleanup_sources(false);
        assert_eq!(engine.instances["gc"].len(), 1);
        assert_eq!(control.source_count(), 1);

        engine.cleanup_sources(true);
        assert!(engine.instances.is_empty());
    }

    #[test]
    fn stop_sound_drops_every_instance() {
        let (mut engine, control) = engine();
        let path = write_test_wav("engine_stop", 1_000, 44_100, 1);

        engine.load_sound("boom", path.to_str().unwrap(), 1.0).unwrap();
        engine.play_sound("boom", true, None).unwrap();
        engine.play_sound("boom", true, Some(0.3)).unwrap();
        assert_eq!(control.source_count(), 2);

        engine.stop_sound("boom").unwrap();
        assert_eq!(control.source_count(), 0);
        assert!(!engine.is_playing("boom"));
        // The play counter survives the stop.
        assert_eq!(engine.play_count("boom"), 2);
    }

    #[test]
    #[should_panic(expected = "unknown audio asset")]
    fn playing_an_unloaded_name_is_a_precondition_violation() {
        let (mut engine, _control) = engine();
        let _ = engine.play_sound("never-loaded", false, None);
    }

    #[test]
    fn fade_to_silence_over_two_ticks() {
        let (mut engine, _control) = engine();
        let path = write_test_wav("engine_fade", 2_000, 44_100, 1);

        engine.load_sound("hit", path.to_str().unwrap(), 0.8).unwrap();
        engine.play_sound("hit", true, None).unwrap();
        engine.gradually_change_volume("hit", 0.0, 2.0).unwrap();

        let handle = *engine.instances["hit"].last().unwrap();

        engine.update_sources_volume(1.0);
        let midway = engine.backend.gain(handle).unwrap();
        assert!(midway > 0.0 && midway < 0.8, "midway volume {midway}");

        engine.update_sources_volume(1.0);
        assert_eq!(engine.backend.gain(handle).unwrap(), 0.0);
        assert!(engine.source_fades.is_empty());

        // A further tick with no fades is a no-op.
        engine.update_sources_volume(1.0);
        assert_eq!(engine.backend.gain(handle).unwrap(), 0.0);
    }

    #[test]
    fn stream_lifecycle_ready_playing_ended_ready() {
        let (mut engine, _control) = engine();
        let path = write_test_wav("engine_stream", 1_000, 44_100, 1);

        engine.load_stream("music", path.to_str().unwrap(), 0.7).unwrap();
        assert_eq!(engine.stream_state("music"), Some(StreamState::Ready));

        // Reset before ever playing is a no-op.
        engine.reset_stream("music").unwrap();
        assert_eq!(engine.stream_state("music"), Some(StreamState::Ready));

        engine.play_stream("music", None).unwrap();
        // The short file is fully primed, so the feed loop ends fast.
        assert!(wait_for_state(&engine, "music", StreamState::Ended));

        let position: f64 = engine.playback_position("music").unwrap();
        assert!(position >= 0.0);

        engine.reset_stream("music").unwrap();
        assert_eq!(engine.stream_state("music"), Some(StreamState::Ready));
        assert!(engine.playback_position("music").is_none());
        assert!(engine.threads.is_empty());
    }

    #[test]
    fn replaying_a_stream_joins_the_previous_feed_thread() {
        let (mut engine, _control) = engine();
        let path = write_test_wav("engine_replay", 1_000, 44_100, 1);

        engine.load_stream("music", path.to_str().unwrap(), 1.0).unwrap();
        engine.play_stream("music", None).unwrap();
        engine.play_stream("music", None).unwrap();

        // Never two live feed loops for one name.
        assert_eq!(engine.threads.len(), 1);
        assert_eq!(engine.feed_threads.len(), 1);

        assert!(wait_for_state(&engine, "music", StreamState::Ended));
    }

    #[test]
    fn failed_stream_load_leaves_no_state() {
        let (mut engine, _control) = engine();
        assert!(engine
            .load_stream("ghost", "/nonexistent/track.ogg", 1.0)
            .is_err());
        assert!(engine.stream_state("ghost").is_none());
        assert!(engine.streams.is_empty());
    }

    #[test]
    fn stream_fade_requires_playing_state() {
        let (mut engine, _control) = engine();
        let path = write_test_wav("engine_sfade", 1_000, 44_100, 1);

        engine.load_stream("music", path.to_str().unwrap(), 0.6).unwrap();
        // Not playing yet: silently ignored.
        engine.gradually_change_stream_volume("music", 0.0, 1.0);
        assert!(engine.stream_fades.is_empty());

        engine.play_stream("music", None).unwrap();
        if engine.is_stream_playing("music") {
            engine.gradually_change_stream_volume("music", 0.0, 1.0);
            assert_eq!(engine.stream_fades.len(), 1);
        }
    }

    #[test]
    fn background_rotation_with_single_track() {
        let path = write_test_wav("engine_bgm", 1_000, 44_100, 1);
        let mut settings = AudioSettings::default();
        settings.relaxing_tracks = vec!["calm".to_string()];
        let (mut engine, _control) = engine_with(settings);

        engine.load_stream("calm", path.to_str().unwrap(), 0.5).unwrap();
        engine.start_background_music(MusicCategory::Relaxing);
        assert!(wait_for_state(&engine, "calm", StreamState::Ended));

        // Starting the same category again must not restart the track.
        engine.start_background_music(MusicCategory::Relaxing);
        assert_eq!(engine.stream_state("calm"), Some(StreamState::Ended));

        // Gap not yet elapsed.
        engine.refresh_background_music(3.0);
        assert_eq!(engine.stream_state("calm"), Some(StreamState::Ended));

        // Gap elapsed: the single-track rotation replays it.
        engine.refresh_background_music(3.5);
        assert!(wait_for_state(&engine, "calm", StreamState::Ended));

        // Rotation off: the ended track is never replaced.
        engine.do_not_play_next_background_music();
        engine.refresh_background_music(60.0);
        assert_eq!(engine.stream_state("calm"), Some(StreamState::Ended));
    }

    #[test]
    fn unloaded_rotation_track_is_skipped_not_fatal() {
        let mut settings = AudioSettings::default();
        settings.relaxing_tracks = vec!["never_loaded".to_string()];
        let (mut engine, control) = engine_with(settings);

        // The configured track was never loaded as a stream: the
        // rotation starts but nothing plays and nothing panics.
        engine.start_background_music(MusicCategory::Relaxing);
        assert_eq!(control.source_count(), 0);

        // The gap elapses and the rotation picks the same track again;
        // still just a logged skip.
        engine.refresh_background_music(10.0);
        assert_eq!(control.source_count(), 0);
        assert!(engine.streams.is_empty());
    }

    #[test]
    fn clear_is_idempotent_and_releases_everything() {
        let (mut engine, control) = engine();
        let sound = write_test_wav("engine_clear_s", 1_000, 44_100, 1);
        let music = write_test_wav("engine_clear_m", 1_000, 44_100, 1);

        engine.load_sound("hit", sound.to_str().unwrap(), 1.0).unwrap();
        engine.play_sound("hit", true, None).unwrap();
        engine.load_stream("music", music.to_str().unwrap(), 1.0).unwrap();
        engine.play_stream("music", None).unwrap();

        engine.clear();
        assert_eq!(control.source_count(), 0);
        assert_eq!(control.buffer_count(), 0);
        assert!(engine.sounds.is_empty());
        assert!(engine.streams.is_empty());
        assert!(engine.threads.is_empty());

        engine.clear();
    }
}
