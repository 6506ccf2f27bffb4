use crate::data::config::{Config, TransitionPolicy};
use crate::data::playlist::{self, PlaylistSet, Track};
use crate::output::soundcard::SoundcardSink;
use crate::output::udp::UdpSink;
use crate::playback::decoder::{self, DecoderHandle, DecoderParams, PauseGate};
use crate::playback::metadata::{self, TrackMetadata};
use crate::playback::ring::Fanout;
use crate::playback::shuffle::ShuffleDeck;
use log::{error, info, warn};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Chunks buffered between the decoder and each sink.
const RING_CAPACITY: usize = 12;
/// Bounded wait for an old decoder to wind down before it is detached.
const DECODER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

pub const NOW_PLAYING_FILE: &str = "now_playing.txt";
pub const NOW_PLAYING_ART_FILE: &str = "now_playing_art.jpg";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Playing,
    Paused,
}

/// Narrow capability set every observer implements; registered through
/// `add_observer`, never by mutual field assignment. Callbacks fire with no
/// controller lock held, so observers may call back into the controller,
/// and they may fire from the control thread or the decode worker.
pub trait PlayoutObserver: Send + Sync {
    fn notify_track_change(&self);
    fn notify_state_change(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeEvent {
    Track,
    State,
}

struct Outputs {
    fanout: Arc<Fanout>,
    soundcard: Option<SoundcardSink>,
    udp: Option<UdpSink>,
}

struct Inner {
    state: EngineState,
    playlists: PlaylistSet,
    active: Option<usize>,
    cursor: usize,
    shuffle: bool,
    deck: Option<ShuffleDeck>,
    pending: Option<String>,
    current_meta: TrackMetadata,
    decode_generation: u64,
    decoder: Option<DecoderHandle>,
    outputs: Option<Outputs>,
}

impl Inner {
    fn active_playlist(&self) -> Option<&playlist::Playlist> {
        self.active.and_then(|i| self.playlists.by_index(i))
    }

    fn active_len(&self) -> Option<usize> {
        self.active_playlist()
            .map(|p| p.len())
            .filter(|len| *len > 0)
    }

    /// Index into the active playlist's tracks: the deck's cursor when
    /// shuffling, the linear cursor modulo length otherwise.
    fn current_index(&self) -> Option<usize> {
        let len = self.active_len()?;
        if self.shuffle {
            if let Some(deck) = &self.deck {
                return Some(deck.current());
            }
        }
        Some(self.cursor % len)
    }

    fn advance(&mut self) {
        let Some(len) = self.active_len() else {
            return;
        };
        if self.shuffle {
            if let Some(deck) = &mut self.deck {
                deck.advance();
                return;
            }
        }
        self.cursor = (self.cursor + 1) % len;
    }

    fn rewind(&mut self) {
        let Some(len) = self.active_len() else {
            return;
        };
        if self.shuffle {
            if let Some(deck) = &mut self.deck {
                deck.rewind();
                return;
            }
        }
        self.cursor = (self.cursor + len - 1) % len;
    }

    fn rebuild_deck(&mut self, carry_over: usize) {
        self.deck = match (self.shuffle, self.active_len()) {
            (true, Some(len)) => Some(ShuffleDeck::new(len, carry_over)),
            _ => None,
        };
    }
}

/// The playout state machine: owns the playlist set, the shuffle deck, the
/// decoder lifecycle and the sinks. All control operations are infallible
/// and safe under concurrent callers; one mutex serializes state changes.
pub struct Controller {
    cfg: Config,
    inner: Mutex<Inner>,
    pause_gate: Arc<PauseGate>,
    elapsed_us: Arc<AtomicU64>,
    observers: Mutex<Vec<Arc<dyn PlayoutObserver>>>,
    sidecar_dir: PathBuf,
    // Handed to each decode worker so its track-end callback can reach us.
    self_ref: Weak<Controller>,
}

impl Controller {
    pub fn new(cfg: Config) -> Arc<Self> {
        Self::with_sidecar_dir(cfg, PathBuf::from("."))
    }

    /// `sidecar_dir` receives `now_playing.txt` and `now_playing_art.jpg`
    /// (the web collaborator reads them from the engine's working
    /// directory; single-tenant assumption).
    pub fn with_sidecar_dir(cfg: Config, sidecar_dir: PathBuf) -> Arc<Self> {
        let shuffle = cfg.playout.shuffle;
        Arc::new_cyclic(|self_ref| Self {
            cfg,
            inner: Mutex::new(Inner {
                state: EngineState::Stopped,
                playlists: PlaylistSet::default(),
                active: None,
                cursor: 0,
                shuffle,
                deck: None,
                pending: None,
                current_meta: TrackMetadata::default(),
                decode_generation: 0,
                decoder: None,
                outputs: None,
            }),
            pause_gate: Arc::new(PauseGate::new()),
            elapsed_us: Arc::new(AtomicU64::new(0)),
            observers: Mutex::new(Vec::new()),
            sidecar_dir,
            self_ref: self_ref.clone(),
        })
    }

    pub fn add_observer(&self, observer: Box<dyn PlayoutObserver>) {
        self.observers.lock().unwrap().push(Arc::from(observer));
    }

    /// Run discovery and replace the playlist set atomically.
    pub fn load_playlists(&self) {
        let set = playlist::discover(&self.cfg.paths.playlists_dir);
        self.inner.lock().unwrap().playlists = set;
    }

    /// Open the sinks and activate the configured default playlist (or the
    /// first discovered one). No-op unless stopped.
    pub fn start(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != EngineState::Stopped || inner.outputs.is_some() {
                return;
            }
            inner.outputs = Some(self.start_outputs());

            let pick = self
                .cfg
                .playout
                .default_playlist
                .as_deref()
                .and_then(|name| inner.playlists.position(name))
                .or_else(|| if inner.playlists.is_empty() { None } else { Some(0) });
            if let Some(index) = pick {
                drop(self.activate(inner, index, &mut events));
            }
        }
        self.emit(&events);
    }

    /// Stop playout: signal the decoder, join it (bounded), close the sinks.
    /// The decoder is joined and the sinks are shut down with the state lock
    /// released; the retiring worker's track-end callback takes that lock.
    pub fn stop(&self) {
        self.pause_gate.open();
        let mut events = Vec::new();
        let (retired, outputs) = {
            let mut inner = self.inner.lock().unwrap();
            // Stales any in-flight track-end callback.
            inner.decode_generation += 1;
            let retired = inner.decoder.take();
            if let Some(handle) = &retired {
                handle.signal_stop();
            }
            let outputs = inner.outputs.take();
            if inner.state != EngineState::Stopped {
                inner.state = EngineState::Stopped;
                events.push(ChangeEvent::State);
            }
            (retired, outputs)
        };
        if let Some(handle) = retired {
            join_decoder(handle);
        }
        if let Some(outputs) = outputs {
            shutdown_outputs(outputs);
        }
        self.emit(&events);
    }

    pub fn pause(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state == EngineState::Playing {
                self.pause_gate.close();
                inner.state = EngineState::Paused;
                events.push(ChangeEvent::State);
            }
        }
        self.emit(&events);
    }

    pub fn resume(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state == EngineState::Paused {
                self.pause_gate.open();
                inner.state = EngineState::Playing;
                events.push(ChangeEvent::State);
            }
        }
        self.emit(&events);
    }

    pub fn next_track(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.active.is_none() {
                return;
            }
            inner.advance();
            drop(self.play_current(inner, &mut events));
        }
        self.emit(&events);
    }

    pub fn prev_track(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.active.is_none() {
                return;
            }
            inner.rewind();
            drop(self.play_current(inner, &mut events));
        }
        self.emit(&events);
    }

    pub fn toggle_shuffle(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.shuffle = !inner.shuffle;
            inner.rebuild_deck(self.cfg.playout.shuffle_carry_over);
            info!(
                "shuffle {}",
                if inner.shuffle { "enabled" } else { "disabled" }
            );
            events.push(ChangeEvent::State);
        }
        self.emit(&events);
    }

    /// Switch playlists. Unknown names are ignored. The transition policy is
    /// the playlist's own, falling back to the configured default; a
    /// `finish_track` switch is parked in the pending slot, where a later
    /// switch replaces it until track end consumes it.
    pub fn switch_to(&self, name: &str, immediate: bool) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            let Some(index) = inner.playlists.position(name) else {
                return;
            };
            let policy = inner
                .playlists
                .get(name)
                .and_then(|p| p.transition)
                .unwrap_or(self.cfg.transitions.default);

            if immediate || policy == TransitionPolicy::Immediate || inner.active.is_none() {
                drop(self.activate(inner, index, &mut events));
            } else {
                inner.pending = Some(name.to_string());
                info!("queued switch to '{name}' (finish_track)");
                events.push(ChangeEvent::State);
            }
        }
        self.emit(&events);
    }

    /// Re-run discovery. If the active playlist's name survived, it stays
    /// active; otherwise the first discovered playlist takes over (or none).
    pub fn reload_playlists(&self) {
        let set = playlist::discover(&self.cfg.paths.playlists_dir);
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            let current_name = inner.active_playlist().map(|p| p.name.clone());
            inner.playlists = set;
            events.push(ChangeEvent::State);
            match current_name.and_then(|name| inner.playlists.position(&name)) {
                Some(index) => {
                    inner.active = Some(index);
                    // The surviving playlist may have a different length now.
                    let len = inner.active_len();
                    if let (Some(deck), Some(len)) = (inner.deck.as_mut(), len) {
                        deck.reset(len);
                    }
                }
                None => {
                    inner.active = None;
                    if !inner.playlists.is_empty() {
                        drop(self.activate(inner, 0, &mut events));
                    }
                }
            }
        }
        self.emit(&events);
    }

    // ── read-only views ──────────────────────────────────────────────────

    pub fn state(&self) -> EngineState {
        self.inner.lock().unwrap().state
    }

    pub fn shuffle(&self) -> bool {
        self.inner.lock().unwrap().shuffle
    }

    pub fn active_playlist_name(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.active_playlist().map(|p| p.name.clone())
    }

    pub fn pending_playlist_name(&self) -> Option<String> {
        self.inner.lock().unwrap().pending.clone()
    }

    pub fn current_track(&self) -> Option<Track> {
        let inner = self.inner.lock().unwrap();
        let index = inner.current_index()?;
        inner
            .active_playlist()
            .and_then(|p| p.tracks.get(index))
            .cloned()
    }

    pub fn current_meta(&self) -> TrackMetadata {
        self.inner.lock().unwrap().current_meta.clone()
    }

    pub fn playlist_names(&self) -> Vec<String> {
        self.inner.lock().unwrap().playlists.names()
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_us.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    // ── internals ────────────────────────────────────────────────────────

    fn start_outputs(&self) -> Outputs {
        let soundcard_enabled = self.cfg.outputs.soundcard.enabled;
        let udp_enabled = self.cfg.outputs.udp.enabled;
        let branch_count = soundcard_enabled as usize + udp_enabled as usize;
        if branch_count == 0 {
            error!("no output sinks enabled; playout has nowhere to go");
        }
        let fanout = Arc::new(Fanout::new(branch_count.max(1), RING_CAPACITY));

        let mut branch = 0;
        let soundcard = if soundcard_enabled {
            let ring = fanout.ring(branch);
            let alive = fanout.alive_flag(branch);
            branch += 1;
            match SoundcardSink::start(&self.cfg.playout, &self.cfg.outputs.soundcard, ring) {
                Ok(sink) => Some(sink),
                Err(e) => {
                    error!("soundcard output failed: {e}");
                    alive.store(false, Ordering::Relaxed);
                    None
                }
            }
        } else {
            None
        };

        let udp = if udp_enabled {
            let ring = fanout.ring(branch);
            let alive = fanout.alive_flag(branch);
            match UdpSink::start(&self.cfg.playout, &self.cfg.outputs.udp, ring, Arc::clone(&alive))
            {
                Ok(sink) => Some(sink),
                Err(e) => {
                    error!("udp output failed: {e}");
                    alive.store(false, Ordering::Relaxed);
                    None
                }
            }
        } else {
            None
        };

        Outputs {
            fanout,
            soundcard,
            udp,
        }
    }

    fn activate<'a>(
        &'a self,
        mut inner: MutexGuard<'a, Inner>,
        index: usize,
        events: &mut Vec<ChangeEvent>,
    ) -> MutexGuard<'a, Inner> {
        inner.active = Some(index);
        inner.cursor = 0;
        inner.rebuild_deck(self.cfg.playout.shuffle_carry_over);
        self.play_current(inner, events)
    }

    /// Begin playout of the track at the current index: refresh metadata and
    /// sidecars, update the TS injector, retire the previous decoder, drain
    /// the rings and spawn the next decoder. The guard is released while the
    /// retired decoder is joined (its track-end callback takes this same
    /// lock) and re-acquired afterwards; the generation bump makes any
    /// in-flight callback stale, and a competing transition that lands in
    /// the gap wins outright (checked on re-acquire).
    fn play_current<'a>(
        &'a self,
        mut inner: MutexGuard<'a, Inner>,
        events: &mut Vec<ChangeEvent>,
    ) -> MutexGuard<'a, Inner> {
        let Some(active) = inner.active else {
            return inner;
        };
        if inner.active_playlist().map_or(true, |p| p.is_empty()) {
            return inner;
        }
        if inner.shuffle && inner.deck.is_none() {
            inner.rebuild_deck(self.cfg.playout.shuffle_carry_over);
        }
        let Some(index) = inner.current_index() else {
            return inner;
        };
        let playlist_name = inner
            .playlists
            .by_index(active)
            .map(|p| p.name.clone())
            .unwrap_or_default();
        let Some(path) = inner
            .playlists
            .by_index(active)
            .and_then(|p| p.tracks.get(index))
            .map(|t| t.path.clone())
        else {
            return inner;
        };

        let meta = metadata::read(&path);
        if let Some(track) = inner
            .playlists
            .by_index_mut(active)
            .and_then(|p| p.tracks.get_mut(index))
        {
            if meta.title.is_some() {
                track.title = meta.title.clone();
            }
            if meta.duration.is_some() {
                track.duration = meta.duration;
            }
        }
        let Some(track) = inner
            .playlists
            .by_index(active)
            .and_then(|p| p.tracks.get(index))
            .cloned()
        else {
            return inner;
        };

        meta.save_art(&self.sidecar_dir.join(NOW_PLAYING_ART_FILE));
        self.write_now_playing(&track, &meta, &playlist_name);

        if let Some(injector) = inner
            .outputs
            .as_ref()
            .and_then(|o| o.udp.as_ref())
            .and_then(|u| u.injector())
        {
            injector.update(
                meta.title.as_deref().unwrap_or(&track.display()),
                meta.artist.as_deref().unwrap_or(""),
                meta.album.as_deref().unwrap_or(""),
            );
        }

        info!("playing: {} [{playlist_name}]", track.display());
        inner.current_meta = meta;
        events.push(ChangeEvent::Track);

        // Retire the previous decoder. Its stop flag is its own, so a
        // worker that was parked on a full ring can never land a stale
        // chunk once the rings are drained for the new track.
        inner.decode_generation += 1;
        let generation = inner.decode_generation;
        let retired = inner.decoder.take();
        if let Some(handle) = &retired {
            handle.signal_stop();
        }
        self.pause_gate.open();
        drop(inner);

        if let Some(handle) = retired {
            join_decoder(handle);
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.decode_generation != generation {
            // A competing transition started while the lock was released;
            // it owns playback now.
            return inner;
        }
        self.elapsed_us.store(0, Ordering::Relaxed);

        let Some(fanout) = inner.outputs.as_ref().map(|o| Arc::clone(&o.fanout)) else {
            // Sinks not started yet (engine stopped): the selection sticks,
            // playout begins on start().
            return inner;
        };
        // The rings must only ever hold chunks of the track being started.
        fanout.drain();

        if inner.state != EngineState::Playing {
            events.push(ChangeEvent::State);
        }
        inner.state = EngineState::Playing;

        let Some(ctrl) = self.self_ref.upgrade() else {
            return inner;
        };
        let handle = decoder::spawn(
            DecoderParams {
                path,
                sample_rate: self.cfg.playout.sample_rate,
                channels: self.cfg.playout.channels,
            },
            fanout,
            Arc::clone(&self.pause_gate),
            Arc::clone(&self.elapsed_us),
            Box::new(move || ctrl.on_track_end(generation)),
        );
        inner.decoder = Some(handle);
        inner
    }

    /// Called by the decode worker after EOF and ring drain. Consumes the
    /// pending switch if one is parked, else advances.
    fn on_track_end(&self, generation: u64) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.decode_generation != generation {
                // An explicit skip, switch or stop replaced this track while
                // we waited on the lock.
                return;
            }
            let pending = inner
                .pending
                .take()
                .and_then(|name| inner.playlists.position(&name));
            let inner = match pending {
                Some(index) => self.activate(inner, index, &mut events),
                None => {
                    inner.advance();
                    self.play_current(inner, &mut events)
                }
            };
            drop(inner);
        }
        self.emit(&events);
    }

    fn write_now_playing(&self, track: &Track, meta: &TrackMetadata, playlist_name: &str) {
        let duration = meta
            .duration
            .or(track.duration)
            .map(|d| format!("{d:.1}"))
            .unwrap_or_default();
        let contents = format!(
            "title={}\nartist={}\nalbum={}\nyear={}\nduration={}\nplaylist={}\nfile={}\ntimestamp={}\n",
            meta.title.clone().unwrap_or_else(|| track.display()),
            meta.artist.as_deref().unwrap_or(""),
            meta.album.as_deref().unwrap_or(""),
            meta.year.as_deref().unwrap_or(""),
            duration,
            playlist_name,
            track.path.display(),
            jiff::Timestamp::now(),
        );
        let path = self.sidecar_dir.join(NOW_PLAYING_FILE);
        if let Err(e) = fs::write(&path, contents) {
            warn!("could not write {}: {e}", path.display());
        }
    }

    fn emit(&self, events: &[ChangeEvent]) {
        if events.is_empty() {
            return;
        }
        // Snapshot the list first: callbacks may call back into the
        // controller, including add_observer.
        let observers: Vec<Arc<dyn PlayoutObserver>> = self.observers.lock().unwrap().clone();
        if events.contains(&ChangeEvent::Track) {
            for obs in &observers {
                obs.notify_track_change();
            }
        }
        if events.contains(&ChangeEvent::State) {
            for obs in &observers {
                obs.notify_state_change();
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        // Teardown path for exits that never called stop().
        self.pause_gate.open();
        let (retired, outputs) = match self.inner.lock() {
            Ok(mut inner) => {
                inner.decode_generation += 1;
                let retired = inner.decoder.take();
                if let Some(handle) = &retired {
                    handle.signal_stop();
                }
                (retired, inner.outputs.take())
            }
            Err(_) => (None, None),
        };
        if let Some(handle) = retired {
            join_decoder(handle);
        }
        if let Some(outputs) = outputs {
            shutdown_outputs(outputs);
        }
    }
}

/// Bounded wait for a retired decode worker. Callers must not hold the
/// state lock: the worker's final track-end callback takes it, and a joiner
/// holding it would stall both threads for the whole timeout. Never
/// self-joins (the track-end path runs on the decoder thread itself).
fn join_decoder(handle: DecoderHandle) {
    if handle.is_current_thread() {
        return;
    }
    let deadline = Instant::now() + DECODER_JOIN_TIMEOUT;
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    if handle.is_finished() {
        handle.join();
    } else {
        warn!("decoder did not wind down in time; detaching");
    }
}

fn shutdown_outputs(mut outputs: Outputs) {
    if let Some(mut sink) = outputs.soundcard.take() {
        sink.stop();
    }
    if let Some(mut sink) = outputs.udp.take() {
        sink.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::playlist::Playlist;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    fn track(name: &str) -> Track {
        Track::from_path(PathBuf::from(format!("/music/{name}.mp3")))
    }

    fn seed(ctrl: &Controller, lists: &[(&str, usize)], active: Option<usize>) {
        let mut inner = ctrl.inner.lock().unwrap();
        for (name, count) in lists {
            inner.playlists.insert(Playlist {
                name: name.to_string(),
                tracks: (0..*count).map(|i| track(&format!("{name}{i}"))).collect(),
                transition: None,
                source_path: None,
            });
        }
        inner.active = active;
    }

    fn test_controller(cfg: Config) -> Arc<Controller> {
        let dir = tempfile::tempdir().unwrap();
        // Leak the tempdir so sidecars have a place to land for the whole test.
        let path = dir.keep();
        Controller::with_sidecar_dir(cfg, path)
    }

    #[test]
    fn linear_cursor_wraps_both_ways() {
        let ctrl = test_controller(Config::default());
        seed(&ctrl, &[("A", 3)], Some(0));
        let mut inner = ctrl.inner.lock().unwrap();
        assert_eq!(inner.current_index(), Some(0));
        inner.advance();
        inner.advance();
        assert_eq!(inner.current_index(), Some(2));
        inner.advance();
        assert_eq!(inner.current_index(), Some(0));
        inner.rewind();
        assert_eq!(inner.current_index(), Some(2));
    }

    #[test]
    fn shuffle_uses_the_deck() {
        let ctrl = test_controller(Config::default());
        seed(&ctrl, &[("A", 5)], Some(0));
        let mut inner = ctrl.inner.lock().unwrap();
        inner.shuffle = true;
        inner.rebuild_deck(2);
        let mut seen: Vec<usize> = Vec::new();
        for _ in 0..5 {
            seen.push(inner.current_index().unwrap());
            inner.advance();
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn switch_to_unknown_name_is_a_no_op() {
        let ctrl = test_controller(Config::default());
        seed(&ctrl, &[("A", 2)], Some(0));
        ctrl.switch_to("Ghost", false);
        assert_eq!(ctrl.active_playlist_name().as_deref(), Some("A"));
        assert_eq!(ctrl.pending_playlist_name(), None);
    }

    #[test]
    fn finish_track_switch_parks_and_retains_last() {
        let ctrl = test_controller(Config::default());
        seed(&ctrl, &[("A", 2), ("B", 2), ("C", 2)], Some(0));

        ctrl.switch_to("B", false);
        assert_eq!(ctrl.pending_playlist_name().as_deref(), Some("B"));
        assert_eq!(ctrl.active_playlist_name().as_deref(), Some("A"));

        ctrl.switch_to("C", false);
        assert_eq!(ctrl.pending_playlist_name().as_deref(), Some("C"));

        // Natural track end consumes the pending slot exactly once.
        let generation = ctrl.inner.lock().unwrap().decode_generation;
        ctrl.on_track_end(generation);
        assert_eq!(ctrl.active_playlist_name().as_deref(), Some("C"));
        assert_eq!(ctrl.pending_playlist_name(), None);
    }

    #[test]
    fn immediate_flag_overrides_policy() {
        let ctrl = test_controller(Config::default());
        seed(&ctrl, &[("A", 2), ("B", 2)], Some(0));
        ctrl.switch_to("B", true);
        assert_eq!(ctrl.active_playlist_name().as_deref(), Some("B"));
        assert_eq!(ctrl.pending_playlist_name(), None);
    }

    #[test]
    fn immediate_policy_activates_now() {
        let mut cfg = Config::default();
        cfg.transitions.default = TransitionPolicy::Immediate;
        let ctrl = test_controller(cfg);
        seed(&ctrl, &[("A", 2), ("B", 2)], Some(0));
        ctrl.switch_to("B", false);
        assert_eq!(ctrl.active_playlist_name().as_deref(), Some("B"));
    }

    #[test]
    fn switch_with_no_active_playlist_activates() {
        let ctrl = test_controller(Config::default());
        seed(&ctrl, &[("A", 2)], None);
        ctrl.switch_to("A", false);
        assert_eq!(ctrl.active_playlist_name().as_deref(), Some("A"));
    }

    #[test]
    fn stale_track_end_is_ignored() {
        let ctrl = test_controller(Config::default());
        seed(&ctrl, &[("A", 3)], Some(0));
        let stale = ctrl.inner.lock().unwrap().decode_generation;
        ctrl.inner.lock().unwrap().decode_generation = stale + 1;
        let before = ctrl.current_track().unwrap().path.clone();
        ctrl.on_track_end(stale);
        assert_eq!(ctrl.current_track().unwrap().path, before);
    }

    #[test]
    fn track_end_advances_without_pending() {
        let ctrl = test_controller(Config::default());
        seed(&ctrl, &[("A", 3)], Some(0));
        let generation = ctrl.inner.lock().unwrap().decode_generation;
        ctrl.on_track_end(generation);
        let inner = ctrl.inner.lock().unwrap();
        assert_eq!(inner.current_index(), Some(1));
    }

    #[test]
    fn vanished_pending_name_falls_back_to_advance() {
        let ctrl = test_controller(Config::default());
        seed(&ctrl, &[("A", 3)], Some(0));
        ctrl.inner.lock().unwrap().pending = Some("Gone".to_string());
        let generation = ctrl.inner.lock().unwrap().decode_generation;
        ctrl.on_track_end(generation);
        assert_eq!(ctrl.pending_playlist_name(), None);
        assert_eq!(ctrl.inner.lock().unwrap().current_index(), Some(1));
    }

    #[test]
    fn reload_keeps_active_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.paths.playlists_dir = dir.path().to_path_buf();
        std::fs::create_dir(dir.path().join("Rock")).unwrap();
        std::fs::write(dir.path().join("Rock/a.mp3"), b"x").unwrap();

        let ctrl = test_controller(cfg);
        ctrl.load_playlists();
        seed(&ctrl, &[], Some(0));
        assert_eq!(ctrl.active_playlist_name().as_deref(), Some("Rock"));

        ctrl.reload_playlists();
        assert_eq!(ctrl.active_playlist_name().as_deref(), Some("Rock"));
    }

    #[test]
    fn observers_receive_state_changes() {
        struct Counter(Arc<AtomicUsize>);
        impl PlayoutObserver for Counter {
            fn notify_track_change(&self) {}
            fn notify_state_change(&self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let ctrl = test_controller(Config::default());
        let count = Arc::new(AtomicUsize::new(0));
        ctrl.add_observer(Box::new(Counter(Arc::clone(&count))));
        ctrl.toggle_shuffle();
        ctrl.toggle_shuffle();
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn pause_and_resume_are_stateful_no_ops_when_stopped() {
        let ctrl = test_controller(Config::default());
        ctrl.pause();
        assert_eq!(ctrl.state(), EngineState::Stopped);
        ctrl.resume();
        assert_eq!(ctrl.state(), EngineState::Stopped);
    }

    // The retiring side must never wait for a decoder thread while holding
    // the lock that thread's track-end callback needs; these two pin the
    // fix by racing a live callback thread against the control ops.

    #[test]
    fn racing_track_end_does_not_stall_next_track() {
        let ctrl = test_controller(Config::default());
        seed(&ctrl, &[("A", 3)], Some(0));

        let generation = ctrl.inner.lock().unwrap().decode_generation;
        let ender = {
            let ctrl = Arc::clone(&ctrl);
            thread::spawn(move || ctrl.on_track_end(generation))
        };
        // Install the ender as the live decoder: next_track retires and
        // joins it while it is racing for the same lock.
        let stop = Arc::new(AtomicBool::new(false));
        ctrl.inner.lock().unwrap().decoder = Some(DecoderHandle::stub(ender, stop));

        let started = Instant::now();
        ctrl.next_track();
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "next_track stalled on the retiring decoder"
        );
        assert!(ctrl.inner.lock().unwrap().decoder.is_none());
    }

    #[test]
    fn racing_track_end_does_not_stall_stop() {
        let ctrl = test_controller(Config::default());
        seed(&ctrl, &[("A", 3)], Some(0));

        let generation = ctrl.inner.lock().unwrap().decode_generation;
        let ender = {
            let ctrl = Arc::clone(&ctrl);
            thread::spawn(move || ctrl.on_track_end(generation))
        };
        let stop = Arc::new(AtomicBool::new(false));
        ctrl.inner.lock().unwrap().decoder = Some(DecoderHandle::stub(ender, stop));

        let started = Instant::now();
        ctrl.stop();
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "stop stalled on the retiring decoder"
        );
        assert_eq!(ctrl.state(), EngineState::Stopped);
        assert!(ctrl.inner.lock().unwrap().decoder.is_none());
    }

    #[test]
    fn observer_may_add_observers_from_its_callback() {
        struct Reentrant {
            ctrl: Weak<Controller>,
            count: Arc<AtomicUsize>,
        }
        impl PlayoutObserver for Reentrant {
            fn notify_track_change(&self) {}
            fn notify_state_change(&self) {
                self.count.fetch_add(1, Ordering::Relaxed);
                if let Some(ctrl) = self.ctrl.upgrade() {
                    // Re-entering the registration path must not deadlock.
                    ctrl.add_observer(Box::new(Silent));
                }
            }
        }
        struct Silent;
        impl PlayoutObserver for Silent {
            fn notify_track_change(&self) {}
            fn notify_state_change(&self) {}
        }

        let ctrl = test_controller(Config::default());
        let count = Arc::new(AtomicUsize::new(0));
        ctrl.add_observer(Box::new(Reentrant {
            ctrl: Arc::downgrade(&ctrl),
            count: Arc::clone(&count),
        }));
        ctrl.toggle_shuffle();
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(ctrl.observers.lock().unwrap().len(), 2);
    }
}
