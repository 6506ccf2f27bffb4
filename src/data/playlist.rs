use crate::data::config::TransitionPolicy;
use crate::data::{m3u, xspf};
use log::{debug, info};
use std::path::{Path, PathBuf};

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "wav", "aac", "ogg", "opus", "m4a", "wma", "aiff", "alac", "mp2", "ape", "wv",
    "tta", "ac3", "dts",
];

#[derive(Debug, Clone)]
pub struct Track {
    pub path: PathBuf,
    pub title: Option<String>,
    pub duration: Option<f64>,
}

impl Track {
    pub fn from_path(path: PathBuf) -> Self {
        Self {
            path,
            title: None,
            duration: None,
        }
    }

    /// Display name: the tag title if known, otherwise the filename stem.
    pub fn display(&self) -> String {
        if let Some(t) = &self.title {
            return t.clone();
        }
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string_lossy().to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Playlist {
    pub name: String,
    pub tracks: Vec<Track>,
    pub transition: Option<TransitionPolicy>,
    pub source_path: Option<PathBuf>,
}

impl Playlist {
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Named playlists in discovery order. Replaced wholesale on reload.
#[derive(Debug, Default, Clone)]
pub struct PlaylistSet {
    lists: Vec<Playlist>,
}

impl PlaylistSet {
    /// Insert, replacing an existing playlist of the same name in place so
    /// a collision keeps its original discovery position.
    pub fn insert(&mut self, pl: Playlist) {
        if let Some(slot) = self.lists.iter_mut().find(|p| p.name == pl.name) {
            *slot = pl;
        } else {
            self.lists.push(pl);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Playlist> {
        self.lists.iter().find(|p| p.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.lists.iter().position(|p| p.name == name)
    }

    pub fn by_index(&self, index: usize) -> Option<&Playlist> {
        self.lists.get(index)
    }

    pub fn by_index_mut(&mut self, index: usize) -> Option<&mut Playlist> {
        self.lists.get_mut(index)
    }

    pub fn names(&self) -> Vec<String> {
        self.lists.iter().map(|p| p.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

pub fn is_audio(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|s| s.to_str()) else {
        return false;
    };
    let ext = ext.to_lowercase();
    AUDIO_EXTENSIONS.iter().any(|a| *a == ext)
}

fn is_playlist_file(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|s| s.to_str()) else {
        return false;
    };
    matches!(ext.to_lowercase().as_str(), "m3u" | "m3u8" | "xspf")
}

/// Non-recursive scan of one folder for audio files, lexicographic order.
fn scan_folder(dir: &Path) -> Vec<Track> {
    let Ok(rd) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = rd
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_audio(p))
        .collect();
    files.sort();
    files.into_iter().map(Track::from_path).collect()
}

/// Build the playlist set from a root directory: loose audio files become
/// "Default", each subdirectory with audio becomes a playlist named after
/// it, and every M3U/M3U8/XSPF file becomes a playlist named by its stem.
/// A malformed playlist file is skipped; the rest still discover.
pub fn discover(root: &Path) -> PlaylistSet {
    let mut set = PlaylistSet::default();

    if !root.exists() {
        return set;
    }

    let root_tracks = scan_folder(root);
    if !root_tracks.is_empty() {
        set.insert(Playlist {
            name: "Default".to_string(),
            tracks: root_tracks,
            transition: None,
            source_path: Some(root.to_path_buf()),
        });
    }

    let mut entries: Vec<PathBuf> = match std::fs::read_dir(root) {
        Ok(rd) => rd.flatten().map(|e| e.path()).collect(),
        Err(e) => {
            debug!("could not scan {}: {e}", root.display());
            return set;
        }
    };
    entries.sort();

    for entry in entries {
        if entry.is_dir() {
            let tracks = scan_folder(&entry);
            if tracks.is_empty() {
                continue;
            }
            let name = entry
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            set.insert(Playlist {
                name,
                tracks,
                transition: None,
                source_path: Some(entry),
            });
        } else if entry.is_file() && is_playlist_file(&entry) {
            let parsed = match entry.extension().and_then(|s| s.to_str()) {
                Some(ext) if ext.eq_ignore_ascii_case("xspf") => xspf::parse(&entry),
                _ => m3u::parse(&entry),
            };
            let tracks = match parsed {
                Ok(t) => t,
                Err(e) => {
                    debug!("skipping playlist {}: {e}", entry.display());
                    continue;
                }
            };
            if tracks.is_empty() {
                continue;
            }
            let name = entry
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            set.insert(Playlist {
                name,
                tracks,
                transition: None,
                source_path: Some(entry),
            });
        }
    }

    info!("discovered {} playlist(s): {:?}", set.len(), set.names());
    set
}
