use lofty::{Accessor, AudioFile, TaggedFileExt};
use log::debug;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track_number: Option<String>,
    pub year: Option<String>,
    pub duration: Option<f64>,
    pub art: Option<Vec<u8>>,
    pub art_mime: String,
}

impl Default for TrackMetadata {
    fn default() -> Self {
        Self {
            title: None,
            artist: None,
            album: None,
            track_number: None,
            year: None,
            duration: None,
            art: None,
            art_mime: "image/jpeg".to_string(),
        }
    }
}

impl TrackMetadata {
    /// "Artist — Title" when both are known, else the bare title.
    pub fn display_title(&self) -> String {
        match (&self.artist, &self.title) {
            (Some(artist), Some(title)) => format!("{artist} — {title}"),
            (_, Some(title)) => title.clone(),
            _ => String::new(),
        }
    }

    pub fn has_art(&self) -> bool {
        self.art.is_some()
    }

    /// Write the cover art sidecar, or remove it when this track has none.
    /// The web collaborator reads this file; failures are logged, not fatal.
    pub fn save_art(&self, path: &Path) {
        if let Some(art) = &self.art {
            match fs::write(path, art) {
                Ok(()) => debug!("cover art ({}) cached at {}", self.art_mime, path.display()),
                Err(e) => debug!("could not save art {}: {e}", path.display()),
            }
        } else if let Err(e) = fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("could not remove art {}: {e}", path.display());
            }
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Read tags and embedded cover art. Never fails outward: an unreadable or
/// untagged file yields an all-empty record and playback proceeds.
pub fn read(path: &Path) -> TrackMetadata {
    let mut meta = TrackMetadata::default();

    let tagged = match lofty::read_from_path(path) {
        Ok(t) => t,
        Err(e) => {
            debug!("tags unreadable for {}: {e}", path.display());
            return meta;
        }
    };

    let duration = tagged.properties().duration();
    if duration.as_secs_f64() > 0.0 {
        meta.duration = Some(duration.as_secs_f64());
    }

    if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
        meta.title = tag.title().map(|t| t.to_string()).and_then(non_empty);
        meta.artist = tag.artist().map(|t| t.to_string()).and_then(non_empty);
        meta.album = tag.album().map(|t| t.to_string()).and_then(non_empty);
        meta.track_number = tag.track().map(|n| n.to_string());
        meta.year = tag
            .year()
            .map(|y| y.to_string().chars().take(4).collect::<String>());

        if let Some(pic) = tag.pictures().first() {
            meta.art = Some(pic.data().to_vec());
            if let Some(mime) = pic.mime_type() {
                meta.art_mime = mime.as_str().to_string();
            }
        }
    }

    meta
}
