use crate::data::playlist::Track;
use crate::data::PlaylistFileError;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs;
use std::path::{Path, PathBuf};

/// Parse an XSPF playlist (http://xspf.org/ns/0/): for each `<track>`, read
/// `<location>`, `<title>` and `<duration>` (milliseconds). `file://`
/// locations are URL-decoded to local paths; relative locations resolve
/// against the playlist's directory; missing paths are dropped.
pub fn parse(path: &Path) -> Result<Vec<Track>, PlaylistFileError> {
    let content = fs::read_to_string(path)?;
    let base = path.parent().unwrap_or(Path::new("."));

    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(true);

    let mut tracks = Vec::new();
    let mut buf = Vec::new();

    let mut in_track = false;
    let mut current_tag: Option<String> = None;
    let mut location: Option<String> = None;
    let mut title: Option<String> = None;
    let mut duration_ms: Option<f64> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == "track" {
                    in_track = true;
                    location = None;
                    title = None;
                    duration_ms = None;
                } else if in_track {
                    current_tag = Some(name);
                }
            }
            Event::Text(t) => {
                if in_track {
                    if let Some(tag) = current_tag.as_deref() {
                        let text = t.unescape().map_err(quick_xml::Error::from)?.into_owned();
                        match tag {
                            "location" => location = Some(text),
                            "title" => title = Some(text),
                            "duration" => duration_ms = text.parse::<f64>().ok(),
                            _ => {}
                        }
                    }
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == "track" {
                    in_track = false;
                    if let Some(loc) = location.take() {
                        if let Some(resolved) = resolve_location(&loc, base) {
                            tracks.push(Track {
                                path: resolved,
                                title: title.take().filter(|t| !t.is_empty()),
                                duration: duration_ms.take().map(|ms| ms / 1000.0),
                            });
                        }
                    }
                } else {
                    current_tag = None;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(tracks)
}

/// Turn an XSPF location into an existing local path, or None.
fn resolve_location(location: &str, base: &Path) -> Option<PathBuf> {
    let decoded = |s: &str| {
        urlencoding::decode(s)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| s.to_string())
    };

    let p = if let Some(rest) = location.strip_prefix("file://") {
        PathBuf::from(decoded(rest))
    } else {
        PathBuf::from(decoded(location))
    };

    let resolved = if p.is_absolute() { p } else { base.join(p) };
    resolved.canonicalize().ok()
}
