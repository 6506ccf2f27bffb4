use crate::data::playlist::Track;
use crate::data::PlaylistFileError;
use std::fs;
use std::path::{Path, PathBuf};

/// Parse an M3U/M3U8 file. `#EXTINF:<duration>,<title>` lines apply to the
/// next path line only; relative paths resolve against the playlist's
/// directory; paths that do not exist are dropped.
pub fn parse(path: &Path) -> Result<Vec<Track>, PlaylistFileError> {
    let content = fs::read_to_string(path)?;
    let base = path.parent().unwrap_or(Path::new("."));

    let mut tracks = Vec::new();
    let mut pending_title: Option<String> = None;
    let mut pending_duration: Option<f64> = None;

    for raw in content.lines() {
        let line = raw.trim();

        if line.is_empty() || line.starts_with("#EXTM3U") {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            let (dur_part, title_part) = match rest.split_once(',') {
                Some((d, t)) => (d, Some(t)),
                None => (rest, None),
            };
            pending_duration = dur_part
                .split_whitespace()
                .next()
                .and_then(|tok| tok.parse::<f64>().ok());
            pending_title = title_part
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty());
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let p = PathBuf::from(line);
        let resolved = if p.is_absolute() { p } else { base.join(p) };

        // Canonicalize doubles as the existence check.
        if let Ok(canonical) = resolved.canonicalize() {
            tracks.push(Track {
                path: canonical,
                title: pending_title.take(),
                duration: pending_duration.take(),
            });
        } else {
            pending_title = None;
            pending_duration = None;
        }
    }

    Ok(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn extinf_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("song.mp3");
        fs::write(&song, b"x").unwrap();

        let list = dir.path().join("list.m3u");
        fs::write(
            &list,
            format!("#EXTM3U\n#EXTINF:214.5,Blue Train\n{}\n", song.display()),
        )
        .unwrap();

        let tracks = parse(&list).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title.as_deref(), Some("Blue Train"));
        assert_eq!(tracks[0].duration, Some(214.5));
    }

    #[test]
    fn relative_paths_resolve_against_playlist_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("rel.mp3"), b"x").unwrap();
        let list = dir.path().join("list.m3u");
        fs::write(&list, "rel.mp3\n").unwrap();

        let tracks = parse(&list).unwrap();
        assert_eq!(tracks.len(), 1);
        assert!(tracks[0].path.ends_with("rel.mp3"));
        assert!(tracks[0].path.is_absolute());
    }

    #[test]
    fn missing_paths_are_dropped_and_clear_pending_meta() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.mp3");
        fs::write(&real, b"x").unwrap();
        let list = dir.path().join("list.m3u");
        fs::write(
            &list,
            format!("#EXTINF:10,Ghost\nmissing.mp3\n{}\n", real.display()),
        )
        .unwrap();

        let tracks = parse(&list).unwrap();
        assert_eq!(tracks.len(), 1);
        // The EXTINF belonged to the dropped line, not this one.
        assert_eq!(tracks[0].title, None);
        assert_eq!(tracks[0].duration, None);
    }

    #[test]
    fn extinf_applies_to_next_path_only() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp3");
        let b = dir.path().join("b.mp3");
        fs::write(&a, b"x").unwrap();
        fs::write(&b, b"x").unwrap();
        let list = dir.path().join("list.m3u");
        fs::write(
            &list,
            format!("#EXTINF:5,First\n{}\n{}\n", a.display(), b.display()),
        )
        .unwrap();

        let tracks = parse(&list).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].title.as_deref(), Some("First"));
        assert_eq!(tracks[1].title, None);
        assert_eq!(tracks[1].duration, None);
    }

    #[test]
    fn comments_and_malformed_durations_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp3");
        fs::write(&a, b"x").unwrap();
        let list = dir.path().join("list.m3u");
        fs::write(
            &list,
            format!("# a comment\n#EXTINF:abc,Still Titled\n{}\n", a.display()),
        )
        .unwrap();

        let tracks = parse(&list).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title.as_deref(), Some("Still Titled"));
        assert_eq!(tracks[0].duration, None);
    }
}
