pub mod config;
pub mod m3u;
pub mod playlist;
pub mod xspf;

use thiserror::Error;

/// Why a playlist file could not be turned into tracks. Discovery treats any
/// of these as "skip this file" and keeps going.
#[derive(Debug, Error)]
pub enum PlaylistFileError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed xml: {0}")]
    Xml(#[from] quick_xml::Error),
}
