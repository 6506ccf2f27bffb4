pub mod controller;
pub mod decoder;
pub mod metadata;
pub mod ring;
pub mod shuffle;

/// Frames per PCM chunk. Every producer and sink moves audio in blocks of
/// `CHUNK_FRAMES * channels * 2` bytes (signed 16-bit little-endian).
pub const CHUNK_FRAMES: usize = 2048;
