use crate::playback::ring::Fanout;
use crate::playback::CHUNK_FRAMES;
use log::{debug, warn};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long one ring put may park before the stop signal is re-checked.
const PUT_TIMEOUT: Duration = Duration::from_millis(500);
/// Poll interval while waiting for the sinks to finish the outgoing track.
const DRAIN_POLL: Duration = Duration::from_millis(50);
/// Back-off after a decode that produced nothing, so a playlist of broken
/// files does not spin the track-end handler.
const FAILURE_BACKOFF: Duration = Duration::from_millis(250);

/// Single-bit level-triggered gate; the decoder parks on it before every
/// chunk put. Spurious wakes are harmless.
pub struct PauseGate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl PauseGate {
    pub fn new() -> Self {
        Self {
            open: Mutex::new(true),
            cond: Condvar::new(),
        }
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cond.notify_all();
    }

    pub fn close(&self) {
        *self.open.lock().unwrap() = false;
    }

    /// Park until the gate opens or `stop` is set.
    fn wait(&self, stop: &AtomicBool) {
        let mut open = self.open.lock().unwrap();
        while !*open && !stop.load(Ordering::Relaxed) {
            let (guard, _) = self
                .cond
                .wait_timeout(open, Duration::from_millis(100))
                .unwrap();
            open = guard;
        }
    }
}

/// Reaps the subprocess on every exit path, including unwinding.
struct KillOnDrop(Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

pub struct DecoderParams {
    pub path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Owning handle for one decode worker. The stop flag belongs to this
/// worker alone, so retiring it can never gate a successor worker.
pub struct DecoderHandle {
    thread: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

impl DecoderHandle {
    /// Level-triggered; the worker exits within one chunk read plus one
    /// ring-put timeout, even while parked on the ring or the pause gate.
    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn is_current_thread(&self) -> bool {
        self.thread.thread().id() == thread::current().id()
    }

    pub fn join(self) {
        let _ = self.thread.join();
    }

    #[cfg(test)]
    pub(crate) fn stub(thread: JoinHandle<()>, stop: Arc<AtomicBool>) -> Self {
        Self { thread, stop }
    }
}

/// Spawn the decode worker for one track. It produces fixed-size PCM chunks
/// into the fan-out until EOF or stop, waits for the sinks to drain, then
/// invokes `on_track_end` (skipped when stopped).
pub fn spawn(
    params: DecoderParams,
    fanout: Arc<Fanout>,
    gate: Arc<PauseGate>,
    elapsed_us: Arc<AtomicU64>,
    on_track_end: Box<dyn FnOnce() + Send>,
) -> DecoderHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let thread = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let produced_any = decode(&params, &fanout, &stop, &gate, &elapsed_us);

            if !produced_any && !stop.load(Ordering::Relaxed) {
                thread::sleep(FAILURE_BACKOFF);
            }

            // Let the sinks finish the outgoing track before the controller
            // may start the next decoder.
            while !fanout.is_empty() && !stop.load(Ordering::Relaxed) {
                thread::sleep(DRAIN_POLL);
            }

            if !stop.load(Ordering::Relaxed) {
                on_track_end();
            }
        })
    };
    DecoderHandle { thread, stop }
}

fn decode(
    params: &DecoderParams,
    fanout: &Fanout,
    stop: &AtomicBool,
    gate: &PauseGate,
    elapsed_us: &AtomicU64,
) -> bool {
    let chunk_bytes = CHUNK_FRAMES * params.channels as usize * 2;
    let chunk_us = CHUNK_FRAMES as u64 * 1_000_000 / params.sample_rate.max(1) as u64;

    let child = Command::new("ffmpeg")
        .args(["-loglevel", "error", "-probesize", "32", "-analyzeduration", "0"])
        .arg("-i")
        .arg(&params.path)
        .args(["-f", "s16le"])
        .arg("-ar")
        .arg(params.sample_rate.to_string())
        .arg("-ac")
        .arg(params.channels.to_string())
        .arg("pipe:1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn();

    let mut child = match child {
        Ok(c) => KillOnDrop(c),
        Err(e) => {
            warn!("decoder spawn failed for {}: {e}", params.path.display());
            return false;
        }
    };

    let Some(mut stdout) = child.0.stdout.take() else {
        warn!("decoder produced no stdout pipe");
        return false;
    };

    let mut produced_any = false;
    let mut eof = false;

    while !stop.load(Ordering::Relaxed) {
        gate.wait(stop);
        if stop.load(Ordering::Relaxed) {
            break;
        }

        let Some(chunk) = read_chunk(&mut stdout, chunk_bytes) else {
            eof = true;
            break;
        };
        produced_any = true;

        if !fanout.put(Some(chunk), PUT_TIMEOUT, stop) {
            break;
        }
        elapsed_us.fetch_add(chunk_us, Ordering::Relaxed);
    }

    if eof {
        // The decoder closed its output; a non-zero status mid-stream is a
        // decode failure, handled the same as EOF.
        match child.0.wait() {
            Ok(status) if !status.success() => {
                warn!("decoder exited with {status} for {}", params.path.display());
            }
            Ok(_) => {}
            Err(e) => debug!("decoder wait failed: {e}"),
        }
    }

    produced_any
}

/// Read one fixed-size chunk. A short final read comes back zero-padded to
/// the chunk size; a zero-length read is EOF and yields None.
fn read_chunk(reader: &mut impl Read, size: usize) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("decoder read error: {e}");
                break;
            }
        }
    }
    if filled == 0 {
        None
    } else {
        Some(buf)
    }
}
