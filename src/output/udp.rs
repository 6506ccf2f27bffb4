use crate::data::config::{PlayoutConfig, UdpConfig};
use crate::output::mpegts::{MetadataInjector, TS_PACKET_SIZE};
use crate::playback::ring::ChunkRing;
use crate::playback::CHUNK_FRAMES;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::io::{BufReader, Read, Write};
use std::net::UdpSocket;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Feeder wakes at this cadence to re-check the stop flag.
const FEED_TIMEOUT: Duration = Duration::from_millis(200);
/// Seven 188-byte packets per datagram, the conventional TS-over-UDP fill.
const PACKETS_PER_DATAGRAM: usize = 7;

/// Networked sink: an external encoder turns raw PCM (its stdin) into an
/// MPEG-TS stream (its stdout). The feeder thread drains the ring into the
/// encoder; the shipper thread reads whole TS packets off the encoder,
/// splices queued metadata packets between them, and sends 1316-byte
/// datagrams to the configured target.
pub struct UdpSink {
    stop: Arc<AtomicBool>,
    child: Option<Child>,
    feeder: Option<JoinHandle<()>>,
    shipper: Option<JoinHandle<()>>,
    injector: Option<Arc<MetadataInjector>>,
}

impl UdpSink {
    pub fn start(
        playout: &PlayoutConfig,
        cfg: &UdpConfig,
        ring: Arc<ChunkRing>,
        alive: Arc<AtomicBool>,
    ) -> Result<Self> {
        let mut child = Command::new("ffmpeg")
            .args(["-loglevel", "error"])
            .args(["-f", "s16le"])
            .arg("-ar")
            .arg(playout.sample_rate.to_string())
            .arg("-ac")
            .arg(playout.channels.to_string())
            .args(["-i", "pipe:0"])
            .arg("-c:a")
            .arg(&cfg.codec)
            .arg("-b:a")
            .arg(&cfg.bitrate)
            .arg("-f")
            .arg(&cfg.format)
            .args(["-flush_packets", "1"])
            .arg("pipe:1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("spawn ffmpeg encoder")?;

        let stdin = child.stdin.take().context("encoder stdin missing")?;
        let stdout = child.stdout.take().context("encoder stdout missing")?;

        let socket = UdpSocket::bind("0.0.0.0:0").context("bind udp socket")?;
        socket
            .connect((cfg.host.as_str(), cfg.port))
            .with_context(|| format!("udp target {}:{}", cfg.host, cfg.port))?;

        let stop = Arc::new(AtomicBool::new(false));
        let injector = cfg.embed_metadata.then(|| Arc::new(MetadataInjector::new()));
        let chunk_bytes = CHUNK_FRAMES * playout.channels as usize * 2;

        let feeder = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || feed_loop(ring, stdin, stop, alive, chunk_bytes))
        };
        let shipper = {
            let stop = Arc::clone(&stop);
            let injector = injector.clone();
            thread::spawn(move || ship_loop(stdout, socket, injector, stop))
        };

        info!(
            "udp output → udp://{}:{} ({} {} {})",
            cfg.host, cfg.port, cfg.codec, cfg.bitrate, cfg.format
        );
        Ok(Self {
            stop,
            child: Some(child),
            feeder: Some(feeder),
            shipper: Some(shipper),
            injector,
        })
    }

    /// The tag injector, present when `embed_metadata` is configured.
    pub fn injector(&self) -> Option<Arc<MetadataInjector>> {
        self.injector.clone()
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // Killing the encoder first breaks both pipes, so neither worker can
        // stay blocked on it.
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(feeder) = self.feeder.take() {
            let _ = feeder.join();
        }
        if let Some(shipper) = self.shipper.take() {
            let _ = shipper.join();
        }
    }
}

impl Drop for UdpSink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Blocking ring get with a bounded timeout, then write-and-flush into the
/// encoder. A broken pipe ends the loop; the alive flag tells the fan-out
/// to stop duplicating chunks this way.
fn feed_loop(
    ring: Arc<ChunkRing>,
    mut stdin: ChildStdin,
    stop: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    chunk_bytes: usize,
) {
    let silence = vec![0u8; chunk_bytes];
    while !stop.load(Ordering::Relaxed) {
        let chunk = match ring.get(FEED_TIMEOUT) {
            Some(Some(chunk)) => chunk,
            Some(None) => silence.clone(),
            None => continue,
        };
        if let Err(e) = stdin.write_all(&chunk).and_then(|_| stdin.flush()) {
            warn!("encoder pipe closed: {e}");
            break;
        }
    }
    alive.store(false, Ordering::Relaxed);
}

/// Read the encoder output aligned to TS packets, inserting any pending
/// metadata packets at packet boundaries, and ship fixed-size datagrams.
fn ship_loop(
    stdout: ChildStdout,
    socket: UdpSocket,
    injector: Option<Arc<MetadataInjector>>,
    stop: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(stdout);
    let mut datagram: Vec<u8> = Vec::with_capacity(TS_PACKET_SIZE * PACKETS_PER_DATAGRAM);
    let mut packet = [0u8; TS_PACKET_SIZE];

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        if let Some(injector) = &injector {
            for meta_packet in injector.take_pending() {
                push_packet(&mut datagram, &meta_packet, &socket);
            }
        }
        match reader.read_exact(&mut packet) {
            Ok(()) => push_packet(&mut datagram, &packet, &socket),
            Err(e) => {
                if !stop.load(Ordering::Relaxed) {
                    debug!("encoder output ended: {e}");
                }
                break;
            }
        }
    }

    if !datagram.is_empty() {
        let _ = socket.send(&datagram);
    }
}

fn push_packet(datagram: &mut Vec<u8>, packet: &[u8], socket: &UdpSocket) {
    datagram.extend_from_slice(packet);
    if datagram.len() >= TS_PACKET_SIZE * PACKETS_PER_DATAGRAM {
        if let Err(e) = socket.send(datagram) {
            debug!("udp send failed: {e}");
        }
        datagram.clear();
    }
}
