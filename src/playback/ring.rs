use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// One queued PCM chunk. `None` is the track-boundary silence sentinel;
/// consumers zero-fill their output block for it.
pub type Chunk = Option<Vec<u8>>;

/// Bounded FIFO of PCM chunks between the decoder and one sink. Small by
/// design: enough to decouple decoder jitter from sink cadence, small
/// enough that a post-track drain is cheap.
pub struct ChunkRing {
    queue: Mutex<VecDeque<Chunk>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl ChunkRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue, waiting up to `timeout` for a slot. The chunk is handed back
    /// on timeout so the producer can retry after checking its stop signal.
    /// `canceled` is re-checked on every wake: a producer that was parked
    /// here when it was retired must not land its chunk into a ring that
    /// now belongs to the next track.
    pub fn put(
        &self,
        chunk: Chunk,
        timeout: Duration,
        canceled: &AtomicBool,
    ) -> Result<(), Chunk> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock().unwrap();
        loop {
            if canceled.load(Ordering::Relaxed) {
                return Err(chunk);
            }
            if queue.len() < self.capacity {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(chunk);
            }
            let (guard, _) = self
                .not_full
                .wait_timeout(queue, deadline - now)
                .unwrap();
            queue = guard;
        }
        queue.push_back(chunk);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue, waiting up to `timeout` for a chunk.
    pub fn get(&self, timeout: Duration) -> Option<Chunk> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock().unwrap();
        while queue.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .not_empty
                .wait_timeout(queue, deadline - now)
                .unwrap();
            queue = guard;
        }
        let chunk = queue.pop_front();
        self.not_full.notify_one();
        chunk
    }

    /// Non-blocking pop for the realtime audio callback.
    pub fn try_get(&self) -> Option<Chunk> {
        let mut queue = self.queue.lock().unwrap();
        let chunk = queue.pop_front()?;
        self.not_full.notify_one();
        Some(chunk)
    }

    pub fn drain(&self) {
        let mut queue = self.queue.lock().unwrap();
        queue.clear();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}

struct Branch {
    ring: Arc<ChunkRing>,
    alive: Arc<AtomicBool>,
}

/// Duplicates each decoded chunk into one ring per enabled sink. Built once
/// at engine start. A branch whose sink has died (flag cleared) is skipped
/// so a broken encoder cannot wedge the decoder or starve the other sink.
pub struct Fanout {
    branches: Vec<Branch>,
}

impl Fanout {
    pub fn new(branch_count: usize, capacity: usize) -> Self {
        let branches = (0..branch_count.max(1))
            .map(|_| Branch {
                ring: Arc::new(ChunkRing::new(capacity)),
                alive: Arc::new(AtomicBool::new(true)),
            })
            .collect();
        Self { branches }
    }

    pub fn ring(&self, index: usize) -> Arc<ChunkRing> {
        Arc::clone(&self.branches[index].ring)
    }

    pub fn alive_flag(&self, index: usize) -> Arc<AtomicBool> {
        Arc::clone(&self.branches[index].alive)
    }

    /// Deliver `chunk` to every live branch, blocking on a full ring in
    /// `timeout` slices and re-checking `stop` between them. Returns false
    /// only when stopped mid-delivery.
    pub fn put(&self, chunk: Chunk, timeout: Duration, stop: &AtomicBool) -> bool {
        let live: Vec<&Branch> = self
            .branches
            .iter()
            .filter(|b| b.alive.load(Ordering::Relaxed))
            .collect();
        let Some((last, rest)) = live.split_last() else {
            return true;
        };

        for branch in rest {
            if !deliver(branch, chunk.clone(), timeout, stop) {
                return false;
            }
        }
        deliver(last, chunk, timeout, stop)
    }

    /// True when every live branch has been fully consumed.
    pub fn is_empty(&self) -> bool {
        self.branches
            .iter()
            .filter(|b| b.alive.load(Ordering::Relaxed))
            .all(|b| b.ring.is_empty())
    }

    pub fn drain(&self) {
        for branch in &self.branches {
            branch.ring.drain();
        }
    }
}

fn deliver(branch: &Branch, mut item: Chunk, timeout: Duration, stop: &AtomicBool) -> bool {
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        match branch.ring.put(item, timeout, stop) {
            Ok(()) => return true,
            Err(back) => item = back,
        }
    }
}
