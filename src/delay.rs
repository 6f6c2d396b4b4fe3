// ============================================================================
// Batched delay tests
// ============================================================================

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::{
    collections::{HashMap, HashSet},
    mem,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread,
    time::Duration,
};
use tracing::{debug, warn};

use crate::{api::ClashClient, config::Settings};

/// Result per node: `Some(ms)` or `None` when the node did not answer.
pub type Delays = HashMap<String, Option<u32>>;

pub trait Prober: Send + Sync + 'static {
    fn probe(&self, name: &str, url: &str, timeout_ms: u64) -> Option<u32>;
}

impl Prober for ClashClient {
    fn probe(&self, name: &str, url: &str, timeout_ms: u64) -> Option<u32> {
        self.test_delay(name, url, timeout_ms).unwrap_or_else(|e| {
            warn!(node = name, error = %format!("{:#}", e), "delay test failed");
            None
        })
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub concurrency: usize,
    pub flush_interval: Duration,
    pub url: String,
    pub timeout_ms: u64,
}

impl BatchOptions {
    /// Every node of every group.
    pub fn test_all(settings: &Settings) -> Self {
        Self {
            concurrency: 3,
            flush_interval: Duration::from_millis(500),
            url: settings.delay_url.clone(),
            timeout_ms: settings.delay_timeout_ms,
        }
    }

    /// The members of one group.
    pub fn group(settings: &Settings) -> Self {
        Self {
            concurrency: 5,
            flush_interval: Duration::from_millis(200),
            url: settings.delay_url.clone(),
            timeout_ms: settings.delay_timeout_ms,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum DelayUpdate {
    Partial(Delays),
    Finished,
}

/// A running batch. Results arrive as partial maps every flush interval.
pub struct DelayBatch {
    abort: Arc<AtomicBool>,
    rx: Receiver<DelayUpdate>,
    total: usize,
    finished: bool,
}

impl DelayBatch {
    pub fn start<P: Prober>(prober: Arc<P>, names: Vec<String>, opts: BatchOptions) -> Self {
        let mut seen = HashSet::new();
        let queue: Arc<Vec<String>> = Arc::new(
            names
                .into_iter()
                .filter(|n| seen.insert(n.clone()))
                .collect(),
        );
        let total = queue.len();
        let abort = Arc::new(AtomicBool::new(false));
        let (tx, rx) = crossbeam_channel::unbounded();

        debug!(nodes = total, concurrency = opts.concurrency, "starting delay batch");
        let coordinator_abort = Arc::clone(&abort);
        thread::spawn(move || coordinate(prober, queue, opts, coordinator_abort, tx));

        Self {
            abort,
            rx,
            total,
            finished: false,
        }
    }

    /// Stops handing out nodes. Probes already in flight still report.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Merges everything flushed since the last poll.
    pub fn poll(&mut self) -> Delays {
        let mut merged = Delays::new();
        for update in self.rx.try_iter() {
            match update {
                DelayUpdate::Partial(part) => merged.extend(part),
                DelayUpdate::Finished => self.finished = true,
            }
        }
        merged
    }
}

impl Drop for DelayBatch {
    fn drop(&mut self) {
        self.abort();
    }
}

fn coordinate<P: Prober>(
    prober: Arc<P>,
    queue: Arc<Vec<String>>,
    opts: BatchOptions,
    abort: Arc<AtomicBool>,
    tx: Sender<DelayUpdate>,
) {
    let buffer: Arc<Mutex<Delays>> = Arc::default();
    let next = Arc::new(AtomicUsize::new(0));
    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

    let workers = opts.concurrency.max(1).min(queue.len().max(1));
    for _ in 0..workers {
        let prober = Arc::clone(&prober);
        let queue = Arc::clone(&queue);
        let buffer = Arc::clone(&buffer);
        let next = Arc::clone(&next);
        let abort = Arc::clone(&abort);
        let done_tx = done_tx.clone();
        let url = opts.url.clone();
        let timeout_ms = opts.timeout_ms;
        thread::spawn(move || {
            let _done = done_tx;
            while !abort.load(Ordering::SeqCst) {
                let i = next.fetch_add(1, Ordering::SeqCst);
                let Some(name) = queue.get(i) else { break };
                let delay = prober.probe(name, &url, timeout_ms);
                buffer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(name.clone(), delay);
            }
        });
    }
    drop(done_tx);

    let flush = || {
        let part = mem::take(&mut *buffer.lock().unwrap_or_else(PoisonError::into_inner));
        if !part.is_empty() {
            let _ = tx.send(DelayUpdate::Partial(part));
        }
    };

    loop {
        match done_rx.recv_timeout(opts.flush_interval) {
            Err(RecvTimeoutError::Timeout) => flush(),
            Ok(()) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    flush();
    let _ = tx.send(DelayUpdate::Finished);
    debug!(nodes = queue.len(), "delay batch finished");
}
