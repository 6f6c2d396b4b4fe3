// ============================================================================
// Shared WebSocket subscriptions
// ============================================================================
//
// Every topic owns at most one socket. Frames are decoded once and fanned out
// as `Arc<T>` to however many views are subscribed.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::de::DeserializeOwned;
use std::{
    fmt,
    io::ErrorKind,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};
use tungstenite::{connect, stream::MaybeTlsStream, Message};

use crate::{
    api::{ConnectionsSnapshot, LogEvent, Memory, Traffic},
    config::{Session, Settings},
};

/// Frames queued per listener before new ones are dropped.
const LISTENER_BACKLOG: usize = 256;
/// How often a blocked reader wakes up to check for freeze/shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Connections,
    Traffic,
    Memory,
    Logs,
}

impl Topic {
    pub fn path(&self, log_level: &str) -> String {
        match self {
            Topic::Connections => "/connections".to_string(),
            Topic::Traffic => "/traffic".to_string(),
            Topic::Memory => "/memory".to_string(),
            Topic::Logs => format!("/logs?level={}", urlencoding::encode(log_level)),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topic::Connections => "connections",
            Topic::Traffic => "traffic",
            Topic::Memory => "memory",
            Topic::Logs => "logs",
        };
        f.write_str(name)
    }
}

/// Builds the socket URL for `path`: `http` becomes `ws`, `https` becomes
/// `wss`, and the secret travels as a `token` query parameter.
pub fn ws_url(session: &Session, path: &str) -> String {
    let base = &session.base_url;
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        format!("ws://{}", base)
    };

    let mut url = format!("{}{}", ws_base, path);
    if let Some(ref secret) = session.secret {
        url.push(if path.contains('?') { '&' } else { '?' });
        url.push_str("token=");
        url.push_str(&urlencoding::encode(secret));
    }
    url
}

struct Listeners<T> {
    next_id: u64,
    senders: Vec<(u64, Sender<Arc<T>>)>,
}

struct Shared<T> {
    topic: Topic,
    url: String,
    reconnect_delay: Duration,
    listeners: Mutex<Listeners<T>>,
    started: AtomicBool,
    frozen: AtomicBool,
    stopped: AtomicBool,
}

impl<T> Shared<T> {
    fn listeners(&self) -> MutexGuard<'_, Listeners<T>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn idle(&self) -> bool {
        self.stopped.load(Ordering::Relaxed) || self.frozen.load(Ordering::Relaxed)
    }

    /// Sleeps for `total`, waking early on freeze or shutdown.
    fn pause(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.idle() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }
}

impl<T: DeserializeOwned> Shared<T> {
    fn dispatch(&self, data: &[u8]) {
        match serde_json::from_slice::<T>(data) {
            Ok(frame) => self.broadcast(Arc::new(frame)),
            Err(e) => warn!(topic = %self.topic, error = %e, "dropping undecodable frame"),
        }
    }

    fn broadcast(&self, frame: Arc<T>) {
        let mut listeners = self.listeners();
        listeners
            .senders
            .retain(|(_, tx)| match tx.try_send(Arc::clone(&frame)) {
                Ok(()) | Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            });
    }
}

/// One topic's shared socket plus its listeners.
pub struct Feed<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Feed<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(topic: Topic, url: String, reconnect_delay: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                topic,
                url,
                reconnect_delay,
                listeners: Mutex::new(Listeners {
                    next_id: 0,
                    senders: Vec::new(),
                }),
                started: AtomicBool::new(false),
                frozen: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Adds a listener. The socket is opened on the first subscription.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = crossbeam_channel::bounded(LISTENER_BACKLOG);
        let id = {
            let mut listeners = self.shared.listeners();
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.senders.push((id, tx));
            id
        };

        if !self.shared.started.swap(true, Ordering::SeqCst) {
            let shared = Arc::clone(&self.shared);
            let name = format!("feed-{}", shared.topic);
            if let Err(e) = thread::Builder::new().name(name).spawn(move || run(shared)) {
                warn!(topic = %self.shared.topic, error = %e, "failed to start reader thread");
                self.shared.started.store(false, Ordering::SeqCst);
            }
        }

        Subscription {
            id,
            rx,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Closes the socket and holds off reconnecting until `resume`.
    pub fn freeze(&self) {
        if !self.shared.frozen.swap(true, Ordering::SeqCst) {
            debug!(topic = %self.shared.topic, "frozen");
        }
    }

    pub fn resume(&self) {
        if self.shared.frozen.swap(false, Ordering::SeqCst) {
            debug!(topic = %self.shared.topic, "resumed");
        }
    }

    #[cfg(test)]
    pub fn listener_count(&self) -> usize {
        self.shared.listeners().senders.len()
    }
}

impl<T> Drop for Feed<T> {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
    }
}

fn run<T: DeserializeOwned>(shared: Arc<Shared<T>>) {
    while !shared.stopped.load(Ordering::Relaxed) {
        if shared.frozen.load(Ordering::Relaxed) {
            thread::sleep(POLL_INTERVAL);
            continue;
        }

        match connect(shared.url.as_str()) {
            Ok((mut socket, _)) => {
                info!(topic = %shared.topic, "connected");
                if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
                    if let Err(e) = stream.set_read_timeout(Some(POLL_INTERVAL)) {
                        warn!(topic = %shared.topic, error = %e, "failed to set read timeout");
                    }
                }

                loop {
                    if shared.idle() {
                        let _ = socket.close(None);
                        let _ = socket.flush();
                        break;
                    }
                    match socket.read() {
                        Ok(msg @ (Message::Text(_) | Message::Binary(_))) => {
                            shared.dispatch(&msg.into_data());
                        }
                        Ok(_) => {}
                        Err(tungstenite::Error::Io(e))
                            if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                        Err(e) => {
                            warn!(topic = %shared.topic, error = %e, "socket closed");
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!(topic = %shared.topic, error = %e, "failed to connect"),
        }

        if !shared.idle() {
            debug!(topic = %shared.topic, delay = ?shared.reconnect_delay, "reconnecting");
            shared.pause(shared.reconnect_delay);
        }
    }
    debug!(topic = %shared.topic, "reader stopped");
}

/// A listener handle. Dropping it unsubscribes.
pub struct Subscription<T> {
    id: u64,
    rx: Receiver<Arc<T>>,
    shared: Weak<Shared<T>>,
}

impl<T> Subscription<T> {
    /// Everything received since the last drain, oldest first.
    pub fn drain(&self) -> Vec<Arc<T>> {
        self.rx.try_iter().collect()
    }

    #[cfg(test)]
    pub fn receiver(&self) -> &Receiver<Arc<T>> {
        &self.rx
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.listeners().senders.retain(|(id, _)| *id != self.id);
        }
    }
}

/// The four daemon streams, shared by every view.
pub struct StreamHub {
    pub connections: Feed<ConnectionsSnapshot>,
    pub traffic: Feed<Traffic>,
    pub memory: Feed<Memory>,
    pub logs: Feed<LogEvent>,
}

impl StreamHub {
    pub fn new(session: &Session, settings: &Settings) -> Self {
        let delay = settings.reconnect_delay();
        let url = |topic: Topic| ws_url(session, &topic.path(&settings.log_level));
        Self {
            connections: Feed::new(Topic::Connections, url(Topic::Connections), delay),
            traffic: Feed::new(Topic::Traffic, url(Topic::Traffic), delay),
            memory: Feed::new(Topic::Memory, url(Topic::Memory), delay),
            logs: Feed::new(Topic::Logs, url(Topic::Logs), delay),
        }
    }

    pub fn freeze(&self) {
        info!("freezing streams");
        self.connections.freeze();
        self.traffic.freeze();
        self.memory.freeze();
        self.logs.freeze();
    }

    pub fn resume(&self) {
        info!("resuming streams");
        self.connections.resume();
        self.traffic.resume();
        self.memory.resume();
        self.logs.resume();
    }
}
