//! Terminal geometry and its process-wide resize broadcaster.
//!
//! One `GeometrySource` exists per process (created by `Logger::new` and
//! shared by every derived logger and PTY session). A SIGWINCH watcher
//! thread re-queries the terminal and stores the new geometry; sessions
//! observe updates through subscriptions, never through the signal itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use signal_hook::consts::SIGWINCH;
use signal_hook::iterator::Signals;
use tokio::sync::mpsc;

/// Minimum reserved margin width, in columns.
pub const MIN_MARGIN: u16 = 16;

/// Current terminal dimensions plus the derived scope margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermGeometry {
    /// Columns reserved on the left for the scope label.
    pub margin: u16,
    /// Total terminal columns.
    pub width: u16,
    /// Total terminal rows.
    pub height: u16,
}

impl Default for TermGeometry {
    fn default() -> Self {
        Self {
            margin: MIN_MARGIN,
            width: 80,
            height: 25,
        }
    }
}

impl TermGeometry {
    /// Geometry for a terminal of the given size, with the margin clamped to
    /// `max(16, width / 5)`.
    pub fn for_terminal(width: u16, height: u16) -> Self {
        Self {
            margin: MIN_MARGIN.max(width / 5),
            width,
            height,
        }
    }
}

struct Inner {
    current: TermGeometry,
    next_id: u64,
    subscribers: HashMap<u64, mpsc::UnboundedSender<TermGeometry>>,
}

struct ResizeWatcher {
    handle: signal_hook::iterator::Handle,
    thread: thread::JoinHandle<()>,
}

/// Single-writer, many-reader store of the latest [`TermGeometry`], with
/// publish/subscribe delivery of updates.
pub struct GeometrySource {
    inner: Mutex<Inner>,
    watcher: Mutex<Option<ResizeWatcher>>,
}

impl GeometrySource {
    /// Create a source holding the built-in default geometry (16/80/25).
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: TermGeometry::default(),
                next_id: 0,
                subscribers: HashMap::new(),
            }),
            watcher: Mutex::new(None),
        }
    }

    /// The latest stored geometry. Never blocks on delivery.
    pub fn load(&self) -> TermGeometry {
        self.inner.lock().expect("geometry lock poisoned").current
    }

    /// Store a new geometry and deliver it to every live subscriber, in
    /// store order. Subscribers whose receiving side is gone are dropped.
    pub fn store(&self, geometry: TermGeometry) {
        let mut inner = self.inner.lock().expect("geometry lock poisoned");
        inner.current = geometry;
        inner
            .subscribers
            .retain(|_, tx| tx.send(geometry).is_ok());
    }

    /// Register a subscriber. Only geometries stored after this call are
    /// delivered; the current value is available via [`load`](Self::load).
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().expect("geometry lock poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, tx);
        Subscription {
            id,
            rx,
            source: Arc::clone(self),
        }
    }

    /// Deregister a subscriber. Idempotent; the subscription's pending
    /// receive completes with `None`.
    pub fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock().expect("geometry lock poisoned");
        inner.subscribers.remove(&id);
    }

    /// Re-query the real terminal and store the clamped geometry. Quietly
    /// keeps the previous value if the size cannot be determined.
    pub fn sync_from_terminal(&self) {
        if let Ok((width, height)) = crossterm::terminal::size() {
            self.store(TermGeometry::for_terminal(width, height));
        }
    }

    /// Start the SIGWINCH watcher thread. Each signal re-queries the
    /// terminal size and stores the result. No-op if already watching.
    pub fn watch_resize(self: &Arc<Self>) -> std::io::Result<()> {
        let mut watcher = self.watcher.lock().expect("watcher lock poisoned");
        if watcher.is_some() {
            return Ok(());
        }
        let mut signals = Signals::new([SIGWINCH])?;
        let handle = signals.handle();
        let source: Weak<GeometrySource> = Arc::downgrade(self);
        let thread = thread::spawn(move || {
            for _ in signals.forever() {
                match source.upgrade() {
                    Some(source) => source.sync_from_terminal(),
                    None => break,
                }
            }
        });
        *watcher = Some(ResizeWatcher { handle, thread });
        Ok(())
    }

    /// Stop the SIGWINCH watcher and join its thread. Idempotent.
    pub fn shutdown(&self) {
        let watcher = self.watcher.lock().expect("watcher lock poisoned").take();
        if let Some(watcher) = watcher {
            watcher.handle.close();
            let _ = watcher.thread.join();
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .expect("geometry lock poisoned")
            .subscribers
            .len()
    }
}

impl Default for GeometrySource {
    fn default() -> Self {
        Self::new()
    }
}

/// A live registration on a [`GeometrySource`], yielding geometries stored
/// after the subscription was created. Dropping it deregisters.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<TermGeometry>,
    source: Arc<GeometrySource>,
}

impl Subscription {
    /// Identifier usable with [`GeometrySource::unsubscribe`] to release
    /// this subscription from outside its consumption path.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next stored geometry. Returns `None` once the
    /// subscription has been released.
    pub async fn changed(&mut self) -> Option<TermGeometry> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`changed`](Self::changed).
    pub fn try_changed(&mut self) -> Option<TermGeometry> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.source.unsubscribe(self.id);
    }
}
