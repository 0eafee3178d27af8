//! File content that follows the file on disk.
//!
//! A [`ContentReader`] reads and renders one file, then re-reads it each
//! time the watcher reports a change. The subscription is bound to the
//! reader's lifetime: once the reader is gone the watcher drops it on the
//! next delivery even if [`ContentReader::unwatch`] was never called.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::watcher::{FileWatcher, Subscriber, WatchEvent};

/// Turns raw file text into the displayed content.
pub type Render = dyn Fn(&str) -> String + Send + Sync;

type Listener = dyn Fn(u64, &str) + Send + Sync;

struct Snapshot {
    content: String,
    revision: u64,
}

struct ReaderState {
    path: PathBuf,
    render: RwLock<Arc<Render>>,
    snapshot: RwLock<Snapshot>,
    listeners: Mutex<Vec<Arc<Listener>>>,
}

impl ReaderState {
    /// Re-read and re-render. Unreadable files keep the previous content.
    fn reload(&self) -> bool {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                crate::debug_event!("reader", "read skipped", "{}: {e}", self.path.display());
                return false;
            }
        };

        let render = Arc::clone(&*self.render.read());
        let content = render(&raw);

        let revision = {
            let mut snapshot = self.snapshot.write();
            snapshot.content = content.clone();
            snapshot.revision += 1;
            snapshot.revision
        };
        tracing::trace!("[reader] {} revision {revision}", self.path.display());

        let listeners: Vec<_> = self.listeners.lock().clone();
        for listener in listeners {
            listener(revision, &content);
        }
        true
    }
}

/// Rendered content of one file, kept up to date while watching.
pub struct ContentReader {
    state: Arc<ReaderState>,
    watcher: FileWatcher,
    subscriber: Mutex<Option<Subscriber>>,
}

impl ContentReader {
    /// Reader that shows the file text unchanged.
    pub fn new(watcher: &FileWatcher, path: impl AsRef<Path>) -> Self {
        Self::with_render(watcher, path, |raw: &str| raw.to_string())
    }

    pub fn with_render(
        watcher: &FileWatcher,
        path: impl AsRef<Path>,
        render: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            state: Arc::new(ReaderState {
                path: path.as_ref().to_path_buf(),
                render: RwLock::new(Arc::new(render)),
                snapshot: RwLock::new(Snapshot {
                    content: String::new(),
                    revision: 0,
                }),
                listeners: Mutex::new(Vec::new()),
            }),
            watcher: watcher.clone(),
            subscriber: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.state.path
    }

    /// Call `listener` with the new revision and content after every
    /// successful reload.
    ///
    /// Listeners run on the watcher's confinement thread for file changes.
    pub fn on_change(&self, listener: impl Fn(u64, &str) + Send + Sync + 'static) {
        self.state.listeners.lock().push(Arc::new(listener));
    }

    /// Start following the file and render it once right away.
    pub fn watch(&self) {
        {
            let mut slot = self.subscriber.lock();
            if slot.is_some() {
                return;
            }

            let alive: Weak<ReaderState> = Arc::downgrade(&self.state);
            let target = alive.clone();
            let subscriber = Subscriber::with_liveness(
                move || alive.strong_count() > 0,
                move |event: &WatchEvent| {
                    if let Some(state) = target.upgrade() {
                        tracing::trace!("[reader] {:?} {}", event.change(), event.path().display());
                        state.reload();
                    }
                },
            );
            self.watcher.watch_file(&self.state.path, &subscriber);
            *slot = Some(subscriber);
        }

        self.state.reload();
    }

    /// Stop following the file. The last content stays available.
    pub fn unwatch(&self) {
        if let Some(subscriber) = self.subscriber.lock().take() {
            self.watcher.unwatch_file(&self.state.path, &subscriber);
        }
    }

    pub fn is_watching(&self) -> bool {
        self.subscriber.lock().is_some()
    }

    /// Replace the render function, re-rendering if already watching.
    pub fn set_render(&self, render: impl Fn(&str) -> String + Send + Sync + 'static) {
        *self.state.render.write() = Arc::new(render);
        if self.is_watching() {
            self.state.reload();
        }
    }

    /// Re-read the file now. Returns whether the content was refreshed.
    pub fn reload(&self) -> bool {
        self.state.reload()
    }

    pub fn content(&self) -> String {
        self.state.snapshot.read().content.clone()
    }

    /// Number of successful reloads so far.
    pub fn revision(&self) -> u64 {
        self.state.snapshot.read().revision
    }
}

impl Drop for ContentReader {
    fn drop(&mut self) {
        self.unwatch();
    }
}

impl fmt::Debug for ContentReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentReader")
            .field("path", &self.state.path)
            .field("revision", &self.revision())
            .field("watching", &self.is_watching())
            .finish()
    }
}
