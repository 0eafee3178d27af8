//! Public facade of the watch service.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, bounded, unbounded};
use parking_lot::Mutex;

use crate::config::WatcherConfig;

use super::backend::{BackendFactory, NotifyBackend};
use super::confinement::Confinement;
use super::dispatcher::Dispatcher;
use super::error::WatchError;
use super::paths;
use super::registry::WatchRegistry;
use super::subscriber::Subscriber;

/// Default upper bound on raw events merged into one dispatch.
pub const DEFAULT_DRAIN_LIMIT: usize = 256;

static SHARED: OnceLock<FileWatcher> = OnceLock::new();

/// Registry counters, mostly useful for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub files: usize,
    pub directories: usize,
    /// Live native keys (one per watched directory).
    pub keys: usize,
}

struct Shared {
    confinement: Arc<Confinement>,
    running: Arc<AtomicBool>,
    stop: Sender<()>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn shutdown(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            let _ = self.stop.try_send(());
            crate::log_event!("watcher", "stopping");
        }
        self.confinement.shutdown();

        // From inside a callback the worker would wait on itself.
        if self.confinement.is_current() {
            return;
        }
        if let Some(handle) = self.dispatcher.lock().take() {
            if handle.join().is_err() {
                tracing::error!("[watcher] dispatcher panicked");
            }
        }
        self.confinement.join();
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Filesystem watch service.
///
/// Subscribe callbacks to single files or to directories; all bookkeeping
/// runs on one confinement thread and a dispatcher thread feeds it native
/// events. Handles are cheap to clone and share one service.
///
/// An *inert* watcher (see [`FileWatcher::inert`]) accepts every call and
/// does nothing, so dependents keep working without live reload.
///
/// Subscribers that capture a clone of the watcher keep the service alive;
/// call [`shutdown`](Self::shutdown) explicitly in that case.
#[derive(Clone)]
pub struct FileWatcher {
    shared: Option<Arc<Shared>>,
}

impl FileWatcher {
    /// Create a watcher on the platform's native notification backend.
    pub fn new() -> Result<Self, WatchError> {
        Self::builder().build()
    }

    pub fn builder() -> FileWatcherBuilder {
        FileWatcherBuilder::new()
    }

    /// A watcher that ignores every request.
    pub fn inert() -> Self {
        Self { shared: None }
    }

    /// Process-wide watcher, created on first use.
    ///
    /// Falls back to an inert watcher if the native channel cannot be
    /// created. Prefer constructing one watcher at startup and passing it
    /// around; this exists for components that have no such handle.
    pub fn shared() -> &'static FileWatcher {
        SHARED.get_or_init(|| FileWatcherBuilder::new().build_or_inert())
    }

    pub fn is_inert(&self) -> bool {
        self.shared.is_none()
    }

    pub fn is_running(&self) -> bool {
        self.shared.as_ref().is_some_and(|shared| {
            shared.running.load(Ordering::Acquire) && shared.confinement.is_accepting()
        })
    }

    /// Subscribe to changes of a single file.
    ///
    /// No-op if `path` is a directory or its parent directory does not
    /// exist. The file itself need not exist yet. Blocks until the
    /// subscription is in place.
    pub fn watch_file(&self, path: impl AsRef<Path>, subscriber: &Subscriber) {
        let path = path.as_ref();
        if let Err(e) = self.try_watch_file(path, subscriber) {
            report_failure("watch file", path, &e);
        }
    }

    /// Like [`watch_file`](Self::watch_file) but reports failures.
    ///
    /// Returns `Ok(false)` when the request was a no-op.
    pub fn try_watch_file(
        &self,
        path: impl AsRef<Path>,
        subscriber: &Subscriber,
    ) -> Result<bool, WatchError> {
        let Some(shared) = &self.shared else {
            return Ok(false);
        };
        let path = paths::normalize_file(path.as_ref());
        let subscriber = subscriber.clone();
        shared
            .confinement
            .call(move |cell| cell.borrow_mut().subscribe_file(&path, &subscriber))?
    }

    /// Subscribe to changes of the entries of a directory.
    ///
    /// No-op if `path` is not an existing directory.
    pub fn watch_directory(&self, path: impl AsRef<Path>, subscriber: &Subscriber) {
        let path = path.as_ref();
        if let Err(e) = self.try_watch_directory(path, subscriber) {
            report_failure("watch directory", path, &e);
        }
    }

    pub fn try_watch_directory(
        &self,
        path: impl AsRef<Path>,
        subscriber: &Subscriber,
    ) -> Result<bool, WatchError> {
        let Some(shared) = &self.shared else {
            return Ok(false);
        };
        let path = paths::normalize_directory(path.as_ref());
        let subscriber = subscriber.clone();
        shared
            .confinement
            .call(move |cell| cell.borrow_mut().subscribe_directory(&path, &subscriber))?
    }

    /// Remove a file subscription. No-op if not subscribed.
    pub fn unwatch_file(&self, path: impl AsRef<Path>, subscriber: &Subscriber) {
        let Some(shared) = &self.shared else {
            return;
        };
        let path = paths::normalize_file(path.as_ref());
        let subscriber = subscriber.clone();
        let result = shared
            .confinement
            .call(move |cell| cell.borrow_mut().unsubscribe_file(&path, &subscriber));
        if let Err(e) = result {
            crate::debug_event!("watcher", "unwatch file skipped", "{e}");
        }
    }

    /// Remove a directory subscription. No-op if not subscribed.
    pub fn unwatch_directory(&self, path: impl AsRef<Path>, subscriber: &Subscriber) {
        let Some(shared) = &self.shared else {
            return;
        };
        let path = paths::normalize_directory(path.as_ref());
        let subscriber = subscriber.clone();
        let result = shared
            .confinement
            .call(move |cell| cell.borrow_mut().unsubscribe_directory(&path, &subscriber));
        if let Err(e) = result {
            crate::debug_event!("watcher", "unwatch directory skipped", "{e}");
        }
    }

    pub fn is_watching_file(&self, path: impl AsRef<Path>) -> bool {
        let path = paths::normalize_file(path.as_ref());
        self.query(move |registry| registry.is_watching_file(&path))
            .unwrap_or(false)
    }

    pub fn is_watching_directory(&self, path: impl AsRef<Path>) -> bool {
        let path = paths::normalize_directory(path.as_ref());
        self.query(move |registry| registry.is_watching_directory(&path))
            .unwrap_or(false)
    }

    /// Number of subscriber entries on a watched file; 0 when unwatched.
    pub fn file_subscriber_count(&self, path: impl AsRef<Path>) -> usize {
        let path = paths::normalize_file(path.as_ref());
        self.query(move |registry| {
            registry
                .file(&path)
                .map_or(0, |entry| entry.subscriber_count())
        })
        .unwrap_or(0)
    }

    pub fn stats(&self) -> WatchStats {
        self.query(|registry| WatchStats {
            files: registry.file_count(),
            directories: registry.directory_count(),
            keys: registry.key_count(),
        })
        .unwrap_or_default()
    }

    fn query<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&WatchRegistry) -> R + Send + 'static,
    {
        let shared = self.shared.as_ref()?;
        shared.confinement.call(move |cell| f(&*cell.borrow())).ok()
    }

    /// Stop the service.
    ///
    /// Native polling stops, requests already queued are still served, and
    /// later requests become no-ops. Waits for both threads unless called
    /// from a subscriber callback.
    pub fn shutdown(&self) {
        if let Some(shared) = &self.shared {
            shared.shutdown();
        }
    }
}

impl fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileWatcher")
            .field("inert", &self.is_inert())
            .field("running", &self.is_running())
            .finish()
    }
}

fn report_failure(operation: &str, path: &Path, error: &WatchError) {
    match error {
        // The directory vanished between the check and the OS call, or the
        // watcher is stopping: the subscription simply has no effect.
        WatchError::PathWatchFailed { .. } | WatchError::ShutDown => {
            crate::debug_event!("watcher", operation, "{}: {error}", path.display());
        }
        _ => {
            tracing::warn!("[watcher] {operation} {} failed: {error}", path.display());
        }
    }
}

/// Builder for [`FileWatcher`].
pub struct FileWatcherBuilder {
    thread_name: String,
    drain_limit: usize,
    backend: Option<BackendFactory>,
}

impl FileWatcherBuilder {
    pub fn new() -> Self {
        Self {
            thread_name: "livemark".to_string(),
            drain_limit: DEFAULT_DRAIN_LIMIT,
            backend: None,
        }
    }

    /// Prefix for the names of the two service threads.
    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    pub fn drain_limit(mut self, limit: usize) -> Self {
        self.drain_limit = limit.max(1);
        self
    }

    /// Apply the `[watcher]` section of the settings.
    pub fn config(self, config: &WatcherConfig) -> Self {
        self.thread_name(config.thread_name.clone())
            .drain_limit(config.drain_limit)
    }

    /// Use a custom native backend instead of `notify`'s recommended one.
    pub fn backend(mut self, factory: BackendFactory) -> Self {
        self.backend = Some(factory);
        self
    }

    pub fn build(self) -> Result<FileWatcher, WatchError> {
        let (raw_tx, raw_rx) = unbounded();
        let factory = self.backend.unwrap_or_else(NotifyBackend::factory);
        let backend = factory(raw_tx)?;

        let confinement = Arc::new(Confinement::spawn(
            format!("{}-confined", self.thread_name),
            WatchRegistry::new(backend),
        )?);

        let running = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = bounded(1);

        let dispatcher = Dispatcher {
            raw: raw_rx,
            stop: stop_rx,
            confinement: Arc::clone(&confinement),
            running: Arc::clone(&running),
            drain_limit: self.drain_limit,
        }
        .spawn(format!("{}-dispatch", self.thread_name));

        let dispatcher = match dispatcher {
            Ok(handle) => handle,
            Err(e) => {
                confinement.shutdown();
                confinement.join();
                return Err(e);
            }
        };

        crate::log_event!("watcher", "started");

        Ok(FileWatcher {
            shared: Some(Arc::new(Shared {
                confinement,
                running,
                stop: stop_tx,
                dispatcher: Mutex::new(Some(dispatcher)),
            })),
        })
    }

    /// Build, or fall back to an inert watcher if the native channel is
    /// unavailable.
    pub fn build_or_inert(self) -> FileWatcher {
        match self.build() {
            Ok(watcher) => watcher,
            Err(e) => {
                tracing::warn!("[watcher] live reload disabled: {e}");
                FileWatcher::inert()
            }
        }
    }
}

impl Default for FileWatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::backend::ManualBackend;
    use tempfile::TempDir;

    fn failing_backend() -> BackendFactory {
        Box::new(|_| {
            Err(WatchError::InitFailed {
                reason: "no inotify instances left".to_string(),
            })
        })
    }

    #[test]
    fn test_construction_failure_degrades_to_inert() {
        let temp = TempDir::new().unwrap();
        let watcher = FileWatcher::builder()
            .backend(failing_backend())
            .build_or_inert();

        assert!(watcher.is_inert());
        assert!(!watcher.is_running());

        let subscriber = Subscriber::new(|_| panic!("inert watcher must not deliver"));
        watcher.watch_file(temp.path().join("a.md"), &subscriber);
        watcher.watch_directory(temp.path(), &subscriber);
        watcher.unwatch_file(temp.path().join("a.md"), &subscriber);
        watcher.unwatch_directory(temp.path(), &subscriber);

        assert!(!watcher.is_watching_file(temp.path().join("a.md")));
        assert_eq!(watcher.stats(), WatchStats::default());
        watcher.shutdown();
    }

    #[test]
    fn test_build_reports_backend_failure() {
        let result = FileWatcher::builder().backend(failing_backend()).build();
        assert!(matches!(result, Err(WatchError::InitFailed { .. })));
    }

    #[test]
    fn test_requests_after_shutdown_are_noops() {
        let temp = TempDir::new().unwrap();
        let manual = ManualBackend::new();
        let watcher = FileWatcher::builder()
            .backend(manual.factory())
            .build()
            .unwrap();
        assert!(watcher.is_running());

        watcher.shutdown();
        assert!(!watcher.is_running());

        let subscriber = Subscriber::new(|_| {});
        watcher.watch_file(temp.path().join("a.md"), &subscriber);
        assert!(matches!(
            watcher.try_watch_file(temp.path().join("a.md"), &subscriber),
            Err(WatchError::ShutDown)
        ));
        assert!(manual.registered().is_empty());
    }

    #[test]
    fn test_shared_instance_is_reused() {
        let first = FileWatcher::shared() as *const FileWatcher;
        let second = FileWatcher::shared() as *const FileWatcher;
        assert_eq!(first, second);
    }
}
