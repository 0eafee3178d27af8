//! Native notification backends.
//!
//! A backend owns the OS-level watch registrations ("native keys", one per
//! directory) and pushes raw `notify` events into the dispatcher channel.
//! The registry only talks to the [`NativeBackend`] trait, which lets tests
//! drive the whole pipeline with [`ManualBackend`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::Sender;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use super::error::WatchError;

/// Raw events delivered together by the native layer.
pub type RawBatch = Vec<notify::Result<Event>>;

/// Creates a backend wired to the dispatcher's raw event channel.
pub type BackendFactory =
    Box<dyn FnOnce(Sender<RawBatch>) -> Result<Box<dyn NativeBackend>, WatchError> + Send>;

/// OS-level registration of directory watches.
pub trait NativeBackend: Send + 'static {
    /// Start receiving events for the entries of `dir` (non-recursive).
    fn register(&mut self, dir: &Path) -> Result<(), WatchError>;

    /// Release the registration for `dir`. Unknown directories are ignored.
    fn cancel(&mut self, dir: &Path);
}

/// Backend on top of `notify::RecommendedWatcher`.
pub struct NotifyBackend {
    watcher: RecommendedWatcher,
}

impl NotifyBackend {
    pub fn new(sender: Sender<RawBatch>) -> Result<Self, WatchError> {
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = sender.send(vec![res]);
        })?;
        Ok(Self { watcher })
    }

    pub fn factory() -> BackendFactory {
        Box::new(|sender| {
            let backend = NotifyBackend::new(sender)?;
            Ok(Box::new(backend) as Box<dyn NativeBackend>)
        })
    }
}

impl NativeBackend for NotifyBackend {
    fn register(&mut self, dir: &Path) -> Result<(), WatchError> {
        self.watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::PathWatchFailed {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            })
    }

    fn cancel(&mut self, dir: &Path) {
        if let Err(e) = self.watcher.unwatch(dir) {
            // Directory already gone: the OS dropped the watch itself.
            crate::debug_event!("watcher", "unwatch ignored", "{}: {e}", dir.display());
        }
    }
}

#[derive(Debug, Default)]
struct ManualState {
    sender: Option<Sender<RawBatch>>,
    registered: BTreeSet<PathBuf>,
    registrations: usize,
    fail_registrations: bool,
}

/// In-memory backend: records registrations and lets the caller inject raw
/// events.
///
/// Clones share state, so keep one clone to observe and drive the backend
/// after handing another to the watcher via [`ManualBackend::factory`].
#[derive(Debug, Clone, Default)]
pub struct ManualBackend {
    state: Arc<Mutex<ManualState>>,
}

impl ManualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> BackendFactory {
        let backend = self.clone();
        Box::new(move |sender| {
            backend.state.lock().sender = Some(sender);
            Ok(Box::new(backend) as Box<dyn NativeBackend>)
        })
    }

    /// Deliver events as one raw batch. Returns `false` if no watcher is
    /// listening.
    pub fn emit(&self, events: impl IntoIterator<Item = Event>) -> bool {
        let batch: RawBatch = events.into_iter().map(Ok).collect();
        self.send(batch)
    }

    /// Deliver a native error (e.g. a failed read of the OS queue).
    pub fn emit_error(&self, error: notify::Error) -> bool {
        self.send(vec![Err(error)])
    }

    fn send(&self, batch: RawBatch) -> bool {
        match &self.state.lock().sender {
            Some(sender) => sender.send(batch).is_ok(),
            None => false,
        }
    }

    /// Make subsequent registrations fail, as when a directory disappears
    /// between the existence check and the OS call.
    pub fn fail_registrations(&self, fail: bool) {
        self.state.lock().fail_registrations = fail;
    }

    pub fn is_registered(&self, dir: &Path) -> bool {
        self.state.lock().registered.contains(dir)
    }

    pub fn registered(&self) -> Vec<PathBuf> {
        self.state.lock().registered.iter().cloned().collect()
    }

    /// Total successful registrations since creation.
    pub fn registration_count(&self) -> usize {
        self.state.lock().registrations
    }
}

impl NativeBackend for ManualBackend {
    fn register(&mut self, dir: &Path) -> Result<(), WatchError> {
        let mut state = self.state.lock();
        if state.fail_registrations {
            return Err(WatchError::PathWatchFailed {
                path: dir.to_path_buf(),
                reason: "registration rejected".to_string(),
            });
        }
        state.registered.insert(dir.to_path_buf());
        state.registrations += 1;
        Ok(())
    }

    fn cancel(&mut self, dir: &Path) {
        self.state.lock().registered.remove(dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use notify::EventKind;
    use notify::event::CreateKind;

    #[test]
    fn test_manual_backend_records_registrations() {
        let manual = ManualBackend::new();
        let (tx, rx) = unbounded();
        let mut backend = (manual.factory())(tx).unwrap();

        backend.register(Path::new("/a")).unwrap();
        backend.register(Path::new("/b")).unwrap();
        backend.cancel(Path::new("/a"));

        assert!(!manual.is_registered(Path::new("/a")));
        assert!(manual.is_registered(Path::new("/b")));
        assert_eq!(manual.registration_count(), 2);

        let event = Event::new(EventKind::Create(CreateKind::File)).add_path("/b/x".into());
        assert!(manual.emit([event.clone(), event]));
        let batch = rx.recv().unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_manual_backend_failing_registration() {
        let manual = ManualBackend::new();
        let (tx, _rx) = unbounded();
        let mut backend = (manual.factory())(tx).unwrap();

        manual.fail_registrations(true);
        assert!(matches!(
            backend.register(Path::new("/a")),
            Err(WatchError::PathWatchFailed { .. })
        ));
        assert!(manual.registered().is_empty());
    }

    #[test]
    fn test_emit_without_watcher() {
        let manual = ManualBackend::new();
        assert!(!manual.emit(Vec::new()));
    }
}
