//! Live reload of the user stylesheet.
//!
//! The stylesheet lives at `state_dir/style_file`. When the state directory
//! exists the reloader watches the file and pushes its text to every
//! registered applier whenever it changes. Deleting the file clears the
//! style.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::Settings;
use crate::watcher::{FileWatcher, Subscriber};

type Applier = dyn Fn(&str) + Send + Sync;

struct StyleState {
    path: PathBuf,
    current: RwLock<String>,
    appliers: Mutex<Vec<Arc<Applier>>>,
}

impl StyleState {
    fn reload(&self) {
        let css = match std::fs::read_to_string(&self.path) {
            Ok(css) => css,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => {
                tracing::warn!("[style] cannot read {}: {e}", self.path.display());
                return;
            }
        };

        *self.current.write() = css.clone();
        crate::log_event!("style", "applied", "{}", self.path.display());

        let appliers: Vec<_> = self.appliers.lock().clone();
        for apply in appliers {
            apply(&css);
        }
    }
}

/// Watches the user stylesheet and re-applies it on change.
pub struct StyleReloader {
    state: Arc<StyleState>,
    watcher: FileWatcher,
    subscriber: Option<Subscriber>,
}

impl StyleReloader {
    /// Load the stylesheet and start watching it.
    ///
    /// Without a state directory nothing is watched and the style stays
    /// empty.
    pub fn start(watcher: &FileWatcher, settings: &Settings) -> Self {
        let state = Arc::new(StyleState {
            path: settings.style_path(),
            current: RwLock::new(String::new()),
            appliers: Mutex::new(Vec::new()),
        });

        let mut reloader = Self {
            state,
            watcher: watcher.clone(),
            subscriber: None,
        };

        if !settings.state_dir.is_dir() {
            crate::debug_event!(
                "style",
                "no state directory",
                "{}",
                settings.state_dir.display()
            );
            return reloader;
        }

        let target = Arc::clone(&reloader.state);
        let subscriber = Subscriber::new(move |_| target.reload());
        reloader.watcher.watch_file(&reloader.state.path, &subscriber);
        reloader.subscriber = Some(subscriber);
        reloader.state.reload();

        reloader
    }

    pub fn style_path(&self) -> &Path {
        &self.state.path
    }

    pub fn is_active(&self) -> bool {
        self.subscriber.is_some()
    }

    /// Register a consumer of the stylesheet. It receives the current style
    /// right away and every reloaded one afterwards.
    pub fn on_apply(&self, apply: impl Fn(&str) + Send + Sync + 'static) {
        let apply: Arc<Applier> = Arc::new(apply);
        self.state.appliers.lock().push(Arc::clone(&apply));
        apply(&self.current());
    }

    /// Re-read the stylesheet and apply it now.
    pub fn apply_now(&self) {
        self.state.reload();
    }

    /// The stylesheet last applied.
    pub fn current(&self) -> String {
        self.state.current.read().clone()
    }

    /// Stop watching. The current style stays applied.
    pub fn stop(&mut self) {
        if let Some(subscriber) = self.subscriber.take() {
            self.watcher.unwatch_file(&self.state.path, &subscriber);
        }
    }
}

impl Drop for StyleReloader {
    fn drop(&mut self) {
        self.stop();
    }
}
