//! File watch service with in-process subscribers.
//!
//! Components subscribe callbacks to individual files or to directories and
//! are told when they change. One native (non-recursive) registration is
//! kept per directory no matter how many subscribers sit behind it.
//!
//! # Architecture
//!
//! ```text
//!  notify backend ──raw batches──> dispatcher thread
//!                                    - drain, group by directory
//!                                    │
//!                                    ▼ one task per directory
//!  FileWatcher ──tasks──> confinement thread
//!  (any thread)            - WatchRegistry (files, directories, keys)
//!                          - fires subscriber callbacks
//! ```
//!
//! All registry state lives on the confinement thread. Callbacks run there
//! too and may subscribe or unsubscribe re-entrantly.

mod backend;
mod confinement;
mod dispatcher;
mod error;
mod event;
mod file_watcher;
pub mod paths;
mod registry;
mod subscriber;
mod subscribers;

pub use backend::{BackendFactory, ManualBackend, NativeBackend, NotifyBackend, RawBatch};
pub use error::WatchError;
pub use event::{ChangeKind, DirectoryEvent, FileEvent, PathKind, WatchEvent};
pub use file_watcher::{DEFAULT_DRAIN_LIMIT, FileWatcher, FileWatcherBuilder, WatchStats};
pub use registry::{KeyVerdict, RawChange, WatchRegistry, WatchedPath, process_batch};
pub use subscriber::Subscriber;
pub use subscribers::{FireSnapshot, SubscriberList};
