pub mod cli;
pub mod config;
pub mod logging;
pub mod page;
pub mod reader;
pub mod style;
pub mod watcher;

pub use config::Settings;
pub use page::StyledPage;
pub use reader::ContentReader;
pub use style::StyleReloader;
pub use watcher::{FileWatcher, Subscriber, WatchError, WatchEvent};
