//! Follow command: print files and re-print them on every change.
//!
//! With `--html` each file is printed as a full page carrying the user
//! stylesheet, and a stylesheet change re-prints every page.

use std::io::Write;
use std::path::PathBuf;

use crossbeam_channel::unbounded;

use crate::config::Settings;
use crate::page::StyledPage;
use crate::reader::ContentReader;
use crate::style::StyleReloader;
use crate::watcher::FileWatcher;

struct Update {
    index: usize,
    revision: u64,
    content: String,
}

/// Run follow command. With a live watcher this runs until interrupted.
pub fn run(files: Vec<PathBuf>, html: bool, settings: &Settings) -> anyhow::Result<()> {
    let watcher = FileWatcher::builder()
        .config(&settings.watcher)
        .build_or_inert();
    if watcher.is_inert() {
        eprintln!("Live reload unavailable; showing current content only.");
    }

    let style = StyleReloader::start(&watcher, settings);
    style.on_apply(|css| {
        crate::debug_event!("style", "stylesheet", "{} bytes", css.len());
    });

    let (tx, rx) = unbounded();
    let readers: Vec<ContentReader> = files
        .iter()
        .map(|path| ContentReader::new(&watcher, path))
        .collect();

    for (index, reader) in readers.iter().enumerate() {
        let tx = tx.clone();
        let send = move |revision: u64, content: &str| {
            let _ = tx.send(Update {
                index,
                revision,
                content: content.to_string(),
            });
        };
        if html {
            // The page lives on through the reader and style listeners.
            StyledPage::attach(reader, &style).on_render(send);
        } else {
            reader.on_change(send);
        }
    }
    drop(tx);

    for reader in &readers {
        reader.watch();
        if reader.revision() == 0 {
            eprintln!("Cannot read {}", reader.path().display());
        }
    }

    if watcher.is_inert() {
        // Nothing will ever change; print what was read and stop.
        for update in rx.try_iter() {
            print_update(&readers, &update)?;
        }
        return Ok(());
    }

    for update in rx.iter() {
        print_update(&readers, &update)?;
    }

    watcher.shutdown();
    Ok(())
}

fn print_update(readers: &[ContentReader], update: &Update) -> anyhow::Result<()> {
    let path = readers[update.index].path();
    let mut out = std::io::stdout().lock();
    writeln!(out, "==> {} (revision {}) <==", path.display(), update.revision)?;
    writeln!(out, "{}", update.content)?;
    out.flush()?;
    Ok(())
}
