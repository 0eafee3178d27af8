//! Standalone HTML page around rendered file content.
//!
//! [`assemble`] builds the document: a `<base>` pointing at the file's
//! directory so relative links resolve, the user stylesheet inlined in a
//! `<style>` element, and the rendered content as the body.
//! [`StyledPage`] keeps one such page current for a [`ContentReader`],
//! rebuilding it when either the content or the stylesheet changes.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::reader::ContentReader;
use crate::style::StyleReloader;
use crate::watcher::paths;

type PageListener = dyn Fn(u64, &str) + Send + Sync;

/// Build the HTML document for `body` rendered from the file at `source`.
pub fn assemble(source: &Path, css: &str, body: &str) -> String {
    let mut html = String::with_capacity(body.len() + css.len() + 256);
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");

    let source = paths::lexical_absolute(source);
    if let Some(title) = source.file_name() {
        let _ = writeln!(
            html,
            "<title>{}</title>",
            escape(&title.to_string_lossy())
        );
    }
    if let Some(dir) = source.parent() {
        let _ = writeln!(html, "<base href=\"{}\">", escape(&base_href(dir)));
    }
    if !css.is_empty() {
        let _ = writeln!(html, "<style type=\"text/css\">\n{css}\n</style>");
    }

    html.push_str("</head>\n<body>\n");
    html.push_str(body);
    html.push_str("\n</body>\n</html>\n");
    html
}

fn base_href(dir: &Path) -> String {
    let dir = dir.to_string_lossy().replace('\\', "/");
    let dir = dir.trim_end_matches('/');
    if dir.starts_with('/') {
        format!("file://{dir}/")
    } else {
        format!("file:///{dir}/")
    }
}

/// Escape text for an HTML text node or attribute value.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

struct Parts {
    css: String,
    /// Revision and content of the last render; `None` until the first one.
    body: Option<(u64, String)>,
}

struct PageState {
    source: PathBuf,
    parts: Mutex<Parts>,
    listeners: Mutex<Vec<Arc<PageListener>>>,
}

impl PageState {
    fn set_body(&self, revision: u64, content: &str) {
        let html = {
            let mut parts = self.parts.lock();
            parts.body = Some((revision, content.to_string()));
            assemble(&self.source, &parts.css, content)
        };
        self.emit(revision, &html);
    }

    fn set_css(&self, css: &str) {
        let page = {
            let mut parts = self.parts.lock();
            if parts.css == css {
                return;
            }
            parts.css = css.to_string();
            parts
                .body
                .as_ref()
                .map(|(revision, body)| (*revision, assemble(&self.source, css, body)))
        };
        if let Some((revision, html)) = page {
            crate::debug_event!("page", "restyled", "{}", self.source.display());
            self.emit(revision, &html);
        }
    }

    fn emit(&self, revision: u64, html: &str) {
        let listeners: Vec<_> = self.listeners.lock().clone();
        for listener in listeners {
            listener(revision, html);
        }
    }
}

/// HTML page for one reader, restyled whenever the stylesheet changes.
pub struct StyledPage {
    state: Arc<PageState>,
}

impl StyledPage {
    /// Follow `reader` and `style`. Attach before the reader starts
    /// watching so its first render is not missed.
    pub fn attach(reader: &ContentReader, style: &StyleReloader) -> Self {
        let state = Arc::new(PageState {
            source: reader.path().to_path_buf(),
            parts: Mutex::new(Parts {
                css: style.current(),
                body: None,
            }),
            listeners: Mutex::new(Vec::new()),
        });

        if reader.revision() > 0 {
            state.set_body(reader.revision(), &reader.content());
        }

        let target = Arc::clone(&state);
        reader.on_change(move |revision, content| target.set_body(revision, content));
        let target = Arc::clone(&state);
        style.on_apply(move |css| target.set_css(css));

        Self { state }
    }

    /// Call `listener` with the reader revision and the full page each
    /// time the page is rebuilt.
    pub fn on_render(&self, listener: impl Fn(u64, &str) + Send + Sync + 'static) {
        self.state.listeners.lock().push(Arc::new(listener));
    }

    /// The current page, or `None` before the first render.
    pub fn html(&self) -> Option<String> {
        let parts = self.state.parts.lock();
        parts
            .body
            .as_ref()
            .map(|(_, body)| assemble(&self.state.source, &parts.css, body))
    }
}
