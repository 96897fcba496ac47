//! Bidirectional propagation between a session server and the editor.
//!
//! The first inbound message creates the editable surface and installs
//! a change observer; later inbound messages replace the surface
//! content under a suppression flag so the replace never echoes back
//! to the browser.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use ghosttext_protocol::{EditorUpdate, Selection, SyncMessage};
use ghosttext_server::{ConnectHooks, SessionHandle, WebSocketServer};

use crate::{Editor, ObserverHandle, SurfaceHandle};

/// Connection-time policy options.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Open a fresh window on every handshake instead of reusing one.
    pub new_window_on_connect: bool,
    /// Editor command run on every handshake; empty disables it.
    pub window_command_on_connect: String,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            new_window_on_connect: false,
            window_command_on_connect: "focus_window".into(),
        }
    }
}

/// Bridges per-session WebSocket servers to the editor collaborator.
pub struct SyncBridge<E: Editor> {
    editor: Arc<E>,
    options: ConnectOptions,
}

impl<E: Editor> SyncBridge<E> {
    pub fn new(editor: Arc<E>, options: ConnectOptions) -> Self {
        Self { editor, options }
    }
}

impl<E: Editor> ConnectHooks for SyncBridge<E> {
    fn on_handshake(&self) {
        if !self.editor.has_window() || self.options.new_window_on_connect {
            self.editor.create_or_focus_window();
        }
        if !self.options.window_command_on_connect.is_empty() {
            self.editor
                .run_named_command(&self.options.window_command_on_connect);
        }
    }

    fn on_session_server(&self, server: &Arc<WebSocketServer>) {
        wire_session(Arc::clone(&self.editor), server);
    }
}

/// The surface a session is bound to, plus the flag that keeps
/// browser-initiated replaces from re-triggering the outbound
/// observer.
struct Binding {
    surface: SurfaceHandle,
    observer: ObserverHandle,
    suppress: Arc<AtomicBool>,
}

/// Installs message and close subscribers connecting one session
/// server to the editor.
pub fn wire_session<E: Editor>(editor: Arc<E>, server: &Arc<WebSocketServer>) {
    let binding: Arc<Mutex<Option<Binding>>> = Arc::new(Mutex::new(None));

    {
        let editor = Arc::clone(&editor);
        let binding = Arc::clone(&binding);
        server.on_message(Box::new(move |session, text| {
            let message = match SyncMessage::from_json(&text) {
                Ok(message) => message,
                Err(e) => {
                    // Drop the message, keep the connection.
                    tracing::warn!("invalid JSON from browser: {e}");
                    return;
                }
            };
            on_sync_message(&editor, &binding, session, message);
        }));
    }

    {
        let binding = Arc::clone(&binding);
        server.on_close(Box::new(move || {
            if let Some(bound) = binding.lock().take() {
                editor.unobserve(bound.observer);
            }
        }));
    }
}

fn on_sync_message<E: Editor>(
    editor: &Arc<E>,
    binding: &Arc<Mutex<Option<Binding>>>,
    session: &SessionHandle,
    message: SyncMessage,
) {
    let selections = effective_selections(&message.text, &message.selections);
    let mut bound = binding.lock();
    match bound.as_ref() {
        None => {
            let surface = editor.create_editable_surface(&message.title, &message.text);
            editor.set_surface_syntax_hint(surface, &message.url);
            // Selections are applied before the observer exists, so
            // surface setup cannot echo back to the browser.
            editor.replace_surface_content(surface, &message.text, &selections);

            let suppress = Arc::new(AtomicBool::new(false));
            let observer = editor.observe_surface_changes(surface, {
                let session = session.clone();
                let suppress = Arc::clone(&suppress);
                Box::new(move |text, selections| {
                    if suppress.load(Ordering::Acquire) {
                        return;
                    }
                    let update = EditorUpdate {
                        text: text.to_string(),
                        selections: selections.to_vec(),
                    };
                    match update.to_json() {
                        Ok(json) => {
                            if let Err(e) = session.send_text(&json) {
                                tracing::debug!("dropping editor update: {e}");
                            }
                        }
                        Err(e) => tracing::warn!("failed to serialize editor update: {e}"),
                    }
                })
            });
            *bound = Some(Binding {
                surface,
                observer,
                suppress,
            });
            tracing::info!(title = %message.title, "editable surface bound");
        }
        Some(bound) => {
            bound.suppress.store(true, Ordering::Release);
            editor.replace_surface_content(bound.surface, &message.text, &selections);
            bound.suppress.store(false, Ordering::Release);
        }
    }
}

/// An empty selection list means "caret at end of text", measured in
/// characters.
fn effective_selections(text: &str, selections: &[Selection]) -> Vec<Selection> {
    if selections.is_empty() {
        vec![Selection::caret(text.chars().count())]
    } else {
        selections.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryEditor, SyntaxMap};

    #[test]
    fn effective_selections_passes_ranges_through() {
        let ranges = vec![Selection { start: 1, end: 3 }];
        assert_eq!(effective_selections("abcdef", &ranges), ranges);
    }

    #[test]
    fn empty_selections_become_caret_at_end() {
        assert_eq!(
            effective_selections("abc", &[]),
            vec![Selection::caret(3)]
        );
        // Character offsets, not bytes.
        assert_eq!(
            effective_selections("äöü", &[]),
            vec![Selection::caret(3)]
        );
    }

    #[test]
    fn default_connect_options() {
        let options = ConnectOptions::default();
        assert!(!options.new_window_on_connect);
        assert_eq!(options.window_command_on_connect, "focus_window");
    }

    #[test]
    fn handshake_creates_window_only_when_missing() {
        let editor = Arc::new(MemoryEditor::new(SyntaxMap::default()));
        let bridge = SyncBridge::new(Arc::clone(&editor), ConnectOptions::default());

        assert!(!editor.has_window());
        bridge.on_handshake();
        assert!(editor.has_window());
        assert_eq!(editor.commands_run(), vec!["focus_window"]);

        // Second handshake reuses the window but still runs the
        // command.
        bridge.on_handshake();
        assert_eq!(editor.commands_run().len(), 2);
    }

    #[test]
    fn handshake_skips_empty_command() {
        let editor = Arc::new(MemoryEditor::new(SyntaxMap::default()));
        let options = ConnectOptions {
            window_command_on_connect: String::new(),
            ..ConnectOptions::default()
        };
        let bridge = SyncBridge::new(Arc::clone(&editor), options);

        bridge.on_handshake();
        assert!(editor.commands_run().is_empty());
    }
}
