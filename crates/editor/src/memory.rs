//! In-memory editor collaborator.
//!
//! Surfaces are plain structs and observers fire synchronously on
//! every content replacement — the same shape a real editor's
//! modification listener has. Backs the standalone binary and the
//! bridge tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use ghosttext_protocol::Selection;

use crate::{ChangeCallback, Editor, ObserverHandle, SurfaceHandle, WindowHandle};

/// `host_to_syntax` policy: maps URL fragments to syntax identifiers.
#[derive(Debug, Clone, Default)]
pub struct SyntaxMap {
    pub host_to_syntax: BTreeMap<String, String>,
    pub default_syntax: String,
}

impl SyntaxMap {
    /// Resolves a syntax for the given URL. Every fragment contained
    /// in the URL matches; the last one (in fragment order) wins, and
    /// the default covers the rest.
    pub fn resolve(&self, url: &str) -> String {
        let mut syntax = None;
        for (fragment, name) in &self.host_to_syntax {
            if url.contains(fragment) {
                syntax = Some(name.clone());
            }
        }
        syntax.unwrap_or_else(|| self.default_syntax.clone())
    }
}

/// Snapshot of one editable surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    pub title: String,
    pub text: String,
    pub selections: Vec<Selection>,
    pub syntax: String,
}

struct ObserverEntry {
    surface: u64,
    callback: Arc<Mutex<ChangeCallback>>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    window: Option<WindowHandle>,
    surfaces: HashMap<u64, Surface>,
    observers: HashMap<u64, ObserverEntry>,
    commands: Vec<String>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// An [`Editor`] holding everything in memory.
pub struct MemoryEditor {
    syntax: SyntaxMap,
    state: Mutex<State>,
}

impl MemoryEditor {
    pub fn new(syntax: SyntaxMap) -> Self {
        Self {
            syntax,
            state: Mutex::new(State::default()),
        }
    }

    /// Snapshot of a surface, for tests and status displays.
    pub fn surface(&self, surface: SurfaceHandle) -> Option<Surface> {
        self.state.lock().surfaces.get(&surface.0).cloned()
    }

    pub fn surface_count(&self) -> usize {
        self.state.lock().surfaces.len()
    }

    /// The most recently created surface.
    pub fn latest_surface(&self) -> Option<SurfaceHandle> {
        let state = self.state.lock();
        state.surfaces.keys().max().copied().map(SurfaceHandle)
    }

    /// Snapshots of every surface, in creation order.
    pub fn surfaces(&self) -> Vec<(SurfaceHandle, Surface)> {
        let state = self.state.lock();
        let mut all: Vec<_> = state
            .surfaces
            .iter()
            .map(|(id, surface)| (SurfaceHandle(*id), surface.clone()))
            .collect();
        all.sort_by_key(|(handle, _)| handle.0);
        all
    }

    /// Commands recorded by [`Editor::run_named_command`], oldest
    /// first.
    pub fn commands_run(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// Number of live change observers.
    pub fn observer_count(&self) -> usize {
        self.state.lock().observers.len()
    }

    /// Invokes the observers of `surface_id` with the state lock
    /// released: a callback is free to call back into the editor.
    fn notify(&self, surface_id: u64) {
        let (text, selections, callbacks) = {
            let state = self.state.lock();
            let Some(surface) = state.surfaces.get(&surface_id) else {
                return;
            };
            let callbacks: Vec<Arc<Mutex<ChangeCallback>>> = state
                .observers
                .values()
                .filter(|entry| entry.surface == surface_id)
                .map(|entry| Arc::clone(&entry.callback))
                .collect();
            (surface.text.clone(), surface.selections.clone(), callbacks)
        };
        for callback in callbacks {
            (*callback.lock())(&text, &selections);
        }
    }
}

impl Editor for MemoryEditor {
    fn has_window(&self) -> bool {
        self.state.lock().window.is_some()
    }

    fn create_or_focus_window(&self) -> WindowHandle {
        let mut state = self.state.lock();
        match state.window {
            Some(window) => window,
            None => {
                let window = WindowHandle(state.next_id());
                state.window = Some(window);
                tracing::debug!("window created");
                window
            }
        }
    }

    fn run_named_command(&self, name: &str) {
        tracing::debug!(command = name, "running editor command");
        self.state.lock().commands.push(name.to_string());
    }

    fn create_editable_surface(&self, title: &str, text: &str) -> SurfaceHandle {
        let mut state = self.state.lock();
        let id = state.next_id();
        state.surfaces.insert(
            id,
            Surface {
                title: title.to_string(),
                text: text.to_string(),
                selections: Vec::new(),
                syntax: self.syntax.default_syntax.clone(),
            },
        );
        SurfaceHandle(id)
    }

    fn set_surface_syntax_hint(&self, surface: SurfaceHandle, url: &str) {
        let syntax = self.syntax.resolve(url);
        if let Some(entry) = self.state.lock().surfaces.get_mut(&surface.0) {
            tracing::debug!(syntax = %syntax, "syntax applied");
            entry.syntax = syntax;
        }
    }

    fn replace_surface_content(
        &self,
        surface: SurfaceHandle,
        text: &str,
        selections: &[Selection],
    ) {
        {
            let mut state = self.state.lock();
            let Some(entry) = state.surfaces.get_mut(&surface.0) else {
                return;
            };
            entry.text = text.to_string();
            entry.selections = selections.to_vec();
        }
        self.notify(surface.0);
    }

    fn observe_surface_changes(
        &self,
        surface: SurfaceHandle,
        callback: ChangeCallback,
    ) -> ObserverHandle {
        let mut state = self.state.lock();
        let id = state.next_id();
        state.observers.insert(
            id,
            ObserverEntry {
                surface: surface.0,
                callback: Arc::new(Mutex::new(callback)),
            },
        );
        ObserverHandle(id)
    }

    fn unobserve(&self, observer: ObserverHandle) {
        self.state.lock().observers.remove(&observer.0);
    }
}
